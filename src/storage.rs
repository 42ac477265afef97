use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

/// Opaque blob persistence consumed by the history store.
pub trait BlobStorage: Send + Sync {
    fn load(&self) -> io::Result<Vec<u8>>;
    fn save(&self, data: &[u8]) -> io::Result<()>;
    /// Delete the backing blob. Missing is not an error.
    fn remove(&self) -> io::Result<()>;
    fn path(&self) -> &Path;
}

const MAGIC: &[u8; 4] = b"UHST";
const FORMAT_VERSION: u8 = 1;
// magic(4) + version(1) + blake3(payload)(32)
const HEADER_LEN: usize = 4 + 1 + 32;
const ZSTD_LEVEL: i32 = 3;

/// Single-file blob storage: header + zstd payload, replaced atomically.
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        FileStorage { path: path.as_ref().to_path_buf() }
    }

    fn frame(data: &[u8]) -> io::Result<Vec<u8>> {
        let compressed = zstd::bulk::compress(data, ZSTD_LEVEL)?;
        let mut out = Vec::with_capacity(HEADER_LEN + compressed.len());
        out.extend_from_slice(MAGIC);
        out.push(FORMAT_VERSION);
        out.extend_from_slice(blake3::hash(data).as_bytes());
        out.extend_from_slice(&compressed);
        Ok(out)
    }

    fn unframe(raw: &[u8]) -> io::Result<Vec<u8>> {
        if raw.len() < HEADER_LEN || &raw[0..4] != MAGIC {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "not a history file"));
        }
        if raw[4] != FORMAT_VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unsupported history format version {}", raw[4]),
            ));
        }
        let mut decoder = zstd::stream::read::Decoder::new(&raw[HEADER_LEN..])?;
        let mut data = Vec::new();
        io::copy(&mut decoder, &mut data)?;
        if blake3::hash(&data).as_bytes() != &raw[5..HEADER_LEN] {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "history checksum mismatch"));
        }
        Ok(data)
    }
}

impl BlobStorage for FileStorage {
    fn load(&self) -> io::Result<Vec<u8>> {
        let raw = fs::read(&self.path)?;
        Self::unframe(&raw)
    }

    fn save(&self, data: &[u8]) -> io::Result<()> {
        if data.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "refusing to store an empty blob"));
        }
        let framed = Self::frame(data)?;
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(&framed)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        debug!("Wrote {} bytes to {}", framed.len(), self.path.display());
        Ok(())
    }

    fn remove(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

/// In-process storage. Keeps the blob in memory and counts calls; used for
/// ephemeral sessions and tests.
#[derive(Default)]
pub struct MemoryStorage {
    path: PathBuf,
    blob: Mutex<Option<Vec<u8>>>,
    pub loads: AtomicUsize,
    pub saves: AtomicUsize,
    pub removes: AtomicUsize,
    /// When set, every save fails with an I/O error.
    pub fail_saves: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        MemoryStorage { path: PathBuf::from(":memory:"), ..Default::default() }
    }

    pub fn with_blob(blob: Vec<u8>) -> Self {
        let storage = Self::new();
        *storage.blob_slot() = Some(blob);
        storage
    }

    pub fn blob(&self) -> Option<Vec<u8>> {
        self.blob_slot().clone()
    }

    pub fn set_blob(&self, blob: Option<Vec<u8>>) {
        *self.blob_slot() = blob;
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    fn blob_slot(&self) -> MutexGuard<'_, Option<Vec<u8>>> {
        self.blob.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl BlobStorage for MemoryStorage {
    fn load(&self) -> io::Result<Vec<u8>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.blob_slot()
            .clone()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no blob stored"))
    }

    fn save(&self, data: &[u8]) -> io::Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "save disabled"));
        }
        if data.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "refusing to store an empty blob"));
        }
        *self.blob_slot() = Some(data.to_vec());
        Ok(())
    }

    fn remove(&self) -> io::Result<()> {
        self.removes.fetch_add(1, Ordering::SeqCst);
        *self.blob_slot() = None;
        Ok(())
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

// Lets callers keep a handle on a storage they hand to the store.
impl<S: BlobStorage + ?Sized> BlobStorage for Arc<S> {
    fn load(&self) -> io::Result<Vec<u8>> {
        (**self).load()
    }

    fn save(&self, data: &[u8]) -> io::Result<()> {
        (**self).save(data)
    }

    fn remove(&self) -> io::Result<()> {
        (**self).remove()
    }

    fn path(&self) -> &Path {
        (**self).path()
    }
}
