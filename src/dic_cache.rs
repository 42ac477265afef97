use fxhash::FxHashMap;

// Bounded recency cache keyed by 64-bit fingerprints.
// Nodes live in a dense arena (Vec) linked by index into a recency list:
// head = most recently used, tail = least recently used. The map resolves a
// key to its arena slot. Erase compacts with swap_remove so the arena never
// holds dead slots.

const NIL: usize = usize::MAX;

#[derive(Debug)]
struct Node<V> {
    key: u64,
    value: V,
    prev: usize,
    next: usize,
}

#[derive(Debug)]
pub struct DicCache<V> {
    index: FxHashMap<u64, usize>,
    nodes: Vec<Node<V>>,
    head: usize,
    tail: usize,
    capacity: usize,
}

impl<V> DicCache<V> {
    /// Create a cache holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        DicCache {
            index: FxHashMap::default(),
            nodes: Vec::new(),
            head: NIL,
            tail: NIL,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, key: u64) -> bool {
        self.index.contains_key(&key)
    }

    /// Returns the slot for `key`, creating a default value when absent.
    /// A new key evicts the least recently used entry if the cache is full.
    pub fn insert(&mut self, key: u64) -> &mut V
    where
        V: Default,
    {
        if let Some(&idx) = self.index.get(&key) {
            self.promote(idx);
            return &mut self.nodes[idx].value;
        }
        let idx = self.allocate(key, V::default());
        &mut self.nodes[idx].value
    }

    /// Insert or overwrite `key` with `value`, promoting it to most recently used.
    pub fn insert_value(&mut self, key: u64, value: V) -> &mut V {
        if let Some(&idx) = self.index.get(&key) {
            self.promote(idx);
            self.nodes[idx].value = value;
            return &mut self.nodes[idx].value;
        }
        let idx = self.allocate(key, value);
        &mut self.nodes[idx].value
    }

    /// Lookup that promotes on hit and never allocates on miss.
    pub fn lookup_without_insert(&mut self, key: u64) -> Option<&V> {
        let idx = *self.index.get(&key)?;
        self.promote(idx);
        Some(&self.nodes[idx].value)
    }

    pub fn mutable_lookup_without_insert(&mut self, key: u64) -> Option<&mut V> {
        let idx = *self.index.get(&key)?;
        self.promote(idx);
        Some(&mut self.nodes[idx].value)
    }

    /// Read without touching recency order.
    pub fn peek(&self, key: u64) -> Option<&V> {
        self.index.get(&key).map(|&idx| &self.nodes[idx].value)
    }

    pub fn peek_mut(&mut self, key: u64) -> Option<&mut V> {
        let idx = *self.index.get(&key)?;
        Some(&mut self.nodes[idx].value)
    }

    /// Remove `key` if present. Returns the removed value.
    pub fn erase(&mut self, key: u64) -> Option<V> {
        let idx = self.index.remove(&key)?;
        self.unlink(idx);
        let last = self.nodes.len() - 1;
        let removed = self.nodes.swap_remove(idx);
        if idx != last {
            // The former last node now sits at idx: repoint its neighbours.
            let (moved_key, prev, next) = {
                let moved = &self.nodes[idx];
                (moved.key, moved.prev, moved.next)
            };
            self.index.insert(moved_key, idx);
            if prev != NIL {
                self.nodes[prev].next = idx;
            } else {
                self.head = idx;
            }
            if next != NIL {
                self.nodes[next].prev = idx;
            } else {
                self.tail = idx;
            }
        }
        Some(removed.value)
    }

    pub fn clear(&mut self) {
        self.index.clear();
        self.nodes.clear();
        self.head = NIL;
        self.tail = NIL;
    }

    /// Most recently used value.
    pub fn head(&self) -> Option<&V> {
        self.nodes.get(self.head).map(|n| &n.value)
    }

    pub fn head_key(&self) -> Option<u64> {
        self.nodes.get(self.head).map(|n| n.key)
    }

    /// Iterate from most recently used to least recently used.
    pub fn iter(&self) -> Iter<'_, V> {
        Iter {
            nodes: &self.nodes,
            cursor: self.head,
            remaining: self.nodes.len(),
        }
    }

    fn allocate(&mut self, key: u64, value: V) -> usize {
        if self.nodes.len() >= self.capacity {
            // Reuse the LRU slot in place.
            let idx = self.tail;
            self.unlink(idx);
            let evicted = self.nodes[idx].key;
            self.index.remove(&evicted);
            self.nodes[idx].key = key;
            self.nodes[idx].value = value;
            self.push_front(idx);
            self.index.insert(key, idx);
            return idx;
        }
        let idx = self.nodes.len();
        self.nodes.push(Node { key, value, prev: NIL, next: NIL });
        self.push_front(idx);
        self.index.insert(key, idx);
        idx
    }

    fn promote(&mut self, idx: usize) {
        if self.head == idx {
            return;
        }
        self.unlink(idx);
        self.push_front(idx);
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = (self.nodes[idx].prev, self.nodes[idx].next);
        if prev != NIL {
            self.nodes[prev].next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            self.nodes[next].prev = prev;
        } else {
            self.tail = prev;
        }
        self.nodes[idx].prev = NIL;
        self.nodes[idx].next = NIL;
    }

    fn push_front(&mut self, idx: usize) {
        self.nodes[idx].prev = NIL;
        self.nodes[idx].next = self.head;
        if self.head != NIL {
            self.nodes[self.head].prev = idx;
        } else {
            self.tail = idx;
        }
        self.head = idx;
    }
}

pub struct Iter<'a, V> {
    nodes: &'a [Node<V>],
    cursor: usize,
    remaining: usize,
}

impl<'a, V> Iterator for Iter<'a, V> {
    type Item = (u64, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let node = self.nodes.get(self.cursor)?;
        self.cursor = node.next;
        self.remaining -= 1;
        Some((node.key, &node.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'a, V> IntoIterator for &'a DicCache<V> {
    type Item = (u64, &'a V);
    type IntoIter = Iter<'a, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
