use std::collections::HashMap;
use std::hash::Hash;

/// Fixed-capacity LRU cache.
///
/// Entries live in an arena of doubly-linked nodes; a HashMap gives O(1)
/// key lookup and the list maintains recency order. Capacity is measured
/// in "charge" units — bytes for the block cache, open handles for the
/// table cache — and inserting past capacity evicts from the cold end.
pub struct LruCache<K, V> {
    capacity: usize,
    usage: usize,
    map: HashMap<K, usize>,
    nodes: Vec<Node<K, V>>,
    free: Vec<usize>,
    /// Most-recently-used end; `None` when empty.
    head: Option<usize>,
    /// Least-recently-used end.
    tail: Option<usize>,
}

struct Node<K, V> {
    key: K,
    value: V,
    charge: usize,
    prev: Option<usize>,
    next: Option<usize>,
}

impl<K: Eq + Hash + Clone, V: Clone> LruCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        LruCache {
            capacity,
            usage: 0,
            map: HashMap::new(),
            nodes: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
        }
    }

    /// Look up a key, marking it most recently used.
    pub fn get(&mut self, key: &K) -> Option<V> {
        let index = *self.map.get(key)?;
        self.move_to_head(index);
        Some(self.nodes[index].value.clone())
    }

    /// Insert or replace; returns entries evicted to stay within capacity.
    pub fn insert(&mut self, key: K, value: V, charge: usize) -> Vec<(K, V)> {
        if let Some(&index) = self.map.get(&key) {
            self.usage = self.usage - self.nodes[index].charge + charge;
            self.nodes[index].value = value;
            self.nodes[index].charge = charge;
            self.move_to_head(index);
        } else {
            let index = self.alloc(key.clone(), value, charge);
            self.map.insert(key, index);
            self.push_head(index);
            self.usage += charge;
        }
        self.evict_over_capacity()
    }

    /// Drop a key if present; returns its value.
    pub fn erase(&mut self, key: &K) -> Option<V> {
        let index = self.map.remove(key)?;
        self.unlink(index);
        self.usage -= self.nodes[index].charge;
        let value = self.nodes[index].value.clone();
        self.free.push(index);
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Total charge currently held.
    pub fn usage(&self) -> usize {
        self.usage
    }

    fn evict_over_capacity(&mut self) -> Vec<(K, V)> {
        let mut evicted = Vec::new();
        while self.usage > self.capacity && self.map.len() > 1 {
            let Some(tail) = self.tail else { break };
            let key = self.nodes[tail].key.clone();
            if let Some(value) = self.erase(&key) {
                evicted.push((key, value));
            }
        }
        evicted
    }

    fn alloc(&mut self, key: K, value: V, charge: usize) -> usize {
        let node = Node {
            key,
            value,
            charge,
            prev: None,
            next: None,
        };
        if let Some(index) = self.free.pop() {
            self.nodes[index] = node;
            index
        } else {
            self.nodes.push(node);
            self.nodes.len() - 1
        }
    }

    fn push_head(&mut self, index: usize) {
        self.nodes[index].prev = None;
        self.nodes[index].next = self.head;
        if let Some(old) = self.head {
            self.nodes[old].prev = Some(index);
        }
        self.head = Some(index);
        if self.tail.is_none() {
            self.tail = Some(index);
        }
    }

    fn unlink(&mut self, index: usize) {
        let (prev, next) = (self.nodes[index].prev, self.nodes[index].next);
        match prev {
            Some(p) => self.nodes[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.nodes[n].prev = prev,
            None => self.tail = prev,
        }
        self.nodes[index].prev = None;
        self.nodes[index].next = None;
    }

    fn move_to_head(&mut self, index: usize) {
        if self.head == Some(index) {
            return;
        }
        self.unlink(index);
        self.push_head(index);
    }
}
