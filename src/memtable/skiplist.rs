use rand::Rng;

use crate::comparator::{Comparator, InternalKeyComparator};

/// Maximum height of the skip list.
pub const MAX_HEIGHT: usize = 12;

/// Each level is kept with probability 1/4. The higher branching factor
/// keeps the list shorter and cheaper per node than a 1/2 coin flip.
const BRANCHING: u32 = 4;

/// A single node in the skip list.
///
/// Nodes live in an arena (`Vec`) and link by index, so there is no
/// unsafe pointer juggling and iteration has good cache locality. Each
/// node has `height` forward links. Level 0 contains all nodes (a regular
/// linked list); higher levels skip over nodes, enabling O(log n)
/// average-case search.
///
/// ```text
/// Level 3:  HEAD ──────────────────────────────► 50 ──────────► NIL
/// Level 2:  HEAD ──────────► 20 ────────────────► 50 ──────────► NIL
/// Level 1:  HEAD ──► 10 ──► 20 ────► 35 ────────► 50 ──► 60 ──► NIL
/// Level 0:  HEAD ──► 10 ──► 20 ──► 25 ──► 35 ──► 50 ──► 60 ──► 70 ► NIL
/// ```
struct SkipNode {
    key: Vec<u8>,
    value: Vec<u8>,
    forward: Vec<Option<usize>>,
}

/// A probabilistic sorted container keyed by encoded internal keys.
///
/// Insertion is the only mutation — overwrites never happen because every
/// internal key carries a unique sequence number. Average case: O(log n)
/// insert and seek, O(n) iteration.
pub struct SkipList {
    /// Arena; index 0 is the head sentinel (empty key, never yielded).
    nodes: Vec<SkipNode>,
    cmp: InternalKeyComparator,
    height: usize,
    len: usize,
    size_bytes: usize,
}

impl SkipList {
    pub fn new(cmp: InternalKeyComparator) -> Self {
        let head = SkipNode {
            key: Vec::new(),
            value: Vec::new(),
            forward: vec![None; MAX_HEIGHT],
        };
        SkipList {
            nodes: vec![head],
            cmp,
            height: 1,
            len: 0,
            size_bytes: 0,
        }
    }

    /// Insert an internal key and its value.
    ///
    /// Algorithm:
    ///   1. Find the insertion point at each level (track predecessors)
    ///   2. Generate a random height for the new node
    ///   3. Splice into the list at each level up to that height
    pub fn insert(&mut self, key: Vec<u8>, value: Vec<u8>) {
        let mut prev = [0usize; MAX_HEIGHT];
        let mut node = 0usize;
        for level in (0..self.height).rev() {
            while let Some(next) = self.nodes[node].forward[level] {
                if self.cmp.compare(&self.nodes[next].key, &key).is_lt() {
                    node = next;
                } else {
                    break;
                }
            }
            prev[level] = node;
        }

        let height = self.random_height();
        if height > self.height {
            for p in prev.iter_mut().take(height).skip(self.height) {
                *p = 0; // new levels start at the head
            }
            self.height = height;
        }

        self.size_bytes += key.len() + value.len() + height * std::mem::size_of::<usize>();
        let new_index = self.nodes.len();
        let mut forward = vec![None; height];
        for (level, f) in forward.iter_mut().enumerate() {
            *f = self.nodes[prev[level]].forward[level];
        }
        self.nodes.push(SkipNode {
            key,
            value,
            forward,
        });
        for level in 0..height {
            self.nodes[prev[level]].forward[level] = Some(new_index);
        }
        self.len += 1;
    }

    /// Arena index of the first node with key >= target, if any.
    pub fn seek(&self, target: &[u8]) -> Option<usize> {
        let mut node = 0usize;
        for level in (0..self.height).rev() {
            while let Some(next) = self.nodes[node].forward[level] {
                if self.cmp.compare(&self.nodes[next].key, target).is_lt() {
                    node = next;
                } else {
                    break;
                }
            }
        }
        self.nodes[node].forward[0]
    }

    /// Arena index of the last node with key < target, if any.
    pub fn seek_before(&self, target: &[u8]) -> Option<usize> {
        let mut node = 0usize;
        for level in (0..self.height).rev() {
            while let Some(next) = self.nodes[node].forward[level] {
                if self.cmp.compare(&self.nodes[next].key, target).is_lt() {
                    node = next;
                } else {
                    break;
                }
            }
        }
        if node == 0 { None } else { Some(node) }
    }

    /// Arena index of the first node, if any.
    pub fn first(&self) -> Option<usize> {
        self.nodes[0].forward[0]
    }

    /// Arena index of the last node, if any.
    pub fn last(&self) -> Option<usize> {
        let mut node = 0usize;
        for level in (0..self.height).rev() {
            while let Some(next) = self.nodes[node].forward[level] {
                node = next;
            }
        }
        if node == 0 { None } else { Some(node) }
    }

    /// Successor of the node at `index` in key order.
    pub fn next_of(&self, index: usize) -> Option<usize> {
        self.nodes[index].forward[0]
    }

    pub fn key_at(&self, index: usize) -> &[u8] {
        &self.nodes[index].key
    }

    pub fn value_at(&self, index: usize) -> &[u8] {
        &self.nodes[index].value
    }

    /// Number of entries in the skip list.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Approximate memory usage in bytes.
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    fn random_height(&self) -> usize {
        let mut height = 1;
        let mut rng = rand::thread_rng();
        while height < MAX_HEIGHT && rng.gen_ratio(1, BRANCHING) {
            height += 1;
        }
        height
    }
}
