use std::sync::Arc;

use bytes::Bytes;

use crate::bloom::FilterPolicy;

/// Accumulates the user keys of a table under construction and emits the
/// serialized filter for its filter block. Keys arrive incrementally as
/// data blocks fill; the filter itself covers the whole file.
pub struct FilterBlockBuilder {
    policy: Arc<dyn FilterPolicy>,
    keys: Vec<Vec<u8>>,
}

impl FilterBlockBuilder {
    pub fn new(policy: Arc<dyn FilterPolicy>) -> Self {
        FilterBlockBuilder {
            policy,
            keys: Vec::new(),
        }
    }

    pub fn add_key(&mut self, user_key: &[u8]) {
        self.keys.push(user_key.to_vec());
    }

    pub fn finish(self) -> Vec<u8> {
        self.policy.create_filter(&self.keys)
    }
}

/// Wraps a filter block read back from a table file.
pub struct FilterBlockReader {
    policy: Arc<dyn FilterPolicy>,
    data: Bytes,
}

impl FilterBlockReader {
    pub fn new(policy: Arc<dyn FilterPolicy>, data: Bytes) -> Self {
        FilterBlockReader { policy, data }
    }

    /// False means the key is definitely absent from this file.
    pub fn may_match(&self, user_key: &[u8]) -> bool {
        self.policy.may_match(&self.data, user_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bloom::BloomFilterPolicy;

    #[test]
    fn built_filter_matches_its_keys() {
        let policy: Arc<dyn FilterPolicy> = Arc::new(BloomFilterPolicy::default());
        let mut builder = FilterBlockBuilder::new(Arc::clone(&policy));
        for i in 0..100u32 {
            builder.add_key(format!("key_{i}").as_bytes());
        }
        let reader = FilterBlockReader::new(policy, Bytes::from(builder.finish()));
        for i in 0..100u32 {
            assert!(reader.may_match(format!("key_{i}").as_bytes()));
        }
        // Absent keys are mostly rejected
        let misses = (0..100u32)
            .filter(|i| !reader.may_match(format!("other_{i}").as_bytes()))
            .count();
        assert!(misses > 90);
    }
}
