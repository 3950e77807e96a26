use std::collections::HashMap;

use async_trait::async_trait;

use crate::services::MetadataReader;
use crate::Hash;

/// Metadata reader that maps every edge to one assertion and reports stored unrivaled times.
#[derive(Debug, Clone, Default)]
pub struct MockMetadataReader {
    assertion_id: Hash,
    overrides: HashMap<Hash, Hash>,
    unrivaled_blocks: HashMap<Hash, u64>,
}

impl MockMetadataReader {
    /// Every edge resolves to `assertion_id`.
    pub fn new(assertion_id: Hash) -> Self {
        Self {
            assertion_id,
            ..Default::default()
        }
    }

    /// Resolves `edge_id` to a different assertion.
    pub fn with_edge_assertion(mut self, edge_id: Hash, assertion_id: Hash) -> Self {
        self.overrides.insert(edge_id, assertion_id);
        self
    }

    /// Sets the unrivaled block count reported for `assertion_id`.
    pub fn with_unrivaled_blocks(mut self, assertion_id: Hash, blocks: u64) -> Self {
        self.unrivaled_blocks.insert(assertion_id, blocks);
        self
    }
}

#[async_trait]
impl MetadataReader for MockMetadataReader {
    async fn top_level_assertion(&self, edge_id: &Hash) -> anyhow::Result<Hash> {
        Ok(*self.overrides.get(edge_id).unwrap_or(&self.assertion_id))
    }

    async fn assertion_unrivaled_blocks(&self, assertion_id: &Hash) -> anyhow::Result<u64> {
        Ok(self
            .unrivaled_blocks
            .get(assertion_id)
            .copied()
            .unwrap_or_default())
    }
}
