//! Enrolled identity embeddings.
//!
//! Readers get an immutable `Arc<Gallery>` snapshot; writers build the next
//! gallery off to the side and swap the pointer, so a matcher scanning a
//! snapshot never sees a half-applied update.

use facegate_core::{Embedding, Gallery};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum StoreError {
    #[error("invalid embedding: {0}")]
    InvalidEmbedding(String),
    #[error("identity label must not be empty")]
    EmptyLabel,
}

pub struct EmbeddingStore {
    dim: usize,
    /// Serialises writers so concurrent puts never lose each other's entries.
    writer: Mutex<()>,
    current: RwLock<Arc<Gallery>>,
}

impl EmbeddingStore {
    /// Empty store accepting only `dim`-length embeddings.
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            writer: Mutex::new(()),
            current: RwLock::new(Arc::new(Gallery::new())),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Insert or overwrite `label`. Returns `true` when an entry was replaced.
    pub fn put(&self, label: &str, embedding: Embedding) -> Result<bool, StoreError> {
        if label.is_empty() {
            return Err(StoreError::EmptyLabel);
        }
        self.validate(&embedding)?;

        let _writer = self.writer.lock();
        let mut next = Gallery::clone(&self.snapshot());
        let replaced = next.insert(label.to_string(), embedding).is_some();
        let next = Arc::new(next);

        *self.current.write() = next;

        tracing::debug!(label, replaced, "embedding stored");
        Ok(replaced)
    }

    /// The whole gallery as of now. Later puts do not affect it.
    pub fn snapshot(&self) -> Arc<Gallery> {
        Arc::clone(&self.current.read())
    }

    pub fn len(&self) -> usize {
        self.current.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn validate(&self, embedding: &Embedding) -> Result<(), StoreError> {
        let values = &embedding.values;
        if values.is_empty() {
            return Err(StoreError::InvalidEmbedding("empty vector".into()));
        }
        if values.len() != self.dim {
            return Err(StoreError::InvalidEmbedding(format!(
                "expected {} dimensions, got {}",
                self.dim,
                values.len()
            )));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(StoreError::InvalidEmbedding("non-finite component".into()));
        }
        if embedding.norm() == 0.0 {
            return Err(StoreError::InvalidEmbedding("zero norm".into()));
        }
        Ok(())
    }
}
