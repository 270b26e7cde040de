//! Repository abstraction
//!
//! Triggers, commands, actions and sequences are stored behind a small CRUD
//! contract with last-write-wins semantics per id. The in-memory
//! implementation is what tests and the binary use; a persistent store only
//! has to implement [`Repository`].

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Repository errors
#[derive(Debug, Clone, Error)]
pub enum RepositoryError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Result type for repository operations
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Anything stored in a repository
pub trait Record: Clone + Send + Sync + 'static {
    /// Primary key
    fn record_id(&self) -> &str;
}

/// CRUD contract for one record type
#[async_trait]
pub trait Repository<T: Record>: Send + Sync {
    /// All records, in no particular order
    async fn list(&self) -> RepositoryResult<Vec<T>>;

    /// A single record by id
    async fn get(&self, id: &str) -> RepositoryResult<Option<T>>;

    /// Insert or replace by id
    async fn upsert(&self, record: T) -> RepositoryResult<()>;

    /// Remove by id, returning whether anything was removed
    async fn delete(&self, id: &str) -> RepositoryResult<bool>;
}

/// Shared handle to a repository
pub type SharedRepository<T> = Arc<dyn Repository<T>>;

/// In-memory repository backed by a concurrent map
pub struct MemoryRepository<T: Record> {
    records: DashMap<String, T>,
}

impl<T: Record> MemoryRepository<T> {
    /// Create an empty repository
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    /// Create a repository pre-filled with records
    pub fn with_records(records: impl IntoIterator<Item = T>) -> Self {
        let repo = Self::new();
        for record in records {
            repo.records.insert(record.record_id().to_string(), record);
        }
        repo
    }

    /// Record count
    pub fn count(&self) -> usize {
        self.records.len()
    }
}

impl<T: Record> Default for MemoryRepository<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Record> Repository<T> for MemoryRepository<T> {
    async fn list(&self) -> RepositoryResult<Vec<T>> {
        Ok(self.records.iter().map(|r| r.value().clone()).collect())
    }

    async fn get(&self, id: &str) -> RepositoryResult<Option<T>> {
        Ok(self.records.get(id).map(|r| r.value().clone()))
    }

    async fn upsert(&self, record: T) -> RepositoryResult<()> {
        let id = record.record_id().to_string();
        debug!(id = %id, "Upserting record");
        self.records.insert(id, record);
        Ok(())
    }

    async fn delete(&self, id: &str) -> RepositoryResult<bool> {
        Ok(self.records.remove(id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_ok, block_on};

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        id: String,
        value: u32,
    }

    impl Record for Item {
        fn record_id(&self) -> &str {
            &self.id
        }
    }

    fn item(id: &str, value: u32) -> Item {
        Item {
            id: id.to_string(),
            value,
        }
    }

    #[tokio::test]
    async fn test_upsert_is_last_write_wins() {
        let repo = MemoryRepository::new();
        repo.upsert(item("a", 1)).await.unwrap();
        repo.upsert(item("a", 2)).await.unwrap();

        assert_eq!(repo.count(), 1);
        assert_eq!(repo.get("a").await.unwrap().unwrap().value, 2);
    }

    #[test]
    fn test_list_and_delete() {
        let repo = MemoryRepository::with_records(vec![item("a", 1), item("b", 2)]);
        assert_eq!(assert_ok!(block_on(repo.list())).len(), 2);

        assert!(assert_ok!(block_on(repo.delete("a"))));
        assert!(!assert_ok!(block_on(repo.delete("a"))));
        assert!(assert_ok!(block_on(repo.get("a"))).is_none());
        assert_eq!(assert_ok!(block_on(repo.list())), vec![item("b", 2)]);
    }
}
