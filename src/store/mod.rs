pub mod memory;

use async_trait::async_trait;
use serde::{Serialize, Deserialize};
use thiserror::Error;

pub use memory::{MemoryStore, StoreCall};

/// Value written by `update_state` when a member goes offline.
pub const STATE_OFFLINE: i32 = 0;
/// Value a freshly created user row starts with.
pub const STATE_ONLINE: i32 = 1;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Store unavailable")]
    Unavailable,
}

/// One persisted user record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRow {
    pub name: String,
    /// Encoded mapped groups, see [`crate::members::MappedGroups`].
    pub groups: String,
    pub state: i32,
}

/// One persisted group record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRow {
    pub name: String,
    /// Canonical JSON array of permission strings.
    pub permissions: String,
    pub priority: i32,
}

/// Persistent backing store shared by both managers.
///
/// Every method is a suspension point. Implementations are responsible for
/// serializing conflicting writes to the same key (last writer wins).
#[async_trait]
pub trait PermissionStore: Send + Sync {
    async fn create_group(&self, name: &str, permissions: &str, priority: i32) -> Result<u64, StoreError>;

    async fn delete_group(&self, name: &str) -> Result<(), StoreError>;

    async fn update_group(&self, name: &str, permissions: &str, priority: i32) -> Result<u64, StoreError>;

    /// Zero or one row for the given (lower-cased) name.
    async fn get_user(&self, name: &str) -> Result<Vec<UserRow>, StoreError>;

    async fn create_user(&self, name: &str, groups: &str) -> Result<(), StoreError>;

    async fn update_user(&self, name: &str, groups: &str) -> Result<u64, StoreError>;

    async fn update_state(&self, name: &str, state: i32) -> Result<(), StoreError>;
}
