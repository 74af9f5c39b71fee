use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{watch, Mutex, RwLock};

use super::{GroupRow, PermissionStore, StoreError, UserRow, STATE_ONLINE};

/// A call issued against a [`MemoryStore`], in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    CreateGroup { name: String, permissions: String, priority: i32 },
    DeleteGroup { name: String },
    UpdateGroup { name: String, permissions: String, priority: i32 },
    GetUser { name: String },
    CreateUser { name: String, groups: String },
    UpdateUser { name: String, groups: String },
    UpdateState { name: String, state: i32 },
}

/// `PermissionStore` kept entirely in memory.
///
/// Besides backing the daemon when no database is configured, it records a
/// journal of every call and can be switched into a failing or paused mode,
/// which is what the manager tests lean on.
pub struct MemoryStore {
    groups: RwLock<HashMap<String, GroupRow>>,
    users: RwLock<HashMap<String, UserRow>>,
    journal: Mutex<Vec<StoreCall>>,
    unavailable: AtomicBool,
    /// `true` while writes are held back.
    paused: watch::Sender<bool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        MemoryStore {
            groups: RwLock::new(HashMap::new()),
            users: RwLock::new(HashMap::new()),
            journal: Mutex::new(Vec::new()),
            unavailable: AtomicBool::new(false),
            paused,
        }
    }

    /// Seed a user row without going through the journal.
    pub async fn insert_user(&self, row: UserRow) {
        let mut users = self.users.write().await;
        users.insert(row.name.to_lowercase(), row);
    }

    pub async fn user(&self, name: &str) -> Option<UserRow> {
        self.users.read().await.get(&name.to_lowercase()).cloned()
    }

    pub async fn group(&self, name: &str) -> Option<GroupRow> {
        self.groups.read().await.get(name).cloned()
    }

    pub async fn calls(&self) -> Vec<StoreCall> {
        self.journal.lock().await.clone()
    }

    pub async fn clear_calls(&self) {
        self.journal.lock().await.clear();
    }

    /// Make every subsequent call fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Hold every write until [`MemoryStore::resume_writes`] is called.
    /// Reads are not affected.
    pub fn pause_writes(&self) {
        self.paused.send_replace(true);
    }

    pub fn resume_writes(&self) {
        self.paused.send_replace(false);
    }

    async fn record(&self, call: StoreCall) -> Result<(), StoreError> {
        self.journal.lock().await.push(call);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable);
        }
        Ok(())
    }

    async fn write_gate(&self) {
        let mut paused = self.paused.subscribe();
        // The sender lives in `self`, so this only errors if we are being torn down.
        let _ = paused.wait_for(|held| !*held).await;
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PermissionStore for MemoryStore {
    async fn create_group(&self, name: &str, permissions: &str, priority: i32) -> Result<u64, StoreError> {
        self.record(StoreCall::CreateGroup {
            name: name.to_string(),
            permissions: permissions.to_string(),
            priority,
        }).await?;
        self.write_gate().await;

        let mut groups = self.groups.write().await;
        groups.insert(name.to_string(), GroupRow {
            name: name.to_string(),
            permissions: permissions.to_string(),
            priority,
        });
        Ok(1)
    }

    async fn delete_group(&self, name: &str) -> Result<(), StoreError> {
        self.record(StoreCall::DeleteGroup { name: name.to_string() }).await?;
        self.write_gate().await;

        self.groups.write().await.remove(name);
        Ok(())
    }

    async fn update_group(&self, name: &str, permissions: &str, priority: i32) -> Result<u64, StoreError> {
        self.record(StoreCall::UpdateGroup {
            name: name.to_string(),
            permissions: permissions.to_string(),
            priority,
        }).await?;
        self.write_gate().await;

        let mut groups = self.groups.write().await;
        match groups.get_mut(name) {
            Some(row) => {
                row.permissions = permissions.to_string();
                row.priority = priority;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn get_user(&self, name: &str) -> Result<Vec<UserRow>, StoreError> {
        self.record(StoreCall::GetUser { name: name.to_string() }).await?;

        let users = self.users.read().await;
        Ok(users.get(&name.to_lowercase()).cloned().into_iter().collect())
    }

    async fn create_user(&self, name: &str, groups: &str) -> Result<(), StoreError> {
        self.record(StoreCall::CreateUser {
            name: name.to_string(),
            groups: groups.to_string(),
        }).await?;
        self.write_gate().await;

        let mut users = self.users.write().await;
        users.insert(name.to_lowercase(), UserRow {
            name: name.to_string(),
            groups: groups.to_string(),
            state: STATE_ONLINE,
        });
        Ok(())
    }

    async fn update_user(&self, name: &str, groups: &str) -> Result<u64, StoreError> {
        self.record(StoreCall::UpdateUser {
            name: name.to_string(),
            groups: groups.to_string(),
        }).await?;
        self.write_gate().await;

        let mut users = self.users.write().await;
        match users.get_mut(&name.to_lowercase()) {
            Some(row) => {
                row.groups = groups.to_string();
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn update_state(&self, name: &str, state: i32) -> Result<(), StoreError> {
        self.record(StoreCall::UpdateState { name: name.to_string(), state }).await?;
        self.write_gate().await;

        if let Some(row) = self.users.write().await.get_mut(&name.to_lowercase()) {
            row.state = state;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::STATE_OFFLINE;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_user_lifecycle() {
        let store = MemoryStore::new();

        assert!(store.get_user("steve").await.unwrap().is_empty());

        store.create_user("Steve", "{}").await.unwrap();
        let rows = store.get_user("steve").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].state, STATE_ONLINE);

        assert_eq!(store.update_user("steve", r#"{"VIP":null}"#).await.unwrap(), 1);
        store.update_state("steve", STATE_OFFLINE).await.unwrap();

        let row = store.user("STEVE").await.expect("Should find user");
        assert_eq!(row.groups, r#"{"VIP":null}"#);
        assert_eq!(row.state, STATE_OFFLINE);
    }

    #[tokio::test]
    async fn test_update_missing_group_affects_nothing() {
        let store = MemoryStore::new();
        assert_eq!(store.update_group("Ghost", "[]", 1).await.unwrap(), 0);

        store.create_group("Ghost", "[]", 1).await.unwrap();
        assert_eq!(store.update_group("Ghost", r#"["fly"]"#, 2).await.unwrap(), 1);
        assert_eq!(store.group("Ghost").await.unwrap().priority, 2);
    }

    #[tokio::test]
    async fn test_unavailable_store_still_journals() {
        let store = MemoryStore::new();
        store.set_unavailable(true);

        assert_eq!(store.delete_group("Admin").await, Err(StoreError::Unavailable));
        assert_eq!(store.calls().await, vec![StoreCall::DeleteGroup { name: "Admin".to_string() }]);
    }

    #[tokio::test]
    async fn test_paused_writes_wait_for_resume() {
        let store = Arc::new(MemoryStore::new());
        store.pause_writes();

        let writer = {
            let store = store.clone();
            tokio::spawn(async move { store.create_user("alex", "{}").await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!writer.is_finished());
        assert!(store.user("alex").await.is_none());

        store.resume_writes();
        writer.await.unwrap().unwrap();
        assert!(store.user("alex").await.is_some());
    }
}
