use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::errors::GroupsError;
use crate::groups::group::Group;
use crate::members::MemberManager;
use crate::store::PermissionStore;
use crate::sync::{SyncOp, SyncReporter, SyncStatus};

/// Owner of every registered group.
///
/// The map is authoritative: every mutator updates it first and only then
/// talks to the store. Store failures never undo an in-memory change; they
/// surface through the [`SyncReporter`].
pub struct GroupManager {
    groups: RwLock<HashMap<String, Arc<Group>>>,
    /// Loaded members, notified when a group goes away
    members: Arc<MemberManager>,
    store: Arc<dyn PermissionStore>,
    reporter: SyncReporter,
}

impl GroupManager {
    pub fn new(
        store: Arc<dyn PermissionStore>,
        members: Arc<MemberManager>,
        reporter: SyncReporter,
    ) -> Self {
        GroupManager {
            groups: RwLock::new(HashMap::new()),
            members,
            store,
            reporter,
        }
    }

    /// Register a group, replacing any group already registered under
    /// `name`.
    ///
    /// With `sync` the caller also waits for the store insert. If the
    /// permissions cannot be encoded the insert is skipped and the group
    /// stays registered in memory only.
    pub async fn register_group<I, S>(
        &self,
        name: &str,
        priority: i32,
        permissions: I,
        sync: bool,
    ) -> SyncStatus
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let group = Group::new(name, permissions, priority);
        let encoded = sync.then(|| group.encode_permissions());

        {
            let mut groups = self.groups.write().await;
            if groups.insert(name.to_string(), Arc::new(group)).is_some() {
                debug!(group = name, "Replaced existing group");
            }
        }
        debug!(group = name, priority, "Registered group");

        match encoded {
            None => SyncStatus::Skipped,
            Some(Err(err)) => {
                debug!(group = name, error = %err, "Skipping store insert, permissions not encodable");
                SyncStatus::SerializationSkipped
            }
            Some(Ok(permissions)) => {
                let outcome = self.store
                    .create_group(name, &permissions, priority)
                    .await
                    .map(Some)
                    .map_err(GroupsError::from);
                self.reporter.record(SyncOp::CreateGroup, name, outcome)
            }
        }
    }

    /// Remove a group and strip it from every loaded member.
    ///
    /// Members are notified one at a time; each notification finishes
    /// before the next starts. The store delete (with `sync`) is issued only
    /// after the last member has been notified.
    pub async fn unregister_group(&self, group: &Group, sync: bool) -> SyncStatus {
        self.groups.write().await.remove(group.name());

        for member in self.members.get_members().await {
            member.on_group_removed(group).await;
        }
        debug!(group = group.name(), "Unregistered group");

        if !sync {
            return SyncStatus::Skipped;
        }
        let outcome = self.store
            .delete_group(group.name())
            .await
            .map(|_| None)
            .map_err(GroupsError::from);
        self.reporter.record(SyncOp::DeleteGroup, group.name(), outcome)
    }

    /// Replace a registered group and persist it in the background.
    ///
    /// A group that is not registered (never was, or already unregistered)
    /// is left alone and `None` is returned; updating must not bring a
    /// removed group back. The returned handle may be dropped; nothing
    /// about the caller's continuation depends on the store write.
    pub async fn update_group(&self, group: Group) -> Option<JoinHandle<()>> {
        let group = Arc::new(group);
        {
            let mut groups = self.groups.write().await;
            match groups.get_mut(group.name()) {
                Some(slot) => *slot = group.clone(),
                None => {
                    debug!(group = group.name(), "Ignoring update for unregistered group");
                    return None;
                }
            }
        }

        let store = self.store.clone();
        Some(self.reporter.spawn_detached(SyncOp::UpdateGroup, group.name().to_string(), async move {
            let permissions = group.encode_permissions()?;
            let affected_rows = store
                .update_group(group.name(), &permissions, group.priority())
                .await?;
            if affected_rows > 0 {
                debug!(group = group.name(), "Updated group");
            }
            Ok::<_, GroupsError>(Some(affected_rows))
        }))
    }

    pub async fn get_group(&self, name: &str) -> Option<Arc<Group>> {
        self.groups.read().await.get(name).cloned()
    }

    /// Snapshot of every registered group, in no particular order.
    pub async fn get_groups(&self) -> Vec<Arc<Group>> {
        self.groups.read().await.values().cloned().collect()
    }

    /// Snapshot ordered by descending priority, ties broken by name.
    pub async fn groups_by_priority(&self) -> Vec<Arc<Group>> {
        let mut groups = self.get_groups().await;
        groups.sort_by(|a, b| {
            b.priority()
                .cmp(&a.priority())
                .then_with(|| a.name().cmp(b.name()))
        });
        groups
    }
}
