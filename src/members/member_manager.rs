use futures::future::join_all;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::errors::{GroupsError, Result};
use crate::members::mapped_groups::MappedGroups;
use crate::members::member::{Member, MemberKey};
use crate::store::{PermissionStore, STATE_OFFLINE};
use crate::sync::{SyncOp, SyncReporter, SyncStatus};

/// Background work started by [`MemberManager::unload_member`].
///
/// The member is already gone from the cache when this is handed out.
/// Dropping the handle leaves both writes running.
pub struct UnloadHandle {
    pub name: String,
    flush: JoinHandle<()>,
    state: JoinHandle<()>,
}

impl UnloadHandle {
    pub fn is_finished(&self) -> bool {
        self.flush.is_finished() && self.state.is_finished()
    }

    /// Wait for both background writes. Their outcomes were already sent
    /// to the reporter; only a panicked task is logged here.
    pub async fn wait(self) {
        for (task, handle) in [("flush", self.flush), ("state", self.state)] {
            if let Err(err) = handle.await {
                warn!(member = %self.name, task, error = %err, "Unload task did not complete");
            }
        }
    }
}

/// Wait for every handle returned by [`MemberManager::close`].
pub async fn wait_all(handles: Vec<UnloadHandle>) {
    join_all(handles.into_iter().map(UnloadHandle::wait)).await;
}

/// What a single [`MemberManager::schedule`] pass did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScheduleSummary {
    pub ticked: usize,
    /// Members unloaded because their player was gone.
    pub unloaded: Vec<String>,
}

/// Owner of every loaded member.
pub struct MemberManager {
    members: RwLock<HashMap<MemberKey, Arc<Member>>>,
    store: Arc<dyn PermissionStore>,
    reporter: SyncReporter,
    default_groups: Vec<String>,
}

impl MemberManager {
    pub fn new(
        store: Arc<dyn PermissionStore>,
        reporter: SyncReporter,
        default_groups: Vec<String>,
    ) -> Self {
        MemberManager {
            members: RwLock::new(HashMap::new()),
            store,
            reporter,
            default_groups,
        }
    }

    /// Build a member wired to this manager's store. It is not registered.
    pub fn create_member(&self, name: &str, mapped_groups: MappedGroups) -> Arc<Member> {
        Arc::new(Member::new(name, mapped_groups, self.store.clone(), self.reporter.clone()))
    }

    /// Return the cached member, loading it from the store on a miss.
    ///
    /// With `create_on_missing` a member that has no stored row is created
    /// with the configured default groups and persisted. Without it a
    /// missing row yields `Ok(None)` and nothing changes. A failed lookup
    /// is the one store error handed back to the caller, since it cannot be
    /// told apart from "not found" otherwise.
    ///
    /// A member found in the store starts with an empty mapping; the stored
    /// one is staged on it and merged in once its player attaches.
    pub async fn load_member(&self, name: &str, create_on_missing: bool) -> Result<Option<Arc<Member>>> {
        let key = MemberKey::new(name);
        if let Some(member) = self.get_member(key.as_str()).await {
            return Ok(Some(member));
        }

        let rows = self.store.get_user(key.as_str()).await?;
        if let Some(row) = rows.first() {
            let member = self.create_member(&row.name, MappedGroups::new());
            match MappedGroups::decode(&row.groups) {
                Ok(stored) => member.stage_stored_groups(stored).await,
                Err(err) => warn!(member = member.name(), error = %err, "Stored groups unreadable, starting empty"),
            }
            let (member, _) = self.claim(member).await;
            return Ok(Some(member));
        }

        if !create_on_missing {
            return Ok(None);
        }

        let member = self.create_member(
            key.as_str(),
            MappedGroups::from_defaults(self.default_groups.iter().cloned()),
        );
        member.set_loaded(true);
        member.on_load();
        let (member, inserted) = self.claim(member).await;
        if inserted {
            let status = self.persist_new_user(&member).await;
            if !status.is_persisted() {
                warn!(member = member.name(), ?status, "New member cached but not persisted");
            }
        }
        Ok(Some(member))
    }

    /// Insert `member` unless another load got there first while this one
    /// was waiting on the store. Returns the cached instance and whether it
    /// is the one passed in.
    async fn claim(&self, member: Arc<Member>) -> (Arc<Member>, bool) {
        let mut members = self.members.write().await;
        match members.entry(member.key().clone()) {
            Entry::Occupied(existing) => (existing.get().clone(), false),
            Entry::Vacant(slot) => {
                debug!(member = member.name(), "Registered member");
                (slot.insert(member).clone(), true)
            }
        }
    }

    /// Insert `member` under its normalized name. With `sync` the caller
    /// also waits for a new user row to be written.
    pub async fn register_member(&self, member: Arc<Member>, sync: bool) -> SyncStatus {
        self.members
            .write()
            .await
            .insert(member.key().clone(), member.clone());
        debug!(member = member.name(), "Registered member");

        if !sync {
            return SyncStatus::Skipped;
        }
        self.persist_new_user(&member).await
    }

    async fn persist_new_user(&self, member: &Member) -> SyncStatus {
        let outcome = match member.mapped_groups().await.encode() {
            Ok(groups) => self.store
                .create_user(member.name(), &groups)
                .await
                .map(|_| None)
                .map_err(GroupsError::from),
            Err(err) => Err(err.into()),
        };
        self.reporter.record(SyncOp::CreateUser, member.name(), outcome)
    }

    /// Drop `member` from the cache.
    ///
    /// Its group flush and the offline state write are started as detached
    /// tasks; the member is unaddressable by name as soon as this returns,
    /// whether or not either write has finished.
    pub async fn unload_member(&self, member: &Arc<Member>) -> UnloadHandle {
        let flush = {
            let member = member.clone();
            self.reporter.spawn_detached(SyncOp::UpdateUser, member.name().to_string(), async move {
                member.update_groups().await.map(Some)
            })
        };

        let state = {
            let store = self.store.clone();
            let name = member.name().to_string();
            self.reporter.spawn_detached(SyncOp::UpdateState, name.clone(), async move {
                store.update_state(&name, STATE_OFFLINE).await?;
                debug!(member = %name, "Updated state of user to {}", STATE_OFFLINE);
                Ok::<_, GroupsError>(None)
            })
        };

        {
            let mut members = self.members.write().await;
            match members.get(member.key()) {
                Some(current) if Arc::ptr_eq(current, member) => {
                    members.remove(member.key());
                }
                Some(_) => debug!(member = member.name(), "Newer instance cached, leaving it in place"),
                None => {}
            }
        }
        debug!(member = member.name(), "Unloaded member");

        UnloadHandle {
            name: member.name().to_string(),
            flush,
            state,
        }
    }

    pub async fn get_member(&self, name: &str) -> Option<Arc<Member>> {
        self.members.read().await.get(&MemberKey::new(name)).cloned()
    }

    /// Snapshot of the loaded members.
    pub async fn get_members(&self) -> Vec<Arc<Member>> {
        self.members.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.members.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.members.read().await.is_empty()
    }

    /// One liveness sweep. Call once per tick.
    ///
    /// A loaded member whose player has gone away is unloaded and skips its
    /// tick; every other member is ticked.
    pub async fn schedule(&self) -> ScheduleSummary {
        let mut summary = ScheduleSummary::default();
        for member in self.get_members().await {
            if member.is_loaded() && member.player().await.is_none() {
                // Flushes run on their own; the sweep does not wait for them.
                let _ = self.unload_member(&member).await;
                summary.unloaded.push(member.name().to_string());
                continue;
            }
            member.tick().await;
            summary.ticked += 1;
        }
        summary
    }

    /// Unload every member. The returned handles are the only way to find
    /// out when their flushes are done; this call does not wait for them.
    pub async fn close(&self) -> Vec<UnloadHandle> {
        let mut handles = Vec::new();
        for member in self.get_members().await {
            handles.push(self.unload_member(&member).await);
        }
        handles
    }
}
