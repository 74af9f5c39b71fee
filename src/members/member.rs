use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::RwLock;
use tracing::debug;

use crate::errors::{GroupsError, Result};
use crate::groups::Group;
use crate::members::mapped_groups::MappedGroups;
use crate::store::PermissionStore;
use crate::sync::{SyncOp, SyncReporter};

/// A connected player as seen by the session layer.
///
/// Members only hold a weak reference; once the session layer drops its
/// last `Arc` the member counts as disconnected.
pub trait PlayerSession: Send + Sync {
    fn name(&self) -> &str;
}

/// Member lookup key: the player name, lower-cased.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberKey(String);

impl MemberKey {
    pub fn new(name: &str) -> Self {
        MemberKey(name.to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for MemberKey {
    fn from(name: &str) -> Self {
        MemberKey::new(name)
    }
}

impl fmt::Display for MemberKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cached permission state for one player.
pub struct Member {
    key: MemberKey,
    mapped_groups: RwLock<MappedGroups>,
    /// Mapping read from the store, held until the player attaches.
    /// Lock order: `mapped_groups` before `stored_groups`.
    stored_groups: RwLock<Option<MappedGroups>>,
    loaded: AtomicBool,
    /// Unix seconds of the last `on_load`, 0 if never loaded
    loaded_at: AtomicI64,
    ticks: AtomicU64,
    player: RwLock<Option<Weak<dyn PlayerSession>>>,
    store: Arc<dyn PermissionStore>,
    reporter: SyncReporter,
}

impl Member {
    pub fn new(
        name: &str,
        mapped_groups: MappedGroups,
        store: Arc<dyn PermissionStore>,
        reporter: SyncReporter,
    ) -> Self {
        Member {
            key: MemberKey::new(name),
            mapped_groups: RwLock::new(mapped_groups),
            stored_groups: RwLock::new(None),
            loaded: AtomicBool::new(false),
            loaded_at: AtomicI64::new(0),
            ticks: AtomicU64::new(0),
            player: RwLock::new(None),
            store,
            reporter,
        }
    }

    pub fn name(&self) -> &str {
        self.key.as_str()
    }

    pub fn key(&self) -> &MemberKey {
        &self.key
    }

    /// Snapshot of the mapped groups.
    pub async fn mapped_groups(&self) -> MappedGroups {
        self.mapped_groups.read().await.clone()
    }

    /// Keep the persisted mapping aside until the member is hydrated.
    /// Until then every flush writes it back unchanged.
    pub async fn stage_stored_groups(&self, stored: MappedGroups) {
        *self.stored_groups.write().await = Some(stored);
    }

    pub async fn is_hydrated(&self) -> bool {
        self.stored_groups.read().await.is_none()
    }

    /// Merge any staged stored mapping into the live one and mark the
    /// member loaded. Returns whether the member was not loaded before.
    pub async fn hydrate(&self) -> bool {
        {
            let mut mapped = self.mapped_groups.write().await;
            if let Some(stored) = self.stored_groups.write().await.take() {
                let mut merged = stored;
                merged.extend_from(&mapped);
                *mapped = merged;
            }
        }
        if self.loaded.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.on_load();
        true
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    pub fn set_loaded(&self, loaded: bool) {
        self.loaded.store(loaded, Ordering::SeqCst);
    }

    pub fn loaded_at(&self) -> Option<DateTime<Utc>> {
        match self.loaded_at.load(Ordering::SeqCst) {
            0 => None,
            secs => DateTime::from_timestamp(secs, 0),
        }
    }

    /// Number of `tick` calls this member has received.
    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    /// Attach the player's session. A member that was not loaded yet is
    /// hydrated from its stored mapping here.
    pub async fn attach_player(&self, player: &Arc<dyn PlayerSession>) {
        *self.player.write().await = Some(Arc::downgrade(player));
        self.hydrate().await;
    }

    pub async fn detach_player(&self) {
        *self.player.write().await = None;
    }

    /// The attached session, or `None` once the player has disconnected.
    pub async fn player(&self) -> Option<Arc<dyn PlayerSession>> {
        self.player.read().await.as_ref().and_then(Weak::upgrade)
    }

    pub fn on_load(&self) {
        self.loaded_at.store(Utc::now().timestamp(), Ordering::SeqCst);
        debug!(member = self.name(), "Member loaded");
    }

    /// Forget `group` and flush the new mapping if it was mapped, staged
    /// mapping included.
    ///
    /// Returns whether the group had been mapped. A failed flush is
    /// reported, not returned.
    pub async fn on_group_removed(&self, group: &Group) -> bool {
        let removed = {
            let mut mapped = self.mapped_groups.write().await;
            let mut stored = self.stored_groups.write().await;
            let from_stored = stored.as_mut().map_or(false, |s| s.remove(group.name()));
            mapped.remove(group.name()) | from_stored
        };
        if removed {
            debug!(member = self.name(), group = group.name(), "Removed group from member");
            let outcome = self.update_groups().await.map(Some);
            self.reporter.record(SyncOp::UpdateUser, self.name(), outcome);
        }
        removed
    }

    /// The mapping as it should be persisted: the staged stored mapping
    /// (if not hydrated yet) overlaid with the live one.
    async fn persisted_view(&self) -> MappedGroups {
        let mapped = self.mapped_groups.read().await;
        match self.stored_groups.read().await.as_ref() {
            Some(stored) => {
                let mut merged = stored.clone();
                merged.extend_from(&mapped);
                merged
            }
            None => mapped.clone(),
        }
    }

    /// Write the current mapped groups to the store.
    pub async fn update_groups(&self) -> Result<u64> {
        let encoded = self.persisted_view().await.encode()?;
        Ok(self.store.update_user(self.name(), &encoded).await?)
    }

    /// Per-tick housekeeping: expired temporary memberships are dropped and
    /// the remaining mapping is flushed in the background.
    pub async fn tick(&self) -> Vec<String> {
        self.ticks.fetch_add(1, Ordering::SeqCst);

        let dropped = self.mapped_groups.write().await.drop_expired(Utc::now());
        if dropped.is_empty() {
            return dropped;
        }
        debug!(member = self.name(), ?dropped, "Temporary memberships expired");

        let encoded = self.persisted_view().await.encode();
        let store = self.store.clone();
        let name = self.name().to_string();
        self.reporter.spawn_detached(SyncOp::UpdateUser, name.clone(), async move {
            let rows = store.update_user(&name, &encoded?).await?;
            Ok::<_, GroupsError>(Some(rows))
        });
        dropped
    }

    pub async fn add_group(&self, name: impl Into<String>, expires_at: Option<DateTime<Utc>>) {
        self.mapped_groups.write().await.insert(name, expires_at);
    }

    pub async fn remove_group(&self, name: &str) -> bool {
        let mut mapped = self.mapped_groups.write().await;
        let mut stored = self.stored_groups.write().await;
        let from_stored = stored.as_mut().map_or(false, |s| s.remove(name));
        mapped.remove(name) | from_stored
    }

    pub async fn has_group(&self, name: &str) -> bool {
        self.mapped_groups.read().await.contains(name)
    }
}

impl fmt::Debug for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Member")
            .field("key", &self.key)
            .field("loaded", &self.is_loaded())
            .field("ticks", &self.tick_count())
            .finish()
    }
}
