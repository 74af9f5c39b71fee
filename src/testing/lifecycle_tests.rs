//! Scenarios that span both managers, the store and the sweep.

use std::sync::Arc;
use std::time::Duration;
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;
use tokio_test::{assert_pending, assert_ready};

use crate::groups::{Group, GroupManager};
use crate::members::{MappedGroups, MemberManager, PlayerSession, wait_all};
use crate::store::{MemoryStore, StoreCall, STATE_OFFLINE, STATE_ONLINE};
use crate::sync::{SyncEvent, SyncOp, SyncReporter};

struct Session(String);

impl PlayerSession for Session {
    fn name(&self) -> &str {
        &self.0
    }
}

struct Registry {
    store: Arc<MemoryStore>,
    members: Arc<MemberManager>,
    groups: GroupManager,
    events: mpsc::UnboundedReceiver<SyncEvent>,
}

fn registry(defaults: &[&str]) -> Registry {
    let store = Arc::new(MemoryStore::new());
    let (tx, events) = mpsc::unbounded_channel();
    let reporter = SyncReporter::with_events(tx);
    let members = Arc::new(MemberManager::new(
        store.clone(),
        reporter.clone(),
        defaults.iter().map(|g| g.to_string()).collect(),
    ));
    let groups = GroupManager::new(store.clone(), members.clone(), reporter);
    Registry { store, members, groups, events }
}

fn session(name: &str) -> Arc<dyn PlayerSession> {
    Arc::new(Session(name.to_string()))
}

#[tokio::test]
async fn test_join_play_disconnect_rejoin() {
    let registry = registry(&["Member"]);
    let _ = registry.groups.register_group("Member", 0, ["chat"], true).await;

    // Join
    let player = session("Steve");
    let steve = registry.members.load_member("Steve", true).await.unwrap().unwrap();
    steve.attach_player(&player).await;
    assert_eq!(registry.store.user("steve").await.unwrap().state, STATE_ONLINE);

    // Play a couple of ticks
    registry.members.schedule().await;
    registry.members.schedule().await;
    assert_eq!(steve.tick_count(), 2);

    // Disconnect: the next sweep unloads
    drop(player);
    let summary = registry.members.schedule().await;
    assert_eq!(summary.unloaded, vec!["steve".to_string()]);
    assert!(registry.members.get_member("steve").await.is_none());

    // Give the detached writes a chance to land
    for _ in 0..10 {
        if registry.store.user("steve").await.unwrap().state == STATE_OFFLINE {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(registry.store.user("steve").await.unwrap().state, STATE_OFFLINE);

    // Rejoin comes from the stored row, without another create
    registry.store.clear_calls().await;
    let again = registry.members.load_member("STEVE", true).await.unwrap().unwrap();
    assert!(!Arc::ptr_eq(&steve, &again));
    assert_eq!(
        registry.store.calls().await,
        vec![StoreCall::GetUser { name: "steve".to_string() }]
    );
}

#[tokio::test]
async fn test_removed_group_is_gone_from_every_loaded_member() {
    let registry = registry(&["Member", "VIP"]);
    let _ = registry.groups.register_group("Member", 0, Vec::<String>::new(), false).await;
    let _ = registry.groups.register_group("VIP", 10, ["fly"], false).await;

    let mut loaded = Vec::new();
    for name in ["alex", "sam", "kai", "jo"] {
        loaded.push(registry.members.load_member(name, true).await.unwrap().unwrap());
    }

    let vip = registry.groups.get_group("VIP").await.unwrap();
    let _ = registry.groups.unregister_group(&vip, true).await;

    for member in &loaded {
        let mapped = member.mapped_groups().await;
        assert_eq!(mapped, MappedGroups::from_defaults(["Member"]));
    }
    assert!(registry.groups.get_group("VIP").await.is_none());
    assert_eq!(registry.groups.get_groups().await.len(), 1);
}

#[tokio::test]
async fn test_update_group_returns_before_store_write() {
    let registry = registry(&[]);
    let _ = registry.groups.register_group("Mod", 10, ["kick"], true).await;
    registry.store.pause_writes();

    let handle = registry
        .groups
        .update_group(Group::new("Mod", ["kick", "ban"], 15))
        .await
        .expect("Should schedule store write");
    let mut write = tokio_test::task::spawn(handle);

    tokio::task::yield_now().await;
    assert_pending!(write.poll());
    assert!(registry.groups.get_group("Mod").await.unwrap().has_permission("ban"));

    registry.store.resume_writes();
    while !write.is_woken() {
        tokio::task::yield_now().await;
    }
    assert_ready!(write.poll()).unwrap();
    assert_eq!(registry.store.group("Mod").await.unwrap().priority, 15);
}

#[tokio::test]
async fn test_shutdown_with_store_down_keeps_cache_consistent() {
    let mut registry = registry(&["Member"]);
    for name in ["a", "b"] {
        registry.members.load_member(name, true).await.unwrap();
    }
    while registry.events.try_recv().is_ok() {}

    registry.store.set_unavailable(true);
    let handles = registry.members.close().await;
    assert!(registry.members.is_empty().await);
    wait_all(handles).await;

    let mut failures = 0;
    while let Ok(event) = registry.events.try_recv() {
        match event {
            SyncEvent::Failed { op, .. } => {
                assert!(matches!(op, SyncOp::UpdateUser | SyncOp::UpdateState));
                failures += 1;
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
    assert_eq!(failures, 4);
}
