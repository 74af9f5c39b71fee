use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::members::MemberManager;

/// Drive [`MemberManager::schedule`] once per `period` until the returned
/// handle is aborted. A pass that overruns its slot causes the missed ticks
/// to be skipped, not replayed.
pub fn spawn_ticker(members: Arc<MemberManager>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            let summary = members.schedule().await;
            if !summary.unloaded.is_empty() {
                debug!(unloaded = ?summary.unloaded, "Swept disconnected members");
            }
        }
    })
}
