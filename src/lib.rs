// Ambient: errors, logging, configuration
pub mod errors;
pub mod logging;
pub mod config;

// Persistence and write-behind plumbing
pub mod store; // Store trait and the in-memory store
pub mod sync; // Outcome reporting for store writes
pub mod scheduler; // Periodic liveness sweep

// Registry core
pub mod groups; // Group entities and their manager
pub mod members; // Loaded members, load-on-demand and the liveness sweep

#[cfg(test)]
mod testing;

pub use errors::{GroupsError, Result};
pub use groups::{Group, GroupManager};
pub use members::{MappedGroups, Member, MemberKey, MemberManager, PlayerSession};
pub use store::{MemoryStore, PermissionStore, StoreError};
pub use sync::{SyncEvent, SyncOp, SyncReporter, SyncStatus};
