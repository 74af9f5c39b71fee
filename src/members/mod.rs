pub mod mapped_groups;
pub mod member;
pub mod member_manager;

pub use mapped_groups::MappedGroups;
pub use member::{Member, MemberKey, PlayerSession};
pub use member_manager::{MemberManager, ScheduleSummary, UnloadHandle, wait_all};
