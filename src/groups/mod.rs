pub mod group;
pub mod group_manager;

pub use group::Group;
pub use group_manager::GroupManager;
