use serde::{Serialize, Deserialize};
use std::collections::BTreeSet;

/// A named permission set with a priority.
///
/// Groups are treated as values: an update replaces the stored instance
/// wholesale rather than mutating it in place. The priority is opaque here;
/// permission evaluation uses it to settle conflicts between groups.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    name: String,
    permissions: BTreeSet<String>,
    priority: i32,
}

impl Group {
    pub fn new<I, S>(name: impl Into<String>, permissions: I, priority: i32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Group {
            name: name.into(),
            permissions: permissions.into_iter().map(Into::into).collect(),
            priority,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn permissions(&self) -> &BTreeSet<String> {
        &self.permissions
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }

    /// Same group with its permission set replaced.
    pub fn with_permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions = permissions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Canonical store encoding: a JSON array in sorted order.
    pub fn encode_permissions(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.permissions)
    }

    pub fn decode_permissions(raw: &str) -> Result<BTreeSet<String>, serde_json::Error> {
        serde_json::from_str(raw)
    }
}
