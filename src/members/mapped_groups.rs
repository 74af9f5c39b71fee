use chrono::{DateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Ordered association from group name to an optional membership expiry.
///
/// `None` is a permanent membership that inherits the group's defaults.
/// Insertion order is kept, including through the JSON encoding, so default
/// groups come back in the order they were configured.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MappedGroups {
    entries: Vec<(String, Option<DateTime<Utc>>)>,
}

impl MappedGroups {
    pub fn new() -> Self {
        MappedGroups { entries: Vec::new() }
    }

    /// Every name mapped to `None`, duplicates collapsed.
    pub fn from_defaults<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut groups = MappedGroups::new();
        for name in names {
            groups.insert(name, None);
        }
        groups
    }

    /// Map `name` to `expires_at`. An existing entry keeps its position.
    pub fn insert(&mut self, name: impl Into<String>, expires_at: Option<DateTime<Utc>>) {
        let name = name.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => *slot = expires_at,
            None => self.entries.push((name, expires_at)),
        }
    }

    /// Insert every entry of `other`, overriding entries of the same name.
    pub fn extend_from(&mut self, other: &MappedGroups) {
        for (name, expires_at) in other.iter() {
            self.insert(name, expires_at);
        }
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(existing, _)| existing != name);
        self.entries.len() != before
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(existing, _)| existing == name)
    }

    /// `Some(None)` for a permanent membership, `None` if not mapped at all.
    pub fn get(&self, name: &str) -> Option<Option<DateTime<Utc>>> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, expires_at)| *expires_at)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<DateTime<Utc>>)> {
        self.entries.iter().map(|(name, expires_at)| (name.as_str(), *expires_at))
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop temporary memberships that expired at or before `now`.
    pub fn drop_expired(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let mut dropped = Vec::new();
        self.entries.retain(|(name, expires_at)| match expires_at {
            Some(at) if *at <= now => {
                dropped.push(name.clone());
                false
            }
            _ => true,
        });
        dropped
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

impl Serialize for MappedGroups {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.entries.iter().map(|(name, expires_at)| (name, expires_at)))
    }
}

impl<'de> Deserialize<'de> for MappedGroups {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MappedGroupsVisitor;

        impl<'de> Visitor<'de> for MappedGroupsVisitor {
            type Value = MappedGroups;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of group names to an optional expiry")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut groups = MappedGroups::new();
                while let Some((name, expires_at)) =
                    access.next_entry::<String, Option<DateTime<Utc>>>()?
                {
                    groups.insert(name, expires_at);
                }
                Ok(groups)
            }
        }

        deserializer.deserialize_map(MappedGroupsVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_encoding_preserves_insertion_order() {
        let mut groups = MappedGroups::from_defaults(["Member", "Builder", "Admin"]);
        groups.insert("Builder", Some(Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()));

        let encoded = groups.encode().unwrap();
        assert_eq!(
            encoded,
            r#"{"Member":null,"Builder":"2030-01-01T00:00:00Z","Admin":null}"#
        );
        assert_eq!(MappedGroups::decode(&encoded).unwrap(), groups);
    }

    #[test]
    fn test_defaults_collapse_duplicates() {
        let groups = MappedGroups::from_defaults(["Member", "Member", "Guest"]);
        assert_eq!(groups.names(), vec!["Member".to_string(), "Guest".to_string()]);
        assert!(groups.iter().all(|(_, expires_at)| expires_at.is_none()));
    }

    #[test]
    fn test_drop_expired_keeps_permanent_entries() {
        let now = Utc::now();
        let mut groups = MappedGroups::new();
        groups.insert("Member", None);
        groups.insert("Trial", Some(now - Duration::seconds(1)));
        groups.insert("Event", Some(now + Duration::hours(1)));

        assert_eq!(groups.drop_expired(now), vec!["Trial".to_string()]);
        assert_eq!(groups.names(), vec!["Member".to_string(), "Event".to_string()]);
        assert_eq!(groups.get("Member"), Some(None));
        assert_eq!(groups.get("Trial"), None);
    }

    #[test]
    fn test_extend_from_overrides_and_appends() {
        let later = Utc.with_ymd_and_hms(2031, 6, 1, 0, 0, 0).unwrap();
        let mut stored = MappedGroups::from_defaults(["Admin", "Trial"]);
        let mut live = MappedGroups::new();
        live.insert("Trial", Some(later));
        live.insert("Builder", None);

        stored.extend_from(&live);
        assert_eq!(stored.names(), vec!["Admin".to_string(), "Trial".to_string(), "Builder".to_string()]);
        assert_eq!(stored.get("Trial"), Some(Some(later)));
    }

    #[test]
    fn test_decode_rejects_non_map() {
        assert!(MappedGroups::decode(r#"["Member"]"#).is_err());
    }
}
