use std::collections::{BTreeMap, HashSet};
use std::hash::{Hash, Hasher};

use chrono::{DateTime, FixedOffset, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Identifier of a universe (collection of badges), kept as the upstream string.
pub type UniverseId = String;

/// Stable badge identifier.
///
/// The catalog sends numeric ids, but older snapshot files may carry them as
/// strings. Identity is the canonical string form, so `123` and `"123"` compare
/// equal; serialization writes back whichever representation was read.
#[derive(Debug, Clone)]
pub struct BadgeId {
    key: String,
    numeric: bool,
}

impl BadgeId {
    pub fn as_str(&self) -> &str {
        &self.key
    }
}

impl PartialEq for BadgeId {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for BadgeId {}

impl Hash for BadgeId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl std::fmt::Display for BadgeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key)
    }
}

impl From<u64> for BadgeId {
    fn from(value: u64) -> Self {
        Self {
            key: value.to_string(),
            numeric: true,
        }
    }
}

impl From<&str> for BadgeId {
    fn from(value: &str) -> Self {
        Self {
            key: value.to_string(),
            numeric: false,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawBadgeId {
    Numeric(u64),
    Text(String),
}

impl<'de> Deserialize<'de> for BadgeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match RawBadgeId::deserialize(deserializer)? {
            RawBadgeId::Numeric(n) => BadgeId::from(n),
            RawBadgeId::Text(s) => BadgeId::from(s.as_str()),
        })
    }
}

impl Serialize for BadgeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.numeric
            && let Ok(n) = self.key.parse::<u64>()
        {
            return serializer.serialize_u64(n);
        }
        serializer.serialize_str(&self.key)
    }
}

/// Metadata about the universe that awards a badge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwardingUniverse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_place_id: Option<serde_json::Value>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl AwardingUniverse {
    /// Root place id used to link the game, or `None` when absent or zero.
    pub fn place_id(&self) -> Option<String> {
        let id = match self.root_place_id.as_ref()? {
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::String(s) => s.trim().to_string(),
            _ => return None,
        };
        if id.is_empty() || id == "0" {
            None
        } else {
            Some(id)
        }
    }
}

/// A badge as returned by the catalog API.
///
/// Fields the pipeline does not read are kept in `extra` so the snapshot file
/// stores the complete upstream record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Badge {
    pub id: BadgeId,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub awarding_universe: Option<AwardingUniverse>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Badge {
    /// Minimal badge, mostly useful for tests and fixtures.
    pub fn new(id: impl Into<BadgeId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            created: None,
            awarding_universe: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Parse the `created` timestamp. A trailing `Z` is treated as `+00:00`
    /// and timestamps without an offset are taken to be UTC.
    pub fn created_at(&self) -> Option<DateTime<FixedOffset>> {
        let raw = self.created.as_deref()?.trim();
        let normalized = match raw.strip_suffix('Z') {
            Some(stripped) => format!("{stripped}+00:00"),
            None => raw.to_string(),
        };
        if let Ok(ts) = DateTime::parse_from_rfc3339(&normalized) {
            return Some(ts);
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc().fixed_offset())
    }
}

/// Everything ever seen for one universe.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UniverseRecord {
    #[serde(default)]
    pub data: Vec<Badge>,
}

impl UniverseRecord {
    pub fn known_ids(&self) -> HashSet<BadgeId> {
        self.data.iter().map(|b| b.id.clone()).collect()
    }

    /// Append every badge whose id is not yet recorded and return the appended ones,
    /// in input order. Repeated ids within `badges` are only taken once.
    pub fn absorb(&mut self, badges: impl IntoIterator<Item = Badge>) -> Vec<Badge> {
        let mut known = self.known_ids();
        let mut added = Vec::new();
        for badge in badges {
            if known.insert(badge.id.clone()) {
                added.push(badge);
            }
        }
        self.data.extend(added.iter().cloned());
        added
    }
}

/// Universe id → record. This is the durable "already notified" state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    pub universes: BTreeMap<UniverseId, UniverseRecord>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, universe_id: &str) -> Option<&UniverseRecord> {
        self.universes.get(universe_id)
    }

    pub fn contains(&self, universe_id: &str) -> bool {
        self.universes.contains_key(universe_id)
    }

    pub fn is_empty(&self) -> bool {
        self.universes.is_empty()
    }

    pub fn universe_count(&self) -> usize {
        self.universes.len()
    }

    pub fn badge_count(&self) -> usize {
        self.universes.values().map(|r| r.data.len()).sum()
    }

    /// Fold `other` into `self` as a union: records missing here are copied,
    /// records present on both sides gain the badges they lack.
    pub fn merge(&mut self, other: &Snapshot) {
        for (universe_id, record) in &other.universes {
            self.universes
                .entry(universe_id.clone())
                .or_default()
                .absorb(record.data.iter().cloned());
        }
    }
}
