use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::profile::{DmxMode, ProfileId};

/// Channels per DMX universe.
pub const UNIVERSE_SIZE: u16 = 512;

/// Newtype for fixture identity. Unique within one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FixtureId(pub u32);

impl std::fmt::Display for FixtureId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── DMX Addressing ──────────────────────────────────────────────────

/// DMX universe number, 1-indexed as shown to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct Universe(u16);

impl Universe {
    /// Create a universe. Returns None for 0.
    pub fn new(universe: u16) -> Option<Self> {
        (universe >= 1).then_some(Self(universe))
    }

    pub fn get(self) -> u16 {
        self.0
    }
}

impl TryFrom<u16> for Universe {
    type Error = String;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| format!("universe must be >= 1, got {value}"))
    }
}

impl From<Universe> for u16 {
    fn from(u: Universe) -> u16 {
        u.0
    }
}

/// DMX channel address within a universe. Valid range: 1..=512.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct DmxAddress(u16);

impl DmxAddress {
    /// Create a DMX address. Returns None if out of valid range (1-512).
    pub fn new(addr: u16) -> Option<Self> {
        if (1..=UNIVERSE_SIZE).contains(&addr) {
            Some(Self(addr))
        } else {
            None
        }
    }

    pub fn get(self) -> u16 {
        self.0
    }
}

impl TryFrom<u16> for DmxAddress {
    type Error = String;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| format!("channel must be in 1..=512, got {value}"))
    }
}

impl From<DmxAddress> for u16 {
    fn from(a: DmxAddress) -> u16 {
        a.0
    }
}

/// Split a flat 1-based address into (universe, channel).
pub fn split_absolute(absolute: u32) -> Option<(Universe, DmxAddress)> {
    if absolute == 0 {
        return None;
    }
    let size = u32::from(UNIVERSE_SIZE);
    let universe = u16::try_from((absolute - 1) / size + 1).ok()?;
    let channel = u16::try_from((absolute - 1) % size + 1).ok()?;
    Some((Universe::new(universe)?, DmxAddress::new(channel)?))
}

/// Parse `"u.c"` (e.g. `"2.001"`) or a flat absolute address (e.g. `"513"`).
pub fn parse_patch(text: &str) -> Option<(Universe, DmxAddress)> {
    let text = text.trim();
    if let Some((u, c)) = text.split_once('.') {
        let universe = Universe::new(u.trim().parse().ok()?)?;
        let channel = DmxAddress::new(c.trim().parse().ok()?)?;
        Some((universe, channel))
    } else {
        split_absolute(text.parse().ok()?)
    }
}

// ── Roles & matching ────────────────────────────────────────────────

/// Which group a fixture belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum GroupRole {
    #[default]
    Unassigned,
    Master,
    Remote,
}

impl GroupRole {
    pub fn label(self) -> &'static str {
        match self {
            GroupRole::Unassigned => "unassigned",
            GroupRole::Master => "master",
            GroupRole::Remote => "remote",
        }
    }
}

/// How the current profile assignment came about.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MatchKind {
    /// Exact name match against a profile embedded in the same MVR.
    Embedded,
    /// Fuzzy match accepted above the threshold.
    Automatic { score: f64 },
    /// Chosen by the user. Automatic matching never replaces it.
    Manual,
}

// ── Fixture record ──────────────────────────────────────────────────

/// The canonical fixture record every component works on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureRecord {
    pub id: FixtureId,
    pub name: String,
    /// Type label as read from the source (GDTF spec name, CSV type column...).
    pub type_label: String,
    /// DMX mode label as read from the source, if any.
    #[serde(default)]
    pub mode_label: Option<String>,
    pub universe: Universe,
    pub channel: DmxAddress,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub matched_profile: Option<ProfileId>,
    #[serde(default)]
    pub matched_mode: Option<String>,
    #[serde(default)]
    pub match_kind: Option<MatchKind>,
    /// Attribute name -> selected for export, in profile-declared order.
    #[serde(default)]
    pub attributes: IndexMap<String, bool>,
    #[serde(default)]
    pub(crate) role: GroupRole,
    /// Own sequence storage. Always None for a linked Remote.
    #[serde(default)]
    pub(crate) sequence: Option<u32>,
}

impl FixtureRecord {
    pub fn new(
        id: FixtureId,
        name: impl Into<String>,
        type_label: impl Into<String>,
        universe: Universe,
        channel: DmxAddress,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            type_label: type_label.into(),
            mode_label: None,
            universe,
            channel,
            uuid: None,
            matched_profile: None,
            matched_mode: None,
            match_kind: None,
            attributes: IndexMap::new(),
            role: GroupRole::Unassigned,
            sequence: None,
        }
    }

    pub fn with_mode(mut self, mode: Option<String>) -> Self {
        self.mode_label = mode.filter(|m| !m.trim().is_empty());
        self
    }

    pub fn role(&self) -> GroupRole {
        self.role
    }

    pub fn is_matched(&self) -> bool {
        self.matched_profile.is_some()
    }

    pub fn is_manual_match(&self) -> bool {
        matches!(self.match_kind, Some(MatchKind::Manual))
    }

    /// Selected attribute names in declared order.
    pub fn selected_attributes(&self) -> impl Iterator<Item = &str> {
        self.attributes
            .iter()
            .filter(|(_, selected)| **selected)
            .map(|(name, _)| name.as_str())
    }

    /// Apply a profile mode, keeping the selection of attributes whose name survives.
    pub(crate) fn apply_match(&mut self, profile: ProfileId, mode: &DmxMode, kind: MatchKind) {
        let previous = std::mem::take(&mut self.attributes);
        self.attributes = mode
            .attributes
            .iter()
            .map(|a| {
                let selected = previous.get(&a.name).copied().unwrap_or(false);
                (a.name.clone(), selected)
            })
            .collect();
        self.matched_profile = Some(profile);
        self.matched_mode = Some(mode.name.clone());
        self.match_kind = Some(kind);
    }

    pub(crate) fn clear_match(&mut self) {
        self.matched_profile = None;
        self.matched_mode = None;
        self.match_kind = None;
        self.attributes.clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn dmx_address_bounds() {
        assert!(DmxAddress::new(0).is_none());
        assert!(DmxAddress::new(1).is_some());
        assert!(DmxAddress::new(512).is_some());
        assert!(DmxAddress::new(513).is_none());
        assert!(Universe::new(0).is_none());
    }

    #[test]
    fn split_absolute_wraps_at_universe_boundary() {
        let (u, c) = split_absolute(512).unwrap();
        assert_eq!((u.get(), c.get()), (1, 512));
        let (u, c) = split_absolute(513).unwrap();
        assert_eq!((u.get(), c.get()), (2, 1));
        assert!(split_absolute(0).is_none());
    }

    #[test]
    fn parse_patch_accepts_both_forms() {
        let (u, c) = parse_patch("101.206").unwrap();
        assert_eq!((u.get(), c.get()), (101, 206));
        let (u, c) = parse_patch("1025").unwrap();
        assert_eq!((u.get(), c.get()), (3, 1));
        assert!(parse_patch("2.600").is_none());
        assert!(parse_patch("abc").is_none());
    }

    #[test]
    fn universe_rejects_zero_on_deserialize() {
        let res: Result<Universe, _> = serde_json::from_str("0");
        assert!(res.is_err());
        let ok: DmxAddress = serde_json::from_str("17").unwrap();
        assert_eq!(ok.get(), 17);
    }
}
