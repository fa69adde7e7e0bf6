use serde::{Deserialize, Serialize};

/// Newtype for profile identity within a catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileId(pub u32);

/// One controllable attribute and the number of consecutive DMX channels it uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDef {
    pub name: String,
    /// 1 = 8-bit, 2 = 16-bit, 3 = 24-bit...
    pub width: u16,
}

impl AttributeDef {
    pub fn new(name: impl Into<String>, width: u16) -> Self {
        Self {
            name: name.into(),
            width,
        }
    }
}

/// A DMX mode: the packed, ordered channel layout of a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DmxMode {
    pub name: String,
    pub attributes: Vec<AttributeDef>,
}

impl DmxMode {
    /// Total DMX channels this mode consumes, saturating at `u16::MAX`.
    pub fn footprint(&self) -> u16 {
        self.attributes.iter().fold(0u16, |total, a| total.saturating_add(a.width))
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeDef> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

/// Where a profile came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProfileSource {
    /// Packed inside the MVR archive under this entry name.
    Embedded { file_name: String },
    /// Loaded from a standalone GDTF file.
    External { path: String },
    /// Built in code (tests, manual definitions).
    Inline,
}

/// A device profile extracted from a GDTF definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: ProfileId,
    pub manufacturer: String,
    pub name: String,
    pub modes: Vec<DmxMode>,
    pub source: ProfileSource,
}

impl Profile {
    pub fn mode(&self, name: &str) -> Option<&DmxMode> {
        self.modes.iter().find(|m| m.name == name)
    }

    pub fn default_mode(&self) -> Option<&DmxMode> {
        self.modes.first()
    }

    /// Attribute names of the default mode, in declared order.
    pub fn declared_attribute_names(&self) -> Vec<&str> {
        self.default_mode()
            .map(|m| m.attributes.iter().map(|a| a.name.as_str()).collect())
            .unwrap_or_default()
    }

    /// Archive entry or file stem without the `.gdtf` extension, if known.
    pub fn file_stem(&self) -> Option<&str> {
        let name = match &self.source {
            ProfileSource::Embedded { file_name } => file_name.as_str(),
            ProfileSource::External { path } => path.as_str(),
            ProfileSource::Inline => return None,
        };
        let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
        Some(strip_gdtf_extension(base))
    }
}

/// Drop a trailing `.gdtf` (any case).
pub fn strip_gdtf_extension(name: &str) -> &str {
    let trimmed = name.trim();
    match trimmed.len().checked_sub(5) {
        Some(cut) if trimmed.is_char_boundary(cut) => {
            let (stem, ext) = trimmed.split_at(cut);
            if ext.eq_ignore_ascii_case(".gdtf") {
                stem
            } else {
                trimmed
            }
        }
        _ => trimmed,
    }
}

/// A profile definition before it has been assigned an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileDraft {
    pub manufacturer: String,
    pub name: String,
    pub modes: Vec<DmxMode>,
    pub source: ProfileSource,
}

// ── Catalog ─────────────────────────────────────────────────────────

/// All profiles known to a session, in load order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileCatalog {
    profiles: Vec<Profile>,
    next_id: u32,
}

impl ProfileCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a profile and return its freshly allocated id.
    pub fn insert(&mut self, draft: ProfileDraft) -> ProfileId {
        let id = ProfileId(self.next_id);
        self.next_id += 1;
        self.profiles.push(Profile {
            id,
            manufacturer: draft.manufacturer,
            name: draft.name,
            modes: draft.modes,
            source: draft.source,
        });
        id
    }

    pub fn get(&self, id: ProfileId) -> Option<&Profile> {
        self.profiles.iter().find(|p| p.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Profile> {
        self.profiles.iter()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Rebuild from a snapshot list, keeping the ids.
    pub(crate) fn from_profiles(profiles: Vec<Profile>) -> Self {
        let next_id = profiles.iter().map(|p| p.id.0 + 1).max().unwrap_or(0);
        Self { profiles, next_id }
    }

    pub(crate) fn profiles(&self) -> &[Profile] {
        &self.profiles
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn draft(name: &str) -> ProfileDraft {
        ProfileDraft {
            manufacturer: "Martin".into(),
            name: name.into(),
            modes: vec![DmxMode {
                name: "Standard".into(),
                attributes: vec![AttributeDef::new("Dimmer", 2), AttributeDef::new("Pan", 2)],
            }],
            source: ProfileSource::Embedded {
                file_name: "Martin@Mac_Viper.gdtf".into(),
            },
        }
    }

    #[test]
    fn catalog_allocates_increasing_ids() {
        let mut catalog = ProfileCatalog::new();
        let a = catalog.insert(draft("Mac Viper"));
        let b = catalog.insert(draft("Mac Aura"));
        assert_eq!(a, ProfileId(0));
        assert_eq!(b, ProfileId(1));
        assert_eq!(catalog.get(b).unwrap().name, "Mac Aura");
    }

    #[test]
    fn declared_names_follow_default_mode() {
        let mut catalog = ProfileCatalog::new();
        let id = catalog.insert(draft("Mac Viper"));
        let profile = catalog.get(id).unwrap();
        assert_eq!(profile.declared_attribute_names(), vec!["Dimmer", "Pan"]);
        assert_eq!(profile.default_mode().unwrap().footprint(), 4);
        assert_eq!(profile.file_stem(), Some("Martin@Mac_Viper"));
    }

    #[test]
    fn oversized_footprint_saturates() {
        let mode = DmxMode {
            name: "Huge".into(),
            attributes: vec![AttributeDef::new("A", u16::MAX), AttributeDef::new("B", 2)],
        };
        assert_eq!(mode.footprint(), u16::MAX);
    }

    #[test]
    fn strip_extension_is_case_insensitive() {
        assert_eq!(strip_gdtf_extension("Foo.GDTF"), "Foo");
        assert_eq!(strip_gdtf_extension("Foo"), "Foo");
        assert_eq!(strip_gdtf_extension(".gdtf"), "");
    }

    #[test]
    fn restored_catalog_continues_numbering() {
        let mut catalog = ProfileCatalog::new();
        catalog.insert(draft("A"));
        catalog.insert(draft("B"));
        let mut restored = ProfileCatalog::from_profiles(catalog.profiles().to_vec());
        assert_eq!(restored.insert(draft("C")), ProfileId(2));
    }
}
