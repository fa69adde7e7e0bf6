//! The resolution session: single owner of fixture records, the Master and
//! Remote groups, remote→master links and the profile catalog.
//!
//! Every engine operation takes the session explicitly. Group, matching and
//! addressing logic live in their own modules as `impl Session` blocks or free
//! functions over `&Session`.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::grouping::{GroupRef, SequenceSettings};
use crate::import::ImportBatch;
use crate::model::{FixtureId, FixtureRecord, GroupRole, Profile, ProfileCatalog, ProfileDraft, ProfileId};

/// Snapshot format version.
const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Default)]
pub struct Session {
    fixtures: Vec<FixtureRecord>,
    index: HashMap<FixtureId, usize>,
    catalog: ProfileCatalog,
    pub(crate) masters: Vec<FixtureId>,
    pub(crate) remotes: Vec<FixtureId>,
    /// Remote id → Master id. The only place a link is stored.
    pub(crate) links: HashMap<FixtureId, FixtureId>,
    /// Settings of the last numbering run; fresh numbers continue its counter.
    pub(crate) numbering: Option<SequenceSettings>,
    /// Import warnings carried along for the caller to display.
    warnings: Vec<String>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a session from a normalized import batch.
    ///
    /// Embedded profiles are added to the catalog and fixtures whose type label
    /// names one of them exactly are associated right away.
    pub fn from_batch(batch: ImportBatch) -> Result<Self, EngineError> {
        let mut session = Self::with_fixtures(batch.fixtures)?;
        session.warnings = batch.warnings;
        for draft in batch.profiles {
            session.catalog.insert(draft);
        }
        let associated = session.associate_embedded();
        tracing::info!(
            fixtures = session.fixtures.len(),
            profiles = session.catalog.len(),
            associated,
            "session created from import"
        );
        Ok(session)
    }

    /// Start a session from already-built records. Fails on duplicate ids.
    pub fn with_fixtures(fixtures: Vec<FixtureRecord>) -> Result<Self, EngineError> {
        let mut session = Self::new();
        for record in &fixtures {
            if session.index.insert(record.id, session.index.len()).is_some() {
                return Err(EngineError::malformed(
                    format!("fixture {}", record.id),
                    "duplicate fixture id",
                ));
            }
        }
        session.fixtures = fixtures;
        Ok(session)
    }

    // ── Read access ─────────────────────────────────────────────────

    /// Records in import order.
    pub fn fixtures(&self) -> &[FixtureRecord] {
        &self.fixtures
    }

    pub fn fixture(&self, id: FixtureId) -> Option<&FixtureRecord> {
        self.index.get(&id).and_then(|&i| self.fixtures.get(i))
    }

    pub(crate) fn fixture_mut(&mut self, id: FixtureId) -> Option<&mut FixtureRecord> {
        let i = *self.index.get(&id)?;
        self.fixtures.get_mut(i)
    }

    pub(crate) fn require(&self, id: FixtureId) -> Result<&FixtureRecord, EngineError> {
        self.fixture(id).ok_or_else(|| EngineError::NotFound {
            what: format!("Fixture {id}"),
        })
    }

    pub(crate) fn fixtures_mut(&mut self) -> impl Iterator<Item = &mut FixtureRecord> {
        self.fixtures.iter_mut()
    }

    pub fn catalog(&self) -> &ProfileCatalog {
        &self.catalog
    }

    pub fn profile(&self, id: ProfileId) -> Option<&Profile> {
        self.catalog.get(id)
    }

    /// The profile a fixture is matched to, if any.
    pub fn profile_of(&self, record: &FixtureRecord) -> Option<&Profile> {
        record.matched_profile.and_then(|id| self.catalog.get(id))
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Ordered member ids of a group.
    pub fn group(&self, group: GroupRef) -> &[FixtureId] {
        match group {
            GroupRef::Masters => &self.masters,
            GroupRef::Remotes => &self.remotes,
        }
    }

    pub(crate) fn group_mut(&mut self, group: GroupRef) -> &mut Vec<FixtureId> {
        match group {
            GroupRef::Masters => &mut self.masters,
            GroupRef::Remotes => &mut self.remotes,
        }
    }

    pub fn linked_master(&self, remote: FixtureId) -> Option<FixtureId> {
        self.links.get(&remote).copied()
    }

    /// Remotes linked to `master`, in Remote group order.
    pub fn remotes_of(&self, master: FixtureId) -> Vec<FixtureId> {
        self.remotes
            .iter()
            .copied()
            .filter(|r| self.links.get(r) == Some(&master))
            .collect()
    }

    /// Sequence number for any fixture. A linked Remote reads its Master's
    /// current value; there is no copy to go stale.
    pub fn sequence_number(&self, id: FixtureId) -> Option<u32> {
        let record = self.fixture(id)?;
        match self.links.get(&id) {
            Some(master) => self.fixture(*master).and_then(|m| m.sequence),
            None => record.sequence,
        }
    }

    // ── Catalog ─────────────────────────────────────────────────────

    /// Add externally loaded profiles. Existing matches are untouched.
    pub fn add_profiles(&mut self, drafts: Vec<ProfileDraft>) -> Vec<ProfileId> {
        drafts.into_iter().map(|d| self.catalog.insert(d)).collect()
    }

    // ── Attribute selection ─────────────────────────────────────────

    /// Select exactly `names` on one fixture; every other attribute is deselected.
    /// Names the fixture does not have are ignored.
    pub fn select_attributes(&mut self, id: FixtureId, names: &[&str]) -> Result<(), EngineError> {
        self.require(id)?;
        if let Some(record) = self.fixture_mut(id) {
            for (name, selected) in &mut record.attributes {
                *selected = names.contains(&name.as_str());
            }
        }
        Ok(())
    }

    /// Select `names` on every fixture with this type label. Returns the number
    /// of fixtures touched.
    pub fn select_attributes_for_type(&mut self, type_label: &str, names: &[&str]) -> usize {
        let mut touched = 0;
        for record in self.fixtures.iter_mut().filter(|r| r.type_label == type_label) {
            for (name, selected) in &mut record.attributes {
                *selected = names.contains(&name.as_str());
            }
            touched += 1;
        }
        touched
    }

    /// Select `names` on every matched fixture.
    pub fn select_attributes_everywhere(&mut self, names: &[&str]) {
        for record in &mut self.fixtures {
            for (name, selected) in &mut record.attributes {
                *selected = names.contains(&name.as_str());
            }
        }
    }

    // ── Removal ─────────────────────────────────────────────────────

    /// Delete a fixture. Removing a Master unlinks its Remotes first.
    pub fn remove_fixture(&mut self, id: FixtureId) -> Result<FixtureRecord, EngineError> {
        self.require(id)?;
        self.assign_role(id, GroupRole::Unassigned)?;
        let i = self.index.get(&id).copied().ok_or_else(|| EngineError::NotFound {
            what: format!("Fixture {id}"),
        })?;
        let removed = self.fixtures.remove(i);
        self.reindex();
        Ok(removed)
    }

    fn reindex(&mut self) {
        self.index = self
            .fixtures
            .iter()
            .enumerate()
            .map(|(i, r)| (r.id, i))
            .collect();
    }

    // ── Snapshot / restore ──────────────────────────────────────────

    /// Complete, order-preserving copy of the session state.
    pub fn snapshot(&self) -> SessionSnapshot {
        let mut links: Vec<RemoteLink> = self
            .links
            .iter()
            .map(|(&remote, &master)| RemoteLink { remote, master })
            .collect();
        links.sort_by_key(|l| l.remote);
        SessionSnapshot {
            version: SNAPSHOT_VERSION,
            fixtures: self.fixtures.clone(),
            profiles: self.catalog.profiles().to_vec(),
            masters: self.masters.clone(),
            remotes: self.remotes.clone(),
            links,
            numbering: self.numbering,
            warnings: self.warnings.clone(),
        }
    }

    /// Rebuild a session from a snapshot, validating every invariant first.
    pub fn restore(snapshot: SessionSnapshot) -> Result<Self, EngineError> {
        if snapshot.version > SNAPSHOT_VERSION {
            return Err(EngineError::malformed(
                "snapshot",
                format!(
                    "snapshot version {} is newer than supported version {SNAPSHOT_VERSION}",
                    snapshot.version
                ),
            ));
        }
        let mut session = Self::with_fixtures(snapshot.fixtures)?;

        let mut profile_ids = HashSet::new();
        for p in &snapshot.profiles {
            if !profile_ids.insert(p.id) {
                return Err(EngineError::malformed("snapshot", format!("duplicate profile id {}", p.id.0)));
            }
        }
        session.catalog = ProfileCatalog::from_profiles(snapshot.profiles);

        for record in &session.fixtures {
            if let Some(pid) = record.matched_profile {
                let profile = session.catalog.get(pid).ok_or_else(|| {
                    EngineError::malformed(
                        format!("fixture {}", record.id),
                        format!("references unknown profile {}", pid.0),
                    )
                })?;
                let mode_ok = record
                    .matched_mode
                    .as_deref()
                    .is_some_and(|m| profile.mode(m).is_some());
                if !mode_ok {
                    return Err(EngineError::malformed(
                        format!("fixture {}", record.id),
                        "matched mode missing from profile",
                    ));
                }
            }
        }

        session.check_group(&snapshot.masters, GroupRole::Master)?;
        session.check_group(&snapshot.remotes, GroupRole::Remote)?;
        session.masters = snapshot.masters;
        session.remotes = snapshot.remotes;

        for link in snapshot.links {
            let remote = session.require(link.remote)?;
            if remote.role != GroupRole::Remote || remote.sequence.is_some() {
                return Err(EngineError::invalid_link(
                    link.remote.0,
                    "linked fixture must be a Remote without its own sequence",
                ));
            }
            if session.require(link.master)?.role != GroupRole::Master {
                return Err(EngineError::invalid_link(link.remote.0, "link target is not a Master"));
            }
            if session.links.insert(link.remote, link.master).is_some() {
                return Err(EngineError::invalid_link(link.remote.0, "remote linked twice"));
            }
        }
        if let Some(numbering) = &snapshot.numbering {
            numbering.validate()?;
        }
        session.numbering = snapshot.numbering;
        session.warnings = snapshot.warnings;
        Ok(session)
    }

    fn check_group(&self, members: &[FixtureId], role: GroupRole) -> Result<(), EngineError> {
        let mut seen = HashSet::new();
        for &id in members {
            let record = self.require(id)?;
            if record.role != role || !seen.insert(id) {
                return Err(EngineError::malformed(
                    format!("fixture {id}"),
                    format!("inconsistent {} group membership", role.label()),
                ));
            }
        }
        let with_role = self.fixtures.iter().filter(|r| r.role == role).count();
        if with_role != seen.len() {
            return Err(EngineError::malformed(
                "snapshot",
                format!("{} group does not list every {} fixture", role.label(), role.label()),
            ));
        }
        Ok(())
    }
}

/// One remote→master relation in a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteLink {
    pub remote: FixtureId,
    pub master: FixtureId,
}

/// Serializable form of a whole session, for the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub version: u32,
    pub fixtures: Vec<FixtureRecord>,
    pub profiles: Vec<Profile>,
    pub masters: Vec<FixtureId>,
    pub remotes: Vec<FixtureId>,
    pub links: Vec<RemoteLink>,
    #[serde(default)]
    pub numbering: Option<SequenceSettings>,
    #[serde(default)]
    pub warnings: Vec<String>,
}
