//! Master and Remote groups, remote→master links and sequence numbering.
//!
//! Group order is meaningful: it drives numbering and display. All operations
//! validate first and mutate only once nothing can fail.

use std::collections::{BTreeSet, HashSet};
use std::ops::Range;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::EngineError;
use crate::matcher::Similarity;
use crate::model::{FixtureId, GroupRole};
use crate::session::{RemoteLink, Session};

/// Which ordered group an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub enum GroupRef {
    Masters,
    Remotes,
}

impl GroupRef {
    pub fn role(self) -> GroupRole {
        match self {
            GroupRef::Masters => GroupRole::Master,
            GroupRef::Remotes => GroupRole::Remote,
        }
    }

    fn label(self) -> &'static str {
        match self {
            GroupRef::Masters => "master group",
            GroupRef::Remotes => "remote group",
        }
    }
}

fn default_start() -> u32 {
    1
}

fn default_interval() -> u32 {
    1
}

fn default_break() -> u32 {
    5
}

/// How `generate_sequence_numbers` counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, TS)]
#[ts(export)]
pub struct SequenceSettings {
    /// One counter across Masters then unlinked Remotes, or one per group.
    /// Has no default: callers must choose.
    pub shared_counter: bool,
    #[serde(default = "default_start")]
    pub start_number: u32,
    #[serde(default = "default_interval")]
    pub interval: u32,
    /// Skip `break_sequences` extra numbers after every numbered fixture.
    #[serde(default)]
    pub add_breaks: bool,
    #[serde(default = "default_break")]
    pub break_sequences: u32,
}

impl SequenceSettings {
    pub fn new(shared_counter: bool) -> Self {
        Self {
            shared_counter,
            start_number: default_start(),
            interval: default_interval(),
            add_breaks: false,
            break_sequences: default_break(),
        }
    }

    /// Distance from one issued number to the next.
    fn stride(&self) -> u32 {
        if self.add_breaks {
            self.interval.saturating_add(self.break_sequences)
        } else {
            self.interval
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.start_number == 0 {
            return Err(EngineError::config("sequence start_number must be at least 1"));
        }
        if self.interval == 0 {
            return Err(EngineError::config("sequence interval must be at least 1"));
        }
        if self.add_breaks && self.break_sequences == 0 {
            return Err(EngineError::config("break_sequences must be at least 1 when breaks are enabled"));
        }
        Ok(())
    }
}

// ── Order-preserving move ───────────────────────────────────────────

/// Remove the elements at `selected` and reinsert them, in their original
/// relative order, at `target` counted after removal (clamped to the new
/// length). Duplicate indices are collapsed. Returns the block's new range,
/// or the first out-of-range index without touching `list`.
pub fn move_indices<T>(list: &mut Vec<T>, selected: &[usize], target: usize) -> Result<Range<usize>, usize> {
    let picked: BTreeSet<usize> = selected.iter().copied().collect();
    if let Some(&bad) = picked.iter().find(|&&i| i >= list.len()) {
        return Err(bad);
    }
    let mut moved: Vec<T> = picked.iter().rev().map(|&i| list.remove(i)).collect();
    moved.reverse();
    let at = target.min(list.len());
    let end = at + moved.len();
    list.splice(at..at, moved);
    Ok(at..end)
}

// ── Session operations ──────────────────────────────────────────────

impl Session {
    fn require_for_link(&self, id: FixtureId) -> Result<GroupRole, EngineError> {
        self.fixture(id)
            .map(|r| r.role)
            .ok_or_else(|| EngineError::invalid_link(id.0, "no such fixture"))
    }

    /// Move a fixture to the end of the Master or Remote group, or out of both.
    ///
    /// Leaving Master unlinks its Remotes (each gets a fresh number). Leaving
    /// Remote drops its link. Becoming Unassigned drops the own number; moving
    /// between Master and Remote renumbers on the destination counter.
    pub fn assign_role(&mut self, id: FixtureId, role: GroupRole) -> Result<(), EngineError> {
        let current = self.require_for_link(id)?;
        if current == role {
            return Ok(());
        }
        self.detach(id);
        match role {
            GroupRole::Master => self.masters.push(id),
            GroupRole::Remote => self.remotes.push(id),
            GroupRole::Unassigned => {}
        }
        self.set_role(id, role);
        tracing::debug!(fixture = %id, from = current.label(), to = role.label(), "role changed");
        Ok(())
    }

    /// Take a fixture out of its group with the side effects of leaving it.
    /// The record's role field is left for the caller to set.
    fn detach(&mut self, id: FixtureId) {
        let role = self.fixture(id).map_or(GroupRole::Unassigned, |r| r.role);
        match role {
            GroupRole::Master => {
                self.masters.retain(|m| *m != id);
                for remote in self.remotes_of(id) {
                    self.links.remove(&remote);
                    self.give_fresh_number(remote);
                }
            }
            GroupRole::Remote => {
                self.remotes.retain(|r| *r != id);
                self.links.remove(&id);
            }
            GroupRole::Unassigned => {}
        }
    }

    /// Write the record's new role. With independent counters a numbered
    /// fixture crossing between Master and Remote takes a fresh number on the
    /// destination counter, where its old one may already be issued.
    fn set_role(&mut self, id: FixtureId, role: GroupRole) {
        let independent = self.numbering.is_some_and(|s| !s.shared_counter);
        let Some(record) = self.fixture_mut(id) else {
            return;
        };
        let crossing = record.role != GroupRole::Unassigned && record.role != role;
        record.role = role;
        if role == GroupRole::Unassigned {
            record.sequence = None;
        } else if crossing && independent && record.sequence.take().is_some() {
            self.give_fresh_number(id);
        }
    }

    /// Link a Remote to a Master. The Remote's own number is dropped; from now
    /// on it reads the Master's.
    pub fn link_remote(&mut self, remote: FixtureId, master: FixtureId) -> Result<(), EngineError> {
        if self.require_for_link(remote)? != GroupRole::Remote {
            return Err(EngineError::invalid_link(remote.0, "fixture is not a Remote"));
        }
        if self.require_for_link(master)? != GroupRole::Master {
            return Err(EngineError::invalid_link(
                remote.0,
                format!("fixture {master} is not a Master"),
            ));
        }
        self.links.insert(remote, master);
        if let Some(record) = self.fixture_mut(remote) {
            record.sequence = None;
        }
        tracing::debug!(remote = %remote, master = %master, "remote linked");
        Ok(())
    }

    /// Clear a Remote's link. It gets a fresh independent number if it has none.
    pub fn unlink_remote(&mut self, remote: FixtureId) -> Result<(), EngineError> {
        if self.require_for_link(remote)? != GroupRole::Remote {
            return Err(EngineError::invalid_link(remote.0, "fixture is not a Remote"));
        }
        self.links.remove(&remote);
        self.give_fresh_number(remote);
        Ok(())
    }

    fn give_fresh_number(&mut self, id: FixtureId) {
        let role = self.fixture(id).filter(|r| r.sequence.is_none()).map(|r| r.role);
        if let Some(role @ (GroupRole::Master | GroupRole::Remote)) = role {
            let number = self.fresh_number(role);
            if let Some(record) = self.fixture_mut(id) {
                record.sequence = Some(number);
            }
        }
    }

    /// Next unused number on the counter `role` draws from: highest issued +
    /// stride, or the start number. Before any numbering has run, every stored
    /// number counts so the new one is distinct from all of them.
    fn fresh_number(&self, role: GroupRole) -> u32 {
        let (shared, start, stride) = match self.numbering {
            Some(s) => (s.shared_counter, s.start_number, s.stride()),
            None => (true, 1, 1),
        };
        let highest = self
            .fixtures()
            .iter()
            .filter(|r| r.role != GroupRole::Unassigned && (shared || r.role == role))
            .filter_map(|r| r.sequence)
            .max();
        highest.map_or(start, |n| n.saturating_add(stride))
    }

    /// Reorder a selection within one group. Returns the moved block's range.
    pub fn move_rows(&mut self, group: GroupRef, selected: &[usize], target: usize) -> Result<Range<usize>, EngineError> {
        move_indices(self.group_mut(group), selected, target).map_err(|index| EngineError::InvalidIndex {
            what: group.label().into(),
            index,
        })
    }

    /// Move a selection from one group into the other at `target`, keeping its
    /// relative order and applying the role change to every moved fixture.
    pub fn transfer_rows(
        &mut self,
        from: GroupRef,
        selected: &[usize],
        to: GroupRef,
        target: usize,
    ) -> Result<Range<usize>, EngineError> {
        if from == to {
            return self.move_rows(from, selected, target);
        }
        let picked: BTreeSet<usize> = selected.iter().copied().collect();
        let source = self.group(from);
        let mut ids = Vec::with_capacity(picked.len());
        for &i in &picked {
            let id = source.get(i).copied().ok_or_else(|| EngineError::InvalidIndex {
                what: from.label().into(),
                index: i,
            })?;
            ids.push(id);
        }

        for &id in &ids {
            self.detach(id);
        }
        let dest = self.group_mut(to);
        let at = target.min(dest.len());
        dest.splice(at..at, ids.iter().copied());
        for &id in &ids {
            self.set_role(id, to.role());
        }
        tracing::debug!(count = ids.len(), to = to.label(), "rows transferred");
        Ok(at..at + ids.len())
    }

    /// Number every Master and unlinked Remote from scratch in group order.
    /// Linked Remotes keep no number of their own. Invalid settings are
    /// rejected before any number changes.
    pub fn generate_sequence_numbers(&mut self, settings: &SequenceSettings) -> Result<(), EngineError> {
        settings.validate()?;
        let step = settings.stride();
        let mut counter = settings.start_number;
        let mut assigned = Vec::new();
        for &id in &self.masters {
            assigned.push((id, Some(counter)));
            counter = counter.saturating_add(step);
        }
        if !settings.shared_counter {
            counter = settings.start_number;
        }
        for &id in &self.remotes {
            if self.links.contains_key(&id) {
                assigned.push((id, None));
            } else {
                assigned.push((id, Some(counter)));
                counter = counter.saturating_add(step);
            }
        }
        let grouped: HashSet<FixtureId> = assigned.iter().map(|(id, _)| *id).collect();
        for record in self.fixtures_mut() {
            if !grouped.contains(&record.id) {
                record.sequence = None;
            }
        }
        for (id, number) in assigned {
            if let Some(record) = self.fixture_mut(id) {
                record.sequence = number;
            }
        }
        self.numbering = Some(*settings);
        tracing::info!(
            masters = self.masters.len(),
            remotes = self.remotes.len(),
            shared = settings.shared_counter,
            "sequence numbers generated"
        );
        Ok(())
    }

    /// Override one number. Not allowed on a linked Remote: it reads its
    /// Master's number.
    pub fn set_sequence_number(&mut self, id: FixtureId, number: u32) -> Result<(), EngineError> {
        match self.require_for_link(id)? {
            GroupRole::Unassigned => Err(EngineError::invalid_link(id.0, "fixture is not in a group")),
            GroupRole::Remote if self.links.contains_key(&id) => Err(EngineError::invalid_link(
                id.0,
                "linked Remote takes its number from its Master",
            )),
            GroupRole::Master | GroupRole::Remote => {
                if let Some(record) = self.fixture_mut(id) {
                    record.sequence = Some(number);
                }
                Ok(())
            }
        }
    }

    /// Pair the i-th Master with the i-th Remote, up to the shorter group.
    /// Remotes that already have a link keep it. Returns the links made.
    pub fn link_by_position(&mut self) -> Result<usize, EngineError> {
        let pairs: Vec<(FixtureId, FixtureId)> = self
            .masters
            .iter()
            .zip(&self.remotes)
            .filter(|(_, remote)| !self.links.contains_key(remote))
            .map(|(&master, &remote)| (master, remote))
            .collect();
        for &(master, remote) in &pairs {
            self.link_remote(remote, master)?;
        }
        tracing::info!(links = pairs.len(), "linked remotes by position");
        Ok(pairs.len())
    }

    /// Link each unlinked Remote to the Master with the most similar name.
    /// Each Master is used at most once per call; ties go to the earlier Master.
    pub fn auto_link_remotes(&mut self, similarity: &dyn Similarity, threshold: f64) -> Vec<RemoteLink> {
        let masters: Vec<(FixtureId, String)> = self
            .masters
            .iter()
            .filter_map(|&id| self.fixture(id).map(|r| (id, r.name.clone())))
            .collect();
        let mut used = HashSet::new();
        let mut made = Vec::new();
        for remote in self.remotes.clone() {
            if self.links.contains_key(&remote) {
                continue;
            }
            let Some(name) = self.fixture(remote).map(|r| r.name.clone()) else {
                continue;
            };
            let mut best: Option<(FixtureId, f64)> = None;
            for (master, master_name) in &masters {
                if used.contains(master) {
                    continue;
                }
                let score = similarity.score(&name, master_name);
                if score >= threshold && best.map_or(true, |(_, s)| score > s) {
                    best = Some((*master, score));
                }
            }
            if let Some((master, _)) = best {
                used.insert(master);
                if self.link_remote(remote, master).is_ok() {
                    made.push(RemoteLink { remote, master });
                }
            }
        }
        tracing::info!(links = made.len(), "auto-linked remotes");
        made
    }
}
