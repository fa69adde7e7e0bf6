//! Address resolution and overlap detection.
//!
//! Attributes are packed from the fixture's base channel in profile order.
//! The absolute address flattens universes: `(universe - 1) * 512 + channel`.

use serde::Serialize;
use ts_rs::TS;

use crate::error::EngineError;
use crate::model::{DmxAddress, FixtureId, FixtureRecord, Universe, UNIVERSE_SIZE};
use crate::session::Session;

pub fn absolute_address(universe: Universe, channel: DmxAddress) -> u32 {
    (u32::from(universe.get()) - 1) * u32::from(UNIVERSE_SIZE) + u32::from(channel.get())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
pub struct AttributeAddress {
    pub name: String,
    pub width: u16,
    pub universe: u16,
    pub channel: u16,
    pub absolute: u32,
    pub selected: bool,
}

impl AttributeAddress {
    /// `[absolute, absolute + width)`.
    pub fn interval(&self) -> (u32, u32) {
        (self.absolute, self.absolute + u32::from(self.width))
    }

    /// `"u.ccc"`, e.g. `"2.017"`.
    pub fn patch(&self) -> String {
        format!("{}.{:03}", self.universe, self.channel)
    }
}

/// A matched fixture with every attribute of its mode placed.
#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[ts(export)]
pub struct ResolvedFixture {
    #[ts(type = "number")]
    pub id: FixtureId,
    pub name: String,
    pub profile_name: String,
    pub mode_name: String,
    pub footprint: u16,
    pub attributes: Vec<AttributeAddress>,
}

impl ResolvedFixture {
    pub fn selected(&self) -> impl Iterator<Item = &AttributeAddress> {
        self.attributes.iter().filter(|a| a.selected)
    }
}

/// Place one fixture's attributes. `Ok(None)` for an unmatched fixture.
///
/// Fails with `OutOfRange` when the mode's footprint would run past channel
/// 512 of the fixture's universe.
pub fn resolve_fixture(session: &Session, record: &FixtureRecord) -> Result<Option<ResolvedFixture>, EngineError> {
    let Some(profile) = session.profile_of(record) else {
        return Ok(None);
    };
    let Some(mode) = record.matched_mode.as_deref().and_then(|m| profile.mode(m)) else {
        return Ok(None);
    };
    let footprint = mode.footprint();
    let base = record.channel.get();
    let last = u32::from(base) + u32::from(footprint);
    if footprint > 0 && last - 1 > u32::from(UNIVERSE_SIZE) {
        return Err(EngineError::OutOfRange {
            fixture_id: record.id.0,
            channel: base,
            footprint,
        });
    }

    let base_absolute = absolute_address(record.universe, record.channel);
    let mut offset: u16 = 0;
    let mut attributes = Vec::with_capacity(mode.attributes.len());
    for def in &mode.attributes {
        attributes.push(AttributeAddress {
            name: def.name.clone(),
            width: def.width,
            universe: record.universe.get(),
            channel: base + offset,
            absolute: base_absolute + u32::from(offset),
            selected: record.attributes.get(&def.name).copied().unwrap_or(false),
        });
        offset += def.width;
    }
    Ok(Some(ResolvedFixture {
        id: record.id,
        name: record.name.clone(),
        profile_name: profile.name.clone(),
        mode_name: mode.name.clone(),
        footprint,
        attributes,
    }))
}

/// Resolve every matched fixture, ordered by fixture id. Stops at the first
/// overflow.
pub fn resolve_session(session: &Session) -> Result<Vec<ResolvedFixture>, EngineError> {
    let mut resolved = Vec::new();
    for record in session.fixtures() {
        if let Some(r) = resolve_fixture(session, record)? {
            resolved.push(r);
        }
    }
    resolved.sort_by_key(|r| r.id);
    Ok(resolved)
}

/// Like [`resolve_session`] but collects every overflow instead of stopping.
pub fn resolve_lenient(session: &Session) -> (Vec<ResolvedFixture>, Vec<EngineError>) {
    let mut resolved = Vec::new();
    let mut errors = Vec::new();
    for record in session.fixtures() {
        match resolve_fixture(session, record) {
            Ok(Some(r)) => resolved.push(r),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("{e}");
                errors.push(e);
            }
        }
    }
    resolved.sort_by_key(|r| r.id);
    (resolved, errors)
}

// ── Conflicts ───────────────────────────────────────────────────────

/// Two selected attributes of different fixtures sharing channels.
/// `first` is always the lower fixture id; `[start, end)` is the overlap.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, TS)]
#[ts(export)]
pub struct AddressConflict {
    pub start: u32,
    pub end: u32,
    #[ts(type = "number")]
    pub first: FixtureId,
    pub first_attribute: String,
    #[ts(type = "number")]
    pub second: FixtureId,
    pub second_attribute: String,
}

#[derive(Debug, Clone, Copy)]
struct Interval<'a> {
    start: u32,
    end: u32,
    fixture: FixtureId,
    attribute: &'a str,
}

fn conflict(a: &Interval<'_>, b: &Interval<'_>) -> AddressConflict {
    let (lo, hi) = if (a.fixture, a.attribute) <= (b.fixture, b.attribute) {
        (a, b)
    } else {
        (b, a)
    };
    AddressConflict {
        start: a.start.max(b.start),
        end: a.end.min(b.end),
        first: lo.fixture,
        first_attribute: lo.attribute.to_string(),
        second: hi.fixture,
        second_attribute: hi.attribute.to_string(),
    }
}

fn intervals(resolved: &[ResolvedFixture]) -> Vec<Interval<'_>> {
    resolved
        .iter()
        .flat_map(|f| {
            f.selected().filter(|a| a.width > 0).map(move |a| {
                let (start, end) = a.interval();
                Interval {
                    start,
                    end,
                    fixture: f.id,
                    attribute: a.name.as_str(),
                }
            })
        })
        .collect()
}

/// Every overlap between selected attributes of different fixtures, once per
/// attribute pair, sorted. Sort-and-sweep over the intervals.
pub fn find_conflicts(resolved: &[ResolvedFixture]) -> Vec<AddressConflict> {
    let mut all = intervals(resolved);
    all.sort_by_key(|i| (i.start, i.end, i.fixture));

    let mut active: Vec<Interval<'_>> = Vec::new();
    let mut conflicts = Vec::new();
    for current in all {
        active.retain(|a| a.end > current.start);
        for other in &active {
            if other.fixture != current.fixture {
                conflicts.push(conflict(other, &current));
            }
        }
        active.push(current);
    }
    conflicts.sort();
    if !conflicts.is_empty() {
        tracing::warn!(count = conflicts.len(), "address conflicts found");
    }
    conflicts
}

/// Resolve the session and report its conflicts.
pub fn detect_conflicts(session: &Session) -> Result<Vec<AddressConflict>, EngineError> {
    Ok(find_conflicts(&resolve_session(session)?))
}
