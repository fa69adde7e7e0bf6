//! Profile matching: ranks catalog profiles against a fixture's type label.
//!
//! Scoring sits behind the [`Similarity`] trait so another algorithm can be
//! dropped in without touching callers.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use serde::Serialize;
use ts_rs::TS;

use crate::error::EngineError;
use crate::model::{strip_gdtf_extension, DmxMode, FixtureId, MatchKind, Profile, ProfileCatalog, ProfileId, ProfileSource};
use crate::session::Session;

/// Minimum similarity for a mode label to pick a non-default mode.
const MODE_THRESHOLD: f64 = 0.5;

/// A string similarity in [0, 1]. Must be deterministic.
pub trait Similarity {
    fn score(&self, label: &str, candidate: &str) -> f64;
}

/// Case-folded token sets compared by Jaccard ratio, plus a bonus when one
/// normalized string contains the other.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenSetSimilarity {
    pub containment_bonus: f64,
}

impl Default for TokenSetSimilarity {
    fn default() -> Self {
        Self {
            containment_bonus: 0.2,
        }
    }
}

/// Lowercase alphanumeric tokens. A trailing `.gdtf` is dropped first.
pub fn tokens(text: &str) -> BTreeSet<String> {
    strip_gdtf_extension(text)
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

impl Similarity for TokenSetSimilarity {
    fn score(&self, label: &str, candidate: &str) -> f64 {
        let a = tokens(label);
        let b = tokens(candidate);
        if a.is_empty() || b.is_empty() {
            return 0.0;
        }
        let shared = a.intersection(&b).count();
        let union = a.union(&b).count();
        #[allow(clippy::cast_precision_loss)]
        let mut score = shared as f64 / union as f64;

        let joined_a = squash(label);
        let joined_b = squash(candidate);
        if joined_a.contains(&joined_b) || joined_b.contains(&joined_a) {
            score += self.containment_bonus;
        }
        score.min(1.0)
    }
}

/// Normalized string with separators removed, in original token order.
fn squash(text: &str) -> String {
    strip_gdtf_extension(text)
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

// ── Ranking ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[ts(export)]
pub struct Candidate {
    #[ts(type = "number")]
    pub profile_id: ProfileId,
    pub manufacturer: String,
    pub profile_name: String,
    pub score: f64,
}

/// Rank every profile against `label`, best first. Each profile is scored
/// against its name and against "manufacturer name", keeping the higher.
pub fn rank(label: &str, catalog: &ProfileCatalog, similarity: &dyn Similarity) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = catalog
        .iter()
        .map(|p| {
            let by_name = similarity.score(label, &p.name);
            let by_full = if p.manufacturer.is_empty() {
                by_name
            } else {
                similarity.score(label, &format!("{} {}", p.manufacturer, p.name))
            };
            Candidate {
                profile_id: p.id,
                manufacturer: p.manufacturer.clone(),
                profile_name: p.name.clone(),
                score: by_name.max(by_full),
            }
        })
        .collect();
    candidates.sort_by(compare_candidates);
    candidates
}

fn compare_candidates(a: &Candidate, b: &Candidate) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.profile_name.chars().count().cmp(&b.profile_name.chars().count()))
        .then_with(|| a.profile_name.cmp(&b.profile_name))
        .then_with(|| a.profile_id.cmp(&b.profile_id))
}

/// Pick the mode named by `label`: exact, then case-insensitive, then the most
/// similar above 0.5, else the first mode.
pub fn choose_mode<'a>(profile: &'a Profile, label: Option<&str>, similarity: &dyn Similarity) -> Option<&'a DmxMode> {
    let Some(label) = label else {
        return profile.default_mode();
    };
    if let Some(mode) = profile.mode(label) {
        return Some(mode);
    }
    if let Some(mode) = profile.modes.iter().find(|m| m.name.eq_ignore_ascii_case(label)) {
        return Some(mode);
    }
    profile
        .modes
        .iter()
        .map(|m| (similarity.score(label, &m.name), m))
        .filter(|(score, _)| *score > MODE_THRESHOLD)
        .max_by(|(a, _), (b, _)| a.total_cmp(b))
        .map(|(_, m)| m)
        .or_else(|| profile.default_mode())
}

/// Outcome of matching one fixture.
#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[ts(export)]
pub struct MatchReport {
    #[ts(type = "number")]
    pub fixture_id: FixtureId,
    pub candidates: Vec<Candidate>,
    /// None when no candidate reached the threshold.
    #[ts(type = "number | null")]
    pub accepted: Option<ProfileId>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
pub struct MatchSummary {
    pub total: usize,
    pub matched: usize,
    pub embedded: usize,
    pub automatic: usize,
    pub manual: usize,
    pub unmatched: usize,
}

// ── Session operations ──────────────────────────────────────────────

impl Session {
    /// Associate unmatched fixtures with embedded profiles whose file name,
    /// file stem or profile name equals the type label. Returns how many.
    pub(crate) fn associate_embedded(&mut self) -> usize {
        let similarity = TokenSetSimilarity::default();
        let mut planned: Vec<(FixtureId, ProfileId, DmxMode)> = Vec::new();
        for record in self.fixtures() {
            if record.match_kind.is_some() {
                continue;
            }
            let label = record.type_label.trim();
            let stem = strip_gdtf_extension(label);
            let found = self.catalog().iter().find(|p| match &p.source {
                ProfileSource::Embedded { file_name } => {
                    file_name == label
                        || p.file_stem().is_some_and(|s| s.eq_ignore_ascii_case(stem))
                        || p.name.eq_ignore_ascii_case(stem)
                }
                _ => false,
            });
            if let Some(profile) = found {
                if let Some(mode) = choose_mode(profile, record.mode_label.as_deref(), &similarity) {
                    planned.push((record.id, profile.id, mode.clone()));
                }
            }
        }
        let count = planned.len();
        for (id, pid, mode) in planned {
            if let Some(record) = self.fixture_mut(id) {
                record.apply_match(pid, &mode, MatchKind::Embedded);
            }
        }
        count
    }

    /// Ranked candidates for one fixture without changing anything.
    pub fn match_candidates(&self, id: FixtureId, similarity: &dyn Similarity) -> Result<Vec<Candidate>, EngineError> {
        let record = self.require(id)?;
        Ok(rank(&record.type_label, self.catalog(), similarity))
    }

    /// Fuzzy-match every fixture that has no manual or embedded match.
    ///
    /// A fixture whose best candidate scores below `threshold` ends up
    /// unmatched; its report still carries the ranked list.
    pub fn auto_match(&mut self, similarity: &dyn Similarity, threshold: f64) -> Vec<MatchReport> {
        let mut reports = Vec::new();
        let mut planned: Vec<(FixtureId, Option<(ProfileId, DmxMode, f64)>)> = Vec::new();
        for record in self.fixtures() {
            if matches!(record.match_kind, Some(MatchKind::Manual | MatchKind::Embedded)) {
                continue;
            }
            let candidates = rank(&record.type_label, self.catalog(), similarity);
            let best = candidates
                .first()
                .filter(|c| c.score >= threshold)
                .and_then(|c| self.profile(c.profile_id).map(|p| (p, c.score)))
                .and_then(|(p, score)| {
                    choose_mode(p, record.mode_label.as_deref(), similarity).map(|m| (p.id, m.clone(), score))
                });
            reports.push(MatchReport {
                fixture_id: record.id,
                accepted: best.as_ref().map(|(pid, _, _)| *pid),
                candidates,
            });
            planned.push((record.id, best));
        }

        for (id, best) in planned {
            let Some(record) = self.fixture_mut(id) else {
                continue;
            };
            match best {
                Some((pid, mode, score)) => record.apply_match(pid, &mode, MatchKind::Automatic { score }),
                None => record.clear_match(),
            }
        }
        let accepted = reports.iter().filter(|r| r.accepted.is_some()).count();
        tracing::info!(considered = reports.len(), accepted, threshold, "automatic matching done");
        reports
    }

    /// Manually assign a profile (and optionally a named mode). Survives later
    /// automatic matching until cleared.
    pub fn set_manual_match(&mut self, id: FixtureId, profile: ProfileId, mode: Option<&str>) -> Result<(), EngineError> {
        let record = self.require(id)?;
        let p = self.profile(profile).ok_or_else(|| EngineError::NotFound {
            what: format!("Profile {}", profile.0),
        })?;
        let chosen = match mode {
            Some(name) => p.mode(name).ok_or_else(|| EngineError::NotFound {
                what: format!("Mode '{name}' of profile '{}'", p.name),
            })?,
            None => choose_mode(p, record.mode_label.as_deref(), &TokenSetSimilarity::default()).ok_or_else(
                || EngineError::NotFound {
                    what: format!("DMX mode of profile '{}'", p.name),
                },
            )?,
        }
        .clone();
        if let Some(record) = self.fixture_mut(id) {
            record.apply_match(profile, &chosen, MatchKind::Manual);
        }
        tracing::debug!(fixture = %id, profile = profile.0, mode = %chosen.name, "manual match set");
        Ok(())
    }

    /// Drop a manual match so automatic matching may run again.
    /// Non-manual matches are left alone.
    pub fn clear_manual_match(&mut self, id: FixtureId) -> Result<(), EngineError> {
        self.require(id)?;
        if let Some(record) = self.fixture_mut(id) {
            if record.is_manual_match() {
                record.clear_match();
            }
        }
        Ok(())
    }

    pub fn match_summary(&self) -> MatchSummary {
        let mut summary = MatchSummary {
            total: self.fixtures().len(),
            ..MatchSummary::default()
        };
        for record in self.fixtures() {
            match record.match_kind {
                Some(MatchKind::Embedded) => summary.embedded += 1,
                Some(MatchKind::Automatic { .. }) => summary.automatic += 1,
                Some(MatchKind::Manual) => summary.manual += 1,
                None => summary.unmatched += 1,
            }
        }
        summary.matched = summary.total - summary.unmatched;
        summary
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::import::ImportBatch;
    use crate::model::{AttributeDef, ProfileDraft};
    use crate::session::tests::{dimmer_draft, record};

    fn catalog(names: &[&str]) -> ProfileCatalog {
        let mut catalog = ProfileCatalog::new();
        for name in names {
            let mut draft = dimmer_draft(name, &[("Dimmer", 1)]);
            draft.manufacturer = "Martin".into();
            catalog.insert(draft);
        }
        catalog
    }

    #[test]
    fn aura_label_prefers_aura_profile() {
        let catalog = catalog(&["Mac Aura XB", "Mac Viper"]);
        let ranked = rank("MAC Aura XB Wash", &catalog, &TokenSetSimilarity::default());
        assert_eq!(ranked[0].profile_name, "Mac Aura XB");
        assert!(ranked[0].score > 0.5, "score {}", ranked[0].score);
        assert!(ranked[1].score < 0.5);
    }

    #[test]
    fn ranking_is_deterministic_and_breaks_ties_by_length() {
        let catalog = catalog(&["Par 64 Long", "Par 64", "Par 64 Long"]);
        let sim = TokenSetSimilarity::default();
        let first = rank("Par", &catalog, &sim);
        assert_eq!(first, rank("Par", &catalog, &sim));
        assert_eq!(first[0].profile_name, "Par 64");
        // Equal names fall back to id order.
        assert_eq!(first[1].profile_id, ProfileId(0));
        assert_eq!(first[2].profile_id, ProfileId(2));
    }

    #[test]
    fn length_tie_break_counts_characters() {
        let candidate = |id, name: &str| Candidate {
            profile_id: ProfileId(id),
            manufacturer: String::new(),
            profile_name: name.into(),
            score: 0.8,
        };
        let mut ranked = vec![candidate(0, "Abcd"), candidate(1, "Ärm")];
        ranked.sort_by(compare_candidates);
        assert_eq!(ranked[0].profile_name, "Ärm");
    }

    #[test]
    fn scores_stay_in_unit_interval() {
        let sim = TokenSetSimilarity::default();
        assert_eq!(sim.score("Mac Viper", "mac-viper"), 1.0);
        assert_eq!(sim.score("", "Mac"), 0.0);
        assert_eq!(sim.score("Robe Spiider", "Mac Viper"), 0.0);
    }

    #[test]
    fn gdtf_file_labels_match_by_tokens() {
        let sim = TokenSetSimilarity::default();
        assert!(sim.score("Martin@Mac_Viper.gdtf", "Martin Mac Viper") >= 0.99);
    }

    #[test]
    fn manual_match_survives_auto_match_until_cleared() {
        let mut session = Session::with_fixtures(vec![record(1, "A", 1, 1)]).unwrap();
        let ids = session.add_profiles(vec![
            dimmer_draft("Generic Dimmer", &[("Dimmer", 1)]),
            dimmer_draft("Fog Machine", &[("Fog", 1)]),
        ]);
        session.set_manual_match(FixtureId(1), ids[1], None).unwrap();

        let sim = TokenSetSimilarity::default();
        let reports = session.auto_match(&sim, 0.5);
        assert!(reports.is_empty());
        assert_eq!(session.fixture(FixtureId(1)).unwrap().matched_profile, Some(ids[1]));

        session.clear_manual_match(FixtureId(1)).unwrap();
        let reports = session.auto_match(&sim, 0.5);
        assert_eq!(reports[0].accepted, Some(ids[0]));
        let record = session.fixture(FixtureId(1)).unwrap();
        assert!(matches!(record.match_kind, Some(MatchKind::Automatic { .. })));
    }

    #[test]
    fn below_threshold_yields_candidates_but_no_match() {
        let mut session = Session::with_fixtures(vec![record(1, "A", 1, 1)]).unwrap();
        session.add_profiles(vec![dimmer_draft("Hazer", &[("Haze", 1)])]);
        let reports = session.auto_match(&TokenSetSimilarity::default(), 0.5);
        assert_eq!(reports[0].accepted, None);
        assert_eq!(reports[0].candidates.len(), 1);
        assert!(!session.fixture(FixtureId(1)).unwrap().is_matched());
        assert_eq!(session.match_summary().unmatched, 1);
    }

    #[test]
    fn unknown_profile_or_mode_is_not_found() {
        let mut session = Session::with_fixtures(vec![record(1, "A", 1, 1)]).unwrap();
        let pid = session.add_profiles(vec![dimmer_draft("Dim", &[("Dimmer", 1)])])[0];
        assert!(matches!(
            session.set_manual_match(FixtureId(1), ProfileId(99), None),
            Err(EngineError::NotFound { .. })
        ));
        assert!(session.set_manual_match(FixtureId(1), pid, Some("Nope")).is_err());
        assert!(!session.fixture(FixtureId(1)).unwrap().is_matched());
    }

    #[test]
    fn embedded_profiles_are_associated_by_exact_name_with_mode() {
        let mut spot = record(1, "Spot", 1, 1);
        spot.type_label = "Martin@Mac_Viper.gdtf".into();
        spot.mode_label = Some("Extended".into());
        let mut par = record(2, "Par", 1, 40);
        par.type_label = "Mac Viper Wash".into();

        let viper = ProfileDraft {
            manufacturer: "Martin".into(),
            name: "Mac Viper".into(),
            modes: vec![
                DmxMode {
                    name: "Basic".into(),
                    attributes: vec![AttributeDef::new("Dimmer", 1)],
                },
                DmxMode {
                    name: "Extended".into(),
                    attributes: vec![AttributeDef::new("Dimmer", 2), AttributeDef::new("Pan", 2)],
                },
            ],
            source: ProfileSource::Embedded {
                file_name: "Martin@Mac_Viper.gdtf".into(),
            },
        };
        let session = Session::from_batch(ImportBatch {
            fixtures: vec![spot, par],
            profiles: vec![viper],
            warnings: vec![],
        })
        .unwrap();

        let spot = session.fixture(FixtureId(1)).unwrap();
        assert_eq!(spot.match_kind, Some(MatchKind::Embedded));
        assert_eq!(spot.matched_mode.as_deref(), Some("Extended"));
        assert_eq!(spot.attributes.keys().cloned().collect::<Vec<_>>(), vec!["Dimmer", "Pan"]);
        assert!(!session.fixture(FixtureId(2)).unwrap().is_matched());
    }
}
