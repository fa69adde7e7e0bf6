//! Human readable listing, one block per fixture.

use super::ExportFixture;
use crate::model::GroupRole;

const EMPTY: &str = "No fixture data to export.";

fn title_case(role: GroupRole) -> &'static str {
    match role {
        GroupRole::Unassigned => "Unassigned",
        GroupRole::Master => "Master",
        GroupRole::Remote => "Remote",
    }
}

pub fn render(view: &[ExportFixture]) -> String {
    if view.is_empty() {
        return EMPTY.to_string();
    }

    let mut lines = vec!["Fixture Address Export".to_string(), "=".repeat(40)];
    for fixture in view {
        let master = fixture
            .master
            .map(|m| format!(" -> Master ID: {m}"))
            .unwrap_or_default();
        lines.push(String::new());
        lines.push(format!(
            "Fixture: {} (ID: {}) ({}){master}",
            fixture.name,
            fixture.id,
            title_case(fixture.role)
        ));
        let sequence = fixture.sequence.map_or_else(|| "-".to_string(), |s| s.to_string());
        lines.push(format!(
            "  Profile: {} [{}]  Patch: {}  Sequence: {sequence}",
            fixture.profile_name,
            fixture.mode_name,
            fixture.patch()
        ));
        lines.push("-".repeat(30));
        for attr in &fixture.attributes {
            lines.push(format!(
                "  {:<15} Address: {:<7} Absolute: {}",
                attr.name,
                attr.patch(),
                attr.absolute
            ));
        }
    }
    lines.join("\n")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::export::export_view;
    use crate::export::tests::sample_session;

    #[test]
    fn empty_view_has_placeholder() {
        assert_eq!(render(&[]), EMPTY);
    }

    #[test]
    fn fixtures_nest_their_attributes() {
        let text = render(&export_view(&sample_session()).unwrap());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Fixture Address Export");
        assert_eq!(lines[3], "Fixture: Spot L (ID: 10) (Master)");
        assert!(lines[4].contains("Patch: 2.001"), "{}", lines[4]);
        assert!(lines[6].trim_start().starts_with("Pan"));
        assert!(lines[6].contains("Absolute: 513"));
        assert!(text.contains("Fixture: Spot R (ID: 20) (Remote) -> Master ID: 10"));
        // Master listed before its Remote because ids ascend.
        assert!(text.find("ID: 10").unwrap() < text.find("ID: 20").unwrap());
    }
}
