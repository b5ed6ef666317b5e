//! Reads the acceptance checklist an agent prints at the end of its output.

use std::sync::OnceLock;

use regex::Regex;

use crate::recorder::{AcceptanceReport, CriterionResult};

fn checkbox_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?m)^\s*[-*]\s*\[([ xX])\]\s*(.+?)\s*$").ok())
        .as_ref()
}

fn normalize(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches(['.', ':', ';'])
        .to_string()
}

/// Match each criterion against the agent's checkboxes. Returns `None` when
/// there are no criteria or the agent printed no checklist at all.
pub fn evaluate(criteria: &[String], output: &str) -> Option<AcceptanceReport> {
    if criteria.is_empty() {
        return None;
    }
    let pattern = checkbox_pattern()?;

    let boxes: Vec<(bool, String)> = pattern
        .captures_iter(output)
        .map(|caps| (caps[1].eq_ignore_ascii_case("x"), normalize(&caps[2])))
        .collect();
    if boxes.is_empty() {
        return None;
    }

    let results = criteria
        .iter()
        .map(|criterion| {
            let wanted = normalize(criterion);
            // The last mention wins when the agent revises its checklist.
            let found = boxes
                .iter()
                .rev()
                .find(|(_, text)| *text == wanted || text.contains(&wanted));
            match found {
                Some((checked, _)) => CriterionResult {
                    criterion: criterion.clone(),
                    met: *checked,
                    note: None,
                },
                None => CriterionResult {
                    criterion: criterion.clone(),
                    met: false,
                    note: Some("not reported".to_string()),
                },
            }
        })
        .collect();

    Some(AcceptanceReport { results })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn criteria(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_checked_and_unchecked_boxes() {
        let output = "Done.\n\n- [x] Form renders.\n- [ ] Tests pass\n";
        let report = evaluate(&criteria(&["form renders", "tests pass"]), output).expect("report");
        assert!(report.results[0].met);
        assert!(!report.results[1].met);
        assert!(report.results[1].note.is_none());
        assert_eq!(report.met_count(), 1);
    }

    #[test]
    fn test_unreported_criterion_is_unmet() {
        let output = "* [X] Docs updated";
        let report = evaluate(&criteria(&["docs updated", "changelog entry"]), output).expect("report");
        assert!(report.results[0].met);
        assert_eq!(report.results[1].note.as_deref(), Some("not reported"));
        assert!(!report.all_met());
    }

    #[test]
    fn test_no_checklist_means_no_report() {
        assert!(evaluate(&criteria(&["x"]), "I fixed it").is_none());
        assert!(evaluate(&[], "- [x] anything").is_none());
    }

    #[test]
    fn test_later_checklist_overrides_earlier() {
        let output = "- [ ] tests pass\n...fixed...\n- [x] tests pass";
        let report = evaluate(&criteria(&["Tests pass"]), output).expect("report");
        assert!(report.all_met());
    }
}
