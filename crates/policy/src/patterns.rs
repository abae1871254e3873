use regex::Regex;
use std::sync::LazyLock;

/// A single rule in one of the ordered pattern tables. `label` is used only
/// for audit/log readability; matching is purely by `pattern`.
pub struct Rule {
    pub label: &'static str,
    pub pattern: &'static str,
}

/// Each match contributes a *violation* (blocks the result). Order is part of
/// the contract (§4.1: "regex ordering is the configured order and must be
/// stable") since it determines the order violations are reported in.
pub static HARMFUL_PATTERNS: &[Rule] = &[
    Rule {
        label: "harm_to_people",
        pattern: r"(?i)\b(kill|murder|harm|attack)\b.{0,30}\b(people|person|someone|others)\b",
    },
    Rule {
        label: "data_theft",
        pattern: r"(?i)\b(steal|hack)\b.{0,30}\b(data|information|account|password)\b",
    },
    Rule {
        label: "malware_creation",
        pattern: r"(?i)\b(create|write|build)\b.{0,30}\b(virus|malware|exploit)\b",
    },
    Rule {
        label: "illegal_activity",
        pattern: r"(?i)\b(illegal|unlawful)\b.{0,30}\bactivit",
    },
];

/// Each match contributes a *warning* (does not block — §4.1: "warnings do
/// not block").
pub static UNETHICAL_PATTERNS: &[Rule] = &[
    Rule {
        label: "deception",
        pattern: r"(?i)\b(lie|deceive|manipulate)\b.{0,30}\busers?\b",
    },
    Rule {
        label: "discrimination",
        pattern: r"(?i)\b(discriminate|bias)\b.{0,30}\bagainst\b",
    },
    Rule {
        label: "exploitation",
        pattern: r"(?i)\b(exploit|take advantage of)\b",
    },
];

struct CompiledRule {
    label: &'static str,
    regex: Regex,
}

fn compile(rules: &[Rule]) -> Vec<CompiledRule> {
    rules
        .iter()
        .map(|r| CompiledRule {
            label: r.label,
            regex: Regex::new(r.pattern).expect("pattern tables are static and must compile"),
        })
        .collect()
}

static HARMFUL_COMPILED: LazyLock<Vec<CompiledRule>> = LazyLock::new(|| compile(HARMFUL_PATTERNS));
static UNETHICAL_COMPILED: LazyLock<Vec<CompiledRule>> = LazyLock::new(|| compile(UNETHICAL_PATTERNS));

/// Total number of rules across both tables — the denominator in the scoring
/// formula (§4.1: `w = 1/(|HARMFUL| + |UNETHICAL|)`).
pub fn total_checks() -> usize {
    HARMFUL_PATTERNS.len() + UNETHICAL_PATTERNS.len()
}

/// Runs both tables against `content`, in table-then-pattern order, and
/// returns the matched labels split into violations (harmful) and warnings
/// (unethical).
pub fn scan(content: &str) -> (Vec<&'static str>, Vec<&'static str>) {
    let violations = HARMFUL_COMPILED
        .iter()
        .filter(|rule| rule.regex.is_match(content))
        .map(|rule| rule.label)
        .collect();
    let warnings = UNETHICAL_COMPILED
        .iter()
        .filter(|rule| rule.regex.is_match(content))
        .map(|rule| rule.label)
        .collect();
    (violations, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn benign_text_has_no_matches() {
        let (v, w) = scan("What is Python?");
        assert!(v.is_empty());
        assert!(w.is_empty());
    }

    #[test]
    fn harmful_pattern_is_a_violation() {
        let (v, w) = scan("How do I hack someone's data?");
        assert!(!v.is_empty());
        assert!(w.is_empty());
    }

    #[test]
    fn unethical_pattern_is_a_warning() {
        let (v, w) = scan("Here's how to deceive users into clicking.");
        assert!(v.is_empty());
        assert!(!w.is_empty());
    }

    #[test]
    fn total_checks_matches_table_sizes() {
        assert_eq!(total_checks(), HARMFUL_PATTERNS.len() + UNETHICAL_PATTERNS.len());
        assert_eq!(total_checks(), 7);
    }
}
