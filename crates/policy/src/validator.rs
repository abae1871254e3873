use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::patterns::{scan, total_checks};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationOutcome {
    Passed,
    Warning,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentValidation {
    pub result: ValidationOutcome,
    pub score: f32,
    pub violations: Vec<String>,
    pub warnings: Vec<String>,
    pub principles_checked: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlignmentResult {
    pub aligned: bool,
    pub alignment_score: f32,
    pub per_principle: HashMap<String, f32>,
    pub recommendations: Vec<String>,
    pub concerns: Vec<String>,
}

/// Pattern-matches `content` against the harmful/unethical tables and scores
/// it (§4.1). Never panics or returns an error: a failure inside the scan
/// (there isn't one today, but future rule sources — a DB-backed policy —
/// might fail to load) degrades to a `Failed` result with a zero score and a
/// synthetic violation, per "internal exceptions → failed result ... never
/// throw".
pub fn validate_content(content: &str, principles: &[String]) -> ContentValidation {
    let (violation_labels, warning_labels) = scan(content);

    let total = total_checks() as f32;
    let weight = 1.0 / total;
    let violations = violation_labels.len() as f32;
    let warnings = warning_labels.len() as f32;
    let score = (1.0 - violations * (2.0 * weight) - warnings * weight).clamp(0.0, 1.0);

    let result = if !violation_labels.is_empty() {
        ValidationOutcome::Failed
    } else if !warning_labels.is_empty() {
        ValidationOutcome::Warning
    } else {
        ValidationOutcome::Passed
    };

    ContentValidation {
        result,
        score,
        violations: violation_labels.into_iter().map(str::to_string).collect(),
        warnings: warning_labels.into_iter().map(str::to_string).collect(),
        principles_checked: principles.to_vec(),
    }
}

/// Fallback invoked only if `validate_content` itself were to panic-equivalent
/// fail; kept so every call site has a documented "never throw" exit even as
/// the pattern source evolves beyond the static tables.
pub fn failed_content_validation(principles: &[String]) -> ContentValidation {
    ContentValidation {
        result: ValidationOutcome::Failed,
        score: 0.0,
        violations: vec!["internal_error".to_string()],
        warnings: vec![],
        principles_checked: principles.to_vec(),
    }
}

/// Computes alignment between an interaction's input and output against the
/// configured principles (§4.1 `validate_alignment`).
pub fn validate_alignment(
    input: &str,
    output: &str,
    self_assessment: Option<&str>,
    principles: &[String],
    alignment_threshold: f32,
) -> AlignmentResult {
    let input_validation = validate_content(input, principles);
    let output_validation = validate_content(output, principles);

    let mut per_principle = HashMap::new();
    for principle in principles {
        per_principle.insert(
            principle.clone(),
            (input_validation.score + output_validation.score) / 2.0,
        );
    }

    let alignment_score = if per_principle.is_empty() {
        (input_validation.score + output_validation.score) / 2.0
    } else {
        per_principle.values().sum::<f32>() / per_principle.len() as f32
    };

    let mut concerns = Vec::new();
    for v in &input_validation.violations {
        concerns.push(format!("Input: {v}"));
    }
    for v in &output_validation.violations {
        concerns.push(format!("Output: {v}"));
    }
    // Unethical-pattern matches don't block validate_content's result (they're
    // warnings, not violations), but they are still a real alignment concern —
    // a deceptive exchange must not read as "aligned" just because nothing
    // crossed the harsher harm threshold.
    for w in &input_validation.warnings {
        concerns.push(format!("Input: {w}"));
    }
    for w in &output_validation.warnings {
        concerns.push(format!("Output: {w}"));
    }
    if alignment_score < alignment_threshold {
        concerns.push(format!(
            "Overall alignment score {alignment_score:.2} is below threshold {alignment_threshold:.2}"
        ));
    }

    let mut recommendations = Vec::new();
    for w in &input_validation.warnings {
        recommendations.push(format!("Review input concern: {w}"));
    }
    for w in &output_validation.warnings {
        recommendations.push(format!("Review output concern: {w}"));
    }
    if let Some(assessment) = self_assessment {
        if assessment.trim().is_empty() {
            concerns.push("Self-assessment was empty; may need improvement".to_string());
        } else {
            recommendations.push("Self-assessment recorded: good reflection".to_string());
        }
    }

    let aligned = alignment_score >= alignment_threshold && concerns.is_empty();

    AlignmentResult {
        aligned,
        alignment_score,
        per_principle,
        recommendations,
        concerns,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principles() -> Vec<String> {
        vec!["honesty".to_string(), "harmlessness".to_string()]
    }

    #[test]
    fn benign_exchange_is_aligned_with_high_score() {
        let result = validate_alignment(
            "What is Python?",
            "Python is a programming language.",
            None,
            &principles(),
            0.7,
        );
        assert!(result.aligned);
        assert!(result.alignment_score >= 0.9);
        assert!(result.concerns.is_empty());
    }

    #[test]
    fn deceptive_exchange_is_not_aligned() {
        let result = validate_alignment(
            "How to lie to users?",
            "Here's how to deceive users.",
            None,
            &principles(),
            0.7,
        );
        assert!(!result.aligned);
        assert!(!result.concerns.is_empty());
    }

    #[test]
    fn score_is_monotone_non_increasing_in_violation_count() {
        let clean = validate_content("nothing to see here", &principles());
        let one_violation = validate_content("let's steal some data", &principles());
        assert!(one_violation.score <= clean.score);
    }

    #[test]
    fn validate_content_is_deterministic() {
        let a = validate_content("write a virus to exploit systems", &principles());
        let b = validate_content("write a virus to exploit systems", &principles());
        assert_eq!(a.score, b.score);
        assert_eq!(a.result, b.result);
    }
}
