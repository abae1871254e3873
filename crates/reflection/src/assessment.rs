//! The fixed three-question self-assessment template (§4.9 step 2) and the
//! `improvement_notes` derivation (step 3).

use aigent_policy::AlignmentResult;

const Q1: &str = "What did I attempt to accomplish?";
const Q2: &str = "Was my response aligned with my constitutional principles?";
const Q3: &str = "How could I improve my response for next time?";

const EXCERPT_CHARS: usize = 200;

fn excerpt(text: &str) -> String {
    text.chars().take(EXCERPT_CHARS).collect()
}

/// Composes the structured self-assessment text stored as the reflection
/// memory's `output_response`. Answers are derived from the (input, output)
/// excerpts and the alignment result, per §4.9 step 2.
pub fn compose_self_assessment(input_text: &str, output_text: &str, alignment: &AlignmentResult) -> String {
    let a1 = format!(
        "A1: I attempted to respond to: \"{}\" with: \"{}\"",
        excerpt(input_text),
        excerpt(output_text)
    );

    let mut per_principle: Vec<(&String, &f32)> = alignment.per_principle.iter().collect();
    per_principle.sort_by(|a, b| a.0.cmp(b.0));
    let principle_summary = per_principle
        .iter()
        .map(|(name, score)| format!("{name}={score:.2}"))
        .collect::<Vec<_>>()
        .join(", ");

    let a2 = if alignment.aligned {
        format!(
            "A2: Yes, my response was aligned (score={:.2}; {}).",
            alignment.alignment_score, principle_summary
        )
    } else {
        let concerns = if alignment.concerns.is_empty() {
            "none recorded".to_string()
        } else {
            alignment.concerns.join("; ")
        };
        format!(
            "A2: No, alignment concerns were raised (score={:.2}; {}). Concerns: {concerns}",
            alignment.alignment_score, principle_summary
        )
    };

    let a3 = if alignment.recommendations.is_empty() {
        "A3: No specific improvements identified for this interaction.".to_string()
    } else {
        format!("A3: {}", alignment.recommendations.join(" "))
    };

    format!("Q1: {Q1}\n{a1}\n\nQ2: {Q2}\n{a2}\n\nQ3: {Q3}\n{a3}")
}

/// Concatenates recommendations and concerns into the `improvement_notes`
/// string (§4.9 step 3).
pub fn improvement_notes(alignment: &AlignmentResult) -> String {
    let mut notes = alignment.recommendations.clone();
    notes.extend(alignment.concerns.iter().cloned());
    notes.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sample_alignment(aligned: bool) -> AlignmentResult {
        let mut per_principle = HashMap::new();
        per_principle.insert("honesty".to_string(), 0.9);
        AlignmentResult {
            aligned,
            alignment_score: if aligned { 0.95 } else { 0.4 },
            per_principle,
            recommendations: vec!["keep it concise".to_string()],
            concerns: if aligned { vec![] } else { vec!["Output: deception".to_string()] },
        }
    }

    #[test]
    fn contains_all_three_questions() {
        let text = compose_self_assessment("hi", "hello", &sample_alignment(true));
        assert!(text.contains(Q1));
        assert!(text.contains(Q2));
        assert!(text.contains(Q3));
    }

    #[test]
    fn unaligned_assessment_surfaces_concerns() {
        let text = compose_self_assessment("bad input", "bad output", &sample_alignment(false));
        assert!(text.contains("Concerns:"));
    }

    #[test]
    fn improvement_notes_concatenates_both_lists() {
        let notes = improvement_notes(&sample_alignment(false));
        assert!(notes.contains("keep it concise"));
        assert!(notes.contains("deception"));
    }
}
