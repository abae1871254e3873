//! Grouping and criterion logic for the nightly distillation pass (§4.10
//! steps 1-3), split out from the scheduler so the pure decision logic can be
//! unit tested without a database.

use std::collections::BTreeMap;

use aigent_core::{Memory, Outcome};
use uuid::Uuid;

const NON_TOPIC_TAGS: &[&str] = &["reflection", "self-assessment", "alignment", "has-improvement-notes"];
const DEFAULT_TOPIC: &str = "general";
const PRINCIPLE_MARKER: &str = "A3:";
const MAX_PRINCIPLE_LINES: usize = 2;
const PRINCIPLE_SOURCE_LIMIT: usize = 3;
const PRINCIPLE_MAX_CHARS: usize = 500;

/// A reflection's grouping key: the first tag that is not one of the
/// self-assessment scaffolding tags, or `"general"` if none remain.
fn topic_of(memory: &Memory) -> String {
    memory
        .tags
        .iter()
        .find(|tag| !NON_TOPIC_TAGS.contains(&tag.as_str()))
        .cloned()
        .unwrap_or_else(|| DEFAULT_TOPIC.to_string())
}

pub struct ReflectionGroup {
    pub user_id: Uuid,
    pub topic: String,
    pub reflections: Vec<Memory>,
}

impl ReflectionGroup {
    pub fn avg_emotional_weight(&self) -> f32 {
        let sum: f32 = self.reflections.iter().map(|m| m.emotional_weight).sum();
        sum / self.reflections.len() as f32
    }

    pub fn avg_confidence(&self) -> f32 {
        let sum: f32 = self.reflections.iter().map(|m| m.confidence_score).sum();
        sum / self.reflections.len() as f32
    }

    pub fn success_rate(&self) -> f32 {
        let successes = self.reflections.iter().filter(|m| m.outcome == Outcome::Success).count();
        successes as f32 / self.reflections.len() as f32
    }

    /// The distillation criterion (§4.10 step 3): emotionally salient or
    /// confidently held, and net successful.
    pub fn meets_criterion(&self, emotional_weight_threshold: f32, confidence_threshold: f32, min_success_rate: f32) -> bool {
        let emotional_or_confident =
            self.avg_emotional_weight().abs() > emotional_weight_threshold || self.avg_confidence() > confidence_threshold;
        emotional_or_confident && self.success_rate() >= min_success_rate
    }

    pub fn source_reflection_ids(&self) -> Vec<Uuid> {
        self.reflections.iter().map(|m| m.id).collect()
    }

    /// Extracts the distilled principle text: splits each of the group's
    /// first `PRINCIPLE_SOURCE_LIMIT` reflections' `output_response` on the
    /// `A3:` marker, takes the first line after it, dedupes, joins up to
    /// `MAX_PRINCIPLE_LINES` distinct lines, and truncates to 500 chars.
    /// Fragile by construction — the self-assessment template is the only
    /// thing guaranteeing the marker's presence, and nothing here validates
    /// that guarantee.
    pub fn extract_principle(&self) -> String {
        let mut lines: Vec<String> = Vec::new();
        for reflection in self.reflections.iter().take(PRINCIPLE_SOURCE_LIMIT) {
            let Some(after_marker) = reflection.output_response.split(PRINCIPLE_MARKER).nth(1) else {
                continue;
            };
            let line = after_marker.lines().next().unwrap_or("").trim().to_string();
            if !line.is_empty() && !lines.contains(&line) {
                lines.push(line);
            }
            if lines.len() >= MAX_PRINCIPLE_LINES {
                break;
            }
        }

        let joined = if lines.is_empty() {
            format!("Recurring pattern observed in topic '{}'.", self.topic)
        } else {
            lines.join(" ")
        };

        joined.chars().take(PRINCIPLE_MAX_CHARS).collect()
    }
}

/// Groups reflections by `(user_id, topic)`, dropping groups smaller than
/// `min_group_size` (§4.10 step 2). Insertion order within a user/topic is
/// preserved since callers rely on "first N" semantics for principle
/// extraction.
pub fn group_reflections(reflections: Vec<Memory>, min_group_size: usize) -> Vec<ReflectionGroup> {
    let mut grouped: BTreeMap<(Uuid, String), Vec<Memory>> = BTreeMap::new();
    for memory in reflections {
        let topic = topic_of(&memory);
        grouped.entry((memory.user_id, topic)).or_default().push(memory);
    }

    grouped
        .into_iter()
        .filter(|(_, reflections)| reflections.len() >= min_group_size)
        .map(|((user_id, topic), reflections)| ReflectionGroup { user_id, topic, reflections })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn reflection(outcome: Outcome, emotional_weight: f32, confidence_score: f32, tag: &str, output: &str) -> Memory {
        Memory {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            session_id: None,
            kind: aigent_core::MemoryType::Reflection,
            input_context: "Reflection on interaction".to_string(),
            output_response: output.to_string(),
            outcome,
            emotional_weight,
            confidence_score,
            constitution_valid: true,
            tags: vec!["reflection".to_string(), "self-assessment".to_string(), "alignment".to_string(), tag.to_string()],
            vector_embedding: None,
            tier: aigent_core::MemoryTier::Ltm,
            access_count: 0,
            last_accessed_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            expires_at: None,
        }
    }

    #[test]
    fn topic_skips_scaffolding_tags() {
        let m = reflection(Outcome::Success, 0.1, 0.9, "debugging", "x");
        assert_eq!(topic_of(&m), "debugging");
    }

    #[test]
    fn topic_defaults_to_general_without_extra_tags() {
        let mut m = reflection(Outcome::Success, 0.1, 0.9, "reflection", "x");
        m.tags = vec!["reflection".to_string(), "self-assessment".to_string(), "alignment".to_string()];
        assert_eq!(topic_of(&m), "general");
    }

    #[test]
    fn groups_below_min_size_are_dropped() {
        let a = reflection(Outcome::Success, 0.5, 0.9, "debugging", "A3: be terse");
        let groups = group_reflections(vec![a], 2);
        assert!(groups.is_empty());
    }

    #[test]
    fn criterion_requires_confidence_or_emotional_weight_and_success() {
        let user = Uuid::new_v4();
        let mut a = reflection(Outcome::Success, 0.1, 0.9, "debugging", "A3: be terse");
        a.user_id = user;
        let mut b = reflection(Outcome::Success, 0.1, 0.85, "debugging", "A3: be terse");
        b.user_id = user;
        let group = ReflectionGroup { user_id: user, topic: "debugging".to_string(), reflections: vec![a, b] };
        assert!(group.meets_criterion(0.3, 0.7, 0.5));
    }

    #[test]
    fn criterion_fails_below_success_rate() {
        let user = Uuid::new_v4();
        let mut a = reflection(Outcome::Failure, 0.1, 0.9, "debugging", "A3: be terse");
        a.user_id = user;
        let mut b = reflection(Outcome::Failure, 0.1, 0.85, "debugging", "A3: be terse");
        b.user_id = user;
        let group = ReflectionGroup { user_id: user, topic: "debugging".to_string(), reflections: vec![a, b] };
        assert!(!group.meets_criterion(0.3, 0.7, 0.5));
    }

    #[test]
    fn extract_principle_dedupes_and_limits_to_two_lines() {
        let user = Uuid::new_v4();
        let reflections = vec![
            reflection(Outcome::Success, 0.5, 0.9, "debugging", "Q1: ...\nQ3: ...\nA3: be terse\nextra"),
            reflection(Outcome::Success, 0.5, 0.9, "debugging", "A3: be terse\nextra"),
            reflection(Outcome::Success, 0.5, 0.9, "debugging", "A3: cite sources\nextra"),
        ];
        let group = ReflectionGroup { user_id: user, topic: "debugging".to_string(), reflections };
        let principle = group.extract_principle();
        assert!(principle.contains("be terse"));
        assert!(principle.contains("cite sources"));
    }

    #[test]
    fn extract_principle_falls_back_when_marker_absent() {
        let user = Uuid::new_v4();
        let reflections = vec![
            reflection(Outcome::Success, 0.5, 0.9, "debugging", "no marker here"),
            reflection(Outcome::Success, 0.5, 0.9, "debugging", "still nothing"),
        ];
        let group = ReflectionGroup { user_id: user, topic: "debugging".to_string(), reflections };
        assert!(group.extract_principle().contains("Recurring pattern"));
    }
}
