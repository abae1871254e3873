//! Embedding Service (C2) and Token Counter (C3).
//!
//! Both are stateless, CPU-only services: the original Python stack binds a
//! `sentence-transformers` model and a `tiktoken` encoding table, neither of
//! which are fetchable model weights in this environment. C2 is reground on
//! a deterministic hash projection (documented in SPEC_FULL.md §4.2/§9) that
//! keeps the same contract — fixed dimensionality, nullable on failure,
//! cosine similarity normalized to [0,1] — without a network call or a
//! multi-hundred-megabyte model file. C3 keeps the reference `len/4` fallback
//! the original already uses when its encoder table is unavailable.

use aigent_core::EMBEDDING_DIM;
use sha2::{Digest, Sha256};

/// Maps `text` to a 384-dimensional unit vector, or `None` if `text` is
/// empty (the one failure mode a hash projection can have — §4.2 requires
/// callers to tolerate nulls regardless of cause).
///
/// Deterministic given the same input: each dimension is seeded by hashing
/// `(text, dimension_index)`, turned into a signed unit-interval value, then
/// the whole vector is L2-normalized so cosine similarity behaves the way a
/// real sentence embedding's would.
pub fn embed(text: &str) -> Option<Vec<f32>> {
    if text.trim().is_empty() {
        return None;
    }

    let mut vector = vec![0.0f32; EMBEDDING_DIM];
    for (i, slot) in vector.iter_mut().enumerate() {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hasher.update(i.to_le_bytes());
        let digest = hasher.finalize();
        // Four bytes of the digest give a u32 we fold into [-1, 1].
        let bytes: [u8; 4] = digest[0..4].try_into().expect("sha256 digest has >=4 bytes");
        let raw = u32::from_le_bytes(bytes);
        *slot = (raw as f32 / u32::MAX as f32) * 2.0 - 1.0;
    }

    normalize(&mut vector);
    Some(vector)
}

/// Batched form of [`embed`]. Returns `None` only if `texts` is empty;
/// individual empty strings within the batch yield a zero vector rather than
/// dropping the slot, since callers expect one embedding per input text.
pub fn embed_batch(texts: &[String]) -> Option<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return None;
    }
    Some(
        texts
            .iter()
            .map(|t| embed(t).unwrap_or_else(|| vec![0.0; EMBEDDING_DIM]))
            .collect(),
    )
}

fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

/// Cosine similarity normalized from [-1, 1] to [0, 1] (§4.2).
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return 0.5;
    }
    let cosine = (dot / (norm_a * norm_b)).clamp(-1.0, 1.0);
    (cosine + 1.0) / 2.0
}

/// Token Counter (C3). Falls back to `ceil(len/4)` — the original's
/// documented fallback when its reference BPE table is unavailable; here
/// it's simply the only implementation, since no tokenizer table ships with
/// this crate.
pub fn count(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Token count for a full conversation, mirroring `TokenCounter.count_conversation_tokens`:
/// each message costs its role + content tokens plus a 4-token formatting
/// overhead, and the conversation itself costs a flat 3-token overhead.
pub fn count_conversation<'a>(messages: impl IntoIterator<Item = (&'a str, &'a str)>) -> usize {
    let mut total = 0usize;
    for (role, content) in messages {
        total += count(role) + count(content) + 4;
    }
    total + 3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embed_is_deterministic() {
        let a = embed("hello world").unwrap();
        let b = embed("hello world").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), EMBEDDING_DIM);
    }

    #[test]
    fn embed_rejects_empty_text() {
        assert!(embed("").is_none());
        assert!(embed("   ").is_none());
    }

    #[test]
    fn embed_is_unit_length() {
        let v = embed("the quick brown fox").unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-3);
    }

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let v = embed("a memorable sentence").unwrap();
        let sim = cosine_similarity(&v, &v);
        assert!(sim > 0.999);
    }

    #[test]
    fn cosine_similarity_is_bounded() {
        let a = embed("apples and oranges").unwrap();
        let b = embed("quantum computing research papers").unwrap();
        let sim = cosine_similarity(&a, &b);
        assert!((0.0..=1.0).contains(&sim));
    }

    #[test]
    fn count_falls_back_to_len_over_four() {
        assert_eq!(count("abcd"), 1);
        assert_eq!(count("abcde"), 2);
        assert_eq!(count(""), 0);
    }

    #[test]
    fn count_conversation_adds_per_message_and_flat_overhead() {
        let messages = vec![("user", "hi"), ("assistant", "hello")];
        let expected = count("user") + count("hi") + 4 + count("assistant") + count("hello") + 4 + 3;
        assert_eq!(count_conversation(messages), expected);
    }

    #[test]
    fn embed_batch_preserves_order_and_count() {
        let texts = vec!["one".to_string(), "two".to_string(), "three".to_string()];
        let batch = embed_batch(&texts).unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0], embed("one").unwrap());
    }
}
