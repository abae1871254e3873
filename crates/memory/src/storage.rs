//! Storage-size estimator (§4.7), grounded on `storage_calculator.py`'s
//! `calculate_memory_size`: UTF-8 byte lengths of the text fields, a per-tag
//! 4-byte array overhead, metadata JSON length, `embedding_dim * 4` bytes for
//! the vector, and a fixed row overhead for the UUID/timestamp/float columns.

const ROW_OVERHEAD_BYTES: usize = 162;
const TAG_OVERHEAD_BYTES: usize = 4;
const EMBEDDING_COMPONENT_BYTES: usize = 4;

pub fn estimate_memory_size(input_context: &str, output_response: &str, tags: &[String], metadata_json: Option<&str>, embedding_dimension: usize) -> i64 {
    let mut size = input_context.len() + output_response.len();
    size += tags.iter().map(|t| t.len()).sum::<usize>() + tags.len() * TAG_OVERHEAD_BYTES;
    size += metadata_json.map(str::len).unwrap_or(0);
    size += embedding_dimension * EMBEDDING_COMPONENT_BYTES;
    size += ROW_OVERHEAD_BYTES;
    size as i64
}

pub fn bytes_to_human_readable(size_bytes: i64) -> String {
    let size = size_bytes as f64;
    if size_bytes.abs() < 1024 {
        format!("{size_bytes} B")
    } else if size.abs() < 1024.0 * 1024.0 {
        format!("{:.2} KB", size / 1024.0)
    } else if size.abs() < 1024.0 * 1024.0 * 1024.0 {
        format!("{:.2} MB", size / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", size / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_includes_fixed_overhead_with_empty_inputs() {
        assert_eq!(estimate_memory_size("", "", &[], None, 0), ROW_OVERHEAD_BYTES as i64);
    }

    #[test]
    fn estimate_grows_with_text_and_tags() {
        let base = estimate_memory_size("", "", &[], None, 384);
        let with_text = estimate_memory_size("hello", "world", &["a".to_string()], None, 384);
        assert!(with_text > base);
    }

    #[test]
    fn human_readable_picks_appropriate_unit() {
        assert_eq!(bytes_to_human_readable(500), "500 B");
        assert!(bytes_to_human_readable(2048).ends_with("KB"));
        assert!(bytes_to_human_readable(5 * 1024 * 1024).ends_with("MB"));
    }
}
