//! Splitting payloads into article-sized segments

/// Split `data` into chunks of `segment_size` bytes (the last may be short)
pub fn split(data: &[u8], segment_size: usize) -> Vec<Vec<u8>> {
    assert!(segment_size > 0, "segment size must be positive");
    if data.is_empty() {
        return vec![Vec::new()];
    }
    data.chunks(segment_size).map(<[u8]>::to_vec).collect()
}

/// Message ids `<prefix>-<n>@test` for `count` segments
pub fn message_ids(prefix: &str, count: usize) -> Vec<String> {
    (1..=count).map(|n| format!("{prefix}-{n}@test")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_sizes() {
        let parts = split(&[0u8; 10], 4);
        assert_eq!(parts.iter().map(Vec::len).collect::<Vec<_>>(), vec![4, 4, 2]);
        assert_eq!(message_ids("f", 2), vec!["f-1@test", "f-2@test"]);
    }
}
