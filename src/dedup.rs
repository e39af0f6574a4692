use crate::post::Post;
use std::collections::HashSet;

pub const DEFAULT_PREFIX_CHARS: usize = 100;

/// Remembers which posts were already collected in this session.
///
/// Posts are keyed by a prefix of their content rather than by id, since a
/// re-rendered item can differ in trailing text (truncation, link previews)
/// between scroll passes. Two distinct posts that open with the same
/// `prefix_chars` characters are treated as one.
#[derive(Debug, Clone)]
pub struct DedupIndex {
    prefix_chars: usize,
    seen: HashSet<String>,
}

impl Default for DedupIndex {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX_CHARS)
    }
}

impl DedupIndex {
    pub fn new(prefix_chars: usize) -> Self {
        Self {
            prefix_chars: prefix_chars.max(1),
            seen: HashSet::new(),
        }
    }

    pub fn fingerprint(&self, post: &Post) -> String {
        post.content.chars().take(self.prefix_chars).collect()
    }

    pub fn is_novel(&self, post: &Post) -> bool {
        !self.seen.contains(&self.fingerprint(post))
    }

    pub fn record(&mut self, post: &Post) {
        let fingerprint = self.fingerprint(post);
        self.seen.insert(fingerprint);
    }

    /// Records the post and reports whether it was new.
    pub fn insert(&mut self, post: &Post) -> bool {
        let fingerprint = self.fingerprint(post);
        self.seen.insert(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn clear(&mut self) {
        self.seen.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(content: &str) -> Post {
        Post {
            content: content.to_string(),
            author: "a".to_string(),
            timestamp: "2025-01-01T00:00:00Z".to_string(),
            id: None,
            url: None,
            has_quoted: false,
            has_reply: false,
            is_ad: false,
        }
    }

    #[test]
    fn test_record_twice_then_not_novel() {
        let mut index = DedupIndex::default();
        let p = post("hello world");
        assert!(index.is_novel(&p));
        index.record(&p);
        index.record(&p);
        assert!(!index.is_novel(&p));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_trailing_difference_past_prefix_is_duplicate() {
        let mut index = DedupIndex::default();
        let base = "a".repeat(100);
        index.record(&post(&base));
        assert!(!index.is_novel(&post(&format!("{base} https://t.co/xyz"))));
    }

    #[test]
    fn test_difference_inside_prefix_is_novel() {
        let mut index = DedupIndex::default();
        index.record(&post("The quick brown fox"));
        assert!(index.is_novel(&post("The quick brown cat")));
    }

    #[test]
    fn test_prefix_counts_chars_not_bytes() {
        let index = DedupIndex::new(3);
        assert_eq!(index.fingerprint(&post("世界你好")), "世界你");
    }

    #[test]
    fn test_insert_reports_novelty() {
        let mut index = DedupIndex::new(5);
        assert!(index.insert(&post("abcdefg")));
        assert!(!index.insert(&post("abcdeXYZ")));
        index.clear();
        assert!(index.is_empty());
        assert!(index.insert(&post("abcdefg")));
    }
}
