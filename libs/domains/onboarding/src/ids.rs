//! Job id scheme.
//!
//! A job id is `<key>-<suffix>`: the source user id reduced to
//! `[A-Za-z0-9_-]` (at most 64 characters, `anon` when nothing is left)
//! followed by a 10 character alphanumeric random suffix. The key makes a
//! queued job traceable to the user it was built for; the suffix keeps
//! redelivered inserts distinguishable.

use rand::distr::Alphanumeric;
use rand::Rng;
use std::collections::HashSet;

pub const MAX_KEY_LEN: usize = 64;
pub const SUFFIX_LEN: usize = 10;

/// Reduce a source key to the characters allowed in a job id.
pub fn sanitize_key(key: &str) -> String {
    let sanitized: String = key
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .take(MAX_KEY_LEN)
        .collect();

    if sanitized.is_empty() {
        "anon".to_string()
    } else {
        sanitized
    }
}

pub fn random_suffix() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(SUFFIX_LEN)
        .map(char::from)
        .collect()
}

/// Hands out job ids that are unique for the lifetime of the allocator.
///
/// One allocator is used per fan-out invocation, so ids never repeat within
/// a batch-submit call.
#[derive(Debug, Default)]
pub struct JobIdAllocator {
    issued: HashSet<String>,
}

impl JobIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self, key: &str) -> String {
        self.allocate_with(key, random_suffix)
    }

    fn allocate_with(&mut self, key: &str, mut suffix: impl FnMut() -> String) -> String {
        let key = sanitize_key(key);
        loop {
            let id = format!("{}-{}", key, suffix());
            if self.issued.insert(id.clone()) {
                return id;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.issued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issued.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_key() {
        assert_eq!(sanitize_key("3f2a-b_c"), "3f2a-b_c");
        assert_eq!(sanitize_key("users:42/ñ"), "users42");
        assert_eq!(sanitize_key("::"), "anon");
        assert_eq!(sanitize_key(&"a".repeat(100)).len(), MAX_KEY_LEN);
    }

    #[test]
    fn test_random_suffix_shape() {
        let suffix = random_suffix();
        assert_eq!(suffix.len(), SUFFIX_LEN);
        assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_allocate_format() {
        let mut ids = JobIdAllocator::new();
        let id = ids.allocate("u-1");

        assert!(id.starts_with("u-1-"));
        assert_eq!(id.len(), "u-1-".len() + SUFFIX_LEN);
        assert_eq!(ids.len(), 1);
    }

    #[test]
    fn test_collision_regenerates() {
        let mut ids = JobIdAllocator::new();
        let mut suffixes = vec!["BBBBBBBBBB", "AAAAAAAAAA", "AAAAAAAAAA"].into_iter();
        // Popped from the back: A, A, B
        let mut next = move || suffixes.next_back().unwrap().to_string();

        let first = ids.allocate_with("u-1", &mut next);
        let second = ids.allocate_with("u-1", &mut next);

        assert_eq!(first, "u-1-AAAAAAAAAA");
        assert_eq!(second, "u-1-BBBBBBBBBB");
        assert_eq!(ids.len(), 2);
    }
}
