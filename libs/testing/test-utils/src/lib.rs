//! Shared test utilities for the onboarding crates
//!
//! - `TestRedis`: Redis container with automatic cleanup (feature: "redis")
//! - `TestDataBuilder`: deterministic user data derived from the test name
//!
//! # Redis Testing
//!
//! Add `features = ["redis"]` to your dev-dependencies:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { workspace = true, features = ["redis"] }
//! ```
//!
//! Container-backed tests need Docker and are marked `#[ignore]`; run them
//! with `cargo test -- --ignored`.

use uuid::Uuid;

#[cfg(feature = "redis")]
mod redis;

#[cfg(feature = "redis")]
pub use redis::TestRedis;

/// Builder for test data with deterministic randomization
///
/// This ensures tests are reproducible by using seeded data.
pub struct TestDataBuilder {
    seed: u64,
}

impl TestDataBuilder {
    /// Create a new builder with a seed (for deterministic tests)
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Create from test name (generates seed from test name hash)
    ///
    /// # Example
    ///
    /// ```
    /// use test_utils::TestDataBuilder;
    ///
    /// let builder = TestDataBuilder::from_test_name("test_ingest_defaults_confirmed");
    /// ```
    pub fn from_test_name(name: &str) -> Self {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        Self::new(hasher.finish())
    }

    /// Deterministic user id; `n` distinguishes users within one test
    pub fn user_id(&self, n: u64) -> String {
        let bytes = self.seed.to_le_bytes();
        let mut uuid_bytes = [0u8; 16];
        uuid_bytes[..8].copy_from_slice(&bytes);
        uuid_bytes[8..16].copy_from_slice(&n.to_le_bytes());
        Uuid::from_bytes(uuid_bytes).to_string()
    }

    /// Display name for user `n`
    pub fn name(&self, n: u64) -> String {
        format!("User {}-{}", self.seed % 10_000, n)
    }

    /// Email address for user `n`
    pub fn email(&self, n: u64) -> String {
        format!("user{}.{}@example.com", self.seed % 10_000, n)
    }

    /// Stream key namespaced to this test, so tests can share one Redis
    pub fn stream(&self, prefix: &str) -> String {
        format!("test:{}:{}", prefix, self.seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_builder_deterministic() {
        let builder1 = TestDataBuilder::new(42);
        let builder2 = TestDataBuilder::new(42);

        assert_eq!(builder1.user_id(1), builder2.user_id(1));
        assert_eq!(builder1.email(1), builder2.email(1));
    }

    #[test]
    fn test_data_builder_distinct_users() {
        let builder = TestDataBuilder::from_test_name("my_test");

        assert_ne!(builder.user_id(1), builder.user_id(2));
        assert_ne!(builder.email(1), builder.email(2));
        assert!(builder.email(3).ends_with("@example.com"));
    }

    #[test]
    fn test_data_builder_different_names() {
        let builder1 = TestDataBuilder::from_test_name("test1");
        let builder2 = TestDataBuilder::from_test_name("test2");

        assert_ne!(builder1.user_id(0), builder2.user_id(0));
        assert_ne!(builder1.stream("changes"), builder2.stream("changes"));
    }
}
