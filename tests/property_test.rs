// tests/property_test.rs

//! Property-based tests verifying invariants from spec.md §8: condition
//! parse/eval consistency, and prune's retention-cutoff and idempotence
//! properties.

mod property {
    pub mod condition_test;
    pub mod prune_test;
}
