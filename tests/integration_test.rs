// tests/integration_test.rs

//! Integration tests against a real socket server and a real (sysinfo +
//! SQLite-backed) coordinator. Aggregator for the files under
//! tests/integration/, matching the root `tests/` layout.

mod integration {
    pub mod test_helpers;

    pub mod coordinator_test;
    pub mod socket_test;
}
