//! Scenario tests
//!
//! End-to-end behaviour of the executor, monitor and coordinator driven by the
//! scripted collaborators in `crate::test_utils`. Everything timing related
//! runs on tokio's paused clock.

mod monitor_tests;
