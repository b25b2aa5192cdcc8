//! Shared test utilities for podscribe integration tests.
//!
//! - `TestHarness`: temp directory with an on-disk job database
//! - `ScriptedRemote`: fake batch service with per-job scripted answers
//! - `SlowRemote` and `InFlightGauge` for measuring overlapping remote calls
//! - `RecordingWriter` and `FaultyStore` for observing and breaking runs
//! - builders for feed entries and result payloads

pub mod builders;
pub mod fakes;
pub mod harness;

pub use builders::*;
pub use fakes::*;
pub use harness::TestHarness;
