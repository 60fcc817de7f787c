//! Integration test suite for Brook.
//!
//! The tests under `tests/` drive the Electrum client against an in-memory
//! scripted server, run wallet discovery and selection end to end, and
//! exercise the confidential engine with a toy proof backend.

pub mod helpers;
