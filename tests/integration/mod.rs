//! Integration test suite for trellis.
//!
//! These tests run whole graphs through the executor with scripted
//! workers and generators, and verify that planning, context building,
//! dynamic expansion and failure handling work together.
//!
//! # Test Categories
//!
//! - `pipeline`: Linear graphs and context passing
//! - `fan_in`: Parallel groups and aggregation
//! - `dynamic_expansion`: Generator calls and sub-task replay
//! - `failure`: Short-circuiting and partial results
//! - `loader`: Graph files from disk to run results
//!
//! # CI Compatibility
//!
//! No test spawns an external worker process; every worker call is
//! answered in-process.


mod dynamic_expansion;
mod pipeline;
