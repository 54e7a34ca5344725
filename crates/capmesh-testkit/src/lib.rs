//! # Capmesh Testkit
//!
//! Testing utilities for capmesh.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: deterministic records, instance ids, and store setups
//! - **Generators**: proptest strategies for property-based testing
//!
//! The property suites living in the generator module's tests pin down
//! the protocol's load-bearing guarantees: resolution determinism, apply
//! idempotence, and order-independence of interleaved deliveries.
//!
//! ## Fixtures
//!
//! ```rust
//! use capmesh_testkit::fixtures::{instance_id, record};
//!
//! let r = record("cap.search", 2, 1_000, "aa");
//! assert_eq!(r.origin_instance, instance_id("aa"));
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use capmesh_testkit::generators;
//!
//! proptest! {
//!     #[test]
//!     fn resolves_deterministically(r in generators::record()) {
//!         // ...
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{instance_id, multi_instances, record, record_with_payload, TestInstance};
