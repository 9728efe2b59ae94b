//! Shared database repository test infrastructure
//!
//! The same test logic runs against every backend implementation:
//!
//! - **Unit tests (SQLite)**: Fast, in-memory tests that run with every `cargo test`
//! - **Integration tests (PostgreSQL, MySQL)**: Slower tests using testcontainers,
//!   run with `cargo test -- --ignored`
//!
//! Each repository test module contains shared test functions that take
//! `&dyn XxxRepo`, plus per-backend setup that wires them up.
//!
//! # Running tests
//!
//! ```bash
//! cargo test                       # Run fast SQLite tests only
//! cargo test -- --ignored          # Run PostgreSQL/MySQL integration tests (requires Docker)
//! cargo test -- --include-ignored  # Run all tests
//! ```
