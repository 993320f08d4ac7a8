//! Error types and result definitions for the memdict dictionary engine.
//!
//! This crate provides the unified error type ([`Error`]) and result type alias
//! ([`Result<T>`]) used throughout the memdict crates. All operations that could fail
//! return `Result<T>`, where the error variant contains detailed information about
//! what went wrong.
//!
//! # Error Philosophy
//!
//! memdict uses a single error enum ([`Error`]) rather than crate-specific error types.
//!
//! This approach:
//! - Simplifies error handling across crate boundaries
//! - Allows errors to propagate naturally with `?` operator
//! - Provides clear error messages for end users
//! - Enables structured error matching for programmatic handling
//!
//! # Error Categories
//!
//! - **Data format errors** ([`Error::Arrow`]): Arrow array and batch construction issues
//! - **Declaration errors** ([`Error::Config`]): Invalid structure, options, or call arguments
//! - **Source errors** ([`Error::EmptySource`], [`Error::SourceRead`]): Failures while
//!   streaming rows out of a dictionary source
//! - **Hierarchy errors** ([`Error::HierarchyCycle`]): Parent links that loop back on
//!   themselves during traversal
//! - **Internal errors** ([`Error::Internal`]): Bugs or unexpected states

pub mod error;
pub mod result;

pub use error::Error;
pub use result::Result;
