use std::fmt;

use thiserror::Error;

/// Unified error type for all memdict operations.
///
/// This enum encompasses all failure modes across the memdict stack, from Arrow
/// conversion problems to source read failures during a parallel load. Each variant
/// includes context-specific information to help diagnose and handle the error
/// appropriately.
///
/// # Error Handling Strategy
///
/// Errors propagate upward through the call stack using Rust's `?` operator. At API
/// boundaries, errors are typically converted to user-friendly messages. Internal code
/// can match on specific variants for fine-grained error handling.
///
/// # Thread Safety
///
/// `Error` implements `Send` and `Sync`, allowing errors to cross thread boundaries.
/// This matters for the sharded loader, where worker threads report failures back to
/// the thread driving the load.
#[derive(Error, Debug)]
pub enum Error {
    /// Arrow library error during columnar data operations.
    ///
    /// This error occurs when:
    /// - Building Arrow arrays with invalid data
    /// - Converting between Arrow data types
    /// - Assembling record batches with mismatched schemas
    ///
    /// Arrow is the interchange format used by memdict for both loading and lookups,
    /// so these errors typically indicate data format incompatibilities.
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Invalid dictionary declaration or API argument.
    ///
    /// This error indicates a problem with the dictionary structure, its options, or
    /// arguments passed to lookup APIs:
    /// - Unknown attribute names
    /// - Result or key column types that do not match the declared structure
    /// - Null values in key columns or in non-nullable attribute columns
    /// - Option combinations the engine does not support (e.g. multiple shards
    ///   together with an update-field source)
    ///
    /// The message string provides specific details about what was invalid and why.
    ///
    /// # Recovery
    ///
    /// These errors are recoverable; fix the declaration or the call and retry.
    #[error("Invalid dictionary configuration: {0}")]
    Config(String),

    /// The source produced no rows while `require_nonempty` was set.
    ///
    /// Raised at the end of a load once every shard has drained, never mid-stream.
    /// Dictionaries that legitimately start empty should clear `require_nonempty`
    /// in their options.
    #[error("dictionary `{dictionary}`: source is empty and require_nonempty is set")]
    EmptySource {
        /// Name of the dictionary whose source came up empty.
        dictionary: String,
    },

    /// Reading a batch out of the dictionary source failed.
    ///
    /// The loader stops pulling batches on the first failure, tears down the shard
    /// workers, and surfaces this error to the caller. Already-queued rows are
    /// discarded together with the partially built dictionary.
    #[error("dictionary source read failed: {0}")]
    SourceRead(String),

    /// A hierarchy traversal revisited a key it had already seen.
    ///
    /// Parent links form a forest in a well-formed dictionary. A revisit during an
    /// ancestor walk or a descendants expansion means the parent data loops, and the
    /// traversal aborts instead of spinning.
    #[error("hierarchy loop detected while traversing key {key}")]
    HierarchyCycle {
        /// The key at which the traversal came back around.
        key: u64,
    },

    /// Internal error indicating a bug or unexpected state.
    ///
    /// This error should never occur during normal operation. It indicates violated
    /// internal invariants, such as an attribute store whose concrete type disagrees
    /// with the declared attribute type after validation already passed.
    ///
    /// # Debugging
    ///
    /// The message includes details about what assertion failed or what unexpected
    /// state was encountered. Enable debug logging for more context.
    #[error("An internal operation failed: {0}")]
    Internal(String),
}

impl Error {
    /// Create a source read error from any displayable error.
    ///
    /// This is a convenience method for converting other error types into
    /// [`Error::SourceRead`] while preserving the original error message.
    ///
    /// # Examples
    ///
    /// ```
    /// use memdict_result::Error;
    ///
    /// fn pull_batch() -> Result<(), Error> {
    ///     let io_err = std::io::Error::other("connection reset");
    ///     Err(Error::source_read(io_err))
    /// }
    ///
    /// let err = pull_batch().unwrap_err();
    /// assert!(matches!(err, Error::SourceRead(msg) if msg.contains("connection reset")));
    /// ```
    #[inline]
    pub fn source_read<E: fmt::Display>(err: E) -> Self {
        Error::SourceRead(err.to_string())
    }

    /// Create a configuration error from any displayable error.
    ///
    /// # Examples
    ///
    /// ```
    /// use memdict_result::Error;
    ///
    /// fn parse_shards(input: &str) -> Result<u64, Error> {
    ///     input.parse::<u64>().map_err(Error::config)
    /// }
    ///
    /// assert_eq!(parse_shards("4").unwrap(), 4);
    /// assert!(matches!(parse_shards("many"), Err(Error::Config(_))));
    /// ```
    #[inline]
    pub fn config<E: fmt::Display>(err: E) -> Self {
        Error::Config(err.to_string())
    }
}
