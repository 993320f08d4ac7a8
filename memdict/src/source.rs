//! Dictionary sources: where rows come from.
//!
//! A source hands the loader a stream of Arrow record batches. The engine never
//! interprets the transport behind the stream; databases, files, and fixtures all
//! look the same once they produce batches whose columns match the declared
//! structure by name and type.

use arrow::record_batch::RecordBatch;
use memdict_result::{Error, Result};

/// Pull-based batch stream. Errors terminate the load that is consuming it.
pub type BatchStream = Box<dyn Iterator<Item = Result<RecordBatch>> + Send>;

/// Supplier of dictionary rows.
///
/// Implementations must be shareable across threads; a built dictionary holds its
/// source for reloads while readers query from other threads.
pub trait DictionarySource: Send + Sync {
    /// Stream every row of the backing data set.
    fn stream_all(&mut self) -> Result<BatchStream>;

    /// Stream rows changed since the previous refresh.
    ///
    /// Only meaningful when [`supports_updates`](Self::supports_updates) returns
    /// true. The first call must return the full data set; later calls return only
    /// rows whose update field moved.
    fn stream_updates(&mut self) -> Result<BatchStream> {
        Err(Error::Config(
            "dictionary source does not support incremental updates".into(),
        ))
    }

    /// True when the source tracks an update field and wants the merge-based
    /// refresh path instead of full reloads.
    fn supports_updates(&self) -> bool {
        false
    }

    /// Fresh handle for a reload. The clone observes the backing data as it is at
    /// reload time, not a snapshot taken when this source was first built.
    fn clone_source(&self) -> Box<dyn DictionarySource>;
}

/// Source over batches already in memory. Mostly useful for tests and for
/// dictionaries whose rows are produced by some other in-process computation.
#[derive(Clone)]
pub struct MemorySource {
    batches: Vec<RecordBatch>,
}

impl MemorySource {
    pub fn new(batches: Vec<RecordBatch>) -> Self {
        Self { batches }
    }
}

impl DictionarySource for MemorySource {
    fn stream_all(&mut self) -> Result<BatchStream> {
        Ok(Box::new(self.batches.clone().into_iter().map(Ok)))
    }

    fn clone_source(&self) -> Box<dyn DictionarySource> {
        Box::new(self.clone())
    }
}
