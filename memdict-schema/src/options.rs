//! Load and layout options.

use memdict_result::{Error, Result};
use serde::{Deserialize, Serialize};

/// Memory layout of the per-shard key tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TableLayout {
    /// Open-addressing tables tuned for lookup speed.
    #[default]
    Dense,
    /// Bitmap-grouped tables that trade a slower probe for a smaller footprint.
    Sparse,
}

/// Refresh window for deployments that reload dictionaries on a timer.
///
/// The engine itself never schedules reloads; it only carries the window so callers
/// can pick a jittered deadline between `min_secs` and `max_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DictionaryLifetime {
    pub min_secs: u64,
    pub max_secs: u64,
}

/// Options controlling how a dictionary is built and held in memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DictionaryOptions {
    pub layout: TableLayout,
    /// Number of independent key partitions built in parallel. `1` keeps the load on
    /// the calling thread.
    pub shard_count: usize,
    /// Approximate number of rows a shard may have queued before the feeding thread
    /// blocks. Backpressure is block-granular, so the real bound can overshoot by a
    /// partial block.
    pub shard_backlog: usize,
    /// When set, a load that finishes with zero rows fails instead of producing an
    /// empty dictionary.
    pub require_nonempty: bool,
    pub lifetime: Option<DictionaryLifetime>,
}

impl Default for DictionaryOptions {
    fn default() -> Self {
        Self {
            layout: TableLayout::Dense,
            shard_count: 1,
            shard_backlog: 10_000,
            require_nonempty: false,
            lifetime: None,
        }
    }
}

impl DictionaryOptions {
    pub const MAX_SHARDS: usize = 128;

    pub fn validate(&self) -> Result<()> {
        if self.shard_count == 0 || self.shard_count > Self::MAX_SHARDS {
            return Err(Error::Config(format!(
                "shard_count must be within [1, {}], got {}",
                Self::MAX_SHARDS,
                self.shard_count
            )));
        }
        if self.shard_backlog == 0 {
            return Err(Error::Config("shard_backlog must be at least 1".into()));
        }
        if let Some(lifetime) = &self.lifetime
            && lifetime.min_secs > lifetime.max_secs
        {
            return Err(Error::Config(format!(
                "lifetime min_secs {} exceeds max_secs {}",
                lifetime.min_secs, lifetime.max_secs
            )));
        }
        Ok(())
    }
}
