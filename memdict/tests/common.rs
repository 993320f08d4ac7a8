//! Common test utilities shared across integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};

use arrow::array::{ArrayRef, StringArray, UInt64Array};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use memdict::{
    AttributeDescriptor, BatchStream, DictionarySource, DictionaryStructure, Error, Result,
    ValueKind,
};
// Linked for its auto-init hook, which installs the tracing subscriber once per
// test binary.
use memdict_test_utils as _;

/// `id: UInt64`, `name: Utf8` nullable. The canonical two-column fixture.
pub fn names_structure() -> DictionaryStructure {
    DictionaryStructure::simple("names", "id")
        .with_attribute(AttributeDescriptor::new("name", ValueKind::Utf8).nullable())
}

pub fn names_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::UInt64, false),
        Field::new("name", DataType::Utf8, true),
    ]))
}

pub fn names_batch(rows: &[(u64, Option<&str>)]) -> RecordBatch {
    let ids: UInt64Array = rows.iter().map(|(id, _)| Some(*id)).collect();
    let names: StringArray = rows.iter().map(|(_, name)| *name).collect();
    RecordBatch::try_new(
        names_schema(),
        vec![Arc::new(ids) as ArrayRef, Arc::new(names)],
    )
    .unwrap()
}

pub fn u64_column(values: &[u64]) -> Vec<ArrayRef> {
    vec![Arc::new(UInt64Array::from(values.to_vec()))]
}

/// Yields its good batches, then fails mid-stream.
pub struct FailingSource {
    good: Vec<RecordBatch>,
}

impl FailingSource {
    pub fn new(good: Vec<RecordBatch>) -> Self {
        Self { good }
    }
}

impl DictionarySource for FailingSource {
    fn stream_all(&mut self) -> Result<BatchStream> {
        let good = self.good.clone();
        Ok(Box::new(good.into_iter().map(Ok).chain(std::iter::once(
            Err(Error::source_read("connection reset")),
        ))))
    }

    fn clone_source(&self) -> Box<dyn DictionarySource> {
        Box::new(FailingSource {
            good: self.good.clone(),
        })
    }
}

/// Source whose backing rows can be swapped between reloads. Clones share the
/// backing rows, like connections to the same database.
pub struct SwappableSource {
    rows: Arc<Mutex<Vec<RecordBatch>>>,
    fail: Arc<AtomicBool>,
}

impl SwappableSource {
    pub fn new(rows: Vec<RecordBatch>) -> Self {
        Self {
            rows: Arc::new(Mutex::new(rows)),
            fail: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn replace_rows(&self, rows: Vec<RecordBatch>) {
        *self.rows.lock().unwrap() = rows;
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn handle(&self) -> SwappableSource {
        SwappableSource {
            rows: Arc::clone(&self.rows),
            fail: Arc::clone(&self.fail),
        }
    }
}

impl DictionarySource for SwappableSource {
    fn stream_all(&mut self) -> Result<BatchStream> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::source_read("backing table went away"));
        }
        let rows = self.rows.lock().unwrap().clone();
        Ok(Box::new(rows.into_iter().map(Ok)))
    }

    fn clone_source(&self) -> Box<dyn DictionarySource> {
        Box::new(self.handle())
    }
}

/// Update-field source: each refresh streams the next wave of changed rows.
/// Clones share the wave cursor so a reload observes the wave after create's.
pub struct UpdatingSource {
    state: Arc<Mutex<WaveState>>,
}

struct WaveState {
    waves: Vec<Vec<RecordBatch>>,
    next: usize,
}

impl UpdatingSource {
    pub fn new(waves: Vec<Vec<RecordBatch>>) -> Self {
        Self {
            state: Arc::new(Mutex::new(WaveState { waves, next: 0 })),
        }
    }
}

impl DictionarySource for UpdatingSource {
    fn stream_all(&mut self) -> Result<BatchStream> {
        self.stream_updates()
    }

    fn stream_updates(&mut self) -> Result<BatchStream> {
        let mut state = self.state.lock().unwrap();
        let wave = state.waves.get(state.next).cloned().unwrap_or_default();
        state.next += 1;
        Ok(Box::new(wave.into_iter().map(Ok)))
    }

    fn supports_updates(&self) -> bool {
        true
    }

    fn clone_source(&self) -> Box<dyn DictionarySource> {
        Box::new(UpdatingSource {
            state: Arc::clone(&self.state),
        })
    }
}
