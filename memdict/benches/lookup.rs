//! Point lookups against a loaded dictionary.
//!
//! Benchmarks:
//!   - get_column_hits: gather over probes that all exist
//!   - get_column_mixed: half the probes miss and take the type default
//!   - get_column_hits_sharded: same gather against an 8-shard build
//!   - has_keys: membership only, no value gather
//!
//! Setup once: a 100k-key dictionary with one UInt64 and one Utf8 attribute.
//!
//! Run:
//!   cargo bench --bench lookup

#![forbid(unsafe_code)]

use std::hint::black_box;
use std::sync::Arc;

use arrow::array::{ArrayRef, StringArray, UInt64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use memdict::{
    AttributeDescriptor, DictionaryOptions, DictionaryStructure, MemorySource,
    SimpleHashedDictionary, ValueKind,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const N_KEYS: u64 = 100_000;
const N_PROBES: usize = 1_024;
const SEED: u64 = 0x90B3_74D1_0A52_C517;

fn seed_dictionary(shard_count: usize) -> SimpleHashedDictionary {
    let structure = DictionaryStructure::simple("bench", "id")
        .with_attribute(AttributeDescriptor::new("weight", ValueKind::UInt64))
        .with_attribute(AttributeDescriptor::new("label", ValueKind::Utf8));
    let ids: Vec<u64> = (0..N_KEYS).collect();
    let weights: Vec<u64> = ids.iter().map(|id| id.wrapping_mul(31)).collect();
    let labels: Vec<String> = ids.iter().map(|id| format!("label{id}")).collect();
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::UInt64, false),
        Field::new("weight", DataType::UInt64, false),
        Field::new("label", DataType::Utf8, false),
    ]));
    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(UInt64Array::from(ids)) as ArrayRef,
            Arc::new(UInt64Array::from(weights)),
            Arc::new(StringArray::from_iter_values(labels)),
        ],
    )
    .unwrap();
    let options = DictionaryOptions {
        shard_count,
        ..Default::default()
    };
    SimpleHashedDictionary::create(structure, options, Box::new(MemorySource::new(vec![batch])))
        .unwrap()
}

fn make_probes(bound: u64) -> Vec<ArrayRef> {
    let mut rng = StdRng::seed_from_u64(SEED);
    let keys: Vec<u64> = (0..N_PROBES).map(|_| rng.random_range(0..bound)).collect();
    vec![Arc::new(UInt64Array::from(keys))]
}

fn bench_lookup(c: &mut Criterion) {
    let dict = seed_dictionary(1);
    let sharded = seed_dictionary(8);
    let hits = make_probes(N_KEYS);
    let mixed = make_probes(N_KEYS * 2);

    let mut g = c.benchmark_group("dictionary_lookup");
    g.throughput(Throughput::Elements(N_PROBES as u64));

    g.bench_function("get_column_hits", |b| {
        b.iter(|| {
            let out = dict
                .get_column("weight", &DataType::UInt64, black_box(&hits), None)
                .unwrap();
            black_box(out);
        });
    });

    g.bench_function("get_column_mixed", |b| {
        b.iter(|| {
            let out = dict
                .get_column("label", &DataType::Utf8, black_box(&mixed), None)
                .unwrap();
            black_box(out);
        });
    });

    g.bench_function("get_column_hits_sharded", |b| {
        b.iter(|| {
            let out = sharded
                .get_column("weight", &DataType::UInt64, black_box(&hits), None)
                .unwrap();
            black_box(out);
        });
    });

    g.bench_function("has_keys", |b| {
        b.iter(|| {
            let out = dict.has_keys(black_box(&mixed)).unwrap();
            black_box(out);
        });
    });

    g.finish();
}

criterion_group!(benches, bench_lookup);
criterion_main!(benches);
