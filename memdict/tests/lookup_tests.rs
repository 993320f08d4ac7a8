mod common;

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, Decimal128Array, FixedSizeBinaryArray, Float64Array, ListArray, StringArray,
    TimestampMicrosecondArray, UInt64Array,
};
use arrow::buffer::OffsetBuffer;
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use memdict::{
    AttributeDescriptor, DictionaryOptions, DictionaryStructure, Error, MemorySource,
    ScalarValue, SimpleHashedDictionary, TableLayout, ValueKind,
};

use common::{names_batch, names_structure, u64_column};

fn build_names(
    structure: DictionaryStructure,
    options: DictionaryOptions,
    rows: &[(u64, Option<&str>)],
) -> SimpleHashedDictionary {
    SimpleHashedDictionary::create(
        structure,
        options,
        Box::new(MemorySource::new(vec![names_batch(rows)])),
    )
    .unwrap()
}

fn names_with_default() -> DictionaryStructure {
    DictionaryStructure::simple("names", "id").with_attribute(
        AttributeDescriptor::new("name", ValueKind::Utf8)
            .nullable()
            .with_default(ScalarValue::from("unknown")),
    )
}

#[test]
fn lookup_distinguishes_null_absent_and_declared_default() {
    let dict = build_names(
        names_with_default(),
        DictionaryOptions::default(),
        &[(1, Some("a")), (2, None), (3, Some("c"))],
    );
    assert_eq!(dict.type_name(), "Hashed");
    assert_eq!(dict.element_count(), 3);

    let out = dict
        .get_column("name", &DataType::Utf8, &u64_column(&[1, 2, 3, 4]), None)
        .unwrap();
    let out = out.as_any().downcast_ref::<StringArray>().unwrap();
    assert_eq!(out.value(0), "a");
    assert!(out.is_null(1));
    assert_eq!(out.value(2), "c");
    assert_eq!(out.value(3), "unknown");
    assert!(!out.is_null(3));
}

#[test]
fn lookup_without_any_default_fills_type_zero() {
    let dict = build_names(
        names_structure(),
        DictionaryOptions::default(),
        &[(1, Some("a"))],
    );
    let out = dict
        .get_column("name", &DataType::Utf8, &u64_column(&[9]), None)
        .unwrap();
    let out = out.as_any().downcast_ref::<StringArray>().unwrap();
    assert!(!out.is_null(0));
    assert_eq!(out.value(0), "");
}

#[test]
fn per_row_defaults_override_declared_default() {
    let dict = build_names(
        names_with_default(),
        DictionaryOptions::default(),
        &[(1, Some("a"))],
    );
    let defaults: ArrayRef = Arc::new(StringArray::from(vec![Some("x"), None, Some("z")]));
    let out = dict
        .get_column(
            "name",
            &DataType::Utf8,
            &u64_column(&[1, 5, 6]),
            Some(&defaults),
        )
        .unwrap();
    let out = out.as_any().downcast_ref::<StringArray>().unwrap();
    // Hits ignore the default column entirely.
    assert_eq!(out.value(0), "a");
    // Misses take the per-row default verbatim, null included.
    assert!(out.is_null(1));
    assert_eq!(out.value(2), "z");
}

#[test]
fn lookup_validates_attribute_and_result_type() {
    let dict = build_names(
        names_structure(),
        DictionaryOptions::default(),
        &[(1, Some("a"))],
    );

    let err = dict
        .get_column("name", &DataType::Binary, &u64_column(&[1]), None)
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)));

    let err = dict
        .get_column("missing", &DataType::Utf8, &u64_column(&[1]), None)
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn lookup_validates_default_column_shape() {
    let dict = build_names(
        names_structure(),
        DictionaryOptions::default(),
        &[(1, Some("a"))],
    );

    let short: ArrayRef = Arc::new(StringArray::from(vec!["x"]));
    let err = dict
        .get_column("name", &DataType::Utf8, &u64_column(&[1, 2]), Some(&short))
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)));

    let wrong_type: ArrayRef = Arc::new(UInt64Array::from(vec![0, 0]));
    let err = dict
        .get_column(
            "name",
            &DataType::Utf8,
            &u64_column(&[1, 2]),
            Some(&wrong_type),
        )
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn has_keys_counts_null_only_keys_as_present() {
    let dict = build_names(
        names_structure(),
        DictionaryOptions::default(),
        &[(1, Some("a")), (2, None)],
    );
    let got = dict.has_keys(&u64_column(&[1, 2, 3])).unwrap();
    assert!(got.value(0));
    assert!(got.value(1));
    assert!(!got.value(2));
}

#[test]
fn query_counters_track_found_keys() {
    let dict = build_names(
        names_with_default(),
        DictionaryOptions::default(),
        &[(1, Some("a")), (2, None), (3, Some("c"))],
    );
    assert_eq!(dict.query_count(), 0);
    assert_eq!(dict.found_rate(), 0.0);

    // A null-stored key counts as found; the substituted default does not.
    dict.get_column("name", &DataType::Utf8, &u64_column(&[1, 2, 3, 4]), None)
        .unwrap();
    assert_eq!(dict.query_count(), 4);
    assert!((dict.found_rate() - 0.75).abs() < 1e-9);

    dict.has_keys(&u64_column(&[1, 9])).unwrap();
    assert_eq!(dict.query_count(), 6);
    assert!((dict.found_rate() - 4.0 / 6.0).abs() < 1e-9);

    assert_eq!(dict.hit_rate(), 1.0);
}

#[test]
fn empty_probe_batch_is_a_no_op() {
    let dict = build_names(
        names_structure(),
        DictionaryOptions::default(),
        &[(1, Some("a"))],
    );
    let out = dict
        .get_column("name", &DataType::Utf8, &u64_column(&[]), None)
        .unwrap();
    assert_eq!(out.len(), 0);
    assert_eq!(dict.query_count(), 0);
}

#[test]
fn sparse_layout_answers_identically() {
    let options = DictionaryOptions {
        layout: TableLayout::Sparse,
        ..Default::default()
    };
    let dict = build_names(
        names_with_default(),
        options,
        &[(1, Some("a")), (2, None), (3, Some("c"))],
    );
    assert_eq!(dict.type_name(), "SparseHashed");

    let out = dict
        .get_column("name", &DataType::Utf8, &u64_column(&[1, 2, 3, 4]), None)
        .unwrap();
    let out = out.as_any().downcast_ref::<StringArray>().unwrap();
    assert_eq!(out.value(0), "a");
    assert!(out.is_null(1));
    assert_eq!(out.value(2), "c");
    assert_eq!(out.value(3), "unknown");
}

#[test]
fn typed_attributes_round_trip() {
    let list_field = Arc::new(Field::new_list_field(DataType::Utf8, true));
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::UInt64, false),
        Field::new("price", DataType::Decimal128(10, 2), false),
        Field::new("tag", DataType::FixedSizeBinary(16), false),
        Field::new("score", DataType::Float64, false),
        Field::new(
            "seen",
            DataType::Timestamp(TimeUnit::Microsecond, None),
            false,
        ),
        Field::new("labels", DataType::List(list_field.clone()), false),
    ]));

    let prices = Decimal128Array::from(vec![1050i128, 2550])
        .with_precision_and_scale(10, 2)
        .unwrap();
    let tags =
        FixedSizeBinaryArray::try_from_iter(vec![[1u8; 16], [2u8; 16]].into_iter()).unwrap();
    let labels = ListArray::new(
        list_field,
        OffsetBuffer::from_lengths([2, 1]),
        Arc::new(StringArray::from(vec!["red", "blue", "green"])),
        None,
    );
    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(UInt64Array::from(vec![1, 2])) as ArrayRef,
            Arc::new(prices),
            Arc::new(tags),
            Arc::new(Float64Array::from(vec![1.5, 2.5])),
            Arc::new(TimestampMicrosecondArray::from(vec![
                1_000_000i64,
                2_000_000,
            ])),
            Arc::new(labels),
        ],
    )
    .unwrap();

    let structure = DictionaryStructure::simple("products", "id")
        .with_attribute(AttributeDescriptor::new(
            "price",
            ValueKind::Decimal128 {
                precision: 10,
                scale: 2,
            },
        ))
        .with_attribute(AttributeDescriptor::new("tag", ValueKind::Uuid))
        .with_attribute(AttributeDescriptor::new("score", ValueKind::Float64))
        .with_attribute(AttributeDescriptor::new("seen", ValueKind::TimestampMicros))
        .with_attribute(AttributeDescriptor::new(
            "labels",
            ValueKind::List(Box::new(ValueKind::Utf8)),
        ));
    let dict = SimpleHashedDictionary::create(
        structure,
        DictionaryOptions::default(),
        Box::new(MemorySource::new(vec![batch])),
    )
    .unwrap();

    let keys = u64_column(&[1, 2, 7]);

    let prices = dict
        .get_column("price", &DataType::Decimal128(10, 2), &keys, None)
        .unwrap();
    let prices = prices.as_any().downcast_ref::<Decimal128Array>().unwrap();
    assert_eq!(prices.data_type(), &DataType::Decimal128(10, 2));
    assert_eq!(prices.value(0), 1050);
    assert_eq!(prices.value(1), 2550);
    assert_eq!(prices.value(2), 0);

    let tags = dict
        .get_column("tag", &DataType::FixedSizeBinary(16), &keys, None)
        .unwrap();
    let tags = tags
        .as_any()
        .downcast_ref::<FixedSizeBinaryArray>()
        .unwrap();
    assert_eq!(tags.value(0), [1u8; 16]);
    assert_eq!(tags.value(2), [0u8; 16]);

    let scores = dict
        .get_column("score", &DataType::Float64, &keys, None)
        .unwrap();
    let scores = scores.as_any().downcast_ref::<Float64Array>().unwrap();
    assert_eq!(scores.value(1), 2.5);
    assert_eq!(scores.value(2), 0.0);

    let seen = dict
        .get_column(
            "seen",
            &DataType::Timestamp(TimeUnit::Microsecond, None),
            &keys,
            None,
        )
        .unwrap();
    let seen = seen
        .as_any()
        .downcast_ref::<TimestampMicrosecondArray>()
        .unwrap();
    assert_eq!(seen.value(0), 1_000_000);

    let labels = dict
        .get_column(
            "labels",
            &ValueKind::List(Box::new(ValueKind::Utf8)).data_type(),
            &keys,
            None,
        )
        .unwrap();
    let labels = labels.as_any().downcast_ref::<ListArray>().unwrap();
    let first = labels.value(0);
    let first = first.as_any().downcast_ref::<StringArray>().unwrap();
    assert_eq!(first.value(0), "red");
    assert_eq!(first.value(1), "blue");
    // A missing key with no default is an empty list, not null.
    assert!(!labels.is_null(2));
    assert_eq!(labels.value(2).len(), 0);
}

#[test]
fn declared_list_default_is_substituted() {
    let list_field = Arc::new(Field::new_list_field(DataType::Utf8, true));
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::UInt64, false),
        Field::new("labels", DataType::List(list_field.clone()), false),
    ]));
    let labels = ListArray::new(
        list_field,
        OffsetBuffer::from_lengths([1]),
        Arc::new(StringArray::from(vec!["known"])),
        None,
    );
    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(UInt64Array::from(vec![1])) as ArrayRef,
            Arc::new(labels),
        ],
    )
    .unwrap();

    let structure = DictionaryStructure::simple("products", "id").with_attribute(
        AttributeDescriptor::new("labels", ValueKind::List(Box::new(ValueKind::Utf8)))
            .with_default(ScalarValue::List(vec![
                ScalarValue::from("n"),
                ScalarValue::from("a"),
            ])),
    );
    let dict = SimpleHashedDictionary::create(
        structure,
        DictionaryOptions::default(),
        Box::new(MemorySource::new(vec![batch])),
    )
    .unwrap();

    let out = dict
        .get_column(
            "labels",
            &ValueKind::List(Box::new(ValueKind::Utf8)).data_type(),
            &u64_column(&[1, 9]),
            None,
        )
        .unwrap();
    let out = out.as_any().downcast_ref::<ListArray>().unwrap();
    assert_eq!(out.value(0).len(), 1);
    let fallback = out.value(1);
    let fallback = fallback.as_any().downcast_ref::<StringArray>().unwrap();
    assert_eq!(fallback.len(), 2);
    assert_eq!(fallback.value(0), "n");
    assert_eq!(fallback.value(1), "a");
}

#[test]
fn injectivity_and_lifetime_are_reported() {
    let structure = DictionaryStructure::simple("names", "id")
        .with_attribute(AttributeDescriptor::new("name", ValueKind::Utf8).injective())
        .with_attribute(AttributeDescriptor::new("alias", ValueKind::Utf8));
    let schema = names_schema_two_utf8();
    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(UInt64Array::from(vec![1])) as ArrayRef,
            Arc::new(StringArray::from(vec!["a"])),
            Arc::new(StringArray::from(vec!["b"])),
        ],
    )
    .unwrap();
    let dict = SimpleHashedDictionary::create(
        structure,
        DictionaryOptions::default(),
        Box::new(MemorySource::new(vec![batch])),
    )
    .unwrap();

    assert!(dict.is_injective("name").unwrap());
    assert!(!dict.is_injective("alias").unwrap());
    assert!(dict.is_injective("missing").is_err());
    assert!(dict.lifetime().is_none());
}

fn names_schema_two_utf8() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::UInt64, false),
        Field::new("name", DataType::Utf8, false),
        Field::new("alias", DataType::Utf8, false),
    ]))
}
