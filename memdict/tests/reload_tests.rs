mod common;

use std::sync::Arc;
use std::thread;

use arrow::array::{Array, StringArray};
use arrow::datatypes::DataType;
use memdict::{DictionaryOptions, Error, SimpleHashedDictionary};

use common::{SwappableSource, names_batch, names_structure, u64_column};

fn get_name(dict: &SimpleHashedDictionary, key: u64) -> Option<String> {
    let out = dict
        .get_column("name", &DataType::Utf8, &u64_column(&[key]), None)
        .unwrap();
    let out = out.as_any().downcast_ref::<StringArray>().unwrap();
    out.is_valid(0).then(|| out.value(0).to_string())
}

#[test]
fn reload_builds_a_replacement_from_fresh_rows() {
    let source = SwappableSource::new(vec![names_batch(&[(1, Some("v1"))])]);
    let handle = source.handle();
    let dict = SimpleHashedDictionary::create(
        names_structure(),
        DictionaryOptions::default(),
        Box::new(source),
    )
    .unwrap();
    assert_eq!(get_name(&dict, 1).as_deref(), Some("v1"));

    handle.replace_rows(vec![names_batch(&[(1, Some("v2")), (2, Some("two"))])]);
    let fresh = dict.reload().unwrap();
    assert_eq!(fresh.element_count(), 2);
    assert_eq!(get_name(&fresh, 1).as_deref(), Some("v2"));
    assert_eq!(get_name(&fresh, 2).as_deref(), Some("two"));

    // The instance being replaced never changes.
    assert_eq!(dict.element_count(), 1);
    assert_eq!(get_name(&dict, 1).as_deref(), Some("v1"));
    assert!(!dict.has_keys(&u64_column(&[2])).unwrap().value(0));
}

#[test]
fn failed_reload_leaves_the_old_instance_standing() {
    let source = SwappableSource::new(vec![names_batch(&[(1, Some("v1"))])]);
    let handle = source.handle();
    let dict = SimpleHashedDictionary::create(
        names_structure(),
        DictionaryOptions::default(),
        Box::new(source),
    )
    .unwrap();

    handle.set_failing(true);
    let err = dict.reload().unwrap_err();
    assert!(matches!(err, Error::SourceRead(_)), "got {err:?}");
    assert_eq!(get_name(&dict, 1).as_deref(), Some("v1"));

    handle.set_failing(false);
    handle.replace_rows(vec![names_batch(&[(1, Some("v2"))])]);
    let fresh = dict.reload().unwrap();
    assert_eq!(get_name(&fresh, 1).as_deref(), Some("v2"));
}

#[test]
fn readers_keep_answering_while_a_replacement_loads() {
    let source = SwappableSource::new(vec![names_batch(&[(1, Some("v1")), (2, Some("v2"))])]);
    let handle = source.handle();
    let dict = Arc::new(
        SimpleHashedDictionary::create(
            names_structure(),
            DictionaryOptions {
                shard_count: 2,
                ..Default::default()
            },
            Box::new(source),
        )
        .unwrap(),
    );

    thread::scope(|scope| {
        for _ in 0..4 {
            let reader = Arc::clone(&dict);
            scope.spawn(move || {
                for _ in 0..200 {
                    assert_eq!(get_name(&reader, 1).as_deref(), Some("v1"));
                    assert_eq!(get_name(&reader, 2).as_deref(), Some("v2"));
                }
            });
        }
        handle.replace_rows(vec![names_batch(&[(1, Some("v1b"))])]);
        let fresh = dict.reload().unwrap();
        assert_eq!(get_name(&fresh, 1).as_deref(), Some("v1b"));
        assert_eq!(fresh.element_count(), 1);
    });
}

#[test]
fn counters_start_over_on_the_replacement() {
    let source = SwappableSource::new(vec![names_batch(&[(1, Some("v1"))])]);
    let dict = SimpleHashedDictionary::create(
        names_structure(),
        DictionaryOptions::default(),
        Box::new(source),
    )
    .unwrap();

    dict.get_column("name", &DataType::Utf8, &u64_column(&[1, 9]), None)
        .unwrap();
    assert_eq!(dict.query_count(), 2);
    assert_eq!(dict.found_rate(), 0.5);

    let fresh = dict.reload().unwrap();
    assert_eq!(fresh.query_count(), 0);
    assert_eq!(fresh.found_rate(), 0.0);
    assert_eq!(dict.query_count(), 2);
}
