mod common;

use common::{cra_row, cra_schema, fixture_path, sample_rows, without};
use spending_model::{
    aggregate::Aggregator,
    error::{EngineError, RowError},
    fact::SourceRow,
    io_utils,
    loader::{ErrorMode, LoadOptions, load_rows},
    schema::ModelDocument,
    store::{FactStore, MemoryFactStore},
};

#[test]
fn sample_file_loads_every_row() {
    let schema = cra_schema();
    let rows = sample_rows();
    assert_eq!(rows.len(), 6);
    let mut store = MemoryFactStore::new();
    let report = load_rows(&schema, &rows, &mut store, &LoadOptions::new(ErrorMode::Strict))
        .expect("sample rows are clean");
    assert_eq!(report.loaded, 6);
    assert_eq!(report.replaced, 0);
    assert!(report.skipped.is_empty());
    assert_eq!(store.len(), 6);
}

#[test]
fn strict_mode_rejects_a_row_missing_its_amount() {
    let schema = cra_schema();
    let rows = vec![
        cra_row("cra-1", &[]),
        without(cra_row("cra-2", &[]), "amount"),
    ];
    let mut store = MemoryFactStore::new();
    let err = load_rows(&schema, &rows, &mut store, &LoadOptions::new(ErrorMode::Strict))
        .unwrap_err();
    match err {
        EngineError::Row {
            row: 2,
            source: RowError::Mapping(mapping),
        } => assert_eq!(mapping.path, "amount"),
        other => panic!("expected a mapping error on row 2, got {other:?}"),
    }
    assert!(store.is_empty());
}

#[test]
fn lenient_mode_counts_skipped_rows() {
    let schema = cra_schema();
    let rows = io_utils::read_source_rows(&fixture_path("cra_bad_rows.csv"), None, encoding_rs::UTF_8)
        .unwrap();
    let mut store = MemoryFactStore::new();
    let report = load_rows(&schema, &rows, &mut store, &LoadOptions::new(ErrorMode::Lenient))
        .unwrap();
    assert_eq!(report.loaded, 1);
    assert_eq!(report.skipped_count(), 2);
    assert_eq!(report.skipped[0].row, 2);
    assert!(matches!(report.skipped[0].error, RowError::Mapping(_)));
    assert_eq!(report.skipped[1].row, 3);
    assert!(matches!(report.skipped[1].error, RowError::Coercion(_)));
    assert_eq!(store.len(), 1);
}

#[test]
fn restated_rows_replace_earlier_facts() {
    let schema = cra_schema();
    let rows = vec![
        cra_row("cra-1", &[("amount", "10")]),
        cra_row("cra-2", &[("amount", "20")]),
        cra_row("cra-1", &[("amount", "15")]),
    ];
    let mut store = MemoryFactStore::new();
    let report = load_rows(&schema, &rows, &mut store, &LoadOptions::new(ErrorMode::Strict))
        .unwrap();
    assert_eq!(report.loaded, 3);
    assert_eq!(report.replaced, 1);
    assert_eq!(store.len(), 2);

    let total = schema.resolve_field("total").unwrap();
    let sum: f64 = store
        .records()
        .filter_map(|record| record.value(total).and_then(|value| value.as_f64()))
        .sum();
    assert_eq!(sum, 35.0);
}

#[test]
fn worker_count_does_not_change_the_outcome() {
    let schema = cra_schema();
    let rows: Vec<_> = (0..5000)
        .map(|i| {
            let name = format!("cra-{i}");
            let amount = (i % 97).to_string();
            cra_row(&name, &[("amount", amount.as_str())])
        })
        .collect();

    let mut single = MemoryFactStore::new();
    load_rows(&schema, &rows, &mut single, &LoadOptions::new(ErrorMode::Strict).with_workers(1))
        .unwrap();
    let mut parallel = MemoryFactStore::new();
    load_rows(&schema, &rows, &mut parallel, &LoadOptions::new(ErrorMode::Strict).with_workers(6))
        .unwrap();
    assert_eq!(single.as_slice(), parallel.as_slice());
}

#[test]
fn identical_rows_without_key_dimensions_are_separate_facts() {
    let schema = ModelDocument::from_json_str(
        r#"{
        "dataset": {"name": "payments"},
        "mapping": {"region": {"column": "region"}, "amount": {"column": "amount"}},
        "dimensions": {
            "region": {"type": "value", "datatype": "string"},
            "amount": {"type": "measure", "datatype": "float"}
        },
        "views": [{"entity": "dataset", "name": "region", "dimension": "dataset",
                   "breakdown": "region", "filters": {}}]
    }"#,
    )
    .unwrap()
    .into_schema()
    .unwrap();
    let payment: SourceRow = [("region", "London"), ("amount", "100")].into_iter().collect();
    let rows = vec![payment.clone(), payment];

    let mut store = MemoryFactStore::new();
    let report = load_rows(&schema, &rows, &mut store, &LoadOptions::new(ErrorMode::Strict))
        .unwrap();
    assert_eq!(report.loaded, 2);
    assert_eq!(report.replaced, 0);
    assert_eq!(store.len(), 2);
    assert_ne!(store.as_slice()[0].id(), store.as_slice()[1].id());

    // A second load of the same rows adds to the first.
    load_rows(&schema, &rows, &mut store, &LoadOptions::new(ErrorMode::Strict)).unwrap();
    assert_eq!(store.len(), 4);

    let result = Aggregator::new(&schema)
        .execute_view(&store, "dataset", "region", None, None)
        .unwrap();
    assert_eq!(result.pairs(), vec![("London".to_string(), 400.0)]);
}
