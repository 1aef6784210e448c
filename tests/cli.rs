mod common;

use std::fs;

use assert_cmd::Command;
use common::{TestWorkspace, fixture_path};
use predicates::str::contains;

fn spending_model() -> Command {
    Command::cargo_bin("spending-model").expect("binary exists")
}

fn fixture(name: &str) -> String {
    fixture_path(name).to_str().unwrap().to_string()
}

#[test]
fn validate_reports_model_summary() {
    spending_model()
        .args(["validate", "-m", &fixture("cra.json")])
        .assert()
        .success()
        .stdout(contains("Model 'cra' is valid: 14 dimension(s)"))
        .stdout(contains("4 view(s)"));
}

#[test]
fn validate_lists_violations_for_a_broken_model() {
    let workspace = TestWorkspace::new();
    let mut model: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(fixture_path("cra.json")).unwrap()).unwrap();
    model["mapping"].as_object_mut().unwrap().remove("amount");
    let path = workspace.write("broken.json", &model.to_string());

    spending_model()
        .args(["validate", "-m", path.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(contains("amount"));
}

#[test]
fn views_lists_dimensions_and_views() {
    spending_model()
        .args(["views", "-m", &fixture("cra.json")])
        .assert()
        .success()
        .stdout(contains("cofog@1"))
        .stdout(contains("Spending by region (within department)"));
}

#[test]
fn load_writes_fact_json_lines() {
    let workspace = TestWorkspace::new();
    let output = workspace.path().join("facts.jsonl");
    spending_model()
        .args([
            "load",
            "-m",
            &fixture("cra.json"),
            "-i",
            &fixture("cra_sample.csv"),
            "--mode",
            "strict",
            "-o",
            output.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stderr(contains("Loaded 6 row(s) into 6 fact(s); 0 replaced, 0 skipped"));

    let contents = fs::read_to_string(&output).expect("read facts");
    let facts: Vec<serde_json::Value> = contents
        .lines()
        .map(|line| serde_json::from_str(line).expect("valid json line"))
        .collect();
    assert_eq!(facts.len(), 6);
    assert_eq!(facts[0]["name"], "cra-0001");
    assert_eq!(facts[0]["from"]["label"], "Ministry of Defence");
    assert_eq!(facts[5]["cofog1"]["name"], "XX");
}

#[test]
fn strict_load_fails_on_the_first_bad_row() {
    spending_model()
        .args([
            "load",
            "-m",
            &fixture("cra.json"),
            "-i",
            &fixture("cra_bad_rows.csv"),
            "--mode",
            "strict",
        ])
        .assert()
        .failure()
        .stderr(contains("row 2"));
}

#[test]
fn lenient_load_skips_bad_rows() {
    spending_model()
        .args([
            "load",
            "-m",
            &fixture("cra.json"),
            "-i",
            &fixture("cra_bad_rows.csv"),
            "--mode",
            "lenient",
        ])
        .assert()
        .success()
        .stderr(contains("Loaded 1 row(s) into 1 fact(s); 0 replaced, 2 skipped"));
}

#[test]
fn mode_is_required() {
    spending_model()
        .args(["load", "-m", &fixture("cra.json"), "-i", &fixture("cra_sample.csv")])
        .assert()
        .failure()
        .stderr(contains("--mode"));
}

#[test]
fn aggregate_runs_a_named_view() {
    spending_model()
        .args([
            "aggregate",
            "-m",
            &fixture("cra.json"),
            "-i",
            &fixture("cra_sample.csv"),
            "--mode",
            "strict",
            "--view",
            "region",
        ])
        .assert()
        .success()
        .stdout(contains("North East"))
        .stdout(contains("2750.50"))
        .stdout(contains("1100.25"));
}

#[test]
fn aggregate_runs_a_member_view() {
    spending_model()
        .args([
            "aggregate",
            "-m",
            &fixture("cra.json"),
            "-i",
            &fixture("cra_sample.csv"),
            "--mode",
            "strict",
            "--view",
            "default",
            "--entity",
            "classifier",
            "--member",
            "07",
            "--json",
        ])
        .assert()
        .success()
        .stdout(contains("\"breakdown\": \"region\""))
        .stdout(contains("1200.0"));
}

#[test]
fn aggregate_query_orders_and_prints_json() {
    let assert = spending_model()
        .args([
            "aggregate",
            "-m",
            &fixture("cra.json"),
            "-i",
            &fixture("cra_sample.csv"),
            "--mode",
            "strict",
            "--drilldown",
            "region",
            "--cut",
            "time.year:2009",
            "--order",
            "total:desc",
            "--json",
        ])
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let result: serde_json::Value = serde_json::from_str(&stdout).expect("json output");
    assert_eq!(result["drilldowns"][0], "region");
    assert_eq!(result["rows"][0]["keys"][0], "North East");
    assert_eq!(result["rows"][0]["totals"][0], 2300.0);
    assert_eq!(result["rows"][2]["keys"][0], "Scotland");
    assert_eq!(result["summary"]["num_entries"], 3);
}

#[test]
fn aggregate_rejects_unknown_fields() {
    spending_model()
        .args([
            "aggregate",
            "-m",
            &fixture("cra.json"),
            "-i",
            &fixture("cra_sample.csv"),
            "--mode",
            "strict",
            "--drilldown",
            "district",
        ])
        .assert()
        .failure()
        .stderr(contains("unknown field 'district'"));
}

#[test]
fn taxonomy_lists_observed_members() {
    spending_model()
        .args([
            "taxonomy",
            "-m",
            &fixture("cra.json"),
            "-i",
            &fixture("cra_sample.csv"),
            "--mode",
            "strict",
            "--taxonomy",
            "cofog",
            "--level",
            "1",
        ])
        .assert()
        .success()
        .stdout(contains("cofog level 1 (cofog1)"))
        .stdout(contains("Education"))
        .stdout(contains("(Undefined)"));
}

#[test]
fn taxonomy_rejects_unknown_names() {
    spending_model()
        .args([
            "taxonomy",
            "-m",
            &fixture("cra.json"),
            "-i",
            &fixture("cra_sample.csv"),
            "--mode",
            "strict",
            "--taxonomy",
            "functions",
        ])
        .assert()
        .failure()
        .stderr(contains("declares no taxonomy 'functions'"));
}
