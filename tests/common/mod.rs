#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use spending_model::{
    fact::SourceRow,
    io_utils,
    loader::{ErrorMode, LoadOptions, load_rows},
    schema::Schema,
    store::MemoryFactStore,
};
use tempfile::{TempDir, tempdir};

/// Returns the absolute path to a fixture under `tests/data`.
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(name)
}

pub fn cra_schema() -> Schema {
    Schema::load(&fixture_path("cra.json")).expect("cra model is valid")
}

/// A CRA row with every required column populated. Classifier columns are
/// left out so their defaults apply; `overrides` replace or add columns.
pub fn cra_row(name: &str, overrides: &[(&str, &str)]) -> SourceRow {
    let mut row: SourceRow = [
        ("from.name", "Dept001"),
        ("from.label", "Ministry of Defence"),
        ("to.name", "society"),
        ("to.label", "General Public"),
        ("time.from.year", "2009"),
        ("amount", "1.0"),
        ("cap_or_cur", "CG"),
        ("region", "London"),
        ("currency", "GBP"),
        ("population2006", "7556900"),
        ("pog.name", "P01"),
        ("pog.label", "Defence"),
    ]
    .into_iter()
    .collect();
    row.insert("name", name);
    for (column, value) in overrides {
        row.insert(*column, *value);
    }
    row
}

/// Removes `column` from a row, simulating a source file that lacks it.
pub fn without(mut row: SourceRow, column: &str) -> SourceRow {
    row.remove(column);
    row
}

pub fn sample_rows() -> Vec<SourceRow> {
    io_utils::read_source_rows(
        &fixture_path("cra_sample.csv"),
        None,
        encoding_rs::UTF_8,
    )
    .expect("read sample rows")
}

pub fn load_store(schema: &Schema, rows: &[SourceRow]) -> MemoryFactStore {
    let mut store = MemoryFactStore::new();
    load_rows(schema, rows, &mut store, &LoadOptions::new(ErrorMode::Strict))
        .expect("rows map cleanly");
    store
}

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }
}
