use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[allow(dead_code)]
pub fn runpack_binary() -> PathBuf {
    let mut path = std::env::current_exe().expect("Failed to get current executable path");
    path.pop();
    if path.ends_with("deps") {
        path.pop();
    }
    path.join("runpack")
}

pub fn fixture_path(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// Copy a fixture into a fresh temp dir so tests can modify it
#[allow(dead_code)]
pub fn copy_fixture(name: &str) -> TempDir {
    let dir = TempDir::new().expect("Failed to create temp dir");
    for entry in fs::read_dir(fixture_path(name)).expect("Failed to read fixture") {
        let entry = entry.expect("Failed to read fixture entry");
        fs::copy(entry.path(), dir.path().join(entry.file_name()))
            .expect("Failed to copy fixture file");
    }
    dir
}
