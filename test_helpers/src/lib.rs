//! Test helpers for the object finding workspace
//!
//! Synthetic slit and echelle frames with known sources, a shared place for
//! QA records written by the finders, and logging setup for test runs.

use once_cell::sync::Lazy;
use std::env;
use std::path::{Path, PathBuf};

pub mod synthetic;

pub use synthetic::{
    echelle_frame, gaussian_slit, simple_normal_array, GaussianSource, SyntheticEchelle,
    SyntheticSlit,
};

/// Placeholder the echelle finder swaps for the order number in QA paths.
pub const ORDER_QA_TOKEN: &str = "S0999";

/// Error type for test helper operations
#[derive(thiserror::Error, Debug)]
pub enum TestHelperError {
    #[error("Failed to find project root: {0}")]
    ProjectRootNotFound(String),
}

/// Returns the path to the workspace root directory.
///
/// Walks up from the current directory to the first Cargo.toml that declares
/// a `[workspace]`. Integration tests run from their crate directory, so this
/// is how they reach the shared output directory.
///
/// # Returns
/// * Ok(PathBuf) - The path to the workspace root
/// * Err(TestHelperError) - If no workspace manifest was found
pub fn find_project_root() -> Result<PathBuf, TestHelperError> {
    let mut current_dir = env::current_dir().map_err(|e| {
        TestHelperError::ProjectRootNotFound(format!("Failed to get current directory: {}", e))
    })?;

    loop {
        let cargo_toml = current_dir.join("Cargo.toml");
        if cargo_toml.exists() {
            let content = std::fs::read_to_string(&cargo_toml).map_err(|e| {
                TestHelperError::ProjectRootNotFound(format!("Failed to read Cargo.toml: {}", e))
            })?;
            if content.contains("[workspace]") {
                return Ok(current_dir);
            }
        }

        if !current_dir.pop() {
            break;
        }
    }

    Err(TestHelperError::ProjectRootNotFound(
        "Workspace root not found".to_string(),
    ))
}

static PROJECT_ROOT: Lazy<PathBuf> =
    Lazy::new(|| find_project_root().expect("Failed to find project root directory"));

/// Install `env_logger` for the running test binary.
///
/// Safe to call from every test; only the first call installs the logger.
/// Output goes through the test harness capture, so the finders' log lines
/// show up only for failing tests or with `--nocapture`.
pub fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Directory for QA records and saved objects written by tests.
///
/// Lives at `test_output/objfind` under the workspace root and is created on
/// first use.
pub fn get_output_dir() -> PathBuf {
    let output_dir = PROJECT_ROOT.join("test_output").join("objfind");
    if !output_dir.exists() {
        std::fs::create_dir_all(&output_dir).expect("Failed to create output directory");
    }
    output_dir
}

/// Path of an artifact within [`get_output_dir`].
pub fn output_path<P: AsRef<Path>>(path: P) -> PathBuf {
    get_output_dir().join(path)
}

/// QA path template for an echelle run.
///
/// The returned path carries [`ORDER_QA_TOKEN`], which the finder replaces
/// by the order number; [`order_qa_file`] gives the file of one order.
pub fn order_qa_template(stem: &str) -> PathBuf {
    output_path(format!("{}_{}.json", stem, ORDER_QA_TOKEN))
}

/// File the finder writes for echelle order `order` from [`order_qa_template`]`(stem)`.
pub fn order_qa_file(stem: &str, order: i32) -> PathBuf {
    output_path(format!("{}_S{:04}.json", stem, order))
}
