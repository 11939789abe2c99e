//! Test infrastructure shared by the workspace crates.
//!
//! Tests that produce artifacts (rendered masks, flagged images, JSON
//! configurations) write them below `<workspace root>/test_output/` so they
//! survive the test run and can be inspected by hand:
//!
//! ```text
//! test_output/
//! ├── masks/        # Rendered flag masks
//! └── strategies/   # Saved strategy configurations
//! ```
//!
//! ```rust
//! use test_helpers::{output_path, output_subdir};
//!
//! let png = output_subdir("masks").join("scenario_b.png");
//! assert!(png.parent().unwrap().is_dir());
//! assert_eq!(output_path("masks"), png.parent().unwrap());
//! ```

use once_cell::sync::Lazy;
use std::env;
use std::path::{Path, PathBuf};

/// Errors raised while setting up the test environment.
#[derive(thiserror::Error, Debug)]
pub enum TestHelperError {
    #[error("Failed to find project root: {0}")]
    ProjectRootNotFound(String),
}

/// Walk up from the current directory to the `Cargo.toml` that declares the
/// `[workspace]`.
///
/// # Examples
/// ```rust
/// use test_helpers::find_project_root;
///
/// let root = find_project_root().expect("Project root not found");
/// assert!(root.join("flagger").exists());
/// assert!(root.join("test_helpers").exists());
/// ```
pub fn find_project_root() -> Result<PathBuf, TestHelperError> {
    let mut current_dir = env::current_dir().map_err(|e| {
        TestHelperError::ProjectRootNotFound(format!("Failed to get current directory: {e}"))
    })?;

    loop {
        let cargo_toml = current_dir.join("Cargo.toml");
        if cargo_toml.exists() {
            let content = std::fs::read_to_string(&cargo_toml).map_err(|e| {
                TestHelperError::ProjectRootNotFound(format!(
                    "Failed to read {}: {e}",
                    cargo_toml.display()
                ))
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

/// Resolved once per test binary.
static PROJECT_ROOT: Lazy<PathBuf> =
    Lazy::new(|| find_project_root().expect("Failed to find project root directory"));

/// `<workspace root>/test_output`, created on first use.
pub fn get_output_dir() -> PathBuf {
    let output_dir = PROJECT_ROOT.join("test_output");
    if !output_dir.exists() {
        std::fs::create_dir_all(&output_dir).expect("Failed to create output directory");
    }
    output_dir
}

/// Path of an artifact inside the output directory. Parent directories are
/// not created; use [`output_subdir`] for that.
pub fn output_path<P: AsRef<Path>>(path: P) -> PathBuf {
    get_output_dir().join(path)
}

/// A subdirectory of the output directory, created if missing.
pub fn output_subdir<P: AsRef<Path>>(name: P) -> PathBuf {
    let dir = output_path(name);
    std::fs::create_dir_all(&dir).expect("Failed to create output subdirectory");
    dir
}

/// Install `env_logger` for a test binary. Safe to call from every test;
/// only the first call has an effect. Honours `RUST_LOG`.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
