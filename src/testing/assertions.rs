//! Custom assertions for repair-cycle artifacts.

use crate::backup::sha256_file;
use crate::project::Project;
use std::path::Path;

/// Assert that `path` still hashes to `expected`.
///
/// # Panics
///
/// Panics if the file is unreadable or its contents changed.
pub fn assert_unchanged(path: &Path, expected: &str) {
    let actual = sha256_file(path)
        .unwrap_or_else(|e| panic!("Cannot hash {}: {}", path.display(), e));
    assert_eq!(
        actual,
        expected,
        "Expected {} to be unchanged, but its contents differ",
        path.display()
    );
}

/// Assert that two files hold identical bytes.
///
/// # Panics
///
/// Panics if either file is unreadable or they differ.
pub fn assert_same_bytes(left: &Path, right: &Path) {
    let l = std::fs::read(left).unwrap_or_else(|e| panic!("Cannot read {}: {}", left.display(), e));
    let r =
        std::fs::read(right).unwrap_or_else(|e| panic!("Cannot read {}: {}", right.display(), e));
    assert!(
        l == r,
        "Expected {} and {} to be byte-identical",
        left.display(),
        right.display()
    );
}

/// Assert that bug-fix folder `counter` holds the error file and the raw
/// model output.
///
/// # Panics
///
/// Panics naming the first missing artifact.
pub fn assert_bug_fix_recorded(project: &Project, counter: u32) {
    for path in [project.error_file(counter), project.raw_output_file(counter)] {
        assert!(path.is_file(), "Expected artifact {}", path.display());
    }
}

/// Assert that no snapshot or bug-fix folder exists for `counter`.
///
/// # Panics
///
/// Panics if either folder exists.
pub fn assert_cycle_untouched(project: &Project, counter: u32) {
    assert!(
        !project.snapshot_dir(counter).exists(),
        "Unexpected snapshot {}",
        project.snapshot_dir(counter).display()
    );
    assert!(
        !project.bug_fix_dir(counter).exists(),
        "Unexpected bug-fix folder {}",
        project.bug_fix_dir(counter).display()
    );
}
