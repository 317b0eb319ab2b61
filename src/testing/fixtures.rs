//! Test fixtures for creating reproducible workspaces.
//!
//! A [`TestWorkspace`] is a temporary directory holding a script folder with
//! a working script and sibling files, plus a `Projects/` root.

use crate::backup::sha256_file;
use crate::config::FixloopConfig;
use crate::project::Project;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A temporary workspace, removed when dropped.
///
/// # Example
///
/// ```rust,ignore
/// let ws = TestWorkspace::with_script("job.sh", "exit 1\n");
/// let project = ws.project();
/// ```
pub struct TestWorkspace {
    temp_dir: TempDir,
    script: PathBuf,
}

impl TestWorkspace {
    /// Workspace with `app/<file>` holding `body` and an `app/data.txt` sibling.
    ///
    /// # Panics
    ///
    /// Panics if the temporary directory or files cannot be created.
    #[must_use]
    pub fn with_script(file: &str, body: &str) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let app = temp_dir.path().join("app");
        std::fs::create_dir_all(&app).expect("Failed to create app directory");

        let script = app.join(file);
        std::fs::write(&script, body).expect("Failed to write script");
        std::fs::write(app.join("data.txt"), "sibling data\n").expect("Failed to write sibling");

        Self { temp_dir, script }
    }

    /// A POSIX shell script that fails with a message on stderr.
    #[must_use]
    pub fn failing_shell_script() -> Self {
        Self::with_script("job.sh", "echo 'job: missing input' >&2\nexit 1\n")
    }

    /// Workspace root.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    #[must_use]
    pub fn script(&self) -> &Path {
        &self.script
    }

    /// Configuration that runs scripts with `sh` and short timeouts.
    #[must_use]
    pub fn shell_config(&self) -> FixloopConfig {
        let mut config = FixloopConfig::default();
        config.execution.interpreter = vec!["sh".to_string()];
        config.execution.timeout_secs = Some(10);
        config.protocol.fence_language = "sh".to_string();
        config
    }

    /// The project for this workspace's script under the default root.
    ///
    /// # Panics
    ///
    /// Panics if the script is missing.
    #[must_use]
    pub fn project(&self) -> Project {
        let root = FixloopConfig::default().projects_root(self.path());
        Project::open(&root, &self.script).expect("Failed to open project")
    }

    /// Overwrite the working script.
    ///
    /// # Panics
    ///
    /// Panics if the write fails.
    pub fn write_script(&self, body: &str) {
        std::fs::write(&self.script, body).expect("Failed to write script");
    }

    /// SHA-256 of the working script.
    ///
    /// # Panics
    ///
    /// Panics if the script cannot be read.
    #[must_use]
    pub fn script_hash(&self) -> String {
        sha256_file(&self.script).expect("Failed to hash script")
    }
}
