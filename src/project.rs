//! Project identity and on-disk layout.
//!
//! A project is named after its working script's file stem and owns
//! `Projects/<name>/`:
//!
//! ```text
//! Projects/<name>/
//! ├── <name>BACKUPS/<k>-<k>/<name>CURRCOPY.<ext>
//! ├── <name>BACKUPS/<k>-<k>/<name>CURRENV/...
//! ├── BugFix<k>/{<name>error.txt, AIOutputRaw.txt, <name>fix.txt, <name>Fix<k>.<ext>}
//! ├── LabTest/
//! └── .fixloop.lock
//! ```

use crate::error::{FixloopError, Result};
use fs2::FileExt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::debug;

const BUG_FIX_PREFIX: &str = "BugFix";
const LAB_DIR: &str = "LabTest";
const LOCK_FILE: &str = ".fixloop.lock";

/// Raw model output file inside a bug-fix folder.
pub const RAW_OUTPUT_FILE: &str = "AIOutputRaw.txt";

/// One script's lineage on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    name: String,
    extension: Option<String>,
    script: PathBuf,
    root: PathBuf,
}

impl Project {
    /// Resolve the project for `script` under `projects_root`.
    ///
    /// Nothing is created on disk; see [`Project::ensure_root`].
    ///
    /// # Errors
    ///
    /// Returns [`FixloopError::MissingScript`] if `script` is not a regular
    /// file or has no usable file stem.
    pub fn open(projects_root: &Path, script: &Path) -> Result<Self> {
        if !script.is_file() {
            return Err(FixloopError::MissingScript {
                path: script.to_path_buf(),
            });
        }
        let script = script.canonicalize()?;

        let name = script
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| FixloopError::MissingScript {
                path: script.clone(),
            })?
            .to_string();
        let extension = script
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_string);

        Ok(Self {
            root: projects_root.join(&name),
            name,
            extension,
            script,
        })
    }

    /// Create the project root if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    pub fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        Ok(())
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Absolute path of the working script.
    #[must_use]
    pub fn script(&self) -> &Path {
        &self.script
    }

    /// Directory holding the working script and its sibling files.
    #[must_use]
    pub fn script_dir(&self) -> &Path {
        self.script.parent().unwrap_or_else(|| Path::new("."))
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `file` with the script's extension appended, if it has one.
    fn with_extension(&self, file: String) -> String {
        match &self.extension {
            Some(ext) => format!("{file}.{ext}"),
            None => file,
        }
    }

    // =========================================================================
    // Snapshot layout
    // =========================================================================

    #[must_use]
    pub fn backups_dir(&self) -> PathBuf {
        self.root.join(format!("{}BACKUPS", self.name))
    }

    #[must_use]
    pub fn snapshot_dir(&self, counter: u32) -> PathBuf {
        self.backups_dir().join(format!("{counter}-{counter}"))
    }

    #[must_use]
    pub fn current_copy_path(&self, counter: u32) -> PathBuf {
        self.snapshot_dir(counter)
            .join(self.with_extension(format!("{}CURRCOPY", self.name)))
    }

    #[must_use]
    pub fn current_env_dir(&self, counter: u32) -> PathBuf {
        self.snapshot_dir(counter)
            .join(format!("{}CURRENV", self.name))
    }

    // =========================================================================
    // Bug-fix layout
    // =========================================================================

    #[must_use]
    pub fn bug_fix_dir(&self, counter: u32) -> PathBuf {
        self.root.join(format!("{BUG_FIX_PREFIX}{counter}"))
    }

    #[must_use]
    pub fn error_file(&self, counter: u32) -> PathBuf {
        self.bug_fix_dir(counter)
            .join(format!("{}error.txt", self.name))
    }

    #[must_use]
    pub fn raw_output_file(&self, counter: u32) -> PathBuf {
        self.bug_fix_dir(counter).join(RAW_OUTPUT_FILE)
    }

    #[must_use]
    pub fn fix_text_file(&self, counter: u32) -> PathBuf {
        self.bug_fix_dir(counter)
            .join(format!("{}fix.txt", self.name))
    }

    /// File name of the candidate script for cycle `counter`.
    #[must_use]
    pub fn candidate_file_name(&self, counter: u32) -> String {
        self.with_extension(format!("{}Fix{counter}", self.name))
    }

    #[must_use]
    pub fn candidate_path(&self, counter: u32) -> PathBuf {
        self.bug_fix_dir(counter)
            .join(self.candidate_file_name(counter))
    }

    #[must_use]
    pub fn lab_dir(&self) -> PathBuf {
        self.root.join(LAB_DIR)
    }

    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }

    // =========================================================================
    // Counter discovery
    // =========================================================================

    /// Indices of existing bug-fix folders, ascending.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error; a missing project root yields none.
    pub fn bug_fix_indices(&self) -> Result<Vec<u32>> {
        indices_in(&self.root, |name| {
            name.strip_prefix(BUG_FIX_PREFIX)
                .and_then(|n| n.parse().ok())
        })
    }

    /// Indices of existing snapshots, ascending.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error; a missing backups folder yields none.
    pub fn snapshot_indices(&self) -> Result<Vec<u32>> {
        indices_in(&self.backups_dir(), |name| {
            let (a, b) = name.split_once('-')?;
            let a: u32 = a.parse().ok()?;
            (b.parse::<u32>().ok()? == a).then_some(a)
        })
    }

    /// Counter for the next cycle: one past the highest index already on
    /// disk, or 1 for a fresh project.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    pub fn next_counter(&self) -> Result<u32> {
        let highest = self
            .bug_fix_indices()?
            .into_iter()
            .chain(self.snapshot_indices()?)
            .max()
            .unwrap_or(0);
        Ok(highest + 1)
    }

    // =========================================================================
    // Locking
    // =========================================================================

    /// Take the exclusive project lock without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`FixloopError::ProjectLocked`] if another process holds it.
    pub fn lock(&self) -> Result<ProjectLock> {
        self.ensure_root()?;
        let path = self.lock_path();
        let file = File::create(&path)?;
        file.try_lock_exclusive()
            .map_err(|_| FixloopError::ProjectLocked {
                project: self.name.clone(),
            })?;
        debug!("Acquired project lock {}", path.display());
        Ok(ProjectLock { file, path })
    }
}

fn indices_in(dir: &Path, parse: impl Fn(&str) -> Option<u32>) -> Result<Vec<u32>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut indices = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(k) = entry.file_name().to_str().and_then(&parse) {
            indices.push(k);
        }
    }
    indices.sort_unstable();
    Ok(indices)
}

/// Exclusive lock on a project, released on drop.
#[derive(Debug)]
pub struct ProjectLock {
    file: File,
    path: PathBuf,
}

impl ProjectLock {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ProjectLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
