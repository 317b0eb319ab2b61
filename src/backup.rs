//! Counter-indexed, immutable snapshots of a working script and its
//! sibling files.
//!
//! A snapshot is written before anything else in a cycle touches the
//! script. Every copied file is flushed to disk and hashed, and a
//! `manifest.json` describing the snapshot is written last with a
//! temp-file-and-rename so a present manifest means a complete snapshot.

use crate::error::{FixloopError, IntoFixloopError, Result};
use crate::project::Project;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Manifest file name inside each snapshot directory.
pub const MANIFEST_FILE: &str = "manifest.json";

const TMP_SUFFIX: &str = ".tmp";

/// Hex-encoded SHA-256 of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Hex-encoded SHA-256 of a file's contents.
///
/// # Errors
///
/// Returns the underlying I/O error.
pub fn sha256_file(path: &Path) -> std::io::Result<String> {
    Ok(sha256_hex(&fs::read(path)?))
}

/// One file recorded in a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub name: String,
    pub bytes: u64,
    pub sha256: String,
}

/// Description of a snapshot, stored as `manifest.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub counter: u32,
    pub created_at: DateTime<Utc>,
    /// Working script the snapshot was taken from.
    pub script: PathBuf,
    /// Hash of the current-copy artifact.
    pub script_sha256: String,
    /// Files of the environment copy, sorted by name.
    pub environment: Vec<ManifestEntry>,
}

/// A completed snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupSnapshot {
    pub counter: u32,
    pub dir: PathBuf,
    pub current_copy: PathBuf,
    pub environment_dir: PathBuf,
    pub manifest: SnapshotManifest,
}

impl BackupSnapshot {
    /// Paths of every environment file, in manifest order.
    #[must_use]
    pub fn environment_files(&self) -> Vec<PathBuf> {
        self.manifest
            .environment
            .iter()
            .map(|e| self.environment_dir.join(&e.name))
            .collect()
    }
}

/// Summary row for `history`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotSummary {
    pub counter: u32,
    pub dir: PathBuf,
    /// `None` when the manifest is missing or unreadable.
    pub manifest: Option<SnapshotManifest>,
}

/// Result of restoring a snapshot over the working script.
#[derive(Debug, Clone)]
pub struct RestoreReport {
    pub restored: u32,
    /// Snapshot of the script as it was just before the restore.
    pub safety_snapshot: BackupSnapshot,
}

/// Creates, lists, verifies, and restores snapshots.
#[derive(Debug, Clone, Default)]
pub struct BackupStore;

impl BackupStore {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Snapshot `script` and every regular file beside it as snapshot
    /// `counter` of `project`.
    ///
    /// # Errors
    ///
    /// Returns [`FixloopError::Backup`] on any failure, including an existing
    /// snapshot with the same counter.
    pub fn snapshot(&self, script: &Path, project: &Project, counter: u32) -> Result<BackupSnapshot> {
        self.write_snapshot(script, project, counter)
            .into_fixloop_backup(counter)
    }

    fn write_snapshot(
        &self,
        script: &Path,
        project: &Project,
        counter: u32,
    ) -> anyhow::Result<BackupSnapshot> {
        use anyhow::Context;

        let dir = project.snapshot_dir(counter);
        if dir.join(MANIFEST_FILE).exists() {
            anyhow::bail!("snapshot {} already exists", dir.display());
        }

        let environment_dir = project.current_env_dir(counter);
        fs::create_dir_all(&environment_dir)
            .with_context(|| format!("creating {}", environment_dir.display()))?;

        let current_copy = project.current_copy_path(counter);
        let script_entry = copy_durable(script, &current_copy)
            .with_context(|| format!("copying {}", script.display()))?;
        info!("Backed up working copy to {}", current_copy.display());

        let source_dir = script.parent().unwrap_or_else(|| Path::new("."));
        let mut environment = Vec::new();
        for entry in WalkDir::new(source_dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.with_context(|| format!("listing {}", source_dir.display()))?;
            // Symlinks count by their target; a dangling one is skipped.
            match fs::metadata(entry.path()) {
                Ok(meta) if meta.is_file() => {}
                Ok(_) => continue,
                Err(e) if entry.path_is_symlink() => {
                    warn!("Skipping dangling link {}: {}", entry.path().display(), e);
                    continue;
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("reading {}", entry.path().display()));
                }
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let copied = copy_durable(entry.path(), &environment_dir.join(&name))
                .with_context(|| format!("copying {}", entry.path().display()))?;
            environment.push(ManifestEntry {
                name,
                bytes: copied.bytes,
                sha256: copied.sha256,
            });
        }
        info!(
            "Backed up {} environment file(s) to {}",
            environment.len(),
            environment_dir.display()
        );

        let manifest = SnapshotManifest {
            counter,
            created_at: Utc::now(),
            script: script.to_path_buf(),
            script_sha256: script_entry.sha256,
            environment,
        };
        write_atomic(&dir.join(MANIFEST_FILE), &serde_json::to_vec_pretty(&manifest)?)
            .context("writing manifest")?;

        Ok(BackupSnapshot {
            counter,
            dir,
            current_copy,
            environment_dir,
            manifest,
        })
    }

    /// Load a completed snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`FixloopError::Snapshot`] if the snapshot or its manifest is
    /// missing or unreadable.
    pub fn load(&self, project: &Project, counter: u32) -> Result<BackupSnapshot> {
        let dir = project.snapshot_dir(counter);
        let manifest_path = dir.join(MANIFEST_FILE);
        let content = fs::read_to_string(&manifest_path).map_err(|e| FixloopError::Snapshot {
            counter,
            reason: format!("{}: {}", manifest_path.display(), e),
        })?;
        let manifest: SnapshotManifest =
            serde_json::from_str(&content).map_err(|e| FixloopError::Snapshot {
                counter,
                reason: format!("bad manifest: {e}"),
            })?;

        Ok(BackupSnapshot {
            counter,
            current_copy: project.current_copy_path(counter),
            environment_dir: project.current_env_dir(counter),
            dir,
            manifest,
        })
    }

    /// Check the snapshot's current copy against its manifest hash.
    ///
    /// # Errors
    ///
    /// Returns [`FixloopError::Snapshot`] on a missing file or hash mismatch.
    pub fn verify(&self, snapshot: &BackupSnapshot) -> Result<()> {
        let actual = sha256_file(&snapshot.current_copy).map_err(|e| FixloopError::Snapshot {
            counter: snapshot.counter,
            reason: format!("{}: {}", snapshot.current_copy.display(), e),
        })?;
        if actual != snapshot.manifest.script_sha256 {
            return Err(FixloopError::Snapshot {
                counter: snapshot.counter,
                reason: format!(
                    "hash mismatch (manifest {}, on disk {})",
                    snapshot.manifest.script_sha256, actual
                ),
            });
        }
        Ok(())
    }

    /// Every snapshot of `project`, ascending by counter.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error from listing the backups folder.
    pub fn list(&self, project: &Project) -> Result<Vec<SnapshotSummary>> {
        let mut summaries = Vec::new();
        for counter in project.snapshot_indices()? {
            let manifest = match self.load(project, counter) {
                Ok(snapshot) => Some(snapshot.manifest),
                Err(e) => {
                    warn!("{}", e);
                    None
                }
            };
            summaries.push(SnapshotSummary {
                counter,
                dir: project.snapshot_dir(counter),
                manifest,
            });
        }
        Ok(summaries)
    }

    /// Copy snapshot `counter` back over the working script.
    ///
    /// The current script is first captured as snapshot `safety_counter`, so
    /// the restore can itself be undone.
    ///
    /// # Errors
    ///
    /// Returns [`FixloopError::Snapshot`] if the snapshot does not verify,
    /// [`FixloopError::Backup`] if the safety snapshot fails, and
    /// [`FixloopError::Promotion`] if the final copy fails.
    pub fn restore(
        &self,
        project: &Project,
        counter: u32,
        safety_counter: u32,
    ) -> Result<RestoreReport> {
        let snapshot = self.load(project, counter)?;
        self.verify(&snapshot)?;

        let safety_snapshot = self.snapshot(project.script(), project, safety_counter)?;
        fs::copy(&snapshot.current_copy, project.script()).map_err(|e| {
            FixloopError::Promotion {
                path: project.script().to_path_buf(),
                message: e.to_string(),
            }
        })?;
        info!(
            "Restored snapshot {} over {}",
            counter,
            project.script().display()
        );

        Ok(RestoreReport {
            restored: counter,
            safety_snapshot,
        })
    }
}

struct CopiedFile {
    bytes: u64,
    sha256: String,
}

/// Copy `src` to `dst`, fsync the copy, and hash what was written.
fn copy_durable(src: &Path, dst: &Path) -> std::io::Result<CopiedFile> {
    let data = fs::read(src)?;
    let mut file = File::create(dst)?;
    file.write_all(&data)?;
    file.sync_all()?;
    debug!("Copied {} -> {}", src.display(), dst.display());
    Ok(CopiedFile {
        bytes: data.len() as u64,
        sha256: sha256_hex(&data),
    })
}

/// Write `bytes` to `path` through a sibling temp file and a rename.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(TMP_SUFFIX);
    let tmp_path = PathBuf::from(tmp_name);

    let mut tmp_file = File::create(&tmp_path)?;
    tmp_file.write_all(bytes)?;
    tmp_file.sync_all()?;
    fs::rename(&tmp_path, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Project) {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("app");
        fs::create_dir_all(src.join("nested")).unwrap();
        fs::write(src.join("demo.py"), "raise SystemExit(1)\n").unwrap();
        fs::write(src.join("data.csv"), "a,b\n1,2\n").unwrap();
        fs::write(src.join("nested/ignored.txt"), "not a sibling").unwrap();
        let project = Project::open(&temp.path().join("Projects"), &src.join("demo.py")).unwrap();
        (temp, project)
    }

    #[test]
    fn test_snapshot_copies_script_and_siblings() {
        let (_temp, project) = setup();
        let store = BackupStore::new();

        let snapshot = store.snapshot(project.script(), &project, 1).unwrap();

        assert_eq!(
            fs::read(&snapshot.current_copy).unwrap(),
            fs::read(project.script()).unwrap()
        );
        let names: Vec<_> = snapshot
            .manifest
            .environment
            .iter()
            .map(|e| e.name.as_str())
            .collect();
        assert_eq!(names, vec!["data.csv", "demo.py"]);
        assert!(snapshot.environment_dir.join("data.csv").is_file());
        assert!(!snapshot.environment_dir.join("nested").exists());
        assert!(snapshot.dir.join(MANIFEST_FILE).is_file());
        assert!(!snapshot.dir.join(format!("{MANIFEST_FILE}{TMP_SUFFIX}")).exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_snapshot_skips_dangling_link_and_copies_live_one() {
        let (_temp, project) = setup();
        let src = project.script_dir().to_path_buf();
        std::os::unix::fs::symlink(src.join("gone.txt"), src.join("link.txt")).unwrap();
        std::os::unix::fs::symlink(src.join("data.csv"), src.join("alias.csv")).unwrap();

        let snapshot = BackupStore::new()
            .snapshot(project.script(), &project, 1)
            .unwrap();

        let names: Vec<_> = snapshot
            .manifest
            .environment
            .iter()
            .map(|e| e.name.as_str())
            .collect();
        assert_eq!(names, vec!["alias.csv", "data.csv", "demo.py"]);
        assert!(!snapshot.environment_dir.join("link.txt").exists());
        assert_eq!(
            fs::read(snapshot.environment_dir.join("alias.csv")).unwrap(),
            fs::read(src.join("data.csv")).unwrap()
        );
    }

    #[test]
    fn test_snapshot_is_never_overwritten() {
        let (_temp, project) = setup();
        let store = BackupStore::new();
        store.snapshot(project.script(), &project, 1).unwrap();

        let err = store.snapshot(project.script(), &project, 1).unwrap_err();
        assert!(matches!(err, FixloopError::Backup { counter: 1, .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_snapshot_of_missing_script_is_backup_error() {
        let (temp, project) = setup();
        let err = BackupStore::new()
            .snapshot(&temp.path().join("gone.py"), &project, 1)
            .unwrap_err();
        assert!(matches!(err, FixloopError::Backup { .. }));
    }

    #[test]
    fn test_load_and_verify() {
        let (_temp, project) = setup();
        let store = BackupStore::new();
        let written = store.snapshot(project.script(), &project, 2).unwrap();

        let loaded = store.load(&project, 2).unwrap();
        assert_eq!(loaded, written);
        assert!(store.verify(&loaded).is_ok());

        fs::write(&loaded.current_copy, "tampered").unwrap();
        assert!(matches!(
            store.verify(&loaded),
            Err(FixloopError::Snapshot { counter: 2, .. })
        ));
    }

    #[test]
    fn test_list_includes_incomplete_snapshots() {
        let (_temp, project) = setup();
        let store = BackupStore::new();
        store.snapshot(project.script(), &project, 1).unwrap();
        fs::create_dir_all(project.snapshot_dir(2)).unwrap();

        let list = store.list(&project).unwrap();
        assert_eq!(list.len(), 2);
        assert!(list[0].manifest.is_some());
        assert!(list[1].manifest.is_none());
    }

    #[test]
    fn test_restore_takes_safety_snapshot_first() {
        let (_temp, project) = setup();
        let store = BackupStore::new();
        let original = fs::read(project.script()).unwrap();
        store.snapshot(project.script(), &project, 1).unwrap();

        fs::write(project.script(), "print('edited')\n").unwrap();
        let report = store.restore(&project, 1, 2).unwrap();

        assert_eq!(report.restored, 1);
        assert_eq!(fs::read(project.script()).unwrap(), original);
        assert_eq!(
            fs::read(&report.safety_snapshot.current_copy).unwrap(),
            b"print('edited')\n"
        );
    }

    #[test]
    fn test_restore_refuses_unverified_snapshot() {
        let (_temp, project) = setup();
        let store = BackupStore::new();
        store.snapshot(project.script(), &project, 1).unwrap();
        fs::write(project.current_copy_path(1), "tampered").unwrap();
        fs::write(project.script(), "current").unwrap();

        assert!(store.restore(&project, 1, 2).is_err());
        assert_eq!(fs::read_to_string(project.script()).unwrap(), "current");
        assert!(!project.snapshot_dir(2).exists());
    }
}
