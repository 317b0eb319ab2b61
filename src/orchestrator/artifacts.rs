//! Files written into a cycle's bug-fix folder.

use crate::error::Result;
use crate::project::Project;
use crate::repair::ParsedFix;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Writes the error report to the workspace-level `error.txt` (overwritten
/// every failure) and to `BugFix<k>/<name>error.txt`.
///
/// # Errors
///
/// Returns the underlying I/O error.
pub fn write_error_reports(
    project: &Project,
    counter: u32,
    workspace_error: &Path,
    report: &str,
) -> Result<PathBuf> {
    if let Some(parent) = workspace_error.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(workspace_error, report)?;

    fs::create_dir_all(project.bug_fix_dir(counter))?;
    let project_error = project.error_file(counter);
    fs::write(&project_error, report)?;
    info!("Error details saved to {}", project_error.display());
    Ok(project_error)
}

/// Store the raw model reply as `AIOutputRaw.txt`.
///
/// # Errors
///
/// Returns the underlying I/O error.
pub fn write_raw_output(project: &Project, counter: u32, response: &str) -> Result<PathBuf> {
    fs::create_dir_all(project.bug_fix_dir(counter))?;
    let path = project.raw_output_file(counter);
    fs::write(&path, response)?;
    Ok(path)
}

/// Store the parsed fix.
///
/// A structured reply writes the isolated fix to `<name>fix.txt` and the
/// full version to `<name>Fix<k>.<ext>`, whose path is returned if the full
/// version is runnable. Anything else writes the whole reply to
/// `<name>fix.txt` and returns `None`.
///
/// # Errors
///
/// Returns the underlying I/O error.
pub fn write_fix(
    project: &Project,
    counter: u32,
    parsed: &ParsedFix,
    response: &str,
) -> Result<Option<PathBuf>> {
    fs::create_dir_all(project.bug_fix_dir(counter))?;
    let fix_text = project.fix_text_file(counter);

    match parsed {
        ParsedFix::Structured { isolated, full, .. } => {
            fs::write(&fix_text, isolated)?;
            let candidate = project.candidate_path(counter);
            fs::write(&candidate, full)?;
            info!(
                "Isolated fix saved to {}, full version to {}",
                fix_text.display(),
                candidate.display()
            );
            if parsed.runnable().is_none() {
                warn!("Full version is empty, nothing to test");
                return Ok(None);
            }
            Ok(Some(candidate))
        }
        ParsedFix::Unstructured => {
            warn!("Isolated fix or full new version not found in the response");
            fs::write(&fix_text, response)?;
            info!("Whole response saved as the fix to {}", fix_text.display());
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestWorkspace;

    #[test]
    fn test_error_reports_written_twice() {
        let ws = TestWorkspace::failing_shell_script();
        let project = ws.project();
        let root_error = ws.path().join("error.txt");

        let path = write_error_reports(&project, 1, &root_error, "Error Output:\nx").unwrap();

        assert_eq!(path, project.error_file(1));
        assert_eq!(fs::read_to_string(&root_error).unwrap(), "Error Output:\nx");
        assert_eq!(fs::read_to_string(&path).unwrap(), "Error Output:\nx");

        write_error_reports(&project, 2, &root_error, "second").unwrap();
        assert_eq!(fs::read_to_string(&root_error).unwrap(), "second");
        assert_eq!(
            fs::read_to_string(project.error_file(1)).unwrap(),
            "Error Output:\nx"
        );
    }

    #[test]
    fn test_structured_fix_writes_both_files() {
        let ws = TestWorkspace::failing_shell_script();
        let project = ws.project();
        let parsed = ParsedFix::Structured {
            explanation: "why".to_string(),
            isolated: "exit 0".to_string(),
            full: "echo ok\nexit 0".to_string(),
        };

        let candidate = write_fix(&project, 3, &parsed, "raw").unwrap();

        assert_eq!(candidate, Some(project.candidate_path(3)));
        assert_eq!(fs::read_to_string(project.fix_text_file(3)).unwrap(), "exit 0");
        assert_eq!(
            fs::read_to_string(project.candidate_path(3)).unwrap(),
            "echo ok\nexit 0"
        );
    }

    #[test]
    fn test_unstructured_fix_keeps_raw_text() {
        let ws = TestWorkspace::failing_shell_script();
        let project = ws.project();

        let candidate = write_fix(&project, 1, &ParsedFix::Unstructured, "just prose").unwrap();

        assert!(candidate.is_none());
        assert_eq!(
            fs::read_to_string(project.fix_text_file(1)).unwrap(),
            "just prose"
        );
        assert!(!project.candidate_path(1).exists());
    }

    #[test]
    fn test_blank_full_version_is_not_runnable() {
        let ws = TestWorkspace::failing_shell_script();
        let project = ws.project();
        let parsed = ParsedFix::Structured {
            explanation: String::new(),
            isolated: String::new(),
            full: "  \n".to_string(),
        };
        assert!(write_fix(&project, 1, &parsed, "raw").unwrap().is_none());
    }
}
