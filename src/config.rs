//! Configuration management for fixloop.
//!
//! Settings live in `<workspace>/.fixloop/settings.json`. Every field has a
//! serde default, so a missing file or a partial file both load cleanly; the
//! CLI then overrides individual values.
//!
//! # Example settings.json
//!
//! ```json
//! {
//!   "llm": { "model": "codellama", "max_tokens": 4096 },
//!   "execution": { "interpreter": ["python3", "-u"], "timeout_secs": 120 },
//!   "conversation": { "retention": { "kind": "window", "max_turns": 10 } },
//!   "rewrite": "annotate",
//!   "protocol": { "fence_language": "python" },
//!   "transcript": "output.txt"
//! }
//! ```

use crate::conversation::RetentionPolicy;
use crate::error::{FixloopError, Result};
use crate::exec::ExecutionConfig;
use crate::llm::LlmConfig;
use crate::repair::RewriteMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Conversation section of the settings file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationConfig {
    #[serde(default)]
    pub retention: RetentionPolicy,
}

/// Wire-contract settings shared by the prompt and the parser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Language tag expected on the fenced code blocks.
    #[serde(default = "default_fence_language")]
    pub fence_language: String,
}

fn default_fence_language() -> String {
    "python".to_string()
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            fence_language: default_fence_language(),
        }
    }
}

/// Top-level configuration loaded from `.fixloop/settings.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixloopConfig {
    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub execution: ExecutionConfig,

    #[serde(default)]
    pub conversation: ConversationConfig,

    #[serde(default)]
    pub rewrite: RewriteMode,

    #[serde(default)]
    pub protocol: ProtocolConfig,

    /// Append-only log of streamed model output.
    #[serde(default = "default_transcript")]
    pub transcript: PathBuf,

    /// Root folder that holds one sub-folder per project.
    #[serde(default = "default_projects_dir")]
    pub projects_dir: PathBuf,
}

fn default_transcript() -> PathBuf {
    PathBuf::from("output.txt")
}

fn default_projects_dir() -> PathBuf {
    PathBuf::from("Projects")
}

impl Default for FixloopConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            execution: ExecutionConfig::default(),
            conversation: ConversationConfig::default(),
            rewrite: RewriteMode::default(),
            protocol: ProtocolConfig::default(),
            transcript: default_transcript(),
            projects_dir: default_projects_dir(),
        }
    }
}

impl FixloopConfig {
    /// Load configuration from a workspace directory.
    ///
    /// # Errors
    ///
    /// Returns [`FixloopError::Config`] if the file exists but cannot be read
    /// or parsed, and [`FixloopError::InvalidConfig`] if a value is out of range.
    pub fn load(workspace: &Path) -> Result<Self> {
        let settings_path = Self::settings_path(workspace);

        if !settings_path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&settings_path).map_err(|e| {
            FixloopError::config_with_path(e.to_string(), settings_path.clone())
        })?;
        let config: FixloopConfig = serde_json::from_str(&content).map_err(|e| {
            FixloopError::config_with_path(e.to_string(), settings_path.clone())
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Get the settings.json path for a workspace
    pub fn settings_path(workspace: &Path) -> PathBuf {
        workspace.join(".fixloop/settings.json")
    }

    /// Resolve the transcript path against the workspace.
    #[must_use]
    pub fn transcript_path(&self, workspace: &Path) -> PathBuf {
        resolve(workspace, &self.transcript)
    }

    /// Resolve the projects root against the workspace.
    #[must_use]
    pub fn projects_root(&self, workspace: &Path) -> PathBuf {
        resolve(workspace, &self.projects_dir)
    }

    /// Validate value ranges across all sections.
    ///
    /// # Errors
    ///
    /// Returns [`FixloopError::InvalidConfig`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        self.llm
            .validate()
            .map_err(|reason| FixloopError::InvalidConfig {
                field: "llm".to_string(),
                reason,
            })?;

        if self.execution.interpreter.is_empty() {
            return Err(FixloopError::InvalidConfig {
                field: "execution.interpreter".to_string(),
                reason: "must name at least the interpreter program".to_string(),
            });
        }

        if let RetentionPolicy::Window { max_turns } = self.conversation.retention {
            if max_turns < 2 {
                return Err(FixloopError::InvalidConfig {
                    field: "conversation.retention.max_turns".to_string(),
                    reason: "must keep at least one user/assistant pair".to_string(),
                });
            }
        }

        if self.protocol.fence_language.trim().is_empty() {
            return Err(FixloopError::InvalidConfig {
                field: "protocol.fence_language".to_string(),
                reason: "must not be empty".to_string(),
            });
        }

        Ok(())
    }
}

fn resolve(workspace: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        workspace.join(path)
    }
}
