//! Wire contract between the fix prompt and the response parser.
//!
//! The model is told to answer with two labelled, fenced code blocks. The
//! same marker constants and fence tag are used to build the system prompt
//! and the extraction patterns, so the two sides cannot drift apart.

use regex::Regex;

/// Bumped whenever the markers or the prompt wording change.
pub const PROTOCOL_VERSION: u32 = 1;

/// Label preceding the minimal patch block.
pub const ISOLATED_FIX_MARKER: &str = "Isolated Fix:";

/// Label preceding the full corrected script block.
pub const FULL_VERSION_MARKER: &str = "New:";

/// Code fence delimiter.
pub const FENCE: &str = "```";

/// The fix protocol for one fence language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixProtocol {
    fence_language: String,
}

impl Default for FixProtocol {
    fn default() -> Self {
        Self::new("python")
    }
}

impl FixProtocol {
    #[must_use]
    pub fn new(fence_language: impl Into<String>) -> Self {
        Self {
            fence_language: fence_language.into(),
        }
    }

    #[must_use]
    pub fn fence_language(&self) -> &str {
        &self.fence_language
    }

    /// System prompt sent ahead of the conversation on every fix request.
    #[must_use]
    pub fn system_prompt(&self) -> String {
        let lang = &self.fence_language;
        format!(
            "You are a helpful assistant that is an expert at fixing errors in code. \
You will be given an error message and the full code it originated from.\n\
Your task is to:\n\
1. Provide a brief explanation of the error.\n\
2. Write the isolated fix in a code block, labelled exactly like this:\n\
{ISOLATED_FIX_MARKER}\n{FENCE}{lang}\n<isolated fix code>\n{FENCE}\n\
3. Write the full new version of the code in a second code block, labelled exactly like this:\n\
{FULL_VERSION_MARKER}\n{FENCE}{lang}\n<full new version of the code>\n{FENCE}\n\
Use the exact labels \"{ISOLATED_FIX_MARKER}\" and \"{FULL_VERSION_MARKER}\" followed by the code \
enclosed in {FENCE}{lang} delimiters. The full new version must be complete and runnable on its own."
        )
    }

    /// User message describing one failure.
    #[must_use]
    pub fn user_message(&self, stderr: &str, script: &str) -> String {
        format!("Error Output:\n{stderr}\n\nScript Contents:\n{script}")
    }

    /// Extraction pattern for the block following `marker`.
    ///
    /// The language tag is optional and case-insensitive. The body runs up to
    /// the first fence that opens a line, so backticks inside a code line do
    /// not close the block. The newline after the opening fence and the one
    /// before the closing fence belong to the fences, not the body; an empty
    /// fence leaves capture group 1 unset.
    ///
    /// Every interpolated piece is escaped; `None` only if the regex engine
    /// rejects the pattern size.
    #[must_use]
    pub fn block_pattern(&self, marker: &str) -> Option<Regex> {
        let pattern = format!(
            r"(?s){marker}\s*{fence}(?i:{lang})?[ \t]*\r?\n(?:(.*?)\r?\n)??[ \t]*{fence}",
            marker = regex::escape(marker),
            fence = regex::escape(FENCE),
            lang = regex::escape(&self.fence_language),
        );
        Regex::new(&pattern).ok()
    }
}
