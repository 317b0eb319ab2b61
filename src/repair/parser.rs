//! Extraction of the two fenced code blocks from a model reply.
//!
//! Parsing never fails: a reply without both blocks is an ordinary outcome,
//! [`ParsedFix::Unstructured`], and the caller keeps the raw text instead.

use super::protocol::{FixProtocol, FULL_VERSION_MARKER, ISOLATED_FIX_MARKER};
use regex::Regex;
use tracing::debug;

/// Result of parsing one model reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedFix {
    /// Both blocks were found.
    Structured {
        /// Text before the isolated-fix marker, trimmed.
        explanation: String,
        isolated: String,
        full: String,
    },
    /// At least one block was missing.
    Unstructured,
}

impl ParsedFix {
    /// The full replacement script, when one exists and is not blank.
    #[must_use]
    pub fn runnable(&self) -> Option<&str> {
        match self {
            Self::Structured { full, .. } if !full.trim().is_empty() => Some(full),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_structured(&self) -> bool {
        matches!(self, Self::Structured { .. })
    }
}

/// Parser bound to one [`FixProtocol`].
#[derive(Debug, Clone)]
pub struct ResponseParser {
    isolated: Option<Regex>,
    full: Option<Regex>,
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new(&FixProtocol::default())
    }
}

impl ResponseParser {
    #[must_use]
    pub fn new(protocol: &FixProtocol) -> Self {
        Self {
            isolated: protocol.block_pattern(ISOLATED_FIX_MARKER),
            full: protocol.block_pattern(FULL_VERSION_MARKER),
        }
    }

    /// Split a reply into explanation, isolated fix, and full version.
    #[must_use]
    pub fn parse(&self, response: &str) -> ParsedFix {
        let Some((isolated_start, isolated)) = extract(self.isolated.as_ref(), response) else {
            debug!("No '{}' block in response", ISOLATED_FIX_MARKER);
            return ParsedFix::Unstructured;
        };
        let Some((_, full)) = extract(self.full.as_ref(), response) else {
            debug!("No '{}' block in response", FULL_VERSION_MARKER);
            return ParsedFix::Unstructured;
        };

        ParsedFix::Structured {
            explanation: response[..isolated_start].trim().to_string(),
            isolated,
            full,
        }
    }
}

/// Match start and body of the first block matched by `re`.
fn extract(re: Option<&Regex>, text: &str) -> Option<(usize, String)> {
    let caps = re?.captures(text)?;
    let start = caps.get(0).map_or(0, |m| m.start());
    let body = caps.get(1).map_or("", |m| m.as_str());
    Some((start, body.to_string()))
}
