//! Model-facing half of a repair cycle.
//!
//! - [`protocol`]: marker phrases, fence tag, and system prompt
//! - [`parser`]: extraction of the isolated fix and full version
//! - [`rewriter`]: context-aware query rewriting
//! - [`generator`]: streamed fix requests and the transcript log

pub mod generator;
pub mod parser;
pub mod protocol;
pub mod rewriter;

pub use generator::{FixGenerator, GeneratedFix, Transcript};
pub use parser::{ParsedFix, ResponseParser};
pub use protocol::{FixProtocol, FULL_VERSION_MARKER, ISOLATED_FIX_MARKER, PROTOCOL_VERSION};
pub use rewriter::{QueryRewriter, RewriteMode, RewrittenQuery};
