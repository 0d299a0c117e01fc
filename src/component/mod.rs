//! Recovery and checking for generated UI component source.
//!
//! Both passes are heuristics over a character scan, not a parser. They
//! target the common failure of a response cut off mid-tag or mid-block;
//! exotic syntax (generic-looking tags, regex literals, spread attributes
//! containing `>`) is outside what they handle.

mod repair;
mod scan;
mod validate;

pub use repair::repair;
pub use scan::{LexState, Scanner};
pub use validate::{has_function_definition, validate};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructuralError {
    #[error("unclosed string literal (opened with {quote})")]
    UnclosedString { quote: char },

    #[error("unclosed template literal")]
    UnclosedTemplate,

    #[error("unclosed block comment")]
    UnclosedComment,

    /// Positive depth: unclosed `{`. Negative: stray `}`.
    #[error("mismatched braces (depth {depth} at end of code)")]
    UnbalancedBraces { depth: i64 },

    #[error("mismatched parentheses (depth {depth} at end of code)")]
    UnbalancedParens { depth: i64 },

    #[error("no function definition found")]
    MissingFunction,
}

/// Repair, then validate. Returns the repaired source when it passes.
pub fn prepare(src: &str) -> Result<String, StructuralError> {
    let repaired = repair(src);
    validate(&repaired)?;
    Ok(repaired)
}
