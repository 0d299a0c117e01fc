use std::sync::LazyLock;

use regex::Regex;

use crate::component::StructuralError;
use crate::component::scan::{LexState, Scanner};

/// `function App(` or `const App = (...) =>` / `const App = props =>`.
static FUNCTION_DEF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\bfunction\s*\*?\s*[A-Za-z_$][\w$]*\s*\(|\b(?:const|let|var)\s+[A-Za-z_$][\w$]*\s*=\s*(?:async\s+)?(?:\([^)]*\)|[A-Za-z_$][\w$]*)\s*=>",
    )
    .expect("function pattern is valid")
});

/// Single-pass structural check of generated component source.
///
/// Fails on the first defect found, checked in this order: literal or
/// comment left open at end of input, brace imbalance, paren imbalance,
/// no function definition.
pub fn validate(src: &str) -> Result<(), StructuralError> {
    let mut scanner = Scanner::new(src);
    let mut braces: i64 = 0;
    let mut parens: i64 = 0;

    for (_, c) in scanner.by_ref() {
        match c {
            '{' => braces += 1,
            '}' => braces -= 1,
            '(' => parens += 1,
            ')' => parens -= 1,
            _ => {}
        }
    }

    match scanner.state() {
        LexState::Str(quote) => return Err(StructuralError::UnclosedString { quote }),
        LexState::Template => return Err(StructuralError::UnclosedTemplate),
        LexState::BlockComment => return Err(StructuralError::UnclosedComment),
        LexState::Code | LexState::LineComment => {}
    }

    if braces != 0 {
        return Err(StructuralError::UnbalancedBraces { depth: braces });
    }
    if parens != 0 {
        return Err(StructuralError::UnbalancedParens { depth: parens });
    }
    if !has_function_definition(src) {
        return Err(StructuralError::MissingFunction);
    }
    Ok(())
}

pub fn has_function_definition(src: &str) -> bool {
    FUNCTION_DEF.is_match(src)
}
