//! Character scanner shared by the repairer and the validator.
//!
//! Yields only characters in code position: string and template literal
//! bodies and comments are consumed silently. Not a tokenizer; it knows just
//! enough to keep quotes and comments from being mistaken for structure.

use std::iter::Peekable;
use std::str::CharIndices;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LexState {
    Code,
    /// Inside a `'` or `"` literal.
    Str(char),
    Template,
    LineComment,
    BlockComment,
}

/// Keywords after which a quote starts a literal even though it follows a
/// word character.
const LITERAL_KEYWORDS: &[&str] = &[
    "return", "case", "typeof", "in", "of", "yield", "await", "else", "do", "void", "delete",
    "new", "throw",
];

pub struct Scanner<'a> {
    chars: Peekable<CharIndices<'a>>,
    state: LexState,
    /// Last non-whitespace code character.
    prev: Option<char>,
    /// Identifier ending at `prev`, when `prev` is a word character.
    prev_word: String,
    in_word: bool,
}

impl<'a> Scanner<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            chars: src.char_indices().peekable(),
            state: LexState::Code,
            prev: None,
            prev_word: String::new(),
            in_word: false,
        }
    }

    /// State after the last character consumed. Once the iterator is
    /// exhausted this is the end-of-input state.
    pub fn state(&self) -> LexState {
        self.state
    }

    /// Whether a `'` or `"` here opens a literal. A quote glued to a word
    /// (`Don't` in JSX text) or following a closing bracket is prose, not
    /// code, unless the word is a keyword such as `return`.
    fn quote_opens_literal(&self) -> bool {
        match self.prev {
            None => true,
            Some(c) if is_word_char(c) => LITERAL_KEYWORDS.contains(&self.prev_word.as_str()),
            Some(')' | ']' | '}') => false,
            Some(_) => true,
        }
    }

    fn note_code_char(&mut self, c: char) {
        if c.is_whitespace() {
            self.in_word = false;
            return;
        }
        if is_word_char(c) {
            if !self.in_word {
                self.prev_word.clear();
            }
            self.prev_word.push(c);
            self.in_word = true;
        } else {
            self.prev_word.clear();
            self.in_word = false;
        }
        self.prev = Some(c);
    }

    fn skip_escaped(&mut self) {
        self.chars.next();
    }
}

impl Iterator for Scanner<'_> {
    type Item = (usize, char);

    fn next(&mut self) -> Option<(usize, char)> {
        while let Some((i, c)) = self.chars.next() {
            match self.state {
                LexState::Code => match c {
                    '\'' | '"' if self.quote_opens_literal() => self.state = LexState::Str(c),
                    '`' => self.state = LexState::Template,
                    '/' if self.chars.peek().is_some_and(|(_, n)| *n == '/') => {
                        self.chars.next();
                        self.state = LexState::LineComment;
                    }
                    '/' if self.chars.peek().is_some_and(|(_, n)| *n == '*') => {
                        self.chars.next();
                        self.state = LexState::BlockComment;
                    }
                    _ => {
                        self.note_code_char(c);
                        return Some((i, c));
                    }
                },
                LexState::Str(quote) => {
                    if c == '\\' {
                        self.skip_escaped();
                    } else if c == quote {
                        self.state = LexState::Code;
                        // A closed literal behaves like an operand.
                        self.prev = Some('0');
                        self.prev_word.clear();
                        self.in_word = false;
                    }
                }
                LexState::Template => {
                    if c == '\\' {
                        self.skip_escaped();
                    } else if c == '`' {
                        self.state = LexState::Code;
                        self.prev = Some('0');
                        self.prev_word.clear();
                        self.in_word = false;
                    }
                }
                LexState::LineComment => {
                    if c == '\n' {
                        self.state = LexState::Code;
                        self.in_word = false;
                    }
                }
                LexState::BlockComment => {
                    if c == '*' && self.chars.peek().is_some_and(|(_, n)| *n == '/') {
                        self.chars.next();
                        self.state = LexState::Code;
                    }
                }
            }
        }
        None
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}
