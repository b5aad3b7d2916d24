//! Gross well-formedness of a source fragment.
//!
//! The fragment is an opaque blob. The only structure looked at is bracket
//! nesting: `()`, `[]` and `{}` must close in order. By default, brackets
//! inside string/char literals and `//` or `/* */` comments are ignored.

use mucorpus_model::CorpusError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WellFormednessConfig {
    pub skip_literals_and_comments: bool,
}

impl Default for WellFormednessConfig {
    fn default() -> Self {
        Self {
            skip_literals_and_comments: true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Position {
    line: usize,
    column: usize,
}

enum Lex {
    Code,
    LineComment,
    BlockComment,
    Literal(char),
}

fn closer_for(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}

fn malformed(reason: String) -> CorpusError {
    CorpusError::MalformedSource { reason }
}

/// Reject empty (or whitespace-only) fragments and unbalanced brackets.
pub fn check_well_formed(
    source_text: &str,
    config: &WellFormednessConfig,
) -> Result<(), CorpusError> {
    if source_text.trim().is_empty() {
        return Err(malformed("sourceText is empty".to_string()));
    }

    let mut stack: Vec<(char, Position)> = Vec::new();
    let mut lex = Lex::Code;
    let mut pos = Position { line: 1, column: 0 };
    let mut chars = source_text.chars().peekable();
    let mut block_comment_start: Option<Position> = None;

    while let Some(c) = chars.next() {
        if c == '\n' {
            pos.line += 1;
            pos.column = 0;
        } else {
            pos.column += 1;
        }

        if config.skip_literals_and_comments {
            match lex {
                Lex::LineComment => {
                    if c == '\n' {
                        lex = Lex::Code;
                    }
                    continue;
                }
                Lex::BlockComment => {
                    if c == '*' && chars.peek() == Some(&'/') {
                        chars.next();
                        pos.column += 1;
                        lex = Lex::Code;
                    }
                    continue;
                }
                Lex::Literal(quote) => {
                    if c == '\\' {
                        if let Some(escaped) = chars.next() {
                            if escaped == '\n' {
                                pos.line += 1;
                                pos.column = 0;
                            } else {
                                pos.column += 1;
                            }
                        }
                    } else if c == quote || c == '\n' {
                        lex = Lex::Code;
                    }
                    continue;
                }
                Lex::Code => match c {
                    '/' if chars.peek() == Some(&'/') => {
                        chars.next();
                        pos.column += 1;
                        lex = Lex::LineComment;
                        continue;
                    }
                    '/' if chars.peek() == Some(&'*') => {
                        chars.next();
                        block_comment_start = Some(pos);
                        pos.column += 1;
                        lex = Lex::BlockComment;
                        continue;
                    }
                    '"' | '\'' => {
                        lex = Lex::Literal(c);
                        continue;
                    }
                    _ => {}
                },
            }
        }

        match c {
            '(' | '[' | '{' => stack.push((c, pos)),
            ')' | ']' | '}' => match stack.pop() {
                Some((open, _)) if closer_for(open) == c => {}
                Some((open, at)) => {
                    return Err(malformed(format!(
                        "mismatched `{c}` at line {} column {} (expected `{}` to close `{open}` from line {} column {})",
                        pos.line,
                        pos.column,
                        closer_for(open),
                        at.line,
                        at.column
                    )));
                }
                None => {
                    return Err(malformed(format!(
                        "unexpected `{c}` at line {} column {}",
                        pos.line, pos.column
                    )));
                }
            },
            _ => {}
        }
    }

    if let (Lex::BlockComment, Some(at)) = (&lex, block_comment_start) {
        return Err(malformed(format!(
            "unterminated block comment opened at line {} column {}",
            at.line, at.column
        )));
    }

    if let Some((open, at)) = stack.pop() {
        return Err(malformed(format!(
            "unclosed `{open}` opened at line {} column {}",
            at.line, at.column
        )));
    }

    Ok(())
}
