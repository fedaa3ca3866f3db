//! Syntax gate run on generated code before it reaches the sandbox.
//!
//! Python is parsed with tree-sitter. The other languages get a lexical
//! balance scan that catches the truncations and unclosed blocks typical of
//! malformed generations; anything subtler is left to the sandbox.

use tree_sitter::{Node, Parser};

use super::idea::Language;

/// First syntax problem found in a piece of code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxIssue {
    /// 1-based line number.
    pub line: usize,
    pub message: String,
}

impl std::fmt::Display for SyntaxIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SyntaxError on line {}: {}", self.line, self.message)
    }
}

/// Checks that `code` parses as `language`.
pub fn check(language: Language, code: &str) -> Result<(), SyntaxIssue> {
    if code.trim().is_empty() {
        return Err(SyntaxIssue {
            line: 1,
            message: "code is empty".to_string(),
        });
    }
    match language {
        Language::Python => check_python(code),
        Language::Sql => check_balance(code, &SQL_LEXICON),
        Language::JavaScript => check_balance(code, &JS_LEXICON),
        Language::Java | Language::CSharp => check_balance(code, &C_LEXICON),
        Language::Go => check_balance(code, &GO_LEXICON),
    }
}

fn check_python(code: &str) -> Result<(), SyntaxIssue> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .map_err(|e| SyntaxIssue {
            line: 1,
            message: format!("python grammar unavailable: {}", e),
        })?;

    let tree = parser.parse(code, None).ok_or_else(|| SyntaxIssue {
        line: 1,
        message: "parser produced no tree".to_string(),
    })?;

    let root = tree.root_node();
    if !root.has_error() {
        return Ok(());
    }
    Err(first_error(root).unwrap_or(SyntaxIssue {
        line: root.start_position().row + 1,
        message: "invalid syntax".to_string(),
    }))
}

/// Depth-first search for the first ERROR or MISSING node.
fn first_error(node: Node<'_>) -> Option<SyntaxIssue> {
    if node.is_missing() {
        return Some(SyntaxIssue {
            line: node.start_position().row + 1,
            message: format!("missing '{}'", node.kind()),
        });
    }
    if node.is_error() {
        return Some(SyntaxIssue {
            line: node.start_position().row + 1,
            message: "invalid syntax".to_string(),
        });
    }
    if !node.has_error() {
        return None;
    }
    let mut cursor = node.walk();
    let children: Vec<Node<'_>> = node.children(&mut cursor).collect();
    children.into_iter().find_map(first_error)
}

/// Lexical rules for the balance scanner.
struct Lexicon {
    quotes: &'static [char],
    /// Quote characters whose strings may span lines.
    multiline_quotes: &'static [char],
    line_comment: &'static str,
    block_comments: bool,
    brackets: bool,
}

const JS_LEXICON: Lexicon = Lexicon {
    quotes: &['"', '\'', '`'],
    multiline_quotes: &['`'],
    line_comment: "//",
    block_comments: true,
    brackets: true,
};

const C_LEXICON: Lexicon = Lexicon {
    quotes: &['"', '\''],
    multiline_quotes: &[],
    line_comment: "//",
    block_comments: true,
    brackets: true,
};

const GO_LEXICON: Lexicon = Lexicon {
    quotes: &['"', '\'', '`'],
    multiline_quotes: &['`'],
    line_comment: "//",
    block_comments: true,
    brackets: true,
};

const SQL_LEXICON: Lexicon = Lexicon {
    quotes: &['\'', '"'],
    multiline_quotes: &['\'', '"'],
    line_comment: "--",
    block_comments: true,
    brackets: false,
};

fn check_balance(code: &str, lexicon: &Lexicon) -> Result<(), SyntaxIssue> {
    let chars: Vec<char> = code.chars().collect();
    let line_comment: Vec<char> = lexicon.line_comment.chars().collect();
    let mut stack: Vec<(char, usize)> = Vec::new();
    let mut line = 1usize;
    let mut i = 0usize;

    while i < chars.len() {
        let c = chars[i];

        if c == '\n' {
            line += 1;
            i += 1;
            continue;
        }

        if chars[i..].starts_with(&line_comment) {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }

        if lexicon.block_comments && c == '/' && chars.get(i + 1) == Some(&'*') {
            let start_line = line;
            i += 2;
            loop {
                match chars.get(i) {
                    None => {
                        return Err(SyntaxIssue {
                            line: start_line,
                            message: "unterminated block comment".to_string(),
                        })
                    }
                    Some('*') if chars.get(i + 1) == Some(&'/') => {
                        i += 2;
                        break;
                    }
                    Some('\n') => line += 1,
                    Some(_) => {}
                }
                i += 1;
            }
            continue;
        }

        if lexicon.quotes.contains(&c) {
            let start_line = line;
            let multiline = lexicon.multiline_quotes.contains(&c);
            i += 1;
            loop {
                match chars.get(i) {
                    None => {
                        return Err(SyntaxIssue {
                            line: start_line,
                            message: format!("unterminated string starting with {}", c),
                        })
                    }
                    Some('\\') if c != '`' => i += 1,
                    Some('\n') if !multiline => {
                        return Err(SyntaxIssue {
                            line: start_line,
                            message: format!("unterminated string starting with {}", c),
                        })
                    }
                    Some('\n') => line += 1,
                    Some(q) if *q == c => break,
                    Some(_) => {}
                }
                i += 1;
            }
            i += 1;
            continue;
        }

        let tracked = if lexicon.brackets {
            matches!(c, '(' | ')' | '[' | ']' | '{' | '}')
        } else {
            matches!(c, '(' | ')')
        };
        if tracked {
            match c {
                '(' | '[' | '{' => stack.push((c, line)),
                _ => {
                    let expected = match c {
                        ')' => '(',
                        ']' => '[',
                        _ => '{',
                    };
                    match stack.pop() {
                        Some((open, _)) if open == expected => {}
                        Some((open, open_line)) => {
                            return Err(SyntaxIssue {
                                line,
                                message: format!(
                                    "'{}' does not match '{}' opened on line {}",
                                    c, open, open_line
                                ),
                            })
                        }
                        None => {
                            return Err(SyntaxIssue {
                                line,
                                message: format!("unexpected '{}'", c),
                            })
                        }
                    }
                }
            }
        }
        i += 1;
    }

    match stack.pop() {
        Some((open, open_line)) => Err(SyntaxIssue {
            line: open_line,
            message: format!("'{}' is never closed", open),
        }),
        None => Ok(()),
    }
}
