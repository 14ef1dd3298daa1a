//! Static validation and restricted-grammar compilation
//!
//! Source text is vetted in two stages before any of it runs. A parse
//! failure is a syntax error and carries the 1-based offending line. Source
//! that parses is then scanned token-by-token against the restricted subset:
//! identifiers beginning with an underscore (the road to `__class__`,
//! `__import__` and friends) and the reflective or I/O built-ins are
//! rejected outright. Subset violations are compilation errors and carry no
//! line guarantee.
//!
//! The scan is a defense-in-depth layer, not the sole boundary: names that
//! slip through still resolve against the whitelisted capability
//! environment, and module access is gated again by the runtime import hook.

use rustpython_parser::{lexer, parse, Mode, Tok};
use thiserror::Error;

/// Built-ins that grant reflection, dynamic code, or host I/O. Referencing
/// one of these is a restricted-subset violation even though the capability
/// environment never binds them.
const FORBIDDEN_NAMES: &[&str] = &[
    "eval",
    "exec",
    "compile",
    "open",
    "input",
    "globals",
    "locals",
    "vars",
    "dir",
    "getattr",
    "setattr",
    "delattr",
    "hasattr",
    "breakpoint",
    "exit",
    "quit",
    "help",
];

/// Source text that has passed parsing and the restricted-subset scan.
///
/// Construction through [`compile`] is the only path, so holding a value is
/// proof the source is admissible to the executor.
#[derive(Debug, Clone)]
pub struct CompiledUnit {
    source: String,
}

impl CompiledUnit {
    pub fn source(&self) -> &str {
        &self.source
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileIssue {
    #[error("{message}")]
    Syntax { message: String, line: Option<u32> },
    #[error("{message}")]
    Restricted { message: String },
}

/// Compile `source` under the restricted grammar.
pub fn compile(source: &str) -> Result<CompiledUnit, CompileIssue> {
    if let Err(err) = parse(source, Mode::Module, "<sandbox>") {
        let offset = u32::from(err.offset);
        return Err(CompileIssue::Syntax {
            message: format!("invalid syntax: {}", err.error),
            line: Some(line_of_offset(source, offset)),
        });
    }

    scan_restricted_subset(source)?;

    Ok(CompiledUnit {
        source: source.to_string(),
    })
}

/// The compile step alone, for validation without execution.
pub fn validate(source: &str) -> Result<(), CompileIssue> {
    compile(source).map(|_| ())
}

fn scan_restricted_subset(source: &str) -> Result<(), CompileIssue> {
    for item in lexer::lex(source, Mode::Module) {
        let (tok, _range) = match item {
            Ok(pair) => pair,
            // Unreachable after a successful parse; mapped defensively.
            Err(err) => {
                let offset = u32::from(err.location);
                return Err(CompileIssue::Syntax {
                    message: format!("invalid syntax: {}", err.error),
                    line: Some(line_of_offset(source, offset)),
                });
            }
        };

        if let Tok::Name { name } = &tok {
            if name.starts_with('_') {
                return Err(CompileIssue::Restricted {
                    message: format!(
                        "identifier '{}' is not allowed: names beginning with an underscore \
                         are outside the restricted subset",
                        name
                    ),
                });
            }
            if FORBIDDEN_NAMES.contains(&name.as_str()) {
                return Err(CompileIssue::Restricted {
                    message: format!(
                        "built-in '{}' is not available in the sandbox",
                        name
                    ),
                });
            }
        }
    }
    Ok(())
}

fn line_of_offset(source: &str, offset: u32) -> u32 {
    let end = (offset as usize).min(source.len());
    source[..end].bytes().filter(|b| *b == b'\n').count() as u32 + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_plain_code() {
        assert!(compile("x = [1, 2, 3]\nprint(sum(x))").is_ok());
    }

    #[test]
    fn test_accepts_functions_and_classes() {
        let source = "def double(n):\n    return n * 2\n\nprint(double(21))\n";
        assert!(compile(source).is_ok());
    }

    #[test]
    fn test_syntax_error_reports_first_line() {
        match compile("def f(:") {
            Err(CompileIssue::Syntax { line, .. }) => assert_eq!(line, Some(1)),
            other => panic!("expected syntax error, got {:?}", other),
        }
    }

    #[test]
    fn test_syntax_error_reports_later_line() {
        match compile("x = 1\ndef f(:") {
            Err(CompileIssue::Syntax { line, .. }) => assert_eq!(line, Some(2)),
            other => panic!("expected syntax error, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_forbidden_builtin() {
        match compile("open('/etc/passwd')") {
            Err(CompileIssue::Restricted { message }) => assert!(message.contains("open")),
            other => panic!("expected restricted-subset rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_dunder_attribute_walk() {
        let result = compile("().__class__.__bases__");
        assert!(matches!(result, Err(CompileIssue::Restricted { .. })));
    }

    #[test]
    fn test_rejects_underscore_identifiers() {
        let result = compile("_secret = 1");
        assert!(matches!(result, Err(CompileIssue::Restricted { .. })));
    }

    #[test]
    fn test_forbidden_name_in_string_literal_is_fine() {
        assert!(compile("x = 'open sesame'").is_ok());
    }

    #[test]
    fn test_validate_matches_compile() {
        assert!(validate("print('hi')").is_ok());
        assert!(validate("def f(:").is_err());
    }
}
