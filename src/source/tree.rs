//! Parser/printer adapter around `swc_core`.
//!
//! [`SyntaxTree`] is the only place in the crate that talks to the concrete parser
//! and code generator. Every pass receives a `&mut SyntaxTree`, works on the
//! owned [`Script`], and never sees lexer or emitter configuration.

use swc_core::{
    common::{
        input::StringInput, sync::Lrc, FileName, Globals, SourceMap, Span, Spanned, DUMMY_SP,
        GLOBALS,
    },
    ecma::{
        ast::{Script, Stmt},
        codegen::{text_writer::JsWriter, Config, Emitter},
        parser::{Parser, Syntax},
    },
};

use crate::{Error, Result};

/// A parsed script together with the source map needed to print it back.
///
/// A tree is owned by exactly one pipeline run. It is cheap to move between
/// threads but is never shared.
pub struct SyntaxTree {
    cm: Lrc<SourceMap>,
    script: Script,
}

impl SyntaxTree {
    /// Parses `source` as a classic (non-module) script.
    ///
    /// Recovered parser diagnostics are treated as failures as well, so a tree is
    /// only produced for input the parser accepted without complaint.
    ///
    /// # Arguments
    ///
    /// * `source` - Script text, usually already normalised.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] with the first diagnostic and its location.
    pub fn parse(source: &str) -> Result<Self> {
        let cm: Lrc<SourceMap> = Lrc::new(SourceMap::default());
        let fm = cm.new_source_file(FileName::Anon.into(), source.to_string());

        GLOBALS.set(&Globals::new(), || {
            let mut parser = Parser::new(Syntax::default(), StringInput::from(&*fm), None);
            let parsed = parser.parse_script();
            let recovered = parser.take_errors();

            match parsed {
                Ok(script) => {
                    if let Some(first) = recovered.first() {
                        return Err(Error::Parse {
                            message: first.kind().msg().to_string(),
                            location: render_location(&cm, first.span()),
                        });
                    }
                    Ok(Self {
                        cm: cm.clone(),
                        script,
                    })
                }
                Err(err) => Err(Error::Parse {
                    message: err.kind().msg().to_string(),
                    location: render_location(&cm, err.span()),
                }),
            }
        })
    }

    /// Wraps synthesised statements so they can be printed.
    #[must_use]
    pub fn from_stmts(body: Vec<Stmt>) -> Self {
        Self {
            cm: Lrc::new(SourceMap::default()),
            script: Script {
                span: DUMMY_SP,
                body,
                shebang: None,
            },
        }
    }

    /// Returns the parsed script.
    #[must_use]
    pub fn script(&self) -> &Script {
        &self.script
    }

    /// Returns the parsed script for in-place rewriting.
    pub fn script_mut(&mut self) -> &mut Script {
        &mut self.script
    }

    /// Renders the `line:column` (both 1-based) of `span`'s start.
    ///
    /// Synthesised nodes carry a dummy span and render as `0:0`.
    #[must_use]
    pub fn location(&self, span: Span) -> String {
        render_location(&self.cm, span)
    }

    /// Prints the current tree back to source text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the code generator fails to write, or
    /// [`Error::Internal`] if it produced invalid UTF-8.
    pub fn print(&self) -> Result<String> {
        let mut buf = Vec::new();
        {
            let mut emitter = Emitter {
                cfg: Config::default(),
                cm: self.cm.clone(),
                comments: None,
                wr: JsWriter::new(self.cm.clone(), "\n", &mut buf, None),
            };
            emitter.emit_script(&self.script)?;
        }
        String::from_utf8(buf).map_err(|e| Error::Internal(format!("printer emitted {e}")))
    }
}

fn render_location(cm: &SourceMap, span: Span) -> String {
    if span.lo.0 == 0 && span.hi.0 == 0 {
        return "0:0".to_string();
    }
    let loc = cm.lookup_char_pos(span.lo);
    format!("{}:{}", loc.line, loc.col.0 + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_print() {
        let tree = SyntaxTree::parse("var a = 1;\nfunction f() { return a; }").unwrap();
        assert_eq!(tree.script().body.len(), 2);

        let printed = tree.print().unwrap();
        assert!(printed.contains("var a = 1;"));
        assert!(printed.contains("function f()"));
    }

    #[test]
    fn test_parse_failure_reports_location() {
        let err = SyntaxTree::parse("var = ;").err().unwrap();
        match err {
            Error::Parse { location, .. } => assert!(location.starts_with("1:")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_sloppy_mode_constructs_parse() {
        assert!(SyntaxTree::parse("with (obj) { x = 1; }").is_ok());
    }

    #[test]
    fn test_location_of_statement() {
        let tree = SyntaxTree::parse("\n\n  debugger;").unwrap();
        let span = match &tree.script().body[0] {
            Stmt::Debugger(stmt) => stmt.span,
            other => panic!("unexpected statement: {other:?}"),
        };
        assert_eq!(tree.location(span), "3:3");
    }
}
