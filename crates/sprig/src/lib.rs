//! Compiler and runtime for a small, dynamically-typed templating language:
//! `{{ expr }}` prints a value, `{% tag … %}` runs a statement, `{# … #}` is
//! a comment, and adjacent `-` markers trim surrounding whitespace.
//!
//! [`Engine::parse`] turns source text into an AST; [`Engine::compile`]
//! lowers it to a self-contained [`ir::Template`] plus the ordered list of
//! template names it depends on. The [`runtime`] module executes compiled
//! templates against a registry of filters, operators, functions and other
//! registered templates.

use std::sync::Arc;

mod ast;
mod compiler;
mod error;
mod input;
pub mod ir;
mod lexer;
mod parser;
mod registry;
pub mod runtime;
mod scope;
mod syntax;
mod tags;

pub use ast::{MacroParam, Node, NodeKind, TagNode, TestKind};
pub use compiler::{CompileOptions, Compiler};
pub use error::{Error, Location, RenderError};
pub use ir::{Artifact, Autoescape, Dependency};
pub use lexer::{Lexer, Token, TokenKind};
pub use parser::{EndBody, Parser};
pub use registry::{
    Compiled, HookFn, HookRegistry, TagCompileFn, TagDescriptor, TagParseFn, TagRegistry,
};
pub use scope::{ScopeArena, ScopeId};
pub use syntax::Syntax;

/// One compiler instance: the tag and hook registries plus the operator
/// syntax tables. Registries are configured up front (`deftag`/`defhook`)
/// and shared by every subsequent parse and compile; each `compile` call
/// gets its own single-use context internally.
pub struct Engine {
    tags: TagRegistry,
    hooks: HookRegistry,
    syntax: Arc<Syntax>,
}

impl Engine {
    pub fn new() -> Self {
        Self {
            tags: tags::core_tags(),
            hooks: HookRegistry::empty(),
            syntax: Arc::new(Syntax::new()),
        }
    }

    pub fn parse(&self, source: &str) -> Result<Node, Error> {
        let lexer = Lexer::new(source, self.syntax.clone());
        Parser::new(lexer, self.tags.clone()).parse()
    }

    pub fn compile(&self, node: &Node, options: &CompileOptions) -> Result<Artifact, Error> {
        Compiler::new(&self.tags, &self.hooks, options).compile(node)
    }

    /// Parse-and-compile with default options.
    pub fn compile_source(&self, source: &str) -> Result<Artifact, Error> {
        self.compile(&self.parse(source)?, &CompileOptions::default())
    }

    /// Registers or overrides a tag.
    pub fn deftag(&mut self, name: impl Into<String>, descriptor: TagDescriptor) {
        self.tags.insert(name, descriptor);
    }

    /// Registers a compile-time rewrite hook for a node kind.
    pub fn defhook(&mut self, kind: NodeKind, hook: HookFn) {
        self.hooks.insert(kind, hook);
    }

    /// Runs `f` against an engine view with `overrides` layered over the
    /// tag registry; this engine is untouched, so the override scope ends
    /// with `f` even on error.
    pub fn with_tags<R>(&self, overrides: &TagRegistry, f: impl FnOnce(&Engine) -> R) -> R {
        let layered = Engine {
            tags: self.tags.overlay(overrides),
            hooks: self.hooks.clone(),
            syntax: self.syntax.clone(),
        };
        f(&layered)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Code;
    use crate::runtime::{Runtime, Value};

    fn render(source: &str, data: Value) -> String {
        let engine = Engine::new();
        let artifact = engine.compile_source(source).expect("compiles");
        let mut runtime = Runtime::new();
        runtime.register_artifact("main", &artifact);
        runtime.exec("main", data).expect("renders")
    }

    #[test]
    fn deftag_registers_a_custom_statement() {
        let mut engine = Engine::new();
        engine.deftag(
            "shout",
            TagDescriptor::new(
                Arc::new(|p: &mut Parser<'_>| {
                    let expr = p.parse_expression()?;
                    p.skip(TokenKind::StatEnd)?;
                    Ok(TagNode::Custom {
                        fields: vec![("expr".to_string(), expr)],
                    })
                }),
                Some(Arc::new(|_c: &mut Compiler<'_>, _scope, node: &TagNode| {
                    let TagNode::Custom { fields } = node else {
                        return Err(Error::Internal("bad payload".into()));
                    };
                    let expr = fields[0].1.clone();
                    Ok(Compiled::Node(Node::Filter {
                        expr: Box::new(expr),
                        name: "upper".to_string(),
                        args: Vec::new(),
                    }))
                })),
            ),
        );
        let artifact = engine.compile_source("{% shout 'hey' %}").expect("compiles");
        let mut runtime = Runtime::new();
        runtime.register_artifact("main", &artifact);
        assert_eq!(runtime.exec("main", Value::empty_hash()).unwrap(), "HEY");
    }

    #[test]
    fn defhook_rewrites_nodes_before_default_compilation() {
        let mut engine = Engine::new();
        engine.defhook(
            NodeKind::Num,
            Arc::new(|_c: &mut Compiler<'_>, _scope, node: &Node| {
                let Node::Num(n) = node else { return Ok(None) };
                Ok(Some(Compiled::Code(Code::num(*n * 10.0))))
            }),
        );
        let artifact = engine.compile_source("{{ 4 }}").expect("compiles");
        let mut runtime = Runtime::new();
        runtime.register_artifact("main", &artifact);
        assert_eq!(runtime.exec("main", Value::empty_hash()).unwrap(), "40");
    }

    #[test]
    fn with_tags_scopes_overrides_to_the_callback() {
        let engine = Engine::new();
        let mut overrides = TagRegistry::empty();
        overrides.insert(
            "noop",
            TagDescriptor::new(
                Arc::new(|p: &mut Parser<'_>| {
                    p.skip(TokenKind::StatEnd)?;
                    Ok(TagNode::Custom { fields: Vec::new() })
                }),
                Some(Arc::new(|_c: &mut Compiler<'_>, _s, _n: &TagNode| {
                    Ok(Compiled::Code(Code::str("")))
                })),
            ),
        );
        let parsed = engine.with_tags(&overrides, |layered| layered.parse("{% noop %}"));
        assert!(parsed.is_ok());
        // Outside the callback the tag is unknown again.
        assert!(engine.parse("{% noop %}").is_err());
    }

    #[test]
    fn renders_a_small_template_end_to_end() {
        let out = render(
            "Hello {{ name }}!",
            Value::hash(vec![("name".to_string(), Value::str("World"))]),
        );
        assert_eq!(out, "Hello World!");
    }
}
