use crate::ast::{Node, TestKind};
use crate::error::Error;
use crate::ir::{
    ArithOp, Artifact, Autoescape, Code, CmpOp, Constant, Dependency, EscapeMode, MacroDef,
    Template, TestOp, Unit,
};
use crate::registry::{Compiled, HookRegistry, TagRegistry};
use crate::scope::{ScopeArena, ScopeId};

#[derive(Debug, Clone, Copy)]
pub struct CompileOptions {
    pub autoescape: Autoescape,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            autoescape: Autoescape::Html,
        }
    }
}

/// Statically known result shape of an expression, used to suppress
/// coercion calls that the node kind already guarantees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Bool,
    Num,
    Str,
    Other,
}

struct UnitCtx {
    params: Vec<String>,
    varargs: bool,
    is_macro: bool,
}

/// Bottom-up AST→IR walk. One instance serves exactly one top-level
/// compile: it owns the scope arena, the dependency list, the per-unit
/// parameter stack, the autoescape stack and the temporary counter, and is
/// discarded with the artifact.
pub struct Compiler<'e> {
    tags: &'e TagRegistry,
    hooks: &'e HookRegistry,
    pub scopes: ScopeArena,
    deps: Vec<Dependency>,
    units: Vec<UnitCtx>,
    autoescape: Vec<Autoescape>,
    temp_counter: u32,
    macros: Vec<MacroDef>,
    base_root: ScopeId,
}

impl<'e> Compiler<'e> {
    pub fn new(tags: &'e TagRegistry, hooks: &'e HookRegistry, options: &CompileOptions) -> Self {
        let mut scopes = ScopeArena::new();
        let base_root = scopes.root();
        Self {
            tags,
            hooks,
            scopes,
            deps: Vec::new(),
            units: Vec::new(),
            autoescape: vec![options.autoescape],
            temp_counter: 0,
            macros: Vec::new(),
            base_root,
        }
    }

    pub fn compile(mut self, node: &Node) -> Result<Artifact, Error> {
        let main_scope = self.scopes.extend(self.base_root, &[]);
        self.push_unit(false);
        let body = self.compile_node(main_scope, node)?;
        let (params, _) = self.pop_unit();
        Ok(Artifact {
            template: Template {
                main: Unit { params, body },
                macros: self.macros,
            },
            dependencies: self.deps,
        })
    }

    /* -----[ context accessors for tag compile hooks ]----- */

    /// The frame macro and `with only` units hang off: it owns nothing, so
    /// those units never see the template body's locals.
    pub fn base_root(&self) -> ScopeId {
        self.base_root
    }

    pub fn temp(&mut self) -> String {
        self.temp_counter += 1;
        format!("$t{}", self.temp_counter)
    }

    pub fn push_autoescape(&mut self, strategy: Autoescape) {
        self.autoescape.push(strategy);
    }

    pub fn pop_autoescape(&mut self) {
        self.autoescape.pop();
    }

    pub fn push_unit(&mut self, is_macro: bool) {
        self.units.push(UnitCtx {
            params: Vec::new(),
            varargs: false,
            is_macro,
        });
    }

    pub fn pop_unit(&mut self) -> (Vec<String>, bool) {
        let unit = self.units.pop().expect("unit stack is balanced");
        (unit.params, unit.varargs)
    }

    pub fn add_macro(&mut self, def: MacroDef) {
        self.macros.push(def);
    }

    /// Records what the external driver needs for `node` used as a template
    /// reference: literal names verbatim (an all-literal array contributes
    /// each candidate), anything else as one opaque marker.
    pub fn record_dependency(&mut self, node: &Node) {
        match node {
            Node::Str(name) => self.deps.push(Dependency::Literal { name: name.clone() }),
            Node::Array(items)
                if !items.is_empty() && items.iter().all(|i| matches!(i, Node::Str(_))) =>
            {
                for item in items {
                    if let Node::Str(name) = item {
                        self.deps.push(Dependency::Literal { name: name.clone() });
                    }
                }
            }
            _ => self.deps.push(Dependency::Complex),
        }
    }

    /// Compiles a template reference as used by `import`/`from`: `_self`
    /// binds the compiling template's own export table and is not a
    /// dependency.
    pub fn compile_template_ref(&mut self, scope: ScopeId, node: &Node) -> Result<Code, Error> {
        if matches!(node, Node::Symbol(name) if name == "_self") {
            return Ok(Code::SelfTemplate);
        }
        self.record_dependency(node);
        let name = self.compile_node(scope, node)?;
        Ok(Code::ImportTemplate {
            name: Box::new(name),
        })
    }

    /* -----[ the generic walk ]----- */

    pub fn compile_node(&mut self, scope: ScopeId, node: &Node) -> Result<Code, Error> {
        if let Some(hook) = self.hooks.get(node.kind()).cloned() {
            match (*hook)(self, scope, node)? {
                Some(Compiled::Code(code)) => return Ok(code),
                Some(Compiled::Node(replacement)) => {
                    return self.compile_node(scope, &replacement)
                }
                None => {}
            }
        }
        self.compile_default(scope, node)
    }

    fn compile_default(&mut self, scope: ScopeId, node: &Node) -> Result<Code, Error> {
        match node {
            Node::Text(value) | Node::Str(value) => Ok(Code::str(value.clone())),
            Node::Num(value) => Ok(Code::num(*value)),
            Node::Bool(value) => Ok(Code::Const {
                value: Constant::Bool(*value),
            }),
            Node::Null => Ok(Code::Const {
                value: Constant::Null,
            }),
            Node::Prog(body) => self.compile_prog(scope, body),
            Node::Binary { op, left, right } => self.compile_binary(scope, op, left, right),
            Node::Unary { op, expr } => self.compile_unary(scope, op, expr),
            Node::Cond { cond, then, els } => self.compile_cond(scope, cond, then, els),
            Node::Call { func, args } => self.compile_call(scope, func, args),
            Node::Filter { expr, name, args } => {
                let mut code_args = vec![self.compile_node(scope, expr)?];
                for arg in args {
                    code_args.push(self.compile_node(scope, arg)?);
                }
                Ok(Code::Filter {
                    name: name.clone(),
                    args: code_args,
                })
            }
            Node::Array(items) => {
                let items = items
                    .iter()
                    .map(|item| self.compile_node(scope, item))
                    .collect::<Result<_, _>>()?;
                Ok(Code::Array { items })
            }
            Node::Hash(entries) => {
                let mut items = Vec::with_capacity(entries.len() * 2);
                for (key, value) in entries {
                    items.push(self.compile_node(scope, key)?);
                    items.push(self.compile_node(scope, value)?);
                }
                Ok(Code::Hash { items })
            }
            Node::Index { expr, prop } => Ok(Code::Index {
                expr: Box::new(self.compile_node(scope, expr)?),
                prop: Box::new(self.compile_node(scope, prop)?),
            }),
            Node::Slice { expr, start, len } => {
                let start = match start {
                    Some(node) => self.compile_node(scope, node)?,
                    None => Code::num(0.0),
                };
                let len = match len {
                    Some(node) => Some(Box::new(self.compile_node(scope, node)?)),
                    None => None,
                };
                Ok(Code::Slice {
                    expr: Box::new(self.compile_node(scope, expr)?),
                    start: Box::new(start),
                    len,
                })
            }
            Node::Symbol(name) => Ok(self.compile_symbol(scope, name)),
            Node::Stat { tag, node } => self.compile_stat(scope, tag, node),
            Node::Test {
                expr,
                test,
                arg,
                negated,
            } => {
                let arg = match arg {
                    Some(node) => Some(Box::new(self.compile_node(scope, node)?)),
                    None => None,
                };
                Ok(Code::Test {
                    test: test_op(*test),
                    expr: Box::new(self.compile_node(scope, expr)?),
                    arg,
                    negated: *negated,
                })
            }
            Node::Lambda { params, body } => {
                let lambda_scope = self.scopes.extend(scope, params);
                self.push_unit(false);
                let result = self.compile_node(lambda_scope, body);
                let (unit_params, _) = self.pop_unit();
                Ok(Code::LambdaDef {
                    params: params.clone(),
                    unit: Box::new(Unit {
                        params: unit_params,
                        body: result?,
                    }),
                })
            }
            Node::Escape { expr } => self.compile_escape(scope, expr),
            Node::Internal(name) => Ok(Code::var(name.clone())),
        }
    }

    /// A body compiles into one concatenation call; literal empty strings
    /// fold away and only non-literal, non-statement output positions get
    /// the escape wrapper.
    fn compile_prog(&mut self, scope: ScopeId, body: &[Node]) -> Result<Code, Error> {
        let mut parts = Vec::new();
        for item in body {
            let code = match item {
                Node::Text(_)
                | Node::Num(_)
                | Node::Bool(_)
                | Node::Null
                | Node::Stat { .. } => self.compile_node(scope, item)?,
                _ => self.compile_node(
                    scope,
                    &Node::Escape {
                        expr: Box::new(item.clone()),
                    },
                )?,
            };
            if code.is_empty_str() {
                continue;
            }
            parts.push(code);
        }
        Ok(Code::Output { parts })
    }

    /// The escape wrapper applies the ambient strategy. String literals are
    /// escaped at compile time (so constant folding still applies); number
    /// and boolean literals and `raw`/`escape`/`e` filter results (checked
    /// syntactically, so nothing is double-escaped) never need the runtime
    /// call.
    fn compile_escape(&mut self, scope: ScopeId, expr: &Node) -> Result<Code, Error> {
        let mode = self
            .autoescape
            .last()
            .copied()
            .unwrap_or(Autoescape::Off)
            .mode();
        if let (Some(mode), Node::Str(s) | Node::Text(s)) = (mode, expr) {
            return Ok(Code::str(match mode {
                EscapeMode::Html => crate::runtime::escape_html(s),
                EscapeMode::Js => crate::runtime::escape_js(s),
            }));
        }
        let inner = self.compile_node(scope, expr)?;
        match mode {
            Some(mode) if !statically_safe(expr) => Ok(Code::Escape {
                mode,
                expr: Box::new(inner),
            }),
            _ => Ok(inner),
        }
    }

    fn compile_symbol(&mut self, scope: ScopeId, name: &str) -> Code {
        if self.scopes.lookup(scope, name).is_some() {
            return Code::var(name);
        }
        let unit = self.units.last_mut().expect("unit stack is balanced");
        if unit.is_macro && name == "varargs" {
            unit.varargs = true;
            return Code::var(name);
        }
        if !unit.params.iter().any(|p| p == name) {
            unit.params.push(name.to_string());
        }
        Code::DataGet {
            name: name.to_string(),
        }
    }

    fn compile_call(&mut self, scope: ScopeId, func: &Node, args: &[Node]) -> Result<Code, Error> {
        let args = args
            .iter()
            .map(|arg| self.compile_node(scope, arg))
            .collect::<Result<Vec<_>, _>>()?;
        if let Node::Symbol(name) = func {
            if self.scopes.lookup(scope, name).is_none() {
                // Unbound callee: the runtime function table, which is a
                // separate namespace from the data map.
                return Ok(Code::FuncCall {
                    name: name.clone(),
                    args,
                });
            }
        }
        Ok(Code::CallValue {
            callee: Box::new(self.compile_node(scope, func)?),
            args,
        })
    }

    fn compile_binary(
        &mut self,
        scope: ScopeId,
        op: &str,
        left: &Node,
        right: &Node,
    ) -> Result<Code, Error> {
        let code = match op {
            "or" => Code::Or {
                left: Box::new(self.compile_bool(scope, left)?),
                right: Box::new(self.compile_node(scope, right)?),
            },
            "and" => Code::And {
                left: Box::new(self.compile_bool(scope, left)?),
                right: Box::new(self.compile_node(scope, right)?),
            },
            "b-or" => self.arith(scope, ArithOp::BitOr, left, right)?,
            "b-and" => self.arith(scope, ArithOp::BitAnd, left, right)?,
            "b-xor" => self.arith(scope, ArithOp::BitXor, left, right)?,
            "+" => self.arith(scope, ArithOp::Add, left, right)?,
            "-" => self.arith(scope, ArithOp::Sub, left, right)?,
            "*" => self.arith(scope, ArithOp::Mul, left, right)?,
            "/" => self.arith(scope, ArithOp::Div, left, right)?,
            "%" => self.arith(scope, ArithOp::Rem, left, right)?,
            "==" => self.cmp(scope, CmpOp::Eq, left, right)?,
            "!=" => self.cmp(scope, CmpOp::Ne, left, right)?,
            "<" => self.cmp(scope, CmpOp::Lt, left, right)?,
            ">" => self.cmp(scope, CmpOp::Gt, left, right)?,
            "<=" => self.cmp(scope, CmpOp::Le, left, right)?,
            ">=" => self.cmp(scope, CmpOp::Ge, left, right)?,
            "//" => Code::FloorDiv {
                left: Box::new(self.compile_num(scope, left)?),
                right: Box::new(self.compile_num(scope, right)?),
            },
            "**" => Code::Pow {
                left: Box::new(self.compile_num(scope, left)?),
                right: Box::new(self.compile_num(scope, right)?),
            },
            "~" => Code::StrConcat {
                left: Box::new(self.compile_str(scope, left)?),
                right: Box::new(self.compile_str(scope, right)?),
            },
            "<=>" => {
                // Each operand lands in a fresh temporary so it evaluates
                // exactly once.
                let t1 = self.temp();
                let t2 = self.temp();
                let left = self.compile_node(scope, left)?;
                let right = self.compile_node(scope, right)?;
                Code::Let {
                    name: t1.clone(),
                    value: Box::new(left),
                    body: Box::new(Code::Let {
                        name: t2.clone(),
                        value: Box::new(right),
                        body: Box::new(Code::Spaceship {
                            left: Box::new(Code::var(t1)),
                            right: Box::new(Code::var(t2)),
                        }),
                    }),
                }
            }
            "not in" => Code::Not {
                expr: Box::new(Code::Operator {
                    name: "in".to_string(),
                    left: Box::new(self.compile_node(scope, left)?),
                    right: Box::new(self.compile_node(scope, right)?),
                }),
            },
            "in" | "matches" | "starts with" | "ends with" | ".." => Code::Operator {
                name: op.to_string(),
                left: Box::new(self.compile_node(scope, left)?),
                right: Box::new(self.compile_node(scope, right)?),
            },
            "?:" => {
                // Elvis: the left operand is bound once; its value is both
                // the condition and the result.
                let t = self.temp();
                let cond = if shape(left) == Shape::Bool {
                    Code::var(t.clone())
                } else {
                    Code::ToBool {
                        expr: Box::new(Code::var(t.clone())),
                    }
                };
                let left = self.compile_node(scope, left)?;
                let right = self.compile_node(scope, right)?;
                Code::Let {
                    name: t.clone(),
                    value: Box::new(left),
                    body: Box::new(Code::If {
                        cond: Box::new(cond),
                        then: Box::new(Code::var(t)),
                        els: Box::new(right),
                    }),
                }
            }
            "??" => {
                let t = self.temp();
                let left = self.compile_node(scope, left)?;
                let right = self.compile_node(scope, right)?;
                Code::Let {
                    name: t.clone(),
                    value: Box::new(left),
                    body: Box::new(Code::If {
                        cond: Box::new(Code::Test {
                            test: TestOp::Null,
                            expr: Box::new(Code::var(t.clone())),
                            arg: None,
                            negated: true,
                        }),
                        then: Box::new(Code::var(t)),
                        els: Box::new(right),
                    }),
                }
            }
            "is" | "is not" => Code::Test {
                test: TestOp::SameAs,
                expr: Box::new(self.compile_node(scope, left)?),
                arg: Some(Box::new(self.compile_node(scope, right)?)),
                negated: op == "is not",
            },
            _ => return Err(Error::Internal(format!("Unknown operator `{op}`"))),
        };
        Ok(code)
    }

    fn arith(
        &mut self,
        scope: ScopeId,
        op: ArithOp,
        left: &Node,
        right: &Node,
    ) -> Result<Code, Error> {
        Ok(Code::Arith {
            op,
            left: Box::new(self.compile_num(scope, left)?),
            right: Box::new(self.compile_num(scope, right)?),
        })
    }

    fn cmp(
        &mut self,
        scope: ScopeId,
        op: CmpOp,
        left: &Node,
        right: &Node,
    ) -> Result<Code, Error> {
        Ok(Code::Cmp {
            op,
            left: Box::new(self.compile_node(scope, left)?),
            right: Box::new(self.compile_node(scope, right)?),
        })
    }

    fn compile_unary(&mut self, scope: ScopeId, op: &str, expr: &Node) -> Result<Code, Error> {
        match op {
            "not" => Ok(Code::Not {
                expr: Box::new(self.compile_node(scope, expr)?),
            }),
            "-" => Ok(Code::Neg {
                expr: Box::new(self.compile_num(scope, expr)?),
            }),
            "+" => self.compile_num(scope, expr),
            _ => Err(Error::Internal(format!("Unknown operator `{op}`"))),
        }
    }

    fn compile_cond(
        &mut self,
        scope: ScopeId,
        cond: &Node,
        then: &Node,
        els: &Node,
    ) -> Result<Code, Error> {
        let t = self.temp();
        let cond_var = if shape(cond) == Shape::Bool {
            Code::var(t.clone())
        } else {
            Code::ToBool {
                expr: Box::new(Code::var(t.clone())),
            }
        };
        let cond = self.compile_node(scope, cond)?;
        let then = self.compile_node(scope, then)?;
        let els = self.compile_node(scope, els)?;
        Ok(Code::Let {
            name: t,
            value: Box::new(cond),
            body: Box::new(Code::If {
                cond: Box::new(cond_var),
                then: Box::new(then),
                els: Box::new(els),
            }),
        })
    }

    fn compile_stat(
        &mut self,
        scope: ScopeId,
        tag: &str,
        payload: &crate::ast::TagNode,
    ) -> Result<Code, Error> {
        // Looked up again here, independently of the registry state the
        // parser saw.
        let compile = self
            .tags
            .get(tag)
            .and_then(|descriptor| descriptor.compile.clone())
            .ok_or_else(|| Error::Internal(format!("Compiler not implemented for tag `{tag}`")))?;
        match (*compile)(self, scope, payload)? {
            Compiled::Code(code) => Ok(code),
            Compiled::Node(node) => self.compile_node(scope, &node),
        }
    }

    /* -----[ shape-aware coercions ]----- */

    pub fn compile_bool(&mut self, scope: ScopeId, node: &Node) -> Result<Code, Error> {
        let code = self.compile_node(scope, node)?;
        if shape(node) == Shape::Bool {
            Ok(code)
        } else {
            Ok(Code::ToBool {
                expr: Box::new(code),
            })
        }
    }

    fn compile_num(&mut self, scope: ScopeId, node: &Node) -> Result<Code, Error> {
        let code = self.compile_node(scope, node)?;
        if shape(node) == Shape::Num {
            Ok(code)
        } else {
            Ok(Code::ToNum {
                expr: Box::new(code),
            })
        }
    }

    fn compile_str(&mut self, scope: ScopeId, node: &Node) -> Result<Code, Error> {
        let code = self.compile_node(scope, node)?;
        if shape(node) == Shape::Str {
            Ok(code)
        } else {
            Ok(Code::ToStr {
                expr: Box::new(code),
            })
        }
    }
}

fn test_op(kind: TestKind) -> TestOp {
    match kind {
        TestKind::Defined => TestOp::Defined,
        TestKind::DivisibleBy => TestOp::DivisibleBy,
        TestKind::Empty => TestOp::Empty,
        TestKind::Even => TestOp::Even,
        TestKind::Iterable => TestOp::Iterable,
        TestKind::Null => TestOp::Null,
        TestKind::Odd => TestOp::Odd,
        TestKind::SameAs => TestOp::SameAs,
    }
}

/// Escape-neutral literals and already-escaped filter results never get an
/// escape wrapper.
fn statically_safe(node: &Node) -> bool {
    match node {
        Node::Num(_) | Node::Bool(_) | Node::Null => true,
        Node::Filter { name, .. } => matches!(name.as_str(), "raw" | "escape" | "e"),
        _ => false,
    }
}

fn shape(node: &Node) -> Shape {
    match node {
        Node::Num(_) => Shape::Num,
        Node::Bool(_) => Shape::Bool,
        Node::Str(_) | Node::Text(_) => Shape::Str,
        Node::Test { .. } => Shape::Bool,
        Node::Unary { op, .. } => match op.as_str() {
            "not" => Shape::Bool,
            "-" | "+" => Shape::Num,
            _ => Shape::Other,
        },
        Node::Binary { op, .. } => match op.as_str() {
            "+" | "-" | "*" | "/" | "%" | "//" | "**" | "b-or" | "b-and" | "b-xor" | "<=>" => {
                Shape::Num
            }
            "~" => Shape::Str,
            "==" | "!=" | "<" | ">" | "<=" | ">=" | "in" | "not in" | "matches"
            | "starts with" | "ends with" | "is" | "is not" => Shape::Bool,
            _ => Shape::Other,
        },
        Node::Cond { then, els, .. } => {
            let then = shape(then);
            if then != Shape::Other && then == shape(els) {
                then
            } else {
                Shape::Other
            }
        }
        _ => Shape::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::Parser;
    use crate::syntax::Syntax;
    use crate::tags;
    use std::sync::Arc;

    fn compile(source: &str) -> Artifact {
        let registry = tags::core_tags();
        let hooks = HookRegistry::empty();
        let lexer = Lexer::new(source, Arc::new(Syntax::new()));
        let ast = Parser::new(lexer, registry.clone()).parse().expect("parses");
        Compiler::new(&registry, &hooks, &CompileOptions::default())
            .compile(&ast)
            .expect("compiles")
    }

    fn dep_names(artifact: &Artifact) -> Vec<String> {
        artifact
            .dependencies
            .iter()
            .map(|dep| match dep {
                Dependency::Literal { name } => name.clone(),
                Dependency::Complex => "<complex>".to_string(),
            })
            .collect()
    }

    #[test]
    fn literal_include_yields_literal_dependency() {
        let artifact = compile(r#"{% include "a.html" %}"#);
        assert_eq!(dep_names(&artifact), vec!["a.html".to_string()]);
    }

    #[test]
    fn array_of_literals_yields_each_candidate() {
        let artifact = compile(r#"{% include ["a.html", "b.html"] %}"#);
        assert_eq!(
            dep_names(&artifact),
            vec!["a.html".to_string(), "b.html".to_string()]
        );
    }

    #[test]
    fn dynamic_include_yields_a_complex_marker() {
        let artifact = compile("{% include some_variable %}");
        assert_eq!(dep_names(&artifact), vec!["<complex>".to_string()]);
    }

    #[test]
    fn dependencies_keep_encounter_order_without_dedup() {
        let artifact =
            compile(r#"{% include "a.html" %}{% import "m.html" as m %}{% include "a.html" %}"#);
        assert_eq!(
            dep_names(&artifact),
            vec!["a.html".to_string(), "m.html".to_string(), "a.html".to_string()]
        );
    }

    #[test]
    fn unbound_symbols_become_unit_parameters_once() {
        let artifact = compile("{{ user }}{{ user }}{{ other }}");
        assert_eq!(
            artifact.template.main.params,
            vec!["user".to_string(), "other".to_string()]
        );
    }

    #[test]
    fn bound_symbols_are_not_parameters() {
        let artifact = compile("{% set x = 1 %}{{ x }}{{ y }}");
        assert_eq!(artifact.template.main.params, vec!["y".to_string()]);
    }

    #[test]
    fn function_calls_do_not_become_parameters() {
        let artifact = compile("{{ range(1, 3) }}");
        assert!(artifact.template.main.params.is_empty());
    }

    #[test]
    fn numeric_literals_skip_redundant_coercions() {
        let artifact = compile("{{ 1 + 2 }}");
        let Code::Output { parts } = &artifact.template.main.body else {
            panic!("expected output");
        };
        let Code::Escape { expr, .. } = &parts[0] else {
            panic!("expected escape wrapper, got {:?}", parts[0]);
        };
        assert_eq!(
            **expr,
            Code::Arith {
                op: ArithOp::Add,
                left: Box::new(Code::num(1.0)),
                right: Box::new(Code::num(2.0)),
            }
        );
    }

    #[test]
    fn non_numeric_operands_get_coerced() {
        let artifact = compile("{{ a + 1 }}");
        let Code::Output { parts } = &artifact.template.main.body else {
            panic!("expected output");
        };
        let Code::Escape { expr, .. } = &parts[0] else {
            panic!("expected escape wrapper");
        };
        let Code::Arith { left, .. } = &**expr else {
            panic!("expected arith");
        };
        assert!(matches!(**left, Code::ToNum { .. }));
    }

    #[test]
    fn raw_filter_suppresses_the_escape_wrapper() {
        let artifact = compile("{{ v|raw }}");
        let Code::Output { parts } = &artifact.template.main.body else {
            panic!("expected output");
        };
        assert!(matches!(parts[0], Code::Filter { .. }));
    }

    #[test]
    fn string_literals_in_output_are_escaped_at_compile_time() {
        let artifact = compile(r#"{{ "<b>" }}"#);
        let Code::Output { parts } = &artifact.template.main.body else {
            panic!("expected output");
        };
        assert_eq!(parts[0], Code::str("&lt;b&gt;"));
    }

    #[test]
    fn empty_literals_fold_away() {
        let artifact = compile("{{ \"\" }}a{{ '' }}");
        let Code::Output { parts } = &artifact.template.main.body else {
            panic!("expected output");
        };
        assert_eq!(parts.len(), 1);
    }

    #[test]
    fn elvis_binds_its_left_operand_to_a_temporary() {
        let artifact = compile("{{ (a ?: 'd')|raw }}");
        let Code::Output { parts } = &artifact.template.main.body else {
            panic!("expected output");
        };
        let Code::Filter { args, .. } = &parts[0] else {
            panic!("expected filter");
        };
        let Code::Let { name, body, .. } = &args[0] else {
            panic!("expected let, got {:?}", args[0]);
        };
        let Code::If { then, .. } = &**body else {
            panic!("expected if");
        };
        assert_eq!(**then, Code::var(name.clone()));
    }

    #[test]
    fn macro_varargs_flag_follows_body_references() {
        let artifact = compile(
            "{% macro a(x) %}{{ x }}{% endmacro %}{% macro b(x) %}{{ varargs|length }}{% endmacro %}",
        );
        assert!(!artifact.template.macros[0].varargs);
        assert!(artifact.template.macros[1].varargs);
    }

    #[test]
    fn macros_do_not_see_template_locals() {
        let artifact = compile("{% set x = 1 %}{% macro m() %}{{ x }}{% endmacro %}");
        assert_eq!(
            artifact.template.macros[0].unit.params,
            vec!["x".to_string()]
        );
    }

    #[test]
    fn autoescape_off_drops_the_wrapper() {
        let artifact = compile("{% autoescape false %}{{ v }}{% endautoescape %}");
        let Code::Output { parts } = &artifact.template.main.body else {
            panic!("expected output");
        };
        let Code::Output { parts } = &parts[0] else {
            panic!("expected nested output");
        };
        assert!(matches!(parts[0], Code::DataGet { .. }));
    }

    #[test]
    fn missing_compile_hook_is_an_internal_error() {
        use crate::registry::{TagDescriptor, TagRegistry};
        let mut registry = TagRegistry::empty();
        registry.insert(
            "noop",
            TagDescriptor::new(
                Arc::new(|p: &mut Parser<'_>| {
                    p.skip(crate::lexer::TokenKind::StatEnd)?;
                    Ok(crate::ast::TagNode::Custom { fields: Vec::new() })
                }),
                None,
            ),
        );
        let hooks = HookRegistry::empty();
        let lexer = Lexer::new("{% noop %}", Arc::new(Syntax::new()));
        let ast = Parser::new(lexer, registry.clone()).parse().expect("parses");
        let err = Compiler::new(&registry, &hooks, &CompileOptions::default())
            .compile(&ast)
            .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }
}
