use std::sync::Arc;

use crate::ast::{MacroParam, Node, TagNode};
use crate::compiler::Compiler;
use crate::error::Error;
use crate::ir::{self, Autoescape, Code, Unit};
use crate::lexer::TokenKind;
use crate::parser::Parser;
use crate::registry::{Compiled, TagDescriptor, TagRegistry};
use crate::scope::ScopeId;

/// The built-in tag set. Engines start from this registry; `deftag` and
/// `with_tags` layer on top of it.
pub fn core_tags() -> TagRegistry {
    let mut registry = TagRegistry::empty();
    let mut def = |name: &str,
                   parse: fn(&mut Parser<'_>) -> Result<TagNode, Error>,
                   compile: fn(&mut Compiler<'_>, ScopeId, &TagNode) -> Result<Compiled, Error>| {
        registry.insert(
            name,
            TagDescriptor::new(Arc::new(parse), Some(Arc::new(compile))),
        );
    };
    def("if", parse_if, compile_if);
    def("for", parse_for, compile_for);
    def("set", parse_set, compile_set);
    def("macro", parse_macro, compile_macro);
    def("import", parse_import, compile_import);
    def("from", parse_from, compile_from);
    def("include", parse_include, compile_include);
    def("filter", parse_filter, compile_filter);
    def("autoescape", parse_autoescape, compile_autoescape);
    def("with", parse_with, compile_with);
    def("do", parse_do, compile_do);
    def("spaceless", parse_spaceless, compile_spaceless);
    registry
}

fn foreign_payload(tag: &str) -> Error {
    Error::Internal(format!("Tag `{tag}` received a foreign payload"))
}

/* -----[ if ]----- */

fn parse_if(p: &mut Parser<'_>) -> Result<TagNode, Error> {
    let cond = p.parse_expression()?;
    p.skip(TokenKind::StatEnd)?;
    let pred = p.end_body_predicate("^(?:elseif|else|endif)$", false)?;
    let then = p.parse_until(Some(&pred))?;
    let tag = p.skip(TokenKind::Symbol)?;
    let els = match tag.value.as_str() {
        "else" => {
            p.skip(TokenKind::StatEnd)?;
            let pred = p.end_body_predicate("^endif$", true)?;
            Some(Box::new(p.parse_until(Some(&pred))?))
        }
        "elseif" => {
            let nested = parse_if(p)?;
            Some(Box::new(Node::Stat {
                tag: "if".to_string(),
                node: nested,
            }))
        }
        _ => {
            // endif
            p.skip(TokenKind::StatEnd)?;
            None
        }
    };
    Ok(TagNode::If {
        cond: Box::new(cond),
        then: Box::new(then),
        els,
    })
}

/// Rewrites into the generic conditional with an empty-string default else
/// branch; the generic walk does the rest.
fn compile_if(_c: &mut Compiler<'_>, _scope: ScopeId, node: &TagNode) -> Result<Compiled, Error> {
    let TagNode::If { cond, then, els } = node else {
        return Err(foreign_payload("if"));
    };
    let els = match els {
        Some(node) => (**node).clone(),
        None => Node::Str(String::new()),
    };
    Ok(Compiled::Node(Node::Cond {
        cond: cond.clone(),
        then: then.clone(),
        els: Box::new(els),
    }))
}

/* -----[ for ]----- */

fn parse_for(p: &mut Parser<'_>) -> Result<TagNode, Error> {
    let first = p.skip(TokenKind::Symbol)?.value;
    let (key, val) = if p.looking_at_val(TokenKind::Punc, ",")? {
        p.next()?;
        (Some(first), p.skip(TokenKind::Symbol)?.value)
    } else {
        (None, first)
    };
    p.skip_val(TokenKind::Operator, "in")?;
    let data = p.parse_expression()?;
    let cond = if p.looking_at_val(TokenKind::Symbol, "if")? {
        p.next()?;
        Some(Box::new(p.parse_expression()?))
    } else {
        None
    };
    p.skip(TokenKind::StatEnd)?;
    let pred = p.end_body_predicate("^(?:else|endfor)$", false)?;
    let body = p.parse_until(Some(&pred))?;
    let tag = p.skip(TokenKind::Symbol)?;
    p.skip(TokenKind::StatEnd)?;
    let els = if tag.value == "else" {
        let pred = p.end_body_predicate("^endfor$", true)?;
        Some(Box::new(p.parse_until(Some(&pred))?))
    } else {
        None
    };
    Ok(TagNode::For {
        key,
        val,
        data: Box::new(data),
        cond,
        body: Box::new(body),
        els,
    })
}

fn compile_for(c: &mut Compiler<'_>, scope: ScopeId, node: &TagNode) -> Result<Compiled, Error> {
    let TagNode::For {
        key,
        val,
        data,
        cond,
        body,
        els,
    } = node
    else {
        return Err(foreign_payload("for"));
    };
    let data = c.compile_node(scope, data)?;
    let mut bound = vec![val.clone()];
    if let Some(key) = key {
        bound.push(key.clone());
    }
    // The guard sees the bound key/value but not `loop`.
    let vars_scope = c.scopes.extend(scope, &bound);
    let cond = match cond {
        Some(node) => Some(Box::new(c.compile_bool(vars_scope, node)?)),
        None => None,
    };
    let body_scope = c.scopes.extend(vars_scope, &["loop".to_string()]);
    let body = c.compile_node(body_scope, body)?;
    let els = match els {
        Some(node) => Some(Box::new(c.compile_node(scope, node)?)),
        None => None,
    };
    Ok(Compiled::Code(Code::ForLoop {
        key: key.clone(),
        val: val.clone(),
        data: Box::new(data),
        cond,
        body: Box::new(body),
        els,
    }))
}

/* -----[ set ]----- */

fn parse_set(p: &mut Parser<'_>) -> Result<TagNode, Error> {
    let mut names = vec![p.skip(TokenKind::Symbol)?.value];
    while p.looking_at_val(TokenKind::Punc, ",")? {
        p.next()?;
        names.push(p.skip(TokenKind::Symbol)?.value);
    }
    if p.looking_at_val(TokenKind::Operator, "=")? {
        p.next()?;
        let mut defs = Vec::new();
        for (index, name) in names.into_iter().enumerate() {
            if index > 0 {
                p.skip_val(TokenKind::Punc, ",")?;
            }
            defs.push((name, p.parse_expression()?));
        }
        p.skip(TokenKind::StatEnd)?;
        return Ok(TagNode::Set { defs });
    }
    p.skip(TokenKind::StatEnd)?;
    if names.len() != 1 {
        return Err(p.croak("`set` without equal must define exactly one variable"));
    }
    let pred = p.end_body_predicate("^endset$", true)?;
    let body = p.parse_until(Some(&pred))?;
    let name = names.into_iter().next().expect("exactly one name");
    Ok(TagNode::Set {
        defs: vec![(name, body)],
    })
}

fn compile_set(c: &mut Compiler<'_>, scope: ScopeId, node: &TagNode) -> Result<Compiled, Error> {
    let TagNode::Set { defs } = node else {
        return Err(foreign_payload("set"));
    };
    let mut parts = Vec::new();
    for (name, value) in defs {
        // Compile the value first so `set x = x + 1` reads the old binding.
        let value = c.compile_node(scope, value)?;
        c.scopes.set(scope, name);
        parts.push(Code::SetLocal {
            name: name.clone(),
            value: Box::new(value),
        });
    }
    if parts.len() == 1 {
        Ok(Compiled::Code(parts.pop().expect("one assignment")))
    } else {
        Ok(Compiled::Code(Code::Output { parts }))
    }
}

/* -----[ macro ]----- */

fn parse_macro(p: &mut Parser<'_>) -> Result<TagNode, Error> {
    let name = p.skip(TokenKind::Symbol)?.value;
    let params = p.delimited("(", ")", ",", |p| {
        let name = p.skip(TokenKind::Symbol)?.value;
        let default = if p.looking_at_val(TokenKind::Operator, "=")? {
            p.next()?;
            Some(p.parse_expression()?)
        } else {
            None
        };
        Ok(MacroParam { name, default })
    })?;
    p.skip(TokenKind::StatEnd)?;
    let pred = p.end_body_predicate("^endmacro$", false)?;
    let body = p.parse_until(Some(&pred))?;
    p.skip(TokenKind::Symbol)?;
    if let Some(repeat) = p.looking_at(TokenKind::Symbol)? {
        p.next()?;
        if repeat.value != name {
            return Err(Error::syntax(
                format!("`endmacro {}` does not close macro `{name}`", repeat.value),
                repeat.loc,
            ));
        }
    }
    p.skip(TokenKind::StatEnd)?;
    Ok(TagNode::Macro {
        name,
        params,
        body: Box::new(body),
    })
}

/// Macro bodies compile against the root scope extended by their own
/// parameters, never the call site's lexical scope; the definition itself
/// emits nothing.
fn compile_macro(c: &mut Compiler<'_>, scope: ScopeId, node: &TagNode) -> Result<Compiled, Error> {
    let TagNode::Macro { name, params, body } = node else {
        return Err(foreign_payload("macro"));
    };
    c.scopes.def(scope, name);
    let param_names: Vec<String> = params.iter().map(|p| p.name.clone()).collect();
    let macro_scope = c.scopes.extend(c.base_root(), &param_names);
    c.push_unit(true);
    let compiled = (|| -> Result<(Vec<ir::MacroParam>, Code), Error> {
        let mut ir_params = Vec::new();
        for param in params {
            let default = match &param.default {
                Some(node) => Some(c.compile_node(macro_scope, node)?),
                None => None,
            };
            ir_params.push(ir::MacroParam {
                name: param.name.clone(),
                default,
            });
        }
        let body = c.compile_node(macro_scope, body)?;
        Ok((ir_params, body))
    })();
    let (unit_params, varargs) = c.pop_unit();
    let (ir_params, body) = compiled?;
    c.add_macro(ir::MacroDef {
        name: name.clone(),
        params: ir_params,
        varargs,
        unit: Unit {
            params: unit_params,
            body,
        },
    });
    Ok(Compiled::Code(Code::str("")))
}

/* -----[ import / from ]----- */

fn parse_import(p: &mut Parser<'_>) -> Result<TagNode, Error> {
    let template = p.parse_expression()?;
    p.expect_symbol("as")?;
    let alias = p.skip(TokenKind::Symbol)?.value;
    p.skip(TokenKind::StatEnd)?;
    Ok(TagNode::Import {
        alias,
        template: Box::new(template),
    })
}

fn compile_import(c: &mut Compiler<'_>, scope: ScopeId, node: &TagNode) -> Result<Compiled, Error> {
    let TagNode::Import { alias, template } = node else {
        return Err(foreign_payload("import"));
    };
    let value = c.compile_template_ref(scope, template)?;
    c.scopes.def(scope, alias);
    Ok(Compiled::Code(Code::SetLocal {
        name: alias.clone(),
        value: Box::new(value),
    }))
}

fn parse_from(p: &mut Parser<'_>) -> Result<TagNode, Error> {
    let template = p.parse_expression()?;
    p.expect_symbol("import")?;
    let mut imports = Vec::new();
    loop {
        let name = p.skip(TokenKind::Symbol)?.value;
        let alias = if p.looking_at_val(TokenKind::Symbol, "as")? {
            p.next()?;
            p.skip(TokenKind::Symbol)?.value
        } else {
            name.clone()
        };
        imports.push((name, alias));
        if p.looking_at_val(TokenKind::Punc, ",")? {
            p.next()?;
        } else {
            break;
        }
    }
    p.skip(TokenKind::StatEnd)?;
    Ok(TagNode::From {
        template: Box::new(template),
        imports,
    })
}

fn compile_from(c: &mut Compiler<'_>, scope: ScopeId, node: &TagNode) -> Result<Compiled, Error> {
    let TagNode::From { template, imports } = node else {
        return Err(foreign_payload("from"));
    };
    let value = c.compile_template_ref(scope, template)?;
    let tmp = c.temp();
    let mut parts = Vec::new();
    for (name, alias) in imports {
        c.scopes.def(scope, alias);
        parts.push(Code::SetLocal {
            name: alias.clone(),
            value: Box::new(Code::Index {
                expr: Box::new(Code::var(tmp.clone())),
                prop: Box::new(Code::str(name.clone())),
            }),
        });
    }
    Ok(Compiled::Code(Code::Let {
        name: tmp,
        value: Box::new(value),
        body: Box::new(Code::Output { parts }),
    }))
}

/* -----[ include ]----- */

fn parse_include(p: &mut Parser<'_>) -> Result<TagNode, Error> {
    let template = p.parse_expression()?;
    let mut with = None;
    let mut only = false;
    let mut ignore_missing = false;
    loop {
        if p.looking_at_val(TokenKind::Symbol, "ignore")? {
            p.next()?;
            p.expect_symbol("missing")?;
            ignore_missing = true;
        } else if p.looking_at_val(TokenKind::Symbol, "with")? {
            p.next()?;
            with = Some(Box::new(p.parse_expression()?));
        } else if p.looking_at_val(TokenKind::Symbol, "only")? {
            p.next()?;
            only = true;
        } else {
            break;
        }
    }
    p.skip(TokenKind::StatEnd)?;
    Ok(TagNode::Include {
        template: Box::new(template),
        with,
        only,
        ignore_missing,
    })
}

/// The include context is the caller's data map merged with the live bound
/// locals, unless `only` isolates it to just the `with` expression.
fn compile_include(
    c: &mut Compiler<'_>,
    scope: ScopeId,
    node: &TagNode,
) -> Result<Compiled, Error> {
    let TagNode::Include {
        template,
        with,
        only,
        ignore_missing,
    } = node
    else {
        return Err(foreign_payload("include"));
    };
    c.record_dependency(template);
    let name = c.compile_node(scope, template)?;
    let with = match with {
        Some(node) => Some(c.compile_node(scope, node)?),
        None => None,
    };
    let mut parts = Vec::new();
    if !only {
        parts.push(Code::DataMap);
        let visible = c.scopes.visible(scope);
        if !visible.is_empty() {
            let mut items = Vec::with_capacity(visible.len() * 2);
            for name in visible {
                items.push(Code::str(name.clone()));
                items.push(Code::var(name));
            }
            parts.push(Code::Hash { items });
        }
    }
    if let Some(with) = with {
        parts.push(with);
    }
    Ok(Compiled::Code(Code::Include {
        name: Box::new(name),
        context: Box::new(Code::MergedContext { parts }),
        optional: *ignore_missing,
    }))
}

/* -----[ filter ]----- */

fn parse_filter(p: &mut Parser<'_>) -> Result<TagNode, Error> {
    let mut chain = Vec::new();
    loop {
        let name = p.skip(TokenKind::Symbol)?.value;
        let args = if p.looking_at_val(TokenKind::Punc, "(")? {
            p.delimited("(", ")", ",", |p| p.parse_expression())?
        } else {
            Vec::new()
        };
        chain.push((name, args));
        if p.looking_at_val(TokenKind::Operator, "|")? {
            p.next()?;
        } else {
            break;
        }
    }
    p.skip(TokenKind::StatEnd)?;
    let pred = p.end_body_predicate("^endfilter$", true)?;
    let body = p.parse_until(Some(&pred))?;
    Ok(TagNode::FilterTag {
        chain,
        body: Box::new(body),
    })
}

/// Rewrites itself into filter-application nodes around the body.
fn compile_filter(
    _c: &mut Compiler<'_>,
    _scope: ScopeId,
    node: &TagNode,
) -> Result<Compiled, Error> {
    let TagNode::FilterTag { chain, body } = node else {
        return Err(foreign_payload("filter"));
    };
    let mut rewritten = (**body).clone();
    for (name, args) in chain {
        rewritten = Node::Filter {
            expr: Box::new(rewritten),
            name: name.clone(),
            args: args.clone(),
        };
    }
    Ok(Compiled::Node(rewritten))
}

/* -----[ autoescape ]----- */

fn parse_autoescape(p: &mut Parser<'_>) -> Result<TagNode, Error> {
    let strategy = if p.looking_at(TokenKind::StatEnd)?.is_some() {
        Autoescape::Html
    } else {
        let expr = p.parse_expression()?;
        match expr {
            Node::Str(s) if s == "html" => Autoescape::Html,
            Node::Str(s) if s == "js" => Autoescape::Js,
            Node::Bool(true) => Autoescape::Html,
            Node::Bool(false) => Autoescape::Off,
            _ => {
                return Err(p.croak(
                    "The `autoescape` strategy must be a constant `\"html\"`, `\"js\"` or `false`",
                ))
            }
        }
    };
    p.skip(TokenKind::StatEnd)?;
    let pred = p.end_body_predicate("^endautoescape$", true)?;
    let body = p.parse_until(Some(&pred))?;
    Ok(TagNode::Autoescape {
        strategy,
        body: Box::new(body),
    })
}

fn compile_autoescape(
    c: &mut Compiler<'_>,
    scope: ScopeId,
    node: &TagNode,
) -> Result<Compiled, Error> {
    let TagNode::Autoescape { strategy, body } = node else {
        return Err(foreign_payload("autoescape"));
    };
    c.push_autoescape(*strategy);
    let result = c.compile_node(scope, body);
    c.pop_autoescape();
    Ok(Compiled::Code(result?))
}

/* -----[ with ]----- */

fn parse_with(p: &mut Parser<'_>) -> Result<TagNode, Error> {
    let mut init = None;
    if p.looking_at(TokenKind::StatEnd)?.is_none()
        && !p.looking_at_val(TokenKind::Symbol, "only")?
    {
        init = Some(Box::new(p.parse_expression()?));
    }
    let only = if p.looking_at_val(TokenKind::Symbol, "only")? {
        p.next()?;
        true
    } else {
        false
    };
    p.skip(TokenKind::StatEnd)?;
    let pred = p.end_body_predicate("^endwith$", true)?;
    let body = p.parse_until(Some(&pred))?;
    Ok(TagNode::With {
        init,
        only,
        body: Box::new(body),
    })
}

fn compile_with(c: &mut Compiler<'_>, scope: ScopeId, node: &TagNode) -> Result<Compiled, Error> {
    let TagNode::With { init, only, body } = node else {
        return Err(foreign_payload("with"));
    };
    let init = match init {
        Some(node) => Some(Box::new(c.compile_node(scope, node)?)),
        None => None,
    };
    if *only {
        // Isolated unit behind a real call boundary: rooted at the base
        // scope, so no ambient binding is visible at compile or run time.
        let unit_scope = c.scopes.extend(c.base_root(), &[]);
        c.push_unit(false);
        let result = c.compile_node(unit_scope, body);
        let (params, _) = c.pop_unit();
        return Ok(Compiled::Code(Code::WithOnly {
            init,
            unit: Box::new(Unit {
                params,
                body: result?,
            }),
        }));
    }
    let child = c.scopes.extend(scope, &[]);
    let body = c.compile_node(child, body)?;
    Ok(Compiled::Code(Code::WithOverlay {
        init,
        body: Box::new(body),
    }))
}

/* -----[ do / spaceless ]----- */

fn parse_do(p: &mut Parser<'_>) -> Result<TagNode, Error> {
    let expr = p.parse_expression()?;
    p.skip(TokenKind::StatEnd)?;
    Ok(TagNode::Do {
        expr: Box::new(expr),
    })
}

fn compile_do(c: &mut Compiler<'_>, scope: ScopeId, node: &TagNode) -> Result<Compiled, Error> {
    let TagNode::Do { expr } = node else {
        return Err(foreign_payload("do"));
    };
    let expr = c.compile_node(scope, expr)?;
    Ok(Compiled::Code(Code::Discard {
        expr: Box::new(expr),
    }))
}

fn parse_spaceless(p: &mut Parser<'_>) -> Result<TagNode, Error> {
    p.skip(TokenKind::StatEnd)?;
    let pred = p.end_body_predicate("^endspaceless$", true)?;
    let body = p.parse_until(Some(&pred))?;
    Ok(TagNode::Spaceless {
        body: Box::new(body),
    })
}

fn compile_spaceless(
    c: &mut Compiler<'_>,
    scope: ScopeId,
    node: &TagNode,
) -> Result<Compiled, Error> {
    let TagNode::Spaceless { body } = node else {
        return Err(foreign_payload("spaceless"));
    };
    let body = c.compile_node(scope, body)?;
    Ok(Compiled::Code(Code::Spaceless {
        body: Box::new(body),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::syntax::Syntax;

    fn parse(source: &str) -> Result<Node, Error> {
        let lexer = Lexer::new(source, Arc::new(Syntax::new()));
        Parser::new(lexer, core_tags()).parse()
    }

    fn first_stat(source: &str) -> TagNode {
        let Node::Prog(body) = parse(source).expect("parses cleanly") else {
            panic!("expected prog");
        };
        for node in body {
            if let Node::Stat { node, .. } = node {
                return node;
            }
        }
        panic!("no statement found");
    }

    #[test]
    fn for_accepts_key_value_pairs_and_guards() {
        let TagNode::For { key, val, cond, .. } =
            first_stat("{% for k, v in items if v %}x{% endfor %}")
        else {
            panic!("expected for");
        };
        assert_eq!(key.as_deref(), Some("k"));
        assert_eq!(val, "v");
        assert!(cond.is_some());
    }

    #[test]
    fn for_else_binds_the_empty_branch() {
        let TagNode::For { els, .. } = first_stat("{% for v in items %}x{% else %}y{% endfor %}")
        else {
            panic!("expected for");
        };
        assert!(els.is_some());
    }

    #[test]
    fn set_splits_assignment_lists() {
        let TagNode::Set { defs } = first_stat("{% set a, b = 1, 2 %}") else {
            panic!("expected set");
        };
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[0].0, "a");
        assert_eq!(defs[1].1, Node::Num(2.0));
    }

    #[test]
    fn set_without_equal_captures_its_body() {
        let TagNode::Set { defs } = first_stat("{% set a %}body{% endset %}") else {
            panic!("expected set");
        };
        assert_eq!(defs.len(), 1);
        assert!(matches!(defs[0].1, Node::Prog(_)));
    }

    #[test]
    fn multi_name_set_requires_an_equal_sign() {
        assert!(parse("{% set a, b %}body{% endset %}").is_err());
    }

    #[test]
    fn macro_params_take_default_expressions() {
        let TagNode::Macro { name, params, .. } =
            first_stat("{% macro m(a, b = 2) %}x{% endmacro %}")
        else {
            panic!("expected macro");
        };
        assert_eq!(name, "m");
        assert_eq!(params.len(), 2);
        assert!(params[0].default.is_none());
        assert_eq!(params[1].default, Some(Node::Num(2.0)));
    }

    #[test]
    fn endmacro_may_repeat_the_name_but_must_match() {
        assert!(parse("{% macro m() %}x{% endmacro m %}").is_ok());
        assert!(parse("{% macro m() %}x{% endmacro other %}").is_err());
    }

    #[test]
    fn include_flags_combine_in_any_order() {
        let TagNode::Include {
            only,
            ignore_missing,
            with,
            ..
        } = first_stat(r#"{% include "a.html" ignore missing with {x: 1} only %}"#)
        else {
            panic!("expected include");
        };
        assert!(only);
        assert!(ignore_missing);
        assert!(with.is_some());
    }

    #[test]
    fn from_import_binds_multiple_aliases() {
        let TagNode::From { imports, .. } =
            first_stat(r#"{% from "m.html" import a, b as c %}"#)
        else {
            panic!("expected from");
        };
        assert_eq!(
            imports,
            vec![
                ("a".to_string(), "a".to_string()),
                ("b".to_string(), "c".to_string())
            ]
        );
    }

    #[test]
    fn filter_tag_collects_its_chain() {
        let TagNode::FilterTag { chain, .. } =
            first_stat("{% filter lower|replace('a') %}X{% endfilter %}")
        else {
            panic!("expected filter tag");
        };
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].0, "lower");
        assert_eq!(chain[1].0, "replace");
        assert_eq!(chain[1].1.len(), 1);
    }

    #[test]
    fn autoescape_requires_a_constant_strategy() {
        assert!(parse("{% autoescape false %}x{% endautoescape %}").is_ok());
        assert!(parse("{% autoescape 'js' %}x{% endautoescape %}").is_ok());
        assert!(parse("{% autoescape some_var %}x{% endautoescape %}").is_err());
    }

    #[test]
    fn with_accepts_initializer_and_only() {
        let TagNode::With { init, only, .. } = first_stat("{% with {a: 1} only %}x{% endwith %}")
        else {
            panic!("expected with");
        };
        assert!(init.is_some());
        assert!(only);
    }
}
