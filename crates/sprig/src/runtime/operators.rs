use std::collections::HashMap;
use std::sync::Arc;

use regex::RegexBuilder;

use crate::error::RenderError;

use super::interp::Evaluator;
use super::values::{hash_get, loose_eq, to_num, to_str, Value};
use super::BuiltinFn;

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or(Value::Undef)
}

pub(super) fn install(table: &mut HashMap<String, BuiltinFn>) {
    let mut def = |name: &str,
                   f: fn(&mut Evaluator<'_>, Vec<Value>) -> Result<Value, RenderError>| {
        table.insert(name.to_string(), Arc::new(f) as BuiltinFn);
    };

    def("in", |_e, args| {
        let needle = arg(&args, 0);
        Ok(Value::Bool(match arg(&args, 1) {
            Value::List(items) => items.iter().any(|item| loose_eq(item, &needle)),
            Value::Str(haystack) => haystack.contains(&to_str(&needle)),
            Value::Hash(pairs) => hash_get(&pairs, &to_str(&needle)).is_some(),
            _ => false,
        }))
    });

    def("matches", |_e, args| {
        let subject = to_str(&arg(&args, 0));
        let pattern = to_str(&arg(&args, 1));
        // The right operand is a `/pattern/flags` literal.
        let Some(rest) = pattern.strip_prefix('/') else {
            return Err(RenderError::InvalidRegex(pattern));
        };
        let Some(slash) = rest.rfind('/') else {
            return Err(RenderError::InvalidRegex(pattern));
        };
        let (body, flags) = rest.split_at(slash);
        let flags = &flags[1..];
        let mut builder = RegexBuilder::new(body);
        for flag in flags.chars() {
            match flag {
                'i' => {
                    builder.case_insensitive(true);
                }
                'm' => {
                    builder.multi_line(true);
                }
                's' => {
                    builder.dot_matches_new_line(true);
                }
                _ => return Err(RenderError::InvalidRegex(pattern.clone())),
            }
        }
        let regex = builder
            .build()
            .map_err(|_| RenderError::InvalidRegex(pattern.clone()))?;
        Ok(Value::Bool(regex.is_match(&subject)))
    });

    def("starts with", |_e, args| {
        let subject = to_str(&arg(&args, 0));
        let prefix = to_str(&arg(&args, 1));
        Ok(Value::Bool(subject.starts_with(&prefix)))
    });

    def("ends with", |_e, args| {
        let subject = to_str(&arg(&args, 0));
        let suffix = to_str(&arg(&args, 1));
        Ok(Value::Bool(subject.ends_with(&suffix)))
    });

    def("..", |_e, args| {
        let from = to_num(&arg(&args, 0));
        let to = to_num(&arg(&args, 1));
        if !from.is_finite() || !to.is_finite() {
            return Ok(Value::list(Vec::new()));
        }
        let mut items = Vec::new();
        if from <= to {
            let mut current = from;
            while current <= to {
                items.push(Value::num(current));
                current += 1.0;
            }
        } else {
            let mut current = from;
            while current >= to {
                items.push(Value::num(current));
                current -= 1.0;
            }
        }
        Ok(Value::list(items))
    });
}
