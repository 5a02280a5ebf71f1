use std::collections::HashMap;
use std::sync::Arc;

use unicode_segmentation::UnicodeSegmentation;

use crate::error::RenderError;

use super::escape::{escape_html, escape_js};
use super::interp::{slice_value, Evaluator};
use super::values::{
    compare, hash_insert, to_json, to_num, to_str, truthy, Pairs, Value,
};
use super::BuiltinFn;

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or(Value::Undef)
}

pub(super) fn install(table: &mut HashMap<String, BuiltinFn>) {
    let mut def = |name: &str,
                   f: fn(&mut Evaluator<'_>, Vec<Value>) -> Result<Value, RenderError>| {
        table.insert(name.to_string(), Arc::new(f) as BuiltinFn);
    };

    def("abs", |_e, args| {
        Ok(Value::num(to_num(&arg(&args, 0)).abs()))
    });

    def("capitalize", |_e, args| {
        let text = to_str(&arg(&args, 0));
        let mut chars = text.chars();
        let capped = match chars.next() {
            Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
            None => String::new(),
        };
        Ok(Value::str(capped))
    });

    def("default", |_e, args| {
        let value = arg(&args, 0);
        let fallback = arg(&args, 1);
        Ok(match &value {
            Value::Undef | Value::Null => fallback,
            Value::Str(s) if s.is_empty() => fallback,
            _ => value,
        })
    });

    def("e", escape_filter);
    def("escape", escape_filter);

    def("first", |_e, args| {
        Ok(match arg(&args, 0) {
            Value::List(items) => items.first().cloned().unwrap_or(Value::Undef),
            Value::Hash(pairs) => pairs.first().map(|(_, v)| v.clone()).unwrap_or(Value::Undef),
            Value::Str(s) => s
                .chars()
                .next()
                .map(|ch| Value::str(ch.to_string()))
                .unwrap_or(Value::Undef),
            _ => Value::Undef,
        })
    });

    def("join", |_e, args| {
        let sep = match args.get(1) {
            Some(sep) => to_str(sep),
            None => String::new(),
        };
        let joined = match arg(&args, 0) {
            Value::List(items) => items.iter().map(to_str).collect::<Vec<_>>().join(&sep),
            other => to_str(&other),
        };
        Ok(Value::str(joined))
    });

    def("json_encode", |_e, args| {
        serde_json::to_string(&to_json(&arg(&args, 0)))
            .map(Value::str)
            .map_err(|err| RenderError::Type(format!("json_encode failed: {err}")))
    });

    def("keys", |_e, args| {
        Ok(Value::list(match arg(&args, 0) {
            Value::Hash(pairs) => pairs.iter().map(|(k, _)| Value::str(k.clone())).collect(),
            Value::List(items) => (0..items.len()).map(|i| Value::num(i as f64)).collect(),
            _ => Vec::new(),
        }))
    });

    def("last", |_e, args| {
        Ok(match arg(&args, 0) {
            Value::List(items) => items.last().cloned().unwrap_or(Value::Undef),
            Value::Hash(pairs) => pairs.last().map(|(_, v)| v.clone()).unwrap_or(Value::Undef),
            Value::Str(s) => s
                .chars()
                .next_back()
                .map(|ch| Value::str(ch.to_string()))
                .unwrap_or(Value::Undef),
            _ => Value::Undef,
        })
    });

    def("length", |_e, args| {
        Ok(Value::num(match arg(&args, 0) {
            Value::Str(s) => s.chars().count() as f64,
            Value::List(items) => items.len() as f64,
            Value::Hash(pairs) => pairs.len() as f64,
            _ => 0.0,
        }))
    });

    def("lower", |_e, args| {
        Ok(Value::str(to_str(&arg(&args, 0)).to_lowercase()))
    });

    def("map", |e, args| {
        let Value::List(items) = arg(&args, 0) else {
            return Err(RenderError::Type("`map` expects a list".into()));
        };
        let callback = arg(&args, 1);
        let mut mapped = Vec::with_capacity(items.len());
        for item in items.iter() {
            mapped.push(e.apply(&callback, vec![item.clone()])?);
        }
        Ok(Value::list(mapped))
    });

    def("merge", |_e, args| match (arg(&args, 0), arg(&args, 1)) {
        (Value::List(a), Value::List(b)) => {
            let mut merged = (*a).clone();
            merged.extend(b.iter().cloned());
            Ok(Value::list(merged))
        }
        (Value::Hash(a), Value::Hash(b)) => {
            let mut merged: Pairs = (*a).clone();
            for (key, value) in b.iter() {
                hash_insert(&mut merged, key.clone(), value.clone());
            }
            Ok(Value::hash(merged))
        }
        _ => Err(RenderError::Type(
            "`merge` expects two lists or two hashes".into(),
        )),
    });

    def("nl2br", |_e, args| {
        Ok(Value::str(to_str(&arg(&args, 0)).replace('\n', "<br>\n")))
    });

    def("raw", |_e, args| Ok(arg(&args, 0)));

    def("reverse", |_e, args| {
        Ok(match arg(&args, 0) {
            Value::List(items) => {
                Value::list(items.iter().rev().cloned().collect())
            }
            // Grapheme clusters keep combining marks attached to their base
            // characters.
            other => Value::str(
                to_str(&other)
                    .graphemes(true)
                    .rev()
                    .collect::<String>(),
            ),
        })
    });

    def("round", |_e, args| {
        let value = to_num(&arg(&args, 0));
        let precision = match args.get(1) {
            Some(p) => to_num(p),
            None => 0.0,
        };
        let factor = 10f64.powf(precision);
        Ok(Value::num((value * factor).round() / factor))
    });

    def("slice", |_e, args| {
        let len = args.get(2).map(to_num);
        Ok(slice_value(&arg(&args, 0), to_num(&arg(&args, 1)), len))
    });

    def("sort", |_e, args| {
        let Value::List(items) = arg(&args, 0) else {
            return Err(RenderError::Type("`sort` expects a list".into()));
        };
        let mut sorted = (*items).clone();
        sorted.sort_by(|a, b| compare(a, b).unwrap_or(std::cmp::Ordering::Equal));
        Ok(Value::list(sorted))
    });

    def("split", |_e, args| {
        let text = to_str(&arg(&args, 0));
        let sep = to_str(&arg(&args, 1));
        let parts: Vec<Value> = if sep.is_empty() {
            text.chars().map(|ch| Value::str(ch.to_string())).collect()
        } else {
            text.split(&sep).map(Value::str).collect()
        };
        Ok(Value::list(parts))
    });

    def("trim", |_e, args| {
        Ok(Value::str(to_str(&arg(&args, 0)).trim().to_string()))
    });

    def("upper", |_e, args| {
        Ok(Value::str(to_str(&arg(&args, 0)).to_uppercase()))
    });

    def("url_encode", |_e, args| {
        let text = to_str(&arg(&args, 0));
        Ok(Value::str(
            url::form_urlencoded::byte_serialize(text.as_bytes()).collect::<String>(),
        ))
    });

    // `select` keeps the guard-lambda pattern available to filters too.
    def("select", |e, args| {
        let Value::List(items) = arg(&args, 0) else {
            return Err(RenderError::Type("`select` expects a list".into()));
        };
        let callback = arg(&args, 1);
        let mut kept = Vec::new();
        for item in items.iter() {
            if truthy(&e.apply(&callback, vec![item.clone()])?) {
                kept.push(item.clone());
            }
        }
        Ok(Value::list(kept))
    });
}

fn escape_filter(_e: &mut Evaluator<'_>, args: Vec<Value>) -> Result<Value, RenderError> {
    let text = to_str(&arg(&args, 0));
    let strategy = match args.get(1) {
        Some(strategy) => to_str(strategy),
        None => "html".to_string(),
    };
    match strategy.as_str() {
        "html" => Ok(Value::str(escape_html(&text))),
        "js" => Ok(Value::str(escape_js(&text))),
        other => Err(RenderError::Type(format!(
            "unknown escape strategy `{other}`"
        ))),
    }
}
