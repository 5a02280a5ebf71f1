use std::collections::HashMap;
use std::sync::Arc;

use crate::error::RenderError;

use super::interp::Evaluator;
use super::values::{compare, to_num, Value};
use super::BuiltinFn;

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or(Value::Undef)
}

/// Collapses `min(list)` / `min(a, b, c)` into one candidate list.
fn spread(args: Vec<Value>) -> Vec<Value> {
    if args.len() == 1 {
        if let Value::List(items) = &args[0] {
            return (**items).clone();
        }
    }
    args
}

pub(super) fn install(table: &mut HashMap<String, BuiltinFn>) {
    let mut def = |name: &str,
                   f: fn(&mut Evaluator<'_>, Vec<Value>) -> Result<Value, RenderError>| {
        table.insert(name.to_string(), Arc::new(f) as BuiltinFn);
    };

    def("range", |_e, args| {
        let from = to_num(&arg(&args, 0));
        let to = to_num(&arg(&args, 1));
        let step = match args.get(2) {
            Some(step) => to_num(step).abs(),
            None => 1.0,
        };
        if step == 0.0 || !step.is_finite() || !from.is_finite() || !to.is_finite() {
            return Err(RenderError::Type("invalid `range` bounds".into()));
        }
        let mut items = Vec::new();
        if from <= to {
            let mut current = from;
            while current <= to {
                items.push(Value::num(current));
                current += step;
            }
        } else {
            let mut current = from;
            while current >= to {
                items.push(Value::num(current));
                current -= step;
            }
        }
        Ok(Value::list(items))
    });

    def("min", |_e, args| {
        Ok(spread(args)
            .into_iter()
            .min_by(|a, b| compare(a, b).unwrap_or(std::cmp::Ordering::Equal))
            .unwrap_or(Value::Undef))
    });

    def("max", |_e, args| {
        Ok(spread(args)
            .into_iter()
            .max_by(|a, b| compare(a, b).unwrap_or(std::cmp::Ordering::Equal))
            .unwrap_or(Value::Undef))
    });

    def("cycle", |_e, args| {
        let Value::List(items) = arg(&args, 0) else {
            return Err(RenderError::Type("`cycle` expects a list".into()));
        };
        if items.is_empty() {
            return Ok(Value::Undef);
        }
        let index = to_num(&arg(&args, 1));
        let index = if index.is_finite() {
            (index.trunc() as usize).rem_euclid(items.len())
        } else {
            0
        };
        Ok(items[index].clone())
    });
}
