use std::sync::Arc;

use crate::error::RenderError;
use crate::ir::{ArithOp, CmpOp, Code, Constant, EscapeMode, Template, TestOp};

use super::env::Env;
use super::escape::{escape_html, escape_js, spaceless};
use super::values::{
    compare, hash_from_items, hash_get, hash_insert, loose_eq, strict_eq, to_num, to_str, truthy,
    LambdaValue, MacroValue, Pairs, TemplateValue, Value,
};
use super::Runtime;

/// The execution context of one unit: the template it belongs to (for
/// `_self`) and the caller-supplied data map its free names resolve from.
#[derive(Clone)]
pub(super) struct UnitRt {
    template: Arc<Template>,
    data: Value,
}

/// Tree-walking evaluator for compiled code. One evaluator serves one
/// `exec` call; it borrows the runtime's primitive tables and template
/// registry.
pub struct Evaluator<'r> {
    runtime: &'r Runtime,
}

impl<'r> Evaluator<'r> {
    pub(super) fn new(runtime: &'r Runtime) -> Self {
        Self { runtime }
    }

    pub(super) fn run_template(
        &mut self,
        template: &Arc<Template>,
        data: Value,
    ) -> Result<String, RenderError> {
        let data = match data {
            Value::Hash(_) => data,
            Value::Undef | Value::Null => Value::empty_hash(),
            _ => return Err(RenderError::Type("template data must be a hash".into())),
        };
        let env = Env::new(None);
        for (index, def) in template.macros.iter().enumerate() {
            env.define(
                def.name.clone(),
                Value::Macro(Arc::new(MacroValue {
                    template: template.clone(),
                    index,
                    data: data.clone(),
                })),
            );
        }
        let ctx = UnitRt {
            template: template.clone(),
            data,
        };
        let value = self.eval(&template.main.body, &env, &ctx)?;
        Ok(to_str(&value))
    }

    /// Calls a callable value (macro or lambda) with positional arguments.
    /// Filters use this to drive caller-supplied lambdas.
    pub fn apply(&mut self, callee: &Value, args: Vec<Value>) -> Result<Value, RenderError> {
        match callee {
            Value::Macro(m) => self.call_macro(m, args),
            Value::Lambda(l) => self.call_lambda(l, args),
            _ => Err(RenderError::Type("value is not callable".into())),
        }
    }

    fn call_macro(&mut self, m: &MacroValue, args: Vec<Value>) -> Result<Value, RenderError> {
        let def = &m.template.macros[m.index];
        let env = Env::new(None);
        let ctx = UnitRt {
            template: m.template.clone(),
            data: m.data.clone(),
        };
        for (index, param) in def.params.iter().enumerate() {
            let value = match args.get(index) {
                Some(value) => value.clone(),
                // Omitted trailing arguments fall back to the default
                // expressions, which may reference earlier parameters.
                None => match &param.default {
                    Some(code) => self.eval(code, &env, &ctx)?,
                    None => Value::Undef,
                },
            };
            env.define(param.name.clone(), value);
        }
        if def.varargs {
            let extra: Vec<Value> = args.iter().skip(def.params.len()).cloned().collect();
            env.define("varargs", Value::list(extra));
        }
        self.eval(&def.unit.body, &env, &ctx)
    }

    fn call_lambda(&mut self, l: &LambdaValue, args: Vec<Value>) -> Result<Value, RenderError> {
        let env = l.env.child();
        for (index, name) in l.params.iter().enumerate() {
            env.define(name.clone(), args.get(index).cloned().unwrap_or(Value::Undef));
        }
        let ctx = UnitRt {
            template: l.template.clone(),
            data: l.data.clone(),
        };
        self.eval(&l.unit.body, &env, &ctx)
    }

    fn eval(&mut self, code: &Code, env: &Env, ctx: &UnitRt) -> Result<Value, RenderError> {
        match code {
            Code::Const { value } => Ok(match value {
                Constant::Null => Value::Null,
                Constant::Bool(b) => Value::Bool(*b),
                Constant::Num(n) => Value::Num(*n),
                Constant::Str(s) => Value::Str(s.clone()),
            }),
            Code::Output { parts } => {
                let mut out = String::new();
                for part in parts {
                    let value = self.eval(part, env, ctx)?;
                    out.push_str(&to_str(&value));
                }
                Ok(Value::Str(out))
            }
            Code::Escape { mode, expr } => {
                let value = self.eval(expr, env, ctx)?;
                let text = to_str(&value);
                Ok(Value::Str(match mode {
                    EscapeMode::Html => escape_html(&text),
                    EscapeMode::Js => escape_js(&text),
                }))
            }
            Code::ToBool { expr } => Ok(Value::Bool(truthy(&self.eval(expr, env, ctx)?))),
            Code::ToNum { expr } => Ok(Value::Num(to_num(&self.eval(expr, env, ctx)?))),
            Code::ToStr { expr } => Ok(Value::Str(to_str(&self.eval(expr, env, ctx)?))),
            Code::And { left, right } => {
                let left = self.eval(left, env, ctx)?;
                if truthy(&left) {
                    self.eval(right, env, ctx)
                } else {
                    Ok(left)
                }
            }
            Code::Or { left, right } => {
                let left = self.eval(left, env, ctx)?;
                if truthy(&left) {
                    Ok(left)
                } else {
                    self.eval(right, env, ctx)
                }
            }
            Code::Not { expr } => Ok(Value::Bool(!truthy(&self.eval(expr, env, ctx)?))),
            Code::Neg { expr } => Ok(Value::Num(-to_num(&self.eval(expr, env, ctx)?))),
            Code::Arith { op, left, right } => {
                let x = to_num(&self.eval(left, env, ctx)?);
                let y = to_num(&self.eval(right, env, ctx)?);
                Ok(Value::Num(match op {
                    ArithOp::Add => x + y,
                    ArithOp::Sub => x - y,
                    ArithOp::Mul => x * y,
                    ArithOp::Div => x / y,
                    ArithOp::Rem => x % y,
                    ArithOp::BitAnd => (as_int(x) & as_int(y)) as f64,
                    ArithOp::BitOr => (as_int(x) | as_int(y)) as f64,
                    ArithOp::BitXor => (as_int(x) ^ as_int(y)) as f64,
                }))
            }
            Code::FloorDiv { left, right } => {
                let x = to_num(&self.eval(left, env, ctx)?);
                let y = to_num(&self.eval(right, env, ctx)?);
                Ok(Value::Num((x / y).floor()))
            }
            Code::Pow { left, right } => {
                let x = to_num(&self.eval(left, env, ctx)?);
                let y = to_num(&self.eval(right, env, ctx)?);
                Ok(Value::Num(x.powf(y)))
            }
            Code::Cmp { op, left, right } => {
                let left = self.eval(left, env, ctx)?;
                let right = self.eval(right, env, ctx)?;
                Ok(Value::Bool(match op {
                    CmpOp::Eq => loose_eq(&left, &right),
                    CmpOp::Ne => !loose_eq(&left, &right),
                    CmpOp::Lt => compare(&left, &right) == Some(std::cmp::Ordering::Less),
                    CmpOp::Gt => compare(&left, &right) == Some(std::cmp::Ordering::Greater),
                    CmpOp::Le => matches!(
                        compare(&left, &right),
                        Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)
                    ),
                    CmpOp::Ge => matches!(
                        compare(&left, &right),
                        Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)
                    ),
                }))
            }
            Code::Spaceship { left, right } => {
                let left = self.eval(left, env, ctx)?;
                let right = self.eval(right, env, ctx)?;
                let order = if loose_eq(&left, &right) {
                    0.0
                } else {
                    match compare(&left, &right) {
                        Some(std::cmp::Ordering::Less) => -1.0,
                        Some(std::cmp::Ordering::Greater) => 1.0,
                        _ => 0.0,
                    }
                };
                Ok(Value::Num(order))
            }
            Code::StrConcat { left, right } => {
                let mut out = to_str(&self.eval(left, env, ctx)?);
                out.push_str(&to_str(&self.eval(right, env, ctx)?));
                Ok(Value::Str(out))
            }
            Code::Operator { name, left, right } => {
                let left = self.eval(left, env, ctx)?;
                let right = self.eval(right, env, ctx)?;
                let op = self
                    .runtime
                    .operator(name)
                    .ok_or_else(|| RenderError::UnknownOperator(name.clone()))?;
                (*op)(self, vec![left, right])
            }
            Code::Test {
                test,
                expr,
                arg,
                negated,
            } => {
                let value = self.eval(expr, env, ctx)?;
                let arg = match arg {
                    Some(code) => Some(self.eval(code, env, ctx)?),
                    None => None,
                };
                let result = eval_test(*test, &value, arg.as_ref());
                Ok(Value::Bool(result != *negated))
            }
            Code::Filter { name, args } => {
                let args = self.eval_all(args, env, ctx)?;
                let filter = self
                    .runtime
                    .filter(name)
                    .ok_or_else(|| RenderError::UnknownFilter(name.clone()))?;
                (*filter)(self, args)
            }
            Code::FuncCall { name, args } => {
                let args = self.eval_all(args, env, ctx)?;
                let func = self
                    .runtime
                    .function(name)
                    .ok_or_else(|| RenderError::UnknownFunction(name.clone()))?;
                (*func)(self, args)
            }
            Code::CallValue { callee, args } => {
                let callee = self.eval(callee, env, ctx)?;
                let args = self.eval_all(args, env, ctx)?;
                self.apply(&callee, args)
            }
            Code::Array { items } => Ok(Value::list(self.eval_all(items, env, ctx)?)),
            Code::Hash { items } => {
                let items = self.eval_all(items, env, ctx)?;
                Ok(Value::hash(hash_from_items(items)))
            }
            Code::Index { expr, prop } => {
                let base = self.eval(expr, env, ctx)?;
                let prop = self.eval(prop, env, ctx)?;
                Ok(index_value(&base, &prop))
            }
            Code::Slice { expr, start, len } => {
                let value = self.eval(expr, env, ctx)?;
                let start = to_num(&self.eval(start, env, ctx)?);
                let len = match len {
                    Some(code) => Some(to_num(&self.eval(code, env, ctx)?)),
                    None => None,
                };
                Ok(slice_value(&value, start, len))
            }
            Code::Var { name } => Ok(env.get(name).unwrap_or(Value::Undef)),
            Code::DataGet { name } => {
                // Live overlays and locals shadow the data map, which
                // shadows the runtime's ambient globals.
                if let Some(value) = env.get(name) {
                    return Ok(value);
                }
                if let Value::Hash(pairs) = &ctx.data {
                    if let Some(value) = hash_get(pairs, name) {
                        return Ok(value.clone());
                    }
                }
                Ok(self.runtime.global(name).unwrap_or(Value::Undef))
            }
            Code::DataMap => Ok(ctx.data.clone()),
            Code::Let { name, value, body } => {
                let value = self.eval(value, env, ctx)?;
                env.define(name.clone(), value);
                self.eval(body, env, ctx)
            }
            Code::SetLocal { name, value } => {
                let value = self.eval(value, env, ctx)?;
                env.assign(name, value);
                Ok(Value::Str(String::new()))
            }
            Code::If { cond, then, els } => {
                if truthy(&self.eval(cond, env, ctx)?) {
                    self.eval(then, env, ctx)
                } else {
                    self.eval(els, env, ctx)
                }
            }
            Code::ForLoop {
                key,
                val,
                data,
                cond,
                body,
                els,
            } => self.eval_for(key.as_deref(), val, data, cond.as_deref(), body, els.as_deref(), env, ctx),
            Code::MergedContext { parts } => {
                let mut pairs = Pairs::new();
                for part in parts {
                    let value = self.eval(part, env, ctx)?;
                    match value {
                        Value::Hash(entries) => {
                            for (key, value) in entries.iter() {
                                hash_insert(&mut pairs, key.clone(), value.clone());
                            }
                        }
                        Value::Undef | Value::Null => {}
                        _ => {
                            return Err(RenderError::Type(
                                "context initializer must be a hash".into(),
                            ))
                        }
                    }
                }
                Ok(Value::hash(pairs))
            }
            Code::Include {
                name,
                context,
                optional,
            } => {
                let name = self.eval(name, env, ctx)?;
                let Some(template) = self.resolve_template(&name) else {
                    if *optional {
                        return Ok(Value::Str(String::new()));
                    }
                    return Err(RenderError::MissingTemplate(to_str(&name)));
                };
                let context = self.eval(context, env, ctx)?;
                let out = self.run_template(&template, context)?;
                Ok(Value::Str(out))
            }
            Code::ImportTemplate { name } => {
                let name = self.eval(name, env, ctx)?;
                let template = self
                    .resolve_template(&name)
                    .ok_or_else(|| RenderError::MissingTemplate(to_str(&name)))?;
                Ok(Value::Template(Arc::new(TemplateValue {
                    template,
                    data: ctx.data.clone(),
                })))
            }
            Code::SelfTemplate => Ok(Value::Template(Arc::new(TemplateValue {
                template: ctx.template.clone(),
                data: ctx.data.clone(),
            }))),
            Code::LambdaDef { params, unit } => Ok(Value::Lambda(Arc::new(LambdaValue {
                params: params.clone(),
                unit: (**unit).clone(),
                env: env.clone(),
                template: ctx.template.clone(),
                data: ctx.data.clone(),
            }))),
            Code::WithOverlay { init, body } => {
                let overlay = env.child();
                if let Some(init) = init {
                    let value = self.eval(init, env, ctx)?;
                    match value {
                        Value::Hash(pairs) => {
                            // Declaration order: later pairs shadow earlier
                            // ones, all shadow the outer frames.
                            for (key, value) in pairs.iter() {
                                overlay.define(key.clone(), value.clone());
                            }
                        }
                        _ => {
                            return Err(RenderError::Type(
                                "`with` initializer must be a hash".into(),
                            ))
                        }
                    }
                }
                self.eval(body, &overlay, ctx)
            }
            Code::WithOnly { init, unit } => {
                let data = match init {
                    Some(init) => {
                        let value = self.eval(init, env, ctx)?;
                        match value {
                            Value::Hash(_) => value,
                            _ => {
                                return Err(RenderError::Type(
                                    "`with` initializer must be a hash".into(),
                                ))
                            }
                        }
                    }
                    None => Value::empty_hash(),
                };
                let isolated = Env::new(None);
                let inner = UnitRt {
                    template: ctx.template.clone(),
                    data,
                };
                self.eval(&unit.body, &isolated, &inner)
            }
            Code::Spaceless { body } => {
                let value = self.eval(body, env, ctx)?;
                Ok(Value::Str(spaceless(&to_str(&value))))
            }
            Code::Discard { expr } => {
                self.eval(expr, env, ctx)?;
                Ok(Value::Str(String::new()))
            }
        }
    }

    fn eval_all(
        &mut self,
        codes: &[Code],
        env: &Env,
        ctx: &UnitRt,
    ) -> Result<Vec<Value>, RenderError> {
        codes.iter().map(|code| self.eval(code, env, ctx)).collect()
    }

    #[allow(clippy::too_many_arguments)]
    fn eval_for(
        &mut self,
        key: Option<&str>,
        val: &str,
        data: &Code,
        cond: Option<&Code>,
        body: &Code,
        els: Option<&Code>,
        env: &Env,
        ctx: &UnitRt,
    ) -> Result<Value, RenderError> {
        let source = self.eval(data, env, ctx)?;
        let entries = iterable_entries(&source);
        // The guard filters entries before loop counters are assigned, so
        // `loop.index` never skips and `loop.length` counts retained items.
        let retained = match cond {
            Some(cond) => {
                let mut kept = Vec::new();
                for (k, v) in entries {
                    let guard_env = env.child();
                    guard_env.define(val, v.clone());
                    if let Some(key) = key {
                        guard_env.define(key, k.clone());
                    }
                    if truthy(&self.eval(cond, &guard_env, ctx)?) {
                        kept.push((k, v));
                    }
                }
                kept
            }
            None => entries,
        };
        if retained.is_empty() {
            return match els {
                Some(els) => self.eval(els, env, ctx),
                None => Ok(Value::Str(String::new())),
            };
        }
        let total = retained.len();
        let mut out = String::new();
        for (index, (k, v)) in retained.into_iter().enumerate() {
            let body_env = env.child();
            body_env.define(val, v);
            if let Some(key) = key {
                body_env.define(key, k);
            }
            body_env.define("loop", loop_context(index, total));
            let value = self.eval(body, &body_env, ctx)?;
            out.push_str(&to_str(&value));
        }
        Ok(Value::Str(out))
    }

    fn resolve_template(&self, name: &Value) -> Option<Arc<Template>> {
        match name {
            Value::List(candidates) => candidates
                .iter()
                .find_map(|candidate| self.runtime.template(&to_str(candidate))),
            _ => self.runtime.template(&to_str(name)),
        }
    }
}

/// JS-style integer conversion for the bitwise operators.
fn as_int(n: f64) -> i64 {
    if n.is_finite() {
        n.trunc() as i64
    } else {
        0
    }
}

fn eval_test(test: TestOp, value: &Value, arg: Option<&Value>) -> bool {
    match test {
        TestOp::Defined => !matches!(value, Value::Undef),
        TestOp::Null => matches!(value, Value::Null | Value::Undef),
        TestOp::Empty => match value {
            Value::Undef | Value::Null => true,
            Value::Bool(b) => !b,
            Value::Str(s) => s.is_empty(),
            Value::List(items) => items.is_empty(),
            Value::Hash(pairs) => pairs.is_empty(),
            _ => false,
        },
        TestOp::Even => to_num(value) % 2.0 == 0.0,
        TestOp::Odd => (to_num(value) % 2.0).abs() == 1.0,
        TestOp::Iterable => matches!(value, Value::List(_) | Value::Hash(_)),
        TestOp::DivisibleBy => {
            let divisor = arg.map(to_num).unwrap_or(f64::NAN);
            to_num(value) % divisor == 0.0
        }
        TestOp::SameAs => arg.map(|arg| strict_eq(value, arg)).unwrap_or(false),
    }
}

fn iterable_entries(value: &Value) -> Vec<(Value, Value)> {
    match value {
        Value::List(items) => items
            .iter()
            .enumerate()
            .map(|(i, v)| (Value::num(i as f64), v.clone()))
            .collect(),
        Value::Hash(pairs) => pairs
            .iter()
            .map(|(k, v)| (Value::str(k.clone()), v.clone()))
            .collect(),
        Value::Str(s) => s
            .chars()
            .enumerate()
            .map(|(i, ch)| (Value::num(i as f64), Value::str(ch.to_string())))
            .collect(),
        _ => Vec::new(),
    }
}

fn loop_context(index: usize, total: usize) -> Value {
    Value::hash(vec![
        ("index".to_string(), Value::num((index + 1) as f64)),
        ("index0".to_string(), Value::num(index as f64)),
        ("revindex".to_string(), Value::num((total - index) as f64)),
        (
            "revindex0".to_string(),
            Value::num((total - index - 1) as f64),
        ),
        ("length".to_string(), Value::num(total as f64)),
        ("first".to_string(), Value::Bool(index == 0)),
        ("last".to_string(), Value::Bool(index == total - 1)),
    ])
}

fn index_value(base: &Value, prop: &Value) -> Value {
    match base {
        Value::Hash(pairs) => hash_get(pairs, &to_str(prop))
            .cloned()
            .unwrap_or(Value::Undef),
        Value::List(items) => {
            let index = to_num(prop);
            if index.is_finite() && index >= 0.0 {
                items.get(index as usize).cloned().unwrap_or(Value::Undef)
            } else {
                Value::Undef
            }
        }
        Value::Str(s) => {
            let index = to_num(prop);
            if index.is_finite() && index >= 0.0 {
                s.chars()
                    .nth(index as usize)
                    .map(|ch| Value::str(ch.to_string()))
                    .unwrap_or(Value::Undef)
            } else {
                Value::Undef
            }
        }
        Value::Template(t) => {
            let name = to_str(prop);
            t.template
                .macros
                .iter()
                .position(|def| def.name == name)
                .map(|index| {
                    Value::Macro(Arc::new(MacroValue {
                        template: t.template.clone(),
                        index,
                        data: t.data.clone(),
                    }))
                })
                .unwrap_or(Value::Undef)
        }
        _ => Value::Undef,
    }
}

/// slice(value, start, length): negative starts count from the end, a
/// negative length stops that many items short of the end.
pub(super) fn slice_value(value: &Value, start: f64, len: Option<f64>) -> Value {
    match value {
        Value::List(items) => {
            let (from, to) = slice_range(items.len(), start, len);
            Value::list(items[from..to].to_vec())
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let (from, to) = slice_range(chars.len(), start, len);
            Value::str(chars[from..to].iter().collect::<String>())
        }
        _ => Value::Undef,
    }
}

fn slice_range(total: usize, start: f64, len: Option<f64>) -> (usize, usize) {
    let total_f = total as f64;
    let from = if start < 0.0 {
        (total_f + start).max(0.0)
    } else {
        start.min(total_f)
    };
    let to = match len {
        None => total_f,
        Some(l) if l >= 0.0 => (from + l).min(total_f),
        Some(l) => (total_f + l).max(from),
    };
    (from as usize, to.max(from) as usize)
}
