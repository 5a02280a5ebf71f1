use std::cmp::Ordering;
use std::sync::Arc;

use crate::ir::{Template, Unit};

use super::env::Env;

/// Ordered key/value pairs backing a hash value. Kept as a vector so that
/// iteration and rendering follow insertion order deterministically.
pub type Pairs = Vec<(String, Value)>;

/// The tagged value union the generated code runs on, with explicit
/// coercion functions implementing the template language's truthiness,
/// numeric and stringification rules. `Undef` models a missing parameter or
/// member (distinct from an explicit null, which `is defined` must see).
#[derive(Debug, Clone)]
pub enum Value {
    Undef,
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    List(Arc<Vec<Value>>),
    Hash(Arc<Pairs>),
    Lambda(Arc<LambdaValue>),
    Macro(Arc<MacroValue>),
    Template(Arc<TemplateValue>),
}

#[derive(Debug)]
pub struct LambdaValue {
    pub params: Vec<String>,
    pub unit: Unit,
    pub env: Env,
    pub template: Arc<Template>,
    pub data: Value,
}

/// A macro bound to the template instance that exported it: its free names
/// resolve against that instance's data map, never the call site's locals.
#[derive(Debug)]
pub struct MacroValue {
    pub template: Arc<Template>,
    pub index: usize,
    pub data: Value,
}

/// An imported template's export table, bound to the importing site's data.
#[derive(Debug)]
pub struct TemplateValue {
    pub template: Arc<Template>,
    pub data: Value,
}

impl Value {
    pub fn str(value: impl Into<String>) -> Self {
        Value::Str(value.into())
    }

    pub fn num(value: f64) -> Self {
        Value::Num(value)
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Arc::new(items))
    }

    pub fn hash(pairs: Pairs) -> Self {
        Value::Hash(Arc::new(pairs))
    }

    pub fn empty_hash() -> Self {
        Value::Hash(Arc::new(Vec::new()))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Num(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Num(value as f64)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

/// Truthiness: null/undefined, `""` and `"0"`, empty lists, zero and NaN
/// are falsy; hashes and callables are always truthy.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Undef | Value::Null => false,
        Value::Bool(b) => *b,
        Value::Num(n) => *n != 0.0 && !n.is_nan(),
        Value::Str(s) => !s.is_empty() && s != "0",
        Value::List(items) => !items.is_empty(),
        Value::Hash(_) | Value::Lambda(_) | Value::Macro(_) | Value::Template(_) => true,
    }
}

pub fn to_num(value: &Value) -> f64 {
    match value {
        Value::Undef => f64::NAN,
        Value::Null => 0.0,
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Value::Num(n) => *n,
        Value::Str(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                0.0
            } else {
                trimmed.parse().unwrap_or(f64::NAN)
            }
        }
        _ => f64::NAN,
    }
}

pub fn to_str(value: &Value) -> String {
    match value {
        Value::Undef | Value::Null => String::new(),
        Value::Bool(b) => if *b { "true" } else { "false" }.to_string(),
        Value::Num(n) => fmt_num(*n),
        Value::Str(s) => s.clone(),
        Value::List(items) => items
            .iter()
            .map(to_str)
            .collect::<Vec<_>>()
            .join(","),
        Value::Hash(_) => serde_json::to_string(&to_json(value)).unwrap_or_default(),
        Value::Lambda(_) | Value::Macro(_) | Value::Template(_) => String::new(),
    }
}

/// Integral numbers render without a fraction; the rest keep the shortest
/// float form.
pub fn fmt_num(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == n.trunc() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// Loose equality: null and undefined agree, numeric strings compare
/// numerically against numbers and booleans, collections compare
/// structurally.
pub fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Undef | Value::Null, Value::Undef | Value::Null) => true,
        (Value::Undef | Value::Null, _) | (_, Value::Undef | Value::Null) => false,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Num(x), Value::Num(y)) => x == y,
        (Value::Bool(_) | Value::Num(_) | Value::Str(_), Value::Bool(_) | Value::Num(_) | Value::Str(_)) => {
            to_num(a) == to_num(b)
        }
        (Value::List(x), Value::List(y)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(a, b)| loose_eq(a, b))
        }
        (Value::Hash(x), Value::Hash(y)) => {
            x.len() == y.len()
                && x.iter().all(|(key, value)| {
                    hash_get(y, key).map(|other| loose_eq(value, other)) == Some(true)
                })
        }
        _ => false,
    }
}

/// Strict equality (`same as`): same tag, same value.
pub fn strict_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Undef, Value::Undef) | (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Num(x), Value::Num(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::List(x), Value::List(y)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(a, b)| strict_eq(a, b))
        }
        (Value::Hash(x), Value::Hash(y)) => {
            x.len() == y.len()
                && x.iter().all(|(key, value)| {
                    hash_get(y, key).map(|other| strict_eq(value, other)) == Some(true)
                })
        }
        _ => false,
    }
}

/// Ordering for `<`/`>`/sorting: two strings compare lexicographically,
/// anything else numerically. `None` when a NaN is involved.
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    if let (Value::Str(x), Value::Str(y)) = (a, b) {
        return Some(x.cmp(y));
    }
    to_num(a).partial_cmp(&to_num(b))
}

pub fn hash_get<'a>(pairs: &'a Pairs, key: &str) -> Option<&'a Value> {
    pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v)
}

/// Inserts preserving first-seen position: an existing key keeps its slot
/// and takes the new value.
pub fn hash_insert(pairs: &mut Pairs, key: String, value: Value) {
    if let Some(slot) = pairs.iter_mut().find(|(k, _)| *k == key) {
        slot.1 = value;
    } else {
        pairs.push((key, value));
    }
}

/// Builds hash pairs from an alternating key/value list.
pub fn hash_from_items(items: Vec<Value>) -> Pairs {
    let mut pairs = Pairs::new();
    let mut iter = items.into_iter();
    while let Some(key) = iter.next() {
        let value = iter.next().unwrap_or(Value::Undef);
        hash_insert(&mut pairs, to_str(&key), value);
    }
    pairs
}

pub fn to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Undef | Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Num(n) => {
            if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
                serde_json::Value::from(*n as i64)
            } else {
                serde_json::Number::from_f64(*n)
                    .map(serde_json::Value::Number)
                    .unwrap_or(serde_json::Value::Null)
            }
        }
        Value::Str(s) => serde_json::Value::String(s.clone()),
        Value::List(items) => serde_json::Value::Array(items.iter().map(to_json).collect()),
        Value::Hash(pairs) => {
            let mut map = serde_json::Map::new();
            for (key, value) in pairs.iter() {
                map.insert(key.clone(), to_json(value));
            }
            serde_json::Value::Object(map)
        }
        Value::Lambda(_) | Value::Macro(_) | Value::Template(_) => serde_json::Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness_follows_the_documented_table() {
        assert!(!truthy(&Value::Null));
        assert!(!truthy(&Value::Undef));
        assert!(!truthy(&Value::str("")));
        assert!(!truthy(&Value::str("0")));
        assert!(truthy(&Value::str("0.0")));
        assert!(!truthy(&Value::num(0.0)));
        assert!(!truthy(&Value::num(f64::NAN)));
        assert!(!truthy(&Value::list(vec![])));
        assert!(truthy(&Value::list(vec![Value::num(1.0)])));
        assert!(truthy(&Value::empty_hash()));
    }

    #[test]
    fn numbers_render_without_trailing_zero_fraction() {
        assert_eq!(fmt_num(3.0), "3");
        assert_eq!(fmt_num(3.5), "3.5");
        assert_eq!(fmt_num(-0.0), "0");
        assert_eq!(fmt_num(f64::NAN), "NaN");
    }

    #[test]
    fn null_and_undef_stringify_to_nothing() {
        assert_eq!(to_str(&Value::Null), "");
        assert_eq!(to_str(&Value::Undef), "");
    }

    #[test]
    fn lists_stringify_comma_joined() {
        let list = Value::list(vec![Value::num(1.0), Value::num(2.0)]);
        assert_eq!(to_str(&list), "1,2");
    }

    #[test]
    fn loose_equality_coerces_across_numbers_and_strings() {
        assert!(loose_eq(&Value::num(1.0), &Value::str("1")));
        assert!(loose_eq(&Value::Bool(true), &Value::num(1.0)));
        assert!(loose_eq(&Value::Null, &Value::Undef));
        assert!(!loose_eq(&Value::Null, &Value::num(0.0)));
        assert!(!loose_eq(&Value::str("a"), &Value::num(0.0)));
    }

    #[test]
    fn strict_equality_requires_the_same_tag() {
        assert!(!strict_eq(&Value::num(1.0), &Value::str("1")));
        assert!(strict_eq(&Value::str("1"), &Value::str("1")));
        assert!(!strict_eq(&Value::Null, &Value::Undef));
    }

    #[test]
    fn string_comparison_is_lexicographic() {
        assert_eq!(
            compare(&Value::str("abc"), &Value::str("abd")),
            Some(Ordering::Less)
        );
        assert_eq!(
            compare(&Value::str("10"), &Value::num(9.0)),
            Some(Ordering::Greater)
        );
    }

    #[test]
    fn hash_insert_keeps_first_position_on_override() {
        let mut pairs = Pairs::new();
        hash_insert(&mut pairs, "a".to_string(), Value::num(1.0));
        hash_insert(&mut pairs, "b".to_string(), Value::num(2.0));
        hash_insert(&mut pairs, "a".to_string(), Value::num(3.0));
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].0, "a");
        assert!(matches!(pairs[0].1, Value::Num(n) if n == 3.0));
    }

    #[test]
    fn json_encoding_keeps_integers_integral() {
        let value = Value::hash(vec![("n".to_string(), Value::num(2.0))]);
        assert_eq!(to_str(&value), r#"{"n":2}"#);
    }
}
