use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::values::Value;

/// Parent-linked runtime frames. Lookup walks toward the root; assignment
/// writes into the nearest frame already owning the name, else the current
/// frame, mirroring the compile-time scope model.
#[derive(Debug, Clone, Default)]
pub struct Env {
    parent: Option<Arc<Env>>,
    values: Arc<Mutex<HashMap<String, Value>>>,
}

impl Env {
    pub fn new(parent: Option<Arc<Env>>) -> Self {
        Self {
            parent,
            values: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn child(&self) -> Env {
        Env::new(Some(Arc::new(self.clone())))
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        if let Ok(values) = self.values.lock() {
            if let Some(value) = values.get(name) {
                return Some(value.clone());
            }
        }
        self.parent.as_ref().and_then(|parent| parent.get(name))
    }

    /// Binds in this frame, shadowing any outer binding.
    pub fn define(&self, name: impl Into<String>, value: Value) {
        if let Ok(mut values) = self.values.lock() {
            values.insert(name.into(), value);
        }
    }

    /// Writes through to the owning frame, defaulting to this one.
    pub fn assign(&self, name: &str, value: Value) {
        let mut frame = self;
        loop {
            if frame.owns(name) {
                frame.define(name, value);
                return;
            }
            match frame.parent.as_deref() {
                Some(parent) => frame = parent,
                None => break,
            }
        }
        self.define(name, value);
    }

    fn owns(&self, name: &str) -> bool {
        self.values
            .lock()
            .map(|values| values.contains_key(name))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::values::to_num;

    #[test]
    fn get_walks_parent_frames() {
        let root = Env::new(None);
        root.define("x", Value::num(1.0));
        let child = root.child();
        assert!(matches!(child.get("x"), Some(Value::Num(_))));
        assert!(child.get("y").is_none());
    }

    #[test]
    fn assign_writes_through_to_the_owner() {
        let root = Env::new(None);
        root.define("x", Value::num(1.0));
        let child = root.child();
        child.assign("x", Value::num(2.0));
        assert_eq!(root.get("x").map(|v| to_num(&v)), Some(2.0));
    }

    #[test]
    fn assign_defaults_to_the_current_frame() {
        let root = Env::new(None);
        let child = root.child();
        child.assign("fresh", Value::num(1.0));
        assert!(child.get("fresh").is_some());
        assert!(root.get("fresh").is_none());
    }

    #[test]
    fn define_shadows_without_touching_the_parent() {
        let root = Env::new(None);
        root.define("x", Value::num(1.0));
        let child = root.child();
        child.define("x", Value::num(9.0));
        assert_eq!(root.get("x").map(|v| to_num(&v)), Some(1.0));
        assert_eq!(child.get("x").map(|v| to_num(&v)), Some(9.0));
    }
}
