use std::collections::HashMap;
use std::sync::Arc;

use crate::error::RenderError;
use crate::ir::{Artifact, Template};

mod env;
mod escape;
mod filters;
mod functions;
mod interp;
mod operators;
mod values;

pub use escape::{escape_html, escape_js, spaceless};
pub use interp::Evaluator;
pub use values::{to_num, to_str, truthy, Pairs, Value};

/// Signature shared by filters, functions and named operators. `args[0]` is
/// the filtered subject for filters; the evaluator parameter lets builtins
/// drive caller-supplied lambdas.
pub type BuiltinFn =
    Arc<dyn Fn(&mut Evaluator<'_>, Vec<Value>) -> Result<Value, RenderError> + Send + Sync>;

/// The primitive library compiled templates run against: the template
/// registry plus the filter/operator/function tables and ambient globals.
/// Configure once, then share across renders.
pub struct Runtime {
    templates: HashMap<String, Arc<Template>>,
    filters: HashMap<String, BuiltinFn>,
    operators: HashMap<String, BuiltinFn>,
    functions: HashMap<String, BuiltinFn>,
    globals: HashMap<String, Value>,
}

impl Runtime {
    pub fn new() -> Self {
        let mut filters = HashMap::new();
        filters::install(&mut filters);
        let mut operators = HashMap::new();
        operators::install(&mut operators);
        let mut functions = HashMap::new();
        functions::install(&mut functions);
        Self {
            templates: HashMap::new(),
            filters,
            operators,
            functions,
            globals: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, template: Template) {
        self.templates.insert(name.into(), Arc::new(template));
    }

    pub fn register_artifact(&mut self, name: impl Into<String>, artifact: &Artifact) {
        self.register(name, artifact.template.clone());
    }

    /// Renders a registered template against a data map.
    pub fn exec(&self, name: &str, data: Value) -> Result<String, RenderError> {
        let template = self
            .template(name)
            .ok_or_else(|| RenderError::MissingTemplate(name.to_string()))?;
        Evaluator::new(self).run_template(&template, data)
    }

    pub fn def_filter(&mut self, name: impl Into<String>, filter: BuiltinFn) {
        self.filters.insert(name.into(), filter);
    }

    pub fn def_function(&mut self, name: impl Into<String>, function: BuiltinFn) {
        self.functions.insert(name.into(), function);
    }

    pub fn def_operator(&mut self, name: impl Into<String>, operator: BuiltinFn) {
        self.operators.insert(name.into(), operator);
    }

    pub fn set_global(&mut self, name: impl Into<String>, value: Value) {
        self.globals.insert(name.into(), value);
    }

    pub(crate) fn template(&self, name: &str) -> Option<Arc<Template>> {
        self.templates.get(name).cloned()
    }

    pub(crate) fn filter(&self, name: &str) -> Option<BuiltinFn> {
        self.filters.get(name).cloned()
    }

    pub(crate) fn operator(&self, name: &str) -> Option<BuiltinFn> {
        self.operators.get(name).cloned()
    }

    pub(crate) fn function(&self, name: &str) -> Option<BuiltinFn> {
        self.functions.get(name).cloned()
    }

    pub(crate) fn global(&self, name: &str) -> Option<Value> {
        self.globals.get(name).cloned()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}
