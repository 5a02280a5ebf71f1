use std::collections::HashMap;
use std::sync::Arc;

use crate::ast::{Node, NodeKind, TagNode};
use crate::compiler::Compiler;
use crate::error::Error;
use crate::ir::Code;
use crate::parser::Parser;
use crate::scope::ScopeId;

/// What a tag compile hook (or a node hook) may hand back: a finished IR
/// fragment used verbatim, or a substitute node recompiled generically.
#[derive(Debug, Clone)]
pub enum Compiled {
    Code(Code),
    Node(Node),
}

pub type TagParseFn =
    Arc<dyn Fn(&mut Parser<'_>) -> Result<TagNode, Error> + Send + Sync>;
pub type TagCompileFn =
    Arc<dyn Fn(&mut Compiler<'_>, ScopeId, &TagNode) -> Result<Compiled, Error> + Send + Sync>;
pub type HookFn =
    Arc<dyn Fn(&mut Compiler<'_>, ScopeId, &Node) -> Result<Option<Compiled>, Error> + Send + Sync>;

/// A tag's two halves. `parse` runs at statement dispatch; `compile` is
/// looked up again at compile time, so a registration without it only fails
/// when a template actually uses the tag.
#[derive(Clone)]
pub struct TagDescriptor {
    pub parse: TagParseFn,
    pub compile: Option<TagCompileFn>,
}

impl TagDescriptor {
    pub fn new(parse: TagParseFn, compile: Option<TagCompileFn>) -> Self {
        Self { parse, compile }
    }
}

/// Name → descriptor table. Owned by an [`Engine`](crate::Engine); never
/// process-global. Temporary overrides are layered with [`overlay`] rather
/// than mutating and restoring shared state.
///
/// [`overlay`]: TagRegistry::overlay
#[derive(Clone, Default)]
pub struct TagRegistry {
    tags: HashMap<String, TagDescriptor>,
}

impl TagRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&TagDescriptor> {
        self.tags.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, descriptor: TagDescriptor) {
        self.tags.insert(name.into(), descriptor);
    }

    /// A new registry with `overrides` shadowing this one's entries.
    pub fn overlay(&self, overrides: &TagRegistry) -> TagRegistry {
        let mut merged = self.clone();
        for (name, descriptor) in &overrides.tags {
            merged.tags.insert(name.clone(), descriptor.clone());
        }
        merged
    }
}

/// Per-node-kind compile-time rewrite hooks, consulted before the default
/// compilation rule. Registering a kind twice replaces the handler.
#[derive(Clone, Default)]
pub struct HookRegistry {
    hooks: HashMap<NodeKind, HookFn>,
}

impl HookRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: NodeKind) -> Option<&HookFn> {
        self.hooks.get(&kind)
    }

    pub fn insert(&mut self, kind: NodeKind, hook: HookFn) {
        self.hooks.insert(kind, hook);
    }
}
