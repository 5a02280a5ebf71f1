/// Compile-time lexical frames, kept in a parent-linked arena and addressed
/// by index. This models which names are bound where while compiling; the
/// generated code does its own (dynamic) resolution at run time.
pub type ScopeId = usize;

#[derive(Debug)]
struct Frame {
    parent: Option<ScopeId>,
    names: Vec<String>,
}

#[derive(Debug, Default)]
pub struct ScopeArena {
    frames: Vec<Frame>,
}

impl ScopeArena {
    pub fn new() -> Self {
        Self { frames: Vec::new() }
    }

    pub fn root(&mut self) -> ScopeId {
        self.push(None, &[])
    }

    /// Creates a child frame predefining `names`.
    pub fn extend(&mut self, parent: ScopeId, names: &[String]) -> ScopeId {
        self.push(Some(parent), names)
    }

    fn push(&mut self, parent: Option<ScopeId>, names: &[String]) -> ScopeId {
        self.frames.push(Frame {
            parent,
            names: names.to_vec(),
        });
        self.frames.len() - 1
    }

    /// Binds `name` directly in `scope`.
    pub fn def(&mut self, scope: ScopeId, name: &str) {
        let frame = &mut self.frames[scope];
        if !frame.names.iter().any(|n| n == name) {
            frame.names.push(name.to_string());
        }
    }

    /// Binds in the nearest frame (walking up) that already owns `name`,
    /// defaulting to `scope` itself when none does. Returns the owning frame.
    pub fn set(&mut self, scope: ScopeId, name: &str) -> ScopeId {
        let target = self.lookup(scope, name).unwrap_or(scope);
        self.def(target, name);
        target
    }

    /// Walks from `scope` to the root; returns the frame owning `name`.
    pub fn lookup(&self, scope: ScopeId, name: &str) -> Option<ScopeId> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let frame = &self.frames[id];
            if frame.names.iter().any(|n| n == name) {
                return Some(id);
            }
            current = frame.parent;
        }
        None
    }

    /// Names bound directly in `scope`, in binding order.
    pub fn own(&self, scope: ScopeId) -> &[String] {
        &self.frames[scope].names
    }

    /// All names visible from `scope`, outermost frame first so inner
    /// bindings win when the caller merges them into a map.
    pub fn visible(&self, scope: ScopeId) -> Vec<String> {
        let mut chain = Vec::new();
        let mut current = Some(scope);
        while let Some(id) = current {
            chain.push(id);
            current = self.frames[id].parent;
        }
        let mut names = Vec::new();
        for id in chain.into_iter().rev() {
            for name in &self.frames[id].names {
                if !names.iter().any(|n| n == name) {
                    names.push(name.clone());
                }
            }
        }
        names
    }
}
