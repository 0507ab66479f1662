use indexmap::IndexMap;

use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeId(usize);

#[derive(Debug)]
struct Frame {
    bindings: IndexMap<String, Value>,
    parent: Option<ScopeId>,
}

/// Tree of variable frames. Each frame links to its parent; lookups walk
/// upward, declarations touch only the given frame.
///
/// Frames are entered and exited in stack order, so exiting a frame also
/// drops everything entered after it.
#[derive(Debug)]
pub struct ScopeTree {
    frames: Vec<Frame>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlreadyDeclared;

impl ScopeTree {
    pub fn new(root: IndexMap<String, Value>) -> Self {
        Self {
            frames: vec![Frame {
                bindings: root,
                parent: None,
            }],
        }
    }

    pub fn root(&self) -> ScopeId {
        ScopeId(0)
    }

    pub fn enter(&mut self, parent: ScopeId) -> ScopeId {
        self.frames.push(Frame {
            bindings: IndexMap::new(),
            parent: Some(parent),
        });
        ScopeId(self.frames.len() - 1)
    }

    pub fn exit(&mut self, scope: ScopeId) {
        if scope.0 > 0 {
            self.frames.truncate(scope.0);
        }
    }

    pub fn declare(
        &mut self,
        scope: ScopeId,
        name: &str,
        value: Value,
    ) -> Result<(), AlreadyDeclared> {
        let frame = &mut self.frames[scope.0];
        if frame.bindings.contains_key(name) {
            return Err(AlreadyDeclared);
        }
        frame.bindings.insert(name.to_string(), value);
        Ok(())
    }

    /// Binds `name` in `scope`, replacing any local binding.
    pub fn set_local(&mut self, scope: ScopeId, name: &str, value: Value) {
        self.frames[scope.0].bindings.insert(name.to_string(), value);
    }

    /// Frame that holds `name`, searching from `scope` outward.
    fn owner(&self, scope: ScopeId, name: &str) -> Option<ScopeId> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let frame = &self.frames[id.0];
            if frame.bindings.contains_key(name) {
                return Some(id);
            }
            current = frame.parent;
        }
        None
    }

    pub fn lookup(&self, scope: ScopeId, name: &str) -> Option<&Value> {
        let owner = self.owner(scope, name)?;
        self.frames[owner.0].bindings.get(name)
    }

    pub fn lookup_mut(&mut self, scope: ScopeId, name: &str) -> Option<&mut Value> {
        let owner = self.owner(scope, name)?;
        self.frames[owner.0].bindings.get_mut(name)
    }

    /// Every binding visible from `scope`; inner frames shadow outer ones.
    pub fn snapshot(&self, scope: ScopeId) -> IndexMap<String, Value> {
        let mut chain = Vec::new();
        let mut current = Some(scope);
        while let Some(id) = current {
            chain.push(id);
            current = self.frames[id.0].parent;
        }

        let mut visible = IndexMap::new();
        for id in chain.into_iter().rev() {
            for (name, value) in &self.frames[id.0].bindings {
                visible.insert(name.clone(), value.clone());
            }
        }
        visible
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> ScopeTree {
        let mut root = IndexMap::new();
        root.insert("name".to_string(), Value::from("root"));
        ScopeTree::new(root)
    }

    #[test]
    fn lookup_walks_to_parent() {
        let mut scopes = tree();
        let child = scopes.enter(scopes.root());
        assert_eq!(scopes.lookup(child, "name"), Some(&Value::from("root")));
        assert_eq!(scopes.lookup(child, "missing"), None);
    }

    #[test]
    fn declarations_are_local() {
        let mut scopes = tree();
        let child = scopes.enter(scopes.root());
        scopes.declare(child, "name", Value::from("child")).unwrap();
        assert_eq!(scopes.declare(child, "name", Value::Null), Err(AlreadyDeclared));
        assert_eq!(scopes.lookup(child, "name"), Some(&Value::from("child")));

        scopes.exit(child);
        assert_eq!(scopes.lookup(scopes.root(), "name"), Some(&Value::from("root")));
    }

    #[test]
    fn writes_reach_the_owning_frame() {
        let mut scopes = tree();
        let child = scopes.enter(scopes.root());
        if let Some(value) = scopes.lookup_mut(child, "name") {
            *value = Value::from("renamed");
        }
        scopes.exit(child);
        assert_eq!(scopes.lookup(scopes.root(), "name"), Some(&Value::from("renamed")));
    }

    #[test]
    fn snapshot_prefers_inner_bindings() {
        let mut scopes = tree();
        let child = scopes.enter(scopes.root());
        scopes.set_local(child, "name", Value::from("inner"));
        scopes.set_local(child, "extra", Value::Bool(true));

        let visible = scopes.snapshot(child);
        assert_eq!(visible["name"], Value::from("inner"));
        assert_eq!(visible["extra"], Value::Bool(true));
    }
}
