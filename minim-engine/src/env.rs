//! Lexically scoped execution environment.

use smol_str::SmolStr;

use crate::handle::Handle;
use crate::value::Value;

/// A single environment frame.
///
/// Local variables live in slots indexed by definition order. The name
/// table and the value vector always have the same length, and a name's
/// slot index never changes once allocated.
#[derive(Debug, Default)]
pub struct Env {
    names: Vec<SmolStr>,
    values: Vec<Value>,
    parent: Option<Handle<Env>>,
}

impl Env {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parent(parent: Handle<Env>) -> Self {
        Self {
            names: Vec::new(),
            values: Vec::new(),
            parent: Some(parent),
        }
    }

    #[inline]
    pub fn parent(&self) -> Option<Handle<Env>> {
        self.parent.clone()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Allocate a slot for a local variable.
    ///
    /// Allocating a name that already has a slot returns the existing
    /// index, so redefinition overwrites in place.
    pub fn alloc_local(&mut self, name: &str) -> usize {
        match self.find_local(name) {
            Some(index) => index,
            None => {
                let index = self.names.len();
                self.names.push(SmolStr::from(name));
                self.values.push(Value::Nil);
                index
            }
        }
    }

    pub fn find_local(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|local| local.as_str() == name)
    }

    pub fn read_local(&self, index: usize) -> Value {
        self.values.get(index).cloned().unwrap_or(Value::Nil)
    }

    pub fn assign_local(&mut self, index: usize, value: Value) {
        self.values[index] = value;
    }

    /// Resolve a name against this frame and its lexical parents.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(index) = self.find_local(name) {
            return Some(self.read_local(index));
        }

        let mut env = self.parent.clone();
        while let Some(handle) = env {
            let frame = handle.borrow();
            if let Some(index) = frame.find_local(name) {
                return Some(frame.read_local(index));
            }
            let next = frame.parent();
            drop(frame);
            env = next;
        }

        None
    }

    /// Fresh instance of this frame for a procedure call.
    ///
    /// The slot names and current values are copied so recursion does not
    /// alias locals; the parent is replaced with the callee's captured
    /// lexical parent.
    pub(crate) fn dup_for_call(&self, parent: Option<Handle<Env>>) -> Env {
        Env {
            names: self.names.clone(),
            values: self.values.clone(),
            parent,
        }
    }
}
