//! Lexical scope chain.
//!
//! Scopes form a tree rooted at each top-level run; handles only ever point
//! from a child to its parent, so the reference-counted graph is acyclic
//! and a scope lives exactly as long as the longest-lived block or call
//! frame holding a handle to it.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::bytecode::rodata::SymbolId;
use crate::lang::value::Value;

pub type ScopeRef = Rc<RefCell<Scope>>;

#[derive(Debug, Default)]
pub struct Scope {
    vars: HashMap<SymbolId, Value>,
    parent: Option<ScopeRef>,
}

impl Scope {
    /// A fresh chain root.
    pub fn root() -> ScopeRef {
        Rc::new(RefCell::new(Scope::default()))
    }

    /// A child frame whose lookups fall through to `parent`.
    pub fn child_of(parent: &ScopeRef) -> ScopeRef {
        Rc::new(RefCell::new(Scope {
            vars: HashMap::new(),
            parent: Some(Rc::clone(parent)),
        }))
    }

    /// Walk the chain outward looking for `name`.
    pub fn lookup(scope: &ScopeRef, name: SymbolId) -> Option<Value> {
        let mut current = Rc::clone(scope);
        loop {
            let next = {
                let s = current.borrow();
                if let Some(value) = s.vars.get(&name) {
                    return Some(value.clone());
                }
                s.parent.clone()
            };
            current = next?;
        }
    }

    /// Assign to the nearest enclosing binding of `name`, or define it in
    /// `scope` when no enclosing binding exists. Writing through to the
    /// defining frame is what lets a closure mutate its captured variables.
    pub fn store(scope: &ScopeRef, name: SymbolId, value: Value) {
        let mut current = Rc::clone(scope);
        loop {
            let next = {
                let mut s = current.borrow_mut();
                if s.vars.contains_key(&name) {
                    s.vars.insert(name, value);
                    return;
                }
                s.parent.clone()
            };
            match next {
                Some(parent) => current = parent,
                None => break,
            }
        }
        scope.borrow_mut().vars.insert(name, value);
    }

    /// Define `name` in this frame, shadowing any outer binding.
    pub fn define(scope: &ScopeRef, name: SymbolId, value: Value) {
        scope.borrow_mut().vars.insert(name, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_walks_the_chain() {
        let root = Scope::root();
        let child = Scope::child_of(&root);
        Scope::define(&root, SymbolId(0), Value::Integer(1));
        assert_eq!(Scope::lookup(&child, SymbolId(0)), Some(Value::Integer(1)));
        assert_eq!(Scope::lookup(&child, SymbolId(9)), None);
    }

    #[test]
    fn store_reaches_the_defining_frame() {
        let root = Scope::root();
        let child = Scope::child_of(&root);
        Scope::define(&root, SymbolId(0), Value::Integer(1));
        Scope::store(&child, SymbolId(0), Value::Integer(2));
        assert_eq!(Scope::lookup(&root, SymbolId(0)), Some(Value::Integer(2)));
        // Unbound names land in the frame doing the store.
        Scope::store(&child, SymbolId(5), Value::Bool(true));
        assert_eq!(Scope::lookup(&root, SymbolId(5)), None);
        assert_eq!(Scope::lookup(&child, SymbolId(5)), Some(Value::Bool(true)));
    }

    #[test]
    fn scope_outlives_its_creating_chain() {
        let kept;
        {
            let root = Scope::root();
            Scope::define(&root, SymbolId(3), Value::Integer(7));
            kept = Scope::child_of(&root);
        }
        // The parent is kept alive by the child handle alone.
        assert_eq!(Scope::lookup(&kept, SymbolId(3)), Some(Value::Integer(7)));
    }
}
