//! Loop variable scopes.
//!
//! Each loop iteration pushes a frame binding its variable to the
//! iteration value; leaving the loop pops it. Lookups walk the stack
//! innermost-first, so a nested loop reusing an outer variable name
//! shadows it for its own children and the outer binding reappears
//! untouched when the inner loop finishes.

use std::collections::BTreeMap;

use crate::events::Value;

/// One active loop iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopFrame {
    /// Item id of the loop that pushed this frame.
    pub item_id: u32,
    /// Variable bound by the loop, if it declares one.
    pub variable: Option<String>,
    /// Value for the current iteration.
    pub value: Value,
    /// Zero-based iteration ordinal, for diagnostics.
    pub iteration: usize,
}

/// Stack of active loop iterations, outermost first.
#[derive(Debug, Clone, Default)]
pub struct ScopeStack {
    frames: Vec<LoopFrame>,
}

impl ScopeStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: LoopFrame) {
        self.frames.push(frame);
    }

    pub fn pop(&mut self) {
        self.frames.pop();
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Resolve a variable name against the innermost binding.
    pub fn resolve(&self, name: &str) -> Option<&Value> {
        self.frames
            .iter()
            .rev()
            .find(|frame| frame.variable.as_deref() == Some(name))
            .map(|frame| &frame.value)
    }

    /// All visible bindings by name, inner shadowing outer. Used for
    /// measurement conditions snapshots.
    pub fn bindings(&self) -> BTreeMap<String, Value> {
        let mut map = BTreeMap::new();
        for frame in &self.frames {
            if let Some(name) = &frame.variable {
                map.insert(name.clone(), frame.value.clone());
            }
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(item_id: u32, variable: Option<&str>, value: f64, iteration: usize) -> LoopFrame {
        LoopFrame {
            item_id,
            variable: variable.map(str::to_string),
            value: Value::Number(value),
            iteration,
        }
    }

    #[test]
    fn test_resolve_missing_name() {
        let scopes = ScopeStack::new();
        assert_eq!(scopes.resolve("TEMP"), None);
    }

    #[test]
    fn test_innermost_binding_wins() {
        let mut scopes = ScopeStack::new();
        scopes.push(frame(1, Some("X"), 1.0, 0));
        scopes.push(frame(2, Some("X"), 2.0, 0));
        assert_eq!(scopes.resolve("X"), Some(&Value::Number(2.0)));

        scopes.pop();
        assert_eq!(scopes.resolve("X"), Some(&Value::Number(1.0)));
    }

    #[test]
    fn test_unnamed_frames_do_not_bind() {
        let mut scopes = ScopeStack::new();
        scopes.push(frame(1, Some("X"), 1.0, 0));
        scopes.push(frame(2, None, 99.0, 3));
        assert_eq!(scopes.resolve("X"), Some(&Value::Number(1.0)));
        assert_eq!(scopes.depth(), 2);
    }

    #[test]
    fn test_bindings_shadow_in_snapshot() {
        let mut scopes = ScopeStack::new();
        scopes.push(frame(1, Some("TEMP"), 25.0, 0));
        scopes.push(frame(2, Some("VDD"), 1.8, 1));
        scopes.push(frame(3, Some("TEMP"), 85.0, 2));
        let bindings = scopes.bindings();
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings.get("TEMP"), Some(&Value::Number(85.0)));
        assert_eq!(bindings.get("VDD"), Some(&Value::Number(1.8)));
    }
}
