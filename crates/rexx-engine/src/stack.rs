//! Data stack — the shared PUSH/PULL/QUEUE list.
//!
//! One stack per interpreter, living as long as the interpreter does.  PUSH
//! appends to the tail (the "top"), PULL removes from the tail, QUEUE
//! inserts at the head (the "bottom").  All operations are total: pulling
//! from an empty stack yields an empty string, never an error.

use std::collections::VecDeque;

use serde_json::Value;

use crate::variables::value_to_text;

/// The interpreter's data stack.
#[derive(Debug, Clone, Default)]
pub struct DataStack {
    items: VecDeque<String>,
}

impl DataStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// PUSH: append to the top.  Values are coerced to strings before
    /// storage; null becomes the empty string.
    pub fn push(&mut self, value: &Value) {
        self.items.push_back(value_to_text(value));
    }

    /// PULL: remove and return the top, or empty string when the stack is
    /// empty.
    pub fn pull(&mut self) -> String {
        self.items.pop_back().unwrap_or_default()
    }

    /// QUEUE: insert at the bottom.
    pub fn queue(&mut self, value: &Value) {
        self.items.push_front(value_to_text(value));
    }

    /// Look at the top without removing it.
    pub fn peek(&self) -> String {
        self.items.back().cloned().unwrap_or_default()
    }

    pub fn size(&self) -> usize {
        self.items.len()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

// ---------------------------------------------------------------------------
//  Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lifo_law() {
        let mut stack = DataStack::new();
        for v in ["v1", "v2", "v3"] {
            stack.push(&json!(v));
        }
        assert_eq!(stack.pull(), "v3");
        assert_eq!(stack.pull(), "v2");
        assert_eq!(stack.pull(), "v1");
    }

    #[test]
    fn test_queue_inserts_at_bottom() {
        let mut stack = DataStack::new();
        stack.queue(&json!("v1"));
        stack.push(&json!("v2"));
        assert_eq!(stack.pull(), "v2");
        assert_eq!(stack.pull(), "v1");
    }

    #[test]
    fn test_empty_pull_is_empty_string() {
        let mut stack = DataStack::new();
        assert_eq!(stack.pull(), "");
        assert_eq!(stack.peek(), "");
        assert_eq!(stack.size(), 0);
    }

    #[test]
    fn test_coercion_to_string() {
        let mut stack = DataStack::new();
        stack.push(&json!(42));
        stack.push(&json!(null));
        assert_eq!(stack.pull(), "");
        assert_eq!(stack.pull(), "42");
    }

    #[test]
    fn test_peek_and_clear() {
        let mut stack = DataStack::new();
        stack.push(&json!("a"));
        stack.push(&json!("b"));
        assert_eq!(stack.peek(), "b");
        assert_eq!(stack.size(), 2);
        stack.clear();
        assert_eq!(stack.size(), 0);
    }
}
