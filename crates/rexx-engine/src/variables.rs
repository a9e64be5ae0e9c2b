//! Variable environment and value resolution.
//!
//! REXX has no lexical variable scoping: one mutable name→value store is
//! shared, by reference, between the main script and every subroutine.  This
//! module holds that store and the resolution algorithm that turns raw
//! parser values (quoted literals, heredocs, interpolated templates, dotted
//! paths, plain names) into runtime values.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::ast::RawValue;
use crate::error::{EngineError, Result};
use crate::traits::{ExpressionEvaluator, Interpolator, NameResolver};

// ---------------------------------------------------------------------------
//  Variable pool
// ---------------------------------------------------------------------------

/// The shared variable environment.
///
/// Names are stored with their case as written.  Values are
/// [`serde_json::Value`]: numbers, strings, and structured objects/lists.
#[derive(Debug, Clone, Default)]
pub struct VariablePool {
    values: HashMap<String, Value>,
}

impl VariablePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a variable by exact name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Set a variable, replacing any previous value.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    /// Remove a variable.  Used for ERRORTEXT, which must be absent after a
    /// successful command.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.values.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Flattened snapshot of the environment, handed to ADDRESS handlers as
    /// their `context` argument.
    pub fn snapshot(&self) -> Map<String, Value> {
        self.values
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    // -----------------------------------------------------------------------
    //  Value resolution
    // -----------------------------------------------------------------------

    /// Resolve a raw parser value into a runtime value.
    ///
    /// Resolution order, first match wins:
    ///
    /// 1. interpolated template → templating collaborator, placeholders
    ///    looked up through this same resolver
    /// 2. heredoc → JSON auto-decode when the delimiter names json,
    ///    otherwise raw content
    /// 3. expression node → external evaluator
    /// 4. numeric literal → as-is
    /// 5. quoted string literal → unquoted, escapes decoded
    /// 6. string that fully parses as a finite number → numeric
    /// 7. the literal `[]` / `{}` → empty list / empty structure
    /// 8. dotted name with a known base → property navigation; a missing
    ///    segment returns the original dotted string (soft miss)
    /// 9. plain name present in the environment → its value
    /// 10. external resolver, else the value unchanged
    pub fn resolve(
        &self,
        raw: &RawValue,
        evaluator: Option<&dyn ExpressionEvaluator>,
        interpolator: &dyn Interpolator,
        external: Option<&dyn NameResolver>,
    ) -> Result<Value> {
        match raw {
            RawValue::Interpolated { template } => {
                let rendered = self.interpolate(template, interpolator, external)?;
                Ok(Value::String(rendered))
            }
            RawValue::Heredoc { delimiter, content } => decode_heredoc(delimiter, content),
            RawValue::Expression(node) => match evaluator {
                Some(eval) => eval.evaluate(node, self),
                None => Err(EngineError::MissingCollaborator("expression evaluator")),
            },
            RawValue::Number(n) => Ok(Value::Number(n.clone())),
            RawValue::Text(s) => Ok(self.resolve_text(s, external)),
        }
    }

    /// Resolve bare text (steps 5–10).  Total: unresolvable text comes back
    /// unchanged, never as an error.
    pub fn resolve_text(&self, text: &str, external: Option<&dyn NameResolver>) -> Value {
        // 5. Quoted string literal.
        if let Some(inner) = strip_quotes(text) {
            return Value::String(decode_escapes(&inner));
        }

        // 6. Full numeric parse.
        if let Some(n) = parse_number(text) {
            return Value::Number(n);
        }

        // 7. Narrow literal forms for empty collections.  No general JSON
        // parsing here: arbitrary strings must stay strings.
        if text == "[]" {
            return Value::Array(Vec::new());
        }
        if text == "{}" {
            return Value::Object(Map::new());
        }

        // 8. Dotted path with a known base.
        if let Some(dot) = text.find('.') {
            let base = &text[..dot];
            if let Some(root) = self.values.get(base) {
                return match navigate(root, &text[dot + 1..]) {
                    // Soft miss: callers must be able to tell "not a
                    // variable reference" apart from "resolved to nothing".
                    Some(v) => v.clone(),
                    None => Value::String(text.to_string()),
                };
            }
        }

        // 9. Plain name.
        if let Some(v) = self.values.get(text) {
            return v.clone();
        }

        // 10. External resolver, then pass-through.
        if let Some(resolver) = external {
            if let Some(v) = resolver.resolve_name(text) {
                return v;
            }
        }
        if looks_like_function_call(text) {
            // Left for the caller to reinterpret as a call expression.
            tracing::trace!(name = text, "unresolved function-call-shaped value passed through");
        }
        Value::String(text.to_string())
    }

    /// Interpolate a template through the templating collaborator, using the
    /// resolution rules above for each placeholder.
    pub fn interpolate(
        &self,
        template: &str,
        interpolator: &dyn Interpolator,
        external: Option<&dyn NameResolver>,
    ) -> Result<String> {
        let lookup = |name: &str| -> Option<Value> {
            let resolved = self.resolve_text(name, external);
            match &resolved {
                // Resolution handing the name back unchanged means the
                // placeholder stays as written.
                Value::String(s) if s == name => None,
                _ => Some(resolved),
            }
        };
        interpolator.interpolate(template, &lookup)
    }
}

// ---------------------------------------------------------------------------
//  Heredoc JSON auto-decode
// ---------------------------------------------------------------------------

/// Decode a heredoc body.  Delimiters naming json (case-insensitive) demand
/// well-formed JSON content with no silent fallback; anything else passes
/// the raw content through.
fn decode_heredoc(delimiter: &str, content: &str) -> Result<Value> {
    if !delimiter.to_lowercase().contains("json") {
        return Ok(Value::String(content.to_string()));
    }

    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(EngineError::EmptyHeredocJson {
            delimiter: delimiter.to_string(),
        });
    }

    let shaped = (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'));
    if !shaped {
        return Err(EngineError::NotJsonShaped {
            delimiter: delimiter.to_string(),
        });
    }

    serde_json::from_str(trimmed).map_err(|e| EngineError::InvalidJson {
        delimiter: delimiter.to_string(),
        message: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
//  Text helpers
// ---------------------------------------------------------------------------

/// Strip matching quotes from a literal, including the escaped-quote forms
/// `\"...\"` and `\'...\'`.  Returns `None` when the text is not quoted.
fn strip_quotes(text: &str) -> Option<String> {
    for escaped in ["\\\"", "\\'"] {
        if text.len() >= 2 * escaped.len()
            && text.starts_with(escaped)
            && text.ends_with(escaped)
        {
            return Some(text[escaped.len()..text.len() - escaped.len()].to_string());
        }
    }
    for quote in ['\'', '"'] {
        if text.len() >= 2 && text.starts_with(quote) && text.ends_with(quote) {
            return Some(text[1..text.len() - 1].to_string());
        }
    }
    None
}

/// Decode the escape sequences `\n \t \r \\`.
fn decode_escapes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Parse text that is entirely one finite number.  Integers keep integer
/// representation.
fn parse_number(text: &str) -> Option<serde_json::Number> {
    if text.is_empty() {
        return None;
    }
    if let Ok(i) = text.parse::<i64>() {
        return Some(serde_json::Number::from(i));
    }
    match text.parse::<f64>() {
        Ok(f) if f.is_finite() => serde_json::Number::from_f64(f),
        _ => None,
    }
}

/// Navigate a dotted property chain below a root value.  Numeric segments
/// index arrays.
fn navigate<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Narrow `identifier(` heuristic for values that look like function calls.
fn looks_like_function_call(text: &str) -> bool {
    match text.find('(') {
        Some(pos) if pos > 0 => text[..pos]
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_'),
        _ => false,
    }
}

/// Render a value as script-visible text.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

// ---------------------------------------------------------------------------
//  Default interpolator — `{name}` substitution
// ---------------------------------------------------------------------------

/// The stock templating primitive: replaces `{name}` placeholders, leaving
/// unresolved placeholders as written.
#[derive(Debug, Default)]
pub struct BraceInterpolator;

impl Interpolator for BraceInterpolator {
    fn interpolate(
        &self,
        template: &str,
        resolve: &dyn Fn(&str) -> Option<Value>,
    ) -> Result<String> {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            match rest[open + 1..].find('}') {
                Some(close) => {
                    let name = &rest[open + 1..open + 1 + close];
                    match resolve(name) {
                        Some(v) => out.push_str(&value_to_text(&v)),
                        None => {
                            out.push('{');
                            out.push_str(name);
                            out.push('}');
                        }
                    }
                    rest = &rest[open + close + 2..];
                }
                None => {
                    out.push_str(&rest[open..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
//  Tests
// ---------------------------------------------------------------------------
