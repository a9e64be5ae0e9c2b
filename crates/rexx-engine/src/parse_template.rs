//! PARSE instruction — template-based string destructuring.
//!
//! Templates mix variable names with quoted literal delimiters:
//!
//! - `first last` — whitespace-separated word parsing
//! - `name '=' value` — split at a literal delimiter
//! - a final (or sole) variable receives the remainder
//!
//! `PARSE ARG` is special-cased: its template names are bound positionally
//! against the interpreter's shared argument slot, bypassing the matcher.

/// One element of a PARSE template.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateToken {
    /// Variable name to receive a parsed value.
    Variable(String),
    /// Quoted literal delimiter.
    Delimiter(String),
}

/// Tokenize a template into variable and delimiter tokens.
///
/// Quote-delimited runs become [`TemplateToken::Delimiter`]; whitespace
/// separated runs outside quotes become [`TemplateToken::Variable`].
pub fn tokenize_template(template: &str) -> Vec<TemplateToken> {
    let mut tokens = Vec::new();
    let mut chars = template.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        if c == '\'' || c == '"' {
            let quote = c;
            chars.next();
            let mut lit = String::new();
            for d in chars.by_ref() {
                if d == quote {
                    break;
                }
                lit.push(d);
            }
            tokens.push(TemplateToken::Delimiter(lit));
            continue;
        }

        let mut name = String::new();
        while let Some(&d) = chars.peek() {
            if d.is_whitespace() || d == '\'' || d == '"' {
                break;
            }
            name.push(d);
            chars.next();
        }
        tokens.push(TemplateToken::Variable(name));
    }

    tokens
}

/// Match a token list against an input string, producing variable bindings
/// in template order.
pub fn apply_template(input: &str, tokens: &[TemplateToken]) -> Vec<(String, String)> {
    let mut bindings = Vec::new();
    let mut cursor = 0usize;
    let mut i = 0;

    while i < tokens.len() {
        let name = match &tokens[i] {
            TemplateToken::Variable(name) => name.clone(),
            // A delimiter with no preceding variable just moves the cursor.
            TemplateToken::Delimiter(lit) => {
                if let Some(found) = input[cursor..].find(lit.as_str()) {
                    cursor += found + lit.len();
                }
                i += 1;
                continue;
            }
        };
        i += 1;

        match tokens.get(i) {
            // Variable followed by a delimiter: value runs up to the next
            // occurrence of the delimiter text.
            Some(TemplateToken::Delimiter(lit)) => {
                let remaining = &input[cursor..];
                match remaining.find(lit.as_str()) {
                    Some(found) => {
                        bindings.push((name, remaining[..found].to_string()));
                        cursor += found + lit.len();
                    }
                    None => {
                        // Delimiter absent: the variable takes the rest.
                        bindings.push((name, remaining.to_string()));
                        cursor = input.len();
                    }
                }
                i += 1;
            }
            // Variable followed by another variable: next word.
            Some(TemplateToken::Variable(_)) => {
                let remaining = &input[cursor..];
                let trimmed = remaining.trim_start();
                cursor += remaining.len() - trimmed.len();
                match trimmed.find(char::is_whitespace) {
                    Some(space) => {
                        bindings.push((name, trimmed[..space].to_string()));
                        cursor += space;
                        let after = &input[cursor..];
                        cursor += after.len() - after.trim_start().len();
                    }
                    None => {
                        bindings.push((name, trimmed.to_string()));
                        cursor = input.len();
                    }
                }
            }
            // Final variable: remainder of the input.
            None => {
                bindings.push((name, input[cursor..].to_string()));
                cursor = input.len();
            }
        }
    }

    bindings
}

/// Split a `PARSE ARG` template into positional variable names.
pub fn split_arg_names(template: &str) -> Vec<String> {
    template
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

// ---------------------------------------------------------------------------
//  Tests
// ---------------------------------------------------------------------------
