//! Command nodes consumed by the execution engine.
//!
//! Lexing and parsing of source text live outside this crate; the parser
//! hands the engine a flat list of [`Command`] nodes.  Only the node kinds
//! the engine's state machinery acts on are modelled here — anything else a
//! host dialect defines travels as [`CommandKind::Other`] and is executed by
//! the host's command executor.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single script command with source provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    /// Source line where this command begins.
    pub line: u32,
    /// Source file this command came from, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
    /// The command body.
    pub kind: CommandKind,
}

impl Command {
    /// Build a command with no source file attribution.
    pub fn new(line: u32, kind: CommandKind) -> Self {
        Self {
            line,
            source_file: None,
            kind,
        }
    }
}

/// The body of a command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CommandKind {
    /// Label marker: `name:` — starts a subroutine body.
    Label { name: String },
    /// CALL instruction.
    Call {
        target: CallTarget,
        args: Vec<RawValue>,
    },
    /// RETURN instruction with optional value.
    Return { value: Option<RawValue> },
    /// PUSH instruction — append to the top of the data stack.
    Push { value: RawValue },
    /// QUEUE instruction — insert at the bottom of the data stack.
    Queue { value: RawValue },
    /// PULL instruction — pop the top of the data stack into a variable.
    Pull { var: String },
    /// PARSE instruction.
    Parse {
        source: ParseSource,
        template: String,
    },
    /// ADDRESS instruction — select the active command target.
    Address { target: String },
    /// A quoted-string or heredoc statement routed to the active target.
    AddressCommand { text: CommandText },
    /// Any other node — executed by the host's command executor, opaque to
    /// this crate.
    Other(Value),
}

/// CALL target: a literal name or a variable holding the name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CallTarget {
    /// `CALL name`
    Name(String),
    /// `CALL (var)` — target name read from a variable at call time.
    Variable(String),
}

/// The text of an ADDRESS-dispatched statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CommandText {
    /// A quoted-string command.
    Quoted(String),
    /// A heredoc command, keeping its delimiter tag for tracing.
    Heredoc { delimiter: String, content: String },
}

impl CommandText {
    /// The raw command text, before any interpolation.
    pub fn raw(&self) -> &str {
        match self {
            CommandText::Quoted(s) => s,
            CommandText::Heredoc { content, .. } => content,
        }
    }

    /// Short display form for traces: the text itself, or the heredoc's
    /// delimiter tag.
    pub fn display_tag(&self) -> &str {
        match self {
            CommandText::Quoted(s) => s,
            CommandText::Heredoc { delimiter, .. } => delimiter,
        }
    }
}

/// PARSE input source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ParseSource {
    /// `PARSE ARG` — bind positionally from the shared argument slot.
    Arg,
    /// `PARSE VAR name` — read the named variable.
    Var(String),
    /// `PARSE VALUE expr` — evaluate an expression.
    Value(RawValue),
}

/// An unresolved value as the parser produced it.
///
/// The engine's value-resolution rules turn these into runtime values; see
/// `VariablePool::resolve`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RawValue {
    /// Numeric literal.
    Number(serde_json::Number),
    /// Bare text: may be a quoted literal, a variable name, a dotted path,
    /// or plain text — resolution decides.
    Text(String),
    /// A template string with `{name}` placeholders.
    Interpolated { template: String },
    /// A heredoc literal bounded by a user-chosen delimiter.
    Heredoc { delimiter: String, content: String },
    /// An opaque expression node, delegated to the external evaluator.
    Expression(Value),
}

impl RawValue {
    /// Convenience constructor for bare text.
    pub fn text(s: impl Into<String>) -> Self {
        RawValue::Text(s.into())
    }
}
