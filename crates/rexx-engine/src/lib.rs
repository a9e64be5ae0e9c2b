#![forbid(unsafe_code)]
//! Execution-engine state machinery for an embedded REXX-like scripting
//! runtime.
//!
//! This crate provides:
//!
//! - **Variable environment** — the shared, unscoped name→value store and
//!   the value-resolution rules (literals, interpolation, heredoc JSON
//!   auto-decode, dotted-path navigation, external resolver fallback)
//! - **Data stack** — the shared PUSH/PULL/QUEUE list
//! - **PARSE template matcher** — template-driven string destructuring
//! - **CALL / subroutine engine** — discovery, argument binding, call and
//!   execution-context stacks, built-in fallback, external-script delegation
//! - **ADDRESS dispatch protocol** — the target registry, the routing state
//!   machine for quoted-string/heredoc commands, result normalization into
//!   RC/RESULT/ERRORTEXT, and the RPC/echo fallback path
//!
//! Lexing/parsing, the general expression evaluator, built-in function
//! libraries, and concrete ADDRESS targets are external collaborators,
//! reached through the traits in [`traits`].

pub mod address;
pub mod ast;
pub mod call;
pub mod error;
pub mod interpreter;
pub mod parse_template;
pub mod stack;
pub mod traits;
pub mod variables;

pub use address::{
    HandlerOutcome, HandlerResult, SourceContext, TargetMetadata, TraceCategory, TraceRecord,
    DEFAULT_ADDRESS, EXPECTATIONS_ADDRESS,
};
pub use ast::{CallTarget, Command, CommandKind, CommandText, ParseSource, RawValue};
pub use call::{
    BuiltinFn, CallFrame, CallOutcome, ContextKind, ExecutionContext, SubroutineTable,
};
pub use error::{EngineError, Result};
pub use interpreter::{Interpreter, StatementOutcome};
pub use parse_template::{apply_template, split_arg_names, tokenize_template, TemplateToken};
pub use stack::DataStack;
pub use traits::{
    AddressHandler, CaptureSink, CommandExecutor, ExecOutcome, ExpressionEvaluator,
    ExternalScriptRunner, Interpolator, NameResolver, OperationResultHook, OutputSink, RpcSender,
    TracingSink,
};
pub use variables::{value_to_text, BraceInterpolator, VariablePool};

pub use rexx_remote::{RemoteEndpoint, RemoteError, RemoteOutcome};
