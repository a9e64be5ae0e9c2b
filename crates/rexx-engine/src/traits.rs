//! Collaborator seams.
//!
//! The engine's state machinery is deliberately thin: parsing, expression
//! evaluation, string templating, subroutine body execution, and every
//! concrete ADDRESS target live behind the traits in this module.  Hosts
//! implement these to embed the engine; the tests implement them as mocks.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::address::{HandlerOutcome, SourceContext};
use crate::ast::Command;
use crate::call::CallOutcome;
use crate::error::Result;
use crate::interpreter::Interpreter;
use crate::variables::VariablePool;

// ---------------------------------------------------------------------------
//  Command execution
// ---------------------------------------------------------------------------

/// Outcome of executing a command list.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecOutcome {
    /// Execution fell off the end of the list.
    Completed,
    /// An explicit RETURN was reached, with its optional value.
    Returned(Option<Value>),
    /// The script terminated (EXIT or host-initiated stop).
    Terminated,
}

/// Runs subroutine bodies on behalf of the CALL engine.
///
/// The executor receives the interpreter by mutable reference: caller and
/// callee share one variable environment, and the executor may re-enter the
/// engine (nested CALL, ADDRESS dispatch) through it.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Execute a command list to completion, RETURN, or termination.
    async fn execute(
        &self,
        interpreter: &mut Interpreter,
        body: &[Command],
    ) -> Result<ExecOutcome>;
}

// ---------------------------------------------------------------------------
//  Expression evaluation and templating
// ---------------------------------------------------------------------------

/// Evaluates opaque expression nodes produced by the external parser.
pub trait ExpressionEvaluator: Send + Sync {
    /// Evaluate an expression node against the current environment.
    fn evaluate(&self, expr: &Value, vars: &VariablePool) -> Result<Value>;
}

/// The string-interpolation templating primitive.
///
/// `resolve` is the per-placeholder lookup; returning `None` leaves the
/// placeholder text untouched.
pub trait Interpolator: Send + Sync {
    fn interpolate(
        &self,
        template: &str,
        resolve: &dyn Fn(&str) -> Option<Value>,
    ) -> Result<String>;
}

/// Last-resort name resolution, consulted when a name matches nothing in the
/// environment (host-provided globals, function catalogs, ...).
pub trait NameResolver: Send + Sync {
    /// Resolve a name, or `None` for "no value".
    fn resolve_name(&self, name: &str) -> Option<Value>;
}

// ---------------------------------------------------------------------------
//  ADDRESS collaborators
// ---------------------------------------------------------------------------

/// An ADDRESS target implementation.
///
/// `context` is a flattened snapshot of the variable environment at dispatch
/// time; `source` carries diagnostics about the issuing statement.
#[async_trait]
pub trait AddressHandler: Send + Sync {
    async fn handle(
        &self,
        command: &str,
        context: &Map<String, Value>,
        source: Option<&SourceContext>,
    ) -> Result<HandlerOutcome>;
}

/// RPC bridge used when a selected target has neither a handler nor a remote
/// endpoint registered.
#[async_trait]
pub trait RpcSender: Send + Sync {
    /// Send `method` with `params` to the named target.
    async fn send(&self, target: &str, method: &str, params: Value) -> Result<Value>;
}

/// Host hook invoked after every handler result is normalized, for
/// target-specific variable or side-effect handling.
pub trait OperationResultHook: Send + Sync {
    fn handle_operation_result(&self, target: &str, result: &HandlerOutcome);
}

/// Sink for the no-target output path (and SAY-style host output).
pub trait OutputSink: Send + Sync {
    fn write_line(&self, line: &str);
}

/// Default sink: emits each line as a tracing event.
#[derive(Debug, Default)]
pub struct TracingSink;

impl OutputSink for TracingSink {
    fn write_line(&self, line: &str) {
        tracing::info!(target: "rexx_engine::output", "{line}");
    }
}

/// Capturing sink for hosts and tests that collect output lines.
#[derive(Debug, Default)]
pub struct CaptureSink {
    lines: std::sync::Mutex<Vec<String>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lines written so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

impl OutputSink for CaptureSink {
    fn write_line(&self, line: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line.to_string());
        }
    }
}

// ---------------------------------------------------------------------------
//  External scripts
// ---------------------------------------------------------------------------

/// Runs external scripts named by relative path in a CALL.
#[async_trait]
pub trait ExternalScriptRunner: Send + Sync {
    async fn run(
        &self,
        path: &str,
        args: &[Value],
        interpreter: &mut Interpreter,
    ) -> Result<CallOutcome>;
}
