//! ADDRESS dispatch protocol — routing script commands to external targets.
//!
//! Quoted-string and heredoc statements are routed by the currently active
//! target name:
//!
//! - no target selected → interpolated text goes to the output sink
//! - a remote endpoint is registered → JSON-over-HTTP forwarding
//! - a handler is registered → capability-keyed dispatch, result normalized
//!   into RC/RESULT/ERRORTEXT
//! - neither → RPC fallback, or a pass-through echo when no RPC bridge is
//!   configured
//!
//! Targets are added by registration, never by modifying the dispatcher.
//! Handler failures are never swallowed: RC and ERRORTEXT are written first,
//! then the error propagates for the caller to decide retry/continue policy.

use std::collections::HashMap;
use std::sync::Arc;

use rexx_remote::{RemoteClient, RemoteEndpoint};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::ast::CommandText;
use crate::error::{EngineError, Result};
use crate::interpreter::Interpreter;
use crate::traits::{AddressHandler, RpcSender};

/// Sentinel meaning "no target selected".
pub const DEFAULT_ADDRESS: &str = "default";

/// Reserved assertion-only target: its results never touch RESULT.
pub const EXPECTATIONS_ADDRESS: &str = "expectations";

// ---------------------------------------------------------------------------
//  Registry
// ---------------------------------------------------------------------------

/// Per-target registration metadata.
#[derive(Debug, Clone, Default)]
pub struct TargetMetadata {
    /// The handler wants raw, un-interpolated command text (it performs its
    /// own substitution).
    pub raw_command_text: bool,
}

#[derive(Clone)]
struct RegisteredTarget {
    handler: Arc<dyn AddressHandler>,
    metadata: TargetMetadata,
}

/// ADDRESS state owned by one interpreter: the active target, the handler
/// registry, remote endpoints, and the optional RPC fallback sender.
#[derive(Clone, Default)]
pub struct AddressSpace {
    active: Option<String>,
    registry: HashMap<String, RegisteredTarget>,
    endpoints: HashMap<String, RemoteEndpoint>,
    rpc: Option<Arc<dyn RpcSender>>,
    remote: RemoteClient,
}

impl AddressSpace {
    /// The active target name, or the `"default"` sentinel.
    pub fn active(&self) -> &str {
        self.active.as_deref().unwrap_or(DEFAULT_ADDRESS)
    }

    /// Select a target.  Selecting `"default"` deselects.
    pub fn select(&mut self, target: &str) {
        let normalized = target.to_lowercase();
        self.active = (normalized != DEFAULT_ADDRESS).then_some(normalized);
    }

    /// Register a handler under a target name (normalized to lowercase).
    pub fn register(
        &mut self,
        name: &str,
        handler: Arc<dyn AddressHandler>,
        metadata: TargetMetadata,
    ) {
        self.registry
            .insert(name.to_lowercase(), RegisteredTarget { handler, metadata });
    }

    /// Register a remote HTTP endpoint for a target.
    pub fn register_endpoint(&mut self, name: &str, endpoint: RemoteEndpoint) {
        self.endpoints.insert(name.to_lowercase(), endpoint);
    }

    /// Configure the RPC fallback sender.
    pub fn set_rpc_sender(&mut self, sender: Arc<dyn RpcSender>) {
        self.rpc = Some(sender);
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.registry.contains_key(&name.to_lowercase())
    }

    fn target(&self, name: &str) -> Option<(Arc<dyn AddressHandler>, TargetMetadata)> {
        self.registry
            .get(name)
            .map(|t| (t.handler.clone(), t.metadata.clone()))
    }

    fn endpoint(&self, name: &str) -> Option<RemoteEndpoint> {
        self.endpoints.get(name).cloned()
    }

    fn rpc_sender(&self) -> Option<Arc<dyn RpcSender>> {
        self.rpc.clone()
    }

    fn remote_client(&self) -> RemoteClient {
        self.remote.clone()
    }
}

impl std::fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressSpace")
            .field("active", &self.active())
            .field("targets", &self.registry.keys().collect::<Vec<_>>())
            .field("endpoints", &self.endpoints.keys().collect::<Vec<_>>())
            .field("rpc", &self.rpc.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
//  Handler results
// ---------------------------------------------------------------------------

/// The structured result shape ADDRESS handlers report.
///
/// Unknown fields are retained, so "the whole result object" survives a
/// round trip through normalization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HandlerResult {
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub echo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Domain-specific outputs written verbatim into the environment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rexx_variables: Option<Map<String, Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_success() -> bool {
    true
}

impl HandlerResult {
    /// A bare success with no output.
    pub fn ok() -> Self {
        Self {
            success: true,
            output: None,
            message: None,
            echo: None,
            error_code: None,
            error_message: None,
            rexx_variables: None,
            extra: Map::new(),
        }
    }

    /// A success carrying an output value.
    pub fn with_output(output: Value) -> Self {
        Self {
            output: Some(output),
            ..Self::ok()
        }
    }

    /// A failure with an error code and message.
    pub fn failed(error_code: i64, error_message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_code: Some(error_code),
            error_message: Some(error_message.into()),
            ..Self::ok()
        }
    }
}

/// What a handler actually returned: the structured shape, or any raw value.
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerOutcome {
    Structured(HandlerResult),
    Raw(Value),
}

impl HandlerOutcome {
    /// Classify an untyped value (RPC responses, loosely-typed handlers).
    /// Objects parse into the structured shape; everything else stays raw.
    pub fn from_value(value: Value) -> Self {
        if value.is_object() {
            match serde_json::from_value(value.clone()) {
                Ok(result) => HandlerOutcome::Structured(result),
                Err(_) => HandlerOutcome::Raw(value),
            }
        } else {
            HandlerOutcome::Raw(value)
        }
    }

    /// The outcome as a plain value, for traces and the result hook.
    pub fn to_value(&self) -> Value {
        match self {
            HandlerOutcome::Structured(r) => serde_json::to_value(r).unwrap_or(Value::Null),
            HandlerOutcome::Raw(v) => v.clone(),
        }
    }
}

/// Diagnostic context handed to handlers alongside the command.
#[derive(Debug, Clone, Serialize)]
pub struct SourceContext {
    /// Source line of the issuing statement.
    pub line_number: u32,
    /// The statement's raw text (or heredoc delimiter tag).
    pub source_line: String,
    /// Source file, if known.
    pub source_filename: Option<String>,
    /// Whether the command text was interpolated before dispatch.
    pub interpolated: bool,
}

// ---------------------------------------------------------------------------
//  Trace records
// ---------------------------------------------------------------------------

/// Category of a dispatched statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceCategory {
    AddressCommand,
    AddressHeredoc,
}

/// One dispatched ADDRESS statement, for host-side tracing.
#[derive(Debug, Clone, Serialize)]
pub struct TraceRecord {
    /// Command text, or the heredoc's delimiter tag.
    pub text: String,
    pub category: TraceCategory,
    pub line: u32,
    pub result: Value,
}

// ---------------------------------------------------------------------------
//  Dispatch
// ---------------------------------------------------------------------------

impl Interpreter {
    /// Route one quoted-string or heredoc statement by the active target.
    pub async fn run_address_command(
        &mut self,
        text: &CommandText,
        line: u32,
        source_file: Option<&str>,
    ) -> Result<()> {
        let addr = self.address().active().to_string();
        let category = match text {
            CommandText::Quoted(_) => TraceCategory::AddressCommand,
            CommandText::Heredoc { .. } => TraceCategory::AddressHeredoc,
        };

        // No target: interpolated text goes to the host's output sink.
        // Terminal — RC and RESULT stay untouched.
        if addr == DEFAULT_ADDRESS {
            let rendered = self.interpolate(text.raw())?;
            let sink = self.output_sink();
            sink.write_line(&rendered);
            return Ok(());
        }

        if let Some(endpoint) = self.address().endpoint(&addr) {
            return self.dispatch_remote(&addr, &endpoint, text).await;
        }

        if let Some(target) = self.address().target(&addr) {
            return self
                .dispatch_handler(&addr, target, text, category, line, source_file)
                .await;
        }

        self.dispatch_fallback(&addr, text).await
    }

    // -----------------------------------------------------------------------
    //  Remote endpoint path
    // -----------------------------------------------------------------------

    async fn dispatch_remote(
        &mut self,
        addr: &str,
        endpoint: &RemoteEndpoint,
        text: &CommandText,
    ) -> Result<()> {
        let rendered = self.interpolate(text.raw())?;
        let client = self.address().remote_client();

        tracing::debug!(target = addr, url = %endpoint.url, "dispatching to remote endpoint");
        match client.execute(endpoint, rendered.trim()).await {
            Ok(outcome) => {
                self.set_rc(outcome.rc);
                self.set_result(outcome.value);
                match outcome.errortext {
                    Some(text) => self.set_errortext(text),
                    None => self.clear_errortext(),
                }
                Ok(())
            }
            Err(e) => {
                self.set_rc(1);
                self.set_errortext(e.to_string());
                tracing::warn!(target = addr, error = %e, "remote dispatch failed");
                Err(EngineError::Remote(e))
            }
        }
    }

    // -----------------------------------------------------------------------
    //  Registered handler path
    // -----------------------------------------------------------------------

    async fn dispatch_handler(
        &mut self,
        addr: &str,
        target: (Arc<dyn AddressHandler>, TargetMetadata),
        text: &CommandText,
        category: TraceCategory,
        line: u32,
        source_file: Option<&str>,
    ) -> Result<()> {
        let (handler, metadata) = target;
        let rendered = if metadata.raw_command_text {
            text.raw().to_string()
        } else {
            self.interpolate(text.raw())?
        };
        let context = self.vars().snapshot();
        let source = SourceContext {
            line_number: line,
            source_line: text.display_tag().to_string(),
            source_filename: source_file.map(str::to_string),
            interpolated: !metadata.raw_command_text,
        };

        tracing::debug!(target = addr, line, "dispatching to registered handler");
        match handler.handle(&rendered, &context, Some(&source)).await {
            Ok(outcome) => {
                let exempt = addr == EXPECTATIONS_ADDRESS;
                self.normalize_result(&outcome, exempt);
                if let Some(hook) = self.result_hook() {
                    hook.handle_operation_result(addr, &outcome);
                }
                self.write_handler_variables(&outcome);
                self.push_trace(TraceRecord {
                    text: text.display_tag().to_string(),
                    category,
                    line,
                    result: outcome.to_value(),
                });
                Ok(())
            }
            Err(e) => {
                self.set_rc(1);
                self.set_errortext(e.to_string());
                tracing::warn!(target = addr, error = %e, "handler failed");
                Err(EngineError::HandlerFailure {
                    target: addr.to_string(),
                    message: e.to_string(),
                })
            }
        }
    }

    // -----------------------------------------------------------------------
    //  RPC / echo fallback path
    // -----------------------------------------------------------------------

    async fn dispatch_fallback(&mut self, addr: &str, text: &CommandText) -> Result<()> {
        let rendered = self.interpolate(text.raw())?;

        let Some(sender) = self.address().rpc_sender() else {
            // No RPC bridge: synthesize a pass-through echo so scripts keep
            // making forward progress.
            tracing::debug!(target = addr, "no handler or sender; echoing command");
            let outcome = HandlerOutcome::Structured(HandlerResult::with_output(Value::String(
                rendered,
            )));
            self.normalize_result(&outcome, false);
            self.write_handler_variables(&outcome);
            return Ok(());
        };

        tracing::debug!(target = addr, "dispatching through RPC sender");
        match sender
            .send(addr, "execute", json!({ "command": rendered }))
            .await
        {
            Ok(value) => {
                let outcome = HandlerOutcome::from_value(value);
                self.normalize_result(&outcome, false);
                self.write_handler_variables(&outcome);
                Ok(())
            }
            Err(e) => {
                self.set_rc(1);
                self.set_errortext(e.to_string());
                tracing::warn!(target = addr, error = %e, "rpc dispatch failed");
                Err(EngineError::HandlerFailure {
                    target: addr.to_string(),
                    message: e.to_string(),
                })
            }
        }
    }

    // -----------------------------------------------------------------------
    //  Result normalization
    // -----------------------------------------------------------------------

    /// The central precedence function: fold a handler outcome into RC,
    /// RESULT, and ERRORTEXT.
    ///
    /// `exempt_result` suppresses the RESULT write (the `expectations`
    /// assertion channel has no output side effect).
    pub(crate) fn normalize_result(&mut self, outcome: &HandlerOutcome, exempt_result: bool) {
        match outcome {
            HandlerOutcome::Structured(result) => {
                let rc = if result.success {
                    0
                } else {
                    result.error_code.unwrap_or(1)
                };
                self.set_rc(rc);

                if !exempt_result {
                    let value = result
                        .output
                        .clone()
                        .or_else(|| result.message.clone().map(Value::String))
                        .or_else(|| result.echo.clone().map(Value::String))
                        .unwrap_or_else(|| outcome.to_value());
                    self.set_result(value);
                }

                match (&result.error_message, result.success) {
                    (Some(message), false) => self.set_errortext(message.clone()),
                    _ => self.clear_errortext(),
                }
            }
            HandlerOutcome::Raw(value) => {
                self.set_rc(0);
                if !exempt_result {
                    self.set_result(value.clone());
                }
                self.clear_errortext();
            }
        }
    }

    /// Write every `rexxVariables` entry into the environment verbatim.
    fn write_handler_variables(&mut self, outcome: &HandlerOutcome) {
        if let HandlerOutcome::Structured(result) = outcome {
            if let Some(vars) = &result.rexx_variables {
                for (name, value) in vars {
                    self.vars_mut().set(name.clone(), value.clone());
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
//  Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_normalizes_case() {
        let mut space = AddressSpace::default();
        assert_eq!(space.active(), DEFAULT_ADDRESS);
        space.select("PODMAN");
        assert_eq!(space.active(), "podman");
        space.select("DEFAULT");
        assert_eq!(space.active(), DEFAULT_ADDRESS);
    }

    #[test]
    fn test_outcome_from_value_classification() {
        let structured = HandlerOutcome::from_value(json!({"success": false, "errorCode": 7}));
        match structured {
            HandlerOutcome::Structured(r) => {
                assert!(!r.success);
                assert_eq!(r.error_code, Some(7));
            }
            HandlerOutcome::Raw(_) => panic!("object should parse as structured"),
        }

        assert_eq!(
            HandlerOutcome::from_value(json!("plain")),
            HandlerOutcome::Raw(json!("plain"))
        );
    }

    #[test]
    fn test_outcome_object_defaults_success() {
        match HandlerOutcome::from_value(json!({"note": "no success key"})) {
            HandlerOutcome::Structured(r) => {
                assert!(r.success);
                assert_eq!(r.extra.get("note"), Some(&json!("no success key")));
            }
            HandlerOutcome::Raw(_) => panic!("objects parse as structured"),
        }
    }

    #[test]
    fn test_result_round_trip_keeps_unknown_fields() {
        let outcome =
            HandlerOutcome::from_value(json!({"success": true, "volumes": ["a", "b"]}));
        let back = outcome.to_value();
        assert_eq!(back.get("volumes"), Some(&json!(["a", "b"])));
    }
}
