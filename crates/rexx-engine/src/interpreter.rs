//! Interpreter state — one instance per script run.
//!
//! An [`Interpreter`] exclusively owns the variable environment, the data
//! stack, the subroutine table, and both invocation stacks.  `&mut self` on
//! every operation enforces the ordering invariant: no two dispatches,
//! CALLs, or PARSE/stack operations for the same instance are ever in
//! flight concurrently.  Separate instances share nothing.

use std::sync::Arc;

use rexx_remote::RemoteEndpoint;
use serde_json::Value;

use crate::address::{AddressSpace, TargetMetadata, TraceRecord};
use crate::ast::{Command, CommandKind, ParseSource, RawValue};
use crate::call::{BuiltinFn, CallFrame, ExecutionContext, SubroutineTable};
use crate::error::{EngineError, Result};
use crate::parse_template::{apply_template, split_arg_names, tokenize_template};
use crate::stack::DataStack;
use crate::traits::{
    AddressHandler, CommandExecutor, ExpressionEvaluator, ExternalScriptRunner, Interpolator,
    NameResolver, OperationResultHook, OutputSink, RpcSender, TracingSink,
};
use crate::variables::{value_to_text, BraceInterpolator, VariablePool};

/// Outcome of executing one statement through [`Interpreter::execute_statement`].
#[derive(Debug, Clone, PartialEq)]
pub enum StatementOutcome {
    /// Continue with the next statement.
    Continue,
    /// A RETURN was reached with its optional value.
    Return(Option<Value>),
}

/// The execution engine's state machinery.
pub struct Interpreter {
    vars: VariablePool,
    stack: DataStack,
    subroutines: SubroutineTable,
    call_stack: Vec<CallFrame>,
    context_stack: Vec<ExecutionContext>,
    /// Shared PARSE ARG slot.  Replaced wholesale by each CALL; not
    /// reentrant across recursive subroutines (last-call-wins).
    script_args: Vec<String>,
    /// Ambient return-value slot, yielded when a body ends without RETURN.
    return_value: Option<Value>,
    address: AddressSpace,
    trace: Vec<TraceRecord>,

    evaluator: Option<Arc<dyn ExpressionEvaluator>>,
    interpolator: Arc<dyn Interpolator>,
    external_resolver: Option<Arc<dyn NameResolver>>,
    output_sink: Arc<dyn OutputSink>,
    script_runner: Option<Arc<dyn ExternalScriptRunner>>,
    result_hook: Option<Arc<dyn OperationResultHook>>,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Self {
            vars: VariablePool::new(),
            stack: DataStack::new(),
            subroutines: SubroutineTable::default(),
            call_stack: Vec::new(),
            context_stack: Vec::new(),
            script_args: Vec::new(),
            return_value: None,
            address: AddressSpace::default(),
            trace: Vec::new(),
            evaluator: None,
            interpolator: Arc::new(BraceInterpolator),
            external_resolver: None,
            output_sink: Arc::new(TracingSink),
            script_runner: None,
            result_hook: None,
        }
    }

    // -----------------------------------------------------------------------
    //  Configuration
    // -----------------------------------------------------------------------

    /// Run the subroutine discovery pass over a top-level command list.
    /// Built-ins registered before loading survive the rebuild.
    pub fn load_program(&mut self, commands: &[Command]) {
        let previous = std::mem::take(&mut self.subroutines);
        self.subroutines = SubroutineTable::discover(commands);
        self.subroutines.adopt_builtins(previous);
    }

    /// Replace the host-supplied positional arguments (the PARSE ARG source).
    pub fn set_script_args(&mut self, args: Vec<String>) {
        self.script_args = args;
    }

    pub fn set_evaluator(&mut self, evaluator: Arc<dyn ExpressionEvaluator>) {
        self.evaluator = Some(evaluator);
    }

    pub fn set_interpolator(&mut self, interpolator: Arc<dyn Interpolator>) {
        self.interpolator = interpolator;
    }

    pub fn set_external_resolver(&mut self, resolver: Arc<dyn NameResolver>) {
        self.external_resolver = Some(resolver);
    }

    pub fn set_output_sink(&mut self, sink: Arc<dyn OutputSink>) {
        self.output_sink = sink;
    }

    pub fn set_script_runner(&mut self, runner: Arc<dyn ExternalScriptRunner>) {
        self.script_runner = Some(runner);
    }

    pub fn set_result_hook(&mut self, hook: Arc<dyn OperationResultHook>) {
        self.result_hook = Some(hook);
    }

    /// Register a built-in function for CALL fallback.
    pub fn register_builtin(&mut self, name: &str, f: BuiltinFn) {
        self.subroutines.register_builtin(name, f);
    }

    /// Register an ADDRESS target handler.
    pub fn register_address_target(
        &mut self,
        name: &str,
        handler: Arc<dyn AddressHandler>,
        metadata: TargetMetadata,
    ) {
        self.address.register(name, handler, metadata);
    }

    /// Register a remote HTTP endpoint for a target.
    pub fn register_remote_endpoint(&mut self, name: &str, endpoint: RemoteEndpoint) {
        self.address.register_endpoint(name, endpoint);
    }

    /// Configure the RPC fallback sender.
    pub fn set_rpc_sender(&mut self, sender: Arc<dyn RpcSender>) {
        self.address.set_rpc_sender(sender);
    }

    /// Select the active ADDRESS target.
    pub fn select_address(&mut self, target: &str) {
        self.address.select(target);
    }

    // -----------------------------------------------------------------------
    //  State access
    // -----------------------------------------------------------------------

    pub fn vars(&self) -> &VariablePool {
        &self.vars
    }

    pub fn vars_mut(&mut self) -> &mut VariablePool {
        &mut self.vars
    }

    pub fn stack(&self) -> &DataStack {
        &self.stack
    }

    pub fn stack_mut(&mut self) -> &mut DataStack {
        &mut self.stack
    }

    pub fn subroutines(&self) -> &SubroutineTable {
        &self.subroutines
    }

    pub fn address(&self) -> &AddressSpace {
        &self.address
    }

    pub fn call_depth(&self) -> usize {
        self.call_stack.len()
    }

    /// The execution-context chain, innermost frame last.  Frames from a
    /// failed CALL remain here until [`Self::pop_context`] is called after
    /// the error has been reported.
    pub fn context_chain(&self) -> &[ExecutionContext] {
        &self.context_stack
    }

    pub fn push_context(&mut self, frame: ExecutionContext) {
        self.context_stack.push(frame);
    }

    pub fn pop_context(&mut self) -> Option<ExecutionContext> {
        self.context_stack.pop()
    }

    /// Dispatch trace records, oldest first.
    pub fn trace(&self) -> &[TraceRecord] {
        &self.trace
    }

    pub(crate) fn push_trace(&mut self, record: TraceRecord) {
        self.trace.push(record);
    }

    pub(crate) fn push_call_frame(&mut self, frame: CallFrame) {
        self.call_stack.push(frame);
    }

    pub(crate) fn pop_call_frame(&mut self) -> Option<CallFrame> {
        self.call_stack.pop()
    }

    pub(crate) fn replace_script_args(&mut self, args: Vec<String>) {
        self.script_args.clear();
        self.script_args.extend(args);
    }

    pub(crate) fn return_value(&self) -> Option<&Value> {
        self.return_value.as_ref()
    }

    pub(crate) fn set_return_value(&mut self, value: Option<Value>) {
        self.return_value = value;
    }

    pub(crate) fn script_runner(&self) -> Option<Arc<dyn ExternalScriptRunner>> {
        self.script_runner.clone()
    }

    pub(crate) fn output_sink(&self) -> Arc<dyn OutputSink> {
        self.output_sink.clone()
    }

    pub(crate) fn result_hook(&self) -> Option<Arc<dyn OperationResultHook>> {
        self.result_hook.clone()
    }

    // -----------------------------------------------------------------------
    //  Standard result variables
    // -----------------------------------------------------------------------

    pub fn set_rc(&mut self, rc: i64) {
        self.vars.set("RC", Value::from(rc));
    }

    pub fn set_result(&mut self, value: Value) {
        self.vars.set("RESULT", value);
    }

    pub fn set_errortext(&mut self, text: impl Into<String>) {
        self.vars.set("ERRORTEXT", Value::String(text.into()));
    }

    /// ERRORTEXT is present if and only if the last command failed.
    pub fn clear_errortext(&mut self) {
        self.vars.remove("ERRORTEXT");
    }

    // -----------------------------------------------------------------------
    //  Value resolution entry points
    // -----------------------------------------------------------------------

    /// Resolve a raw parser value with this interpreter's collaborators.
    pub fn resolve_value(&self, raw: &RawValue) -> Result<Value> {
        self.vars.resolve(
            raw,
            self.evaluator.as_deref(),
            self.interpolator.as_ref(),
            self.external_resolver.as_deref(),
        )
    }

    /// Interpolate a template string against the environment.
    pub fn interpolate(&self, template: &str) -> Result<String> {
        self.vars.interpolate(
            template,
            self.interpolator.as_ref(),
            self.external_resolver.as_deref(),
        )
    }

    /// Resolve a statement operand: quoted literal → unquoted; bare name →
    /// variable lookup falling back to the literal text; anything else →
    /// full resolution.
    pub(crate) fn resolve_operand(&self, raw: &RawValue) -> Result<Value> {
        match raw {
            RawValue::Text(s) => Ok(self.vars.resolve_text(s, self.external_resolver.as_deref())),
            other => self.resolve_value(other),
        }
    }

    // -----------------------------------------------------------------------
    //  Stack statements
    // -----------------------------------------------------------------------

    /// PUSH: resolve the operand and append it to the top of the stack.
    pub fn execute_push(&mut self, value: &RawValue) -> Result<()> {
        let resolved = self.resolve_operand(value)?;
        self.stack.push(&resolved);
        Ok(())
    }

    /// QUEUE: resolve the operand and insert it at the bottom of the stack.
    pub fn execute_queue(&mut self, value: &RawValue) -> Result<()> {
        let resolved = self.resolve_operand(value)?;
        self.stack.queue(&resolved);
        Ok(())
    }

    /// PULL: pop the top of the stack into the named variable.
    pub fn execute_pull(&mut self, var: &str) {
        let value = self.stack.pull();
        self.vars.set(var, Value::String(value));
    }

    // -----------------------------------------------------------------------
    //  PARSE statement
    // -----------------------------------------------------------------------

    /// Execute a PARSE statement, writing its bindings into the environment.
    pub fn execute_parse(&mut self, source: &ParseSource, template: &str) -> Result<()> {
        // PARSE ARG bypasses the matcher: names bind positionally against
        // the shared argument slot.
        if matches!(source, ParseSource::Arg) {
            let names = split_arg_names(template);
            for (i, name) in names.into_iter().enumerate() {
                let value = self.script_args.get(i).cloned().unwrap_or_default();
                self.vars.set(name, Value::String(value));
            }
            return Ok(());
        }

        let input = match source {
            ParseSource::Var(name) => self
                .vars
                .get(name)
                .map(value_to_text)
                .unwrap_or_default(),
            ParseSource::Value(raw) => value_to_text(&self.resolve_value(raw)?),
            ParseSource::Arg => unreachable!("handled above"),
        };

        let tokens = tokenize_template(template);
        for (name, value) in apply_template(&input, &tokens) {
            self.vars.set(name, Value::String(value));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    //  Statement routing
    // -----------------------------------------------------------------------

    /// Execute one command node that belongs to the engine's state
    /// machinery.  Labels are no-ops at execution time; `Other` nodes are
    /// skipped (they belong to the host's executor).
    pub async fn execute_statement(
        &mut self,
        command: &Command,
        executor: &dyn CommandExecutor,
    ) -> Result<StatementOutcome> {
        match &command.kind {
            CommandKind::Label { .. } => Ok(StatementOutcome::Continue),
            CommandKind::Call { target, args } => {
                self.call(
                    target,
                    args,
                    command.line,
                    command.source_file.as_deref(),
                    executor,
                )
                .await?;
                Ok(StatementOutcome::Continue)
            }
            CommandKind::Return { value } => {
                let resolved = match value {
                    Some(raw) => Some(self.resolve_value(raw)?),
                    None => None,
                };
                Ok(StatementOutcome::Return(resolved))
            }
            CommandKind::Push { value } => {
                self.execute_push(value)?;
                Ok(StatementOutcome::Continue)
            }
            CommandKind::Queue { value } => {
                self.execute_queue(value)?;
                Ok(StatementOutcome::Continue)
            }
            CommandKind::Pull { var } => {
                self.execute_pull(var);
                Ok(StatementOutcome::Continue)
            }
            CommandKind::Parse { source, template } => {
                self.execute_parse(source, template)?;
                Ok(StatementOutcome::Continue)
            }
            CommandKind::Address { target } => {
                self.select_address(target);
                Ok(StatementOutcome::Continue)
            }
            CommandKind::AddressCommand { text } => {
                self.run_address_command(text, command.line, command.source_file.as_deref())
                    .await?;
                Ok(StatementOutcome::Continue)
            }
            CommandKind::Other(node) => {
                tracing::trace!(line = command.line, ?node, "skipping host-executed node");
                Ok(StatementOutcome::Continue)
            }
        }
    }

    /// Convenience for hosts: execute a CALL command node.
    pub async fn execute_call(
        &mut self,
        command: &Command,
        executor: &dyn CommandExecutor,
    ) -> Result<crate::call::CallOutcome> {
        match &command.kind {
            CommandKind::Call { target, args } => {
                self.call(
                    target,
                    args,
                    command.line,
                    command.source_file.as_deref(),
                    executor,
                )
                .await
            }
            _ => Err(EngineError::Collaborator(
                "execute_call requires a CALL command node".into(),
            )),
        }
    }

    // -----------------------------------------------------------------------
    //  Error reporting
    // -----------------------------------------------------------------------

    /// Render an error with the retained execution-context chain, innermost
    /// call first.
    pub fn error_report(&self, error: &EngineError) -> String {
        let mut report = error.to_string();
        for frame in self.context_stack.iter().rev() {
            report.push_str("\n  in ");
            report.push_str(&frame.display);
            report.push_str(&format!(" (line {}", frame.line));
            if let Some(file) = &frame.source_file {
                report.push_str(&format!(", {file}"));
            }
            report.push(')');
        }
        report
    }
}

// ---------------------------------------------------------------------------
//  Tests
// ---------------------------------------------------------------------------
