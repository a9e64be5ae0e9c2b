//! End-to-end tests for the engine's state machinery: ADDRESS dispatch,
//! CALL semantics, and the interactions between them.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use rexx_engine::{
    AddressHandler, CallTarget, Command, CommandExecutor, CommandKind, CommandText, EngineError,
    ExecOutcome, HandlerOutcome, HandlerResult, Interpreter, OutputSink, ParseSource, RawValue,
    RemoteEndpoint, Result, RpcSender, SourceContext, StatementOutcome, TargetMetadata,
};

// ---------------------------------------------------------------------------
//  Test collaborators
// ---------------------------------------------------------------------------

/// Minimal command executor: runs engine statements in order.
struct SimpleExecutor;

#[async_trait]
impl CommandExecutor for SimpleExecutor {
    async fn execute(
        &self,
        interpreter: &mut Interpreter,
        body: &[Command],
    ) -> Result<ExecOutcome> {
        for command in body {
            match interpreter.execute_statement(command, self).await? {
                StatementOutcome::Return(value) => return Ok(ExecOutcome::Returned(value)),
                StatementOutcome::Continue => {}
            }
        }
        Ok(ExecOutcome::Completed)
    }
}

/// Handler that replays scripted outcomes and records what it was given.
#[derive(Default)]
struct ScriptedHandler {
    outcomes: Mutex<VecDeque<HandlerOutcome>>,
    fail_with: Mutex<Option<String>>,
    commands: Mutex<Vec<String>>,
}

impl ScriptedHandler {
    fn returning(outcome: HandlerOutcome) -> Arc<Self> {
        let handler = Self::default();
        handler.outcomes.lock().unwrap().push_back(outcome);
        Arc::new(handler)
    }

    fn failing(message: &str) -> Arc<Self> {
        let handler = Self::default();
        *handler.fail_with.lock().unwrap() = Some(message.to_string());
        Arc::new(handler)
    }

    fn seen(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl AddressHandler for ScriptedHandler {
    async fn handle(
        &self,
        command: &str,
        _context: &Map<String, Value>,
        _source: Option<&SourceContext>,
    ) -> Result<HandlerOutcome> {
        self.commands.lock().unwrap().push(command.to_string());
        if let Some(message) = self.fail_with.lock().unwrap().clone() {
            return Err(EngineError::Collaborator(message));
        }
        Ok(self
            .outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(HandlerOutcome::Structured(HandlerResult::ok())))
    }
}

/// Sink that counts writes.
#[derive(Default)]
struct CountingSink {
    lines: Mutex<Vec<String>>,
    count: AtomicUsize,
}

impl OutputSink for CountingSink {
    fn write_line(&self, line: &str) {
        self.count.fetch_add(1, Ordering::SeqCst);
        self.lines.lock().unwrap().push(line.to_string());
    }
}

/// RPC sender that records calls and replies with a fixed value.
struct RecordingSender {
    reply: Value,
    calls: Mutex<Vec<(String, String, Value)>>,
}

#[async_trait]
impl RpcSender for RecordingSender {
    async fn send(&self, target: &str, method: &str, params: Value) -> Result<Value> {
        self.calls
            .lock()
            .unwrap()
            .push((target.to_string(), method.to_string(), params));
        Ok(self.reply.clone())
    }
}

fn quoted(text: &str) -> CommandText {
    CommandText::Quoted(text.to_string())
}

// ---------------------------------------------------------------------------
//  ADDRESS dispatch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn no_target_sends_interpolated_text_to_sink_once() {
    let mut interp = Interpreter::new();
    let sink = Arc::new(CountingSink::default());
    interp.set_output_sink(sink.clone());
    interp.vars_mut().set("name", json!("world"));

    interp
        .run_address_command(&quoted("hello {name}"), 1, None)
        .await
        .unwrap();

    assert_eq!(sink.count.load(Ordering::SeqCst), 1);
    assert_eq!(sink.lines.lock().unwrap()[0], "hello world");
    // Terminal path: the standard variables stay untouched.
    assert_eq!(interp.vars().get("RC"), None);
    assert_eq!(interp.vars().get("RESULT"), None);
}

#[tokio::test]
async fn result_precedence_output_beats_message() {
    let mut interp = Interpreter::new();
    let handler = ScriptedHandler::returning(HandlerOutcome::Structured(HandlerResult {
        output: Some(json!("A")),
        message: Some("B".into()),
        ..HandlerResult::ok()
    }));
    interp.register_address_target("tool", handler, TargetMetadata::default());
    interp.select_address("tool");

    interp
        .run_address_command(&quoted("run"), 1, None)
        .await
        .unwrap();

    assert_eq!(interp.vars().get("RC"), Some(&json!(0)));
    assert_eq!(interp.vars().get("RESULT"), Some(&json!("A")));
    assert_eq!(interp.vars().get("ERRORTEXT"), None);
}

#[tokio::test]
async fn result_precedence_message_when_no_output() {
    let mut interp = Interpreter::new();
    let handler = ScriptedHandler::returning(HandlerOutcome::Structured(HandlerResult {
        message: Some("B".into()),
        ..HandlerResult::ok()
    }));
    interp.register_address_target("tool", handler, TargetMetadata::default());
    interp.select_address("tool");

    interp
        .run_address_command(&quoted("run"), 1, None)
        .await
        .unwrap();

    assert_eq!(interp.vars().get("RESULT"), Some(&json!("B")));
}

#[tokio::test]
async fn failure_carries_error_code_and_text() {
    let mut interp = Interpreter::new();
    let handler =
        ScriptedHandler::returning(HandlerOutcome::Structured(HandlerResult::failed(7, "bad")));
    interp.register_address_target("tool", handler, TargetMetadata::default());
    interp.select_address("tool");

    interp
        .run_address_command(&quoted("run"), 1, None)
        .await
        .unwrap();

    assert_eq!(interp.vars().get("RC"), Some(&json!(7)));
    assert_eq!(interp.vars().get("ERRORTEXT"), Some(&json!("bad")));
}

#[tokio::test]
async fn expectations_target_never_touches_result() {
    let mut interp = Interpreter::new();
    interp.set_result(json!("prior"));
    let handler = ScriptedHandler::returning(HandlerOutcome::Structured(
        HandlerResult::with_output(json!("assertion output")),
    ));
    interp.register_address_target("expectations", handler, TargetMetadata::default());
    interp.select_address("expectations");

    interp
        .run_address_command(&quoted("{x} should be 1"), 1, None)
        .await
        .unwrap();

    assert_eq!(interp.vars().get("RESULT"), Some(&json!("prior")));
    assert_eq!(interp.vars().get("RC"), Some(&json!(0)));
}

#[tokio::test]
async fn raw_metadata_skips_interpolation() {
    let mut interp = Interpreter::new();
    interp.vars_mut().set("name", json!("world"));

    let raw = ScriptedHandler::returning(HandlerOutcome::Structured(HandlerResult::ok()));
    interp.register_address_target(
        "raw",
        raw.clone(),
        TargetMetadata {
            raw_command_text: true,
        },
    );
    let cooked = ScriptedHandler::returning(HandlerOutcome::Structured(HandlerResult::ok()));
    interp.register_address_target("cooked", cooked.clone(), TargetMetadata::default());

    interp.select_address("raw");
    interp
        .run_address_command(&quoted("hi {name}"), 1, None)
        .await
        .unwrap();
    interp.select_address("cooked");
    interp
        .run_address_command(&quoted("hi {name}"), 2, None)
        .await
        .unwrap();

    assert_eq!(raw.seen(), vec!["hi {name}"]);
    assert_eq!(cooked.seen(), vec!["hi world"]);
}

#[tokio::test]
async fn handler_variables_written_verbatim() {
    let mut interp = Interpreter::new();
    let handler = ScriptedHandler::returning(HandlerOutcome::Structured(HandlerResult {
        rexx_variables: Some(
            [("CONTAINER_ID".to_string(), json!("abc123"))]
                .into_iter()
                .collect(),
        ),
        ..HandlerResult::ok()
    }));
    interp.register_address_target("podman", handler, TargetMetadata::default());
    interp.select_address("podman");

    interp
        .run_address_command(&quoted("create"), 1, None)
        .await
        .unwrap();

    assert_eq!(interp.vars().get("CONTAINER_ID"), Some(&json!("abc123")));
}

#[tokio::test]
async fn handler_failure_sets_rc_and_rethrows() {
    let mut interp = Interpreter::new();
    let handler = ScriptedHandler::failing("connection lost");
    interp.register_address_target("db", handler, TargetMetadata::default());
    interp.select_address("db");

    let err = interp
        .run_address_command(&quoted("SELECT 1"), 1, None)
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::HandlerFailure { .. }));
    // RC/ERRORTEXT are consistent before the error reaches the caller.
    assert_eq!(interp.vars().get("RC"), Some(&json!(1)));
    assert!(interp.vars().get("ERRORTEXT").is_some());
}

#[tokio::test]
async fn heredoc_dispatch_traces_delimiter_tag() {
    let mut interp = Interpreter::new();
    let handler = ScriptedHandler::returning(HandlerOutcome::Structured(HandlerResult::ok()));
    interp.register_address_target("deploy", handler, TargetMetadata::default());
    interp.select_address("deploy");

    let text = CommandText::Heredoc {
        delimiter: "SCRIPT".into(),
        content: "step one\nstep two".into(),
    };
    interp.run_address_command(&text, 9, None).await.unwrap();

    let trace = interp.trace();
    assert_eq!(trace.len(), 1);
    assert_eq!(trace[0].text, "SCRIPT");
    assert_eq!(trace[0].line, 9);
}

#[tokio::test]
async fn unregistered_target_echoes_without_rpc() {
    let mut interp = Interpreter::new();
    interp.vars_mut().set("v", json!("x"));
    interp.select_address("nowhere");

    interp
        .run_address_command(&quoted("echo {v}"), 1, None)
        .await
        .unwrap();

    assert_eq!(interp.vars().get("RC"), Some(&json!(0)));
    assert_eq!(interp.vars().get("RESULT"), Some(&json!("echo x")));
}

#[tokio::test]
async fn unregistered_target_uses_rpc_sender() {
    let mut interp = Interpreter::new();
    let sender = Arc::new(RecordingSender {
        reply: json!({"success": true, "output": "remote says hi"}),
        calls: Mutex::new(Vec::new()),
    });
    interp.set_rpc_sender(sender.clone());
    interp.select_address("bridge");

    interp
        .run_address_command(&quoted("ping"), 1, None)
        .await
        .unwrap();

    assert_eq!(interp.vars().get("RESULT"), Some(&json!("remote says hi")));
    let calls = sender.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "bridge");
    assert_eq!(calls[0].1, "execute");
    assert_eq!(calls[0].2, json!({"command": "ping"}));
}

#[tokio::test]
async fn remote_endpoint_connection_refused_maps_to_unreachable() {
    let mut interp = Interpreter::new();
    interp.register_remote_endpoint(
        "far",
        RemoteEndpoint {
            // Reserved port; nothing listens here.
            url: "http://127.0.0.1:1/execute".into(),
            auth_token: None,
        },
    );
    interp.select_address("far");

    let err = interp
        .run_address_command(&quoted("ping"), 1, None)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        EngineError::Remote(rexx_engine::RemoteError::Unreachable { .. })
    ));
    assert_eq!(interp.vars().get("RC"), Some(&json!(1)));
    assert!(interp.vars().get("ERRORTEXT").is_some());
}

// ---------------------------------------------------------------------------
//  CALL engine
// ---------------------------------------------------------------------------

fn program_with_mutating_sub() -> Vec<Command> {
    vec![
        Command::new(
            10,
            CommandKind::Label {
                name: "mutate".into(),
            },
        ),
        // g = 'changed by callee'
        Command::new(
            11,
            CommandKind::Parse {
                source: ParseSource::Value(RawValue::text("'changed by callee'")),
                template: "g".into(),
            },
        ),
        Command::new(12, CommandKind::Return { value: None }),
    ]
}

#[tokio::test]
async fn call_shares_variables_with_caller() {
    let mut interp = Interpreter::new();
    interp.load_program(&program_with_mutating_sub());
    interp.vars_mut().set("g", json!("original"));

    interp
        .call(
            &CallTarget::Name("mutate".into()),
            &[],
            1,
            None,
            &SimpleExecutor,
        )
        .await
        .unwrap();

    // No save/restore around CALL: the callee's write is caller-visible.
    assert_eq!(interp.vars().get("g"), Some(&json!("changed by callee")));
    assert_eq!(interp.call_depth(), 0);
    assert!(interp.context_chain().is_empty());
}

#[tokio::test]
async fn call_return_value_lands_in_result() {
    let mut interp = Interpreter::new();
    let program = vec![
        Command::new(5, CommandKind::Label { name: "answer".into() }),
        Command::new(
            6,
            CommandKind::Return {
                value: Some(RawValue::text("'42'")),
            },
        ),
    ];
    interp.load_program(&program);

    let outcome = interp
        .call(
            &CallTarget::Name("ANSWER".into()),
            &[],
            1,
            None,
            &SimpleExecutor,
        )
        .await
        .unwrap();

    assert!(!outcome.terminated);
    assert_eq!(outcome.return_value, Some(json!("42")));
    assert_eq!(interp.vars().get("RESULT"), Some(&json!("42")));
}

#[tokio::test]
async fn call_arguments_feed_parse_arg() {
    let mut interp = Interpreter::new();
    let program = vec![
        Command::new(20, CommandKind::Label { name: "greet".into() }),
        Command::new(
            21,
            CommandKind::Parse {
                source: ParseSource::Arg,
                template: "who, how".into(),
            },
        ),
        Command::new(22, CommandKind::Return { value: None }),
    ];
    interp.load_program(&program);

    interp
        .call(
            &CallTarget::Name("greet".into()),
            &[RawValue::text("'ada'"), RawValue::text("'warmly'")],
            1,
            None,
            &SimpleExecutor,
        )
        .await
        .unwrap();

    assert_eq!(interp.vars().get("who"), Some(&json!("ada")));
    assert_eq!(interp.vars().get("how"), Some(&json!("warmly")));
}

#[tokio::test]
async fn call_arg_slot_is_last_call_wins() {
    let mut interp = Interpreter::new();
    interp.set_script_args(vec!["outer".into()]);
    let program = vec![
        Command::new(30, CommandKind::Label { name: "inner".into() }),
        Command::new(31, CommandKind::Return { value: None }),
    ];
    interp.load_program(&program);

    interp
        .call(
            &CallTarget::Name("inner".into()),
            &[RawValue::text("'nested'")],
            1,
            None,
            &SimpleExecutor,
        )
        .await
        .unwrap();

    // The shared slot holds the callee's arguments afterwards; a top-level
    // PARSE ARG now observes them.
    interp.execute_parse(&ParseSource::Arg, "first").unwrap();
    assert_eq!(interp.vars().get("first"), Some(&json!("nested")));
}

#[tokio::test]
async fn call_builtin_fallback_stores_result() {
    let mut interp = Interpreter::new();
    interp.register_builtin(
        "upper",
        Arc::new(|args| {
            let text = rexx_engine::value_to_text(&args[0]);
            Ok(json!(text.to_uppercase()))
        }),
    );

    let outcome = interp
        .call(
            &CallTarget::Name("UPPER".into()),
            &[RawValue::text("'hi'")],
            1,
            None,
            &SimpleExecutor,
        )
        .await
        .unwrap();

    assert_eq!(outcome.return_value, Some(json!("HI")));
    assert_eq!(interp.vars().get("RESULT"), Some(&json!("HI")));
}

#[tokio::test]
async fn subroutine_not_found_keeps_context_frame() {
    let mut interp = Interpreter::new();

    let err = interp
        .call(
            &CallTarget::Name("missing".into()),
            &[],
            17,
            Some("job.rexx"),
            &SimpleExecutor,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::SubroutineNotFound { .. }));
    // The frame pushed before name resolution is retained for reporting.
    let chain = interp.context_chain();
    assert_eq!(chain.len(), 1);
    assert_eq!(chain[0].line, 17);
    assert!(chain[0].display.contains("missing"));
    let report = interp.error_report(&err);
    assert!(report.contains("CALL missing"));
    assert!(report.contains("job.rexx"));
    // The host pops the frame once the error has been reported.
    interp.pop_context();
    assert!(interp.context_chain().is_empty());
}

#[tokio::test]
async fn dynamic_call_target_resolved_from_variable() {
    let mut interp = Interpreter::new();
    let program = vec![
        Command::new(40, CommandKind::Label { name: "task".into() }),
        Command::new(
            41,
            CommandKind::Return {
                value: Some(RawValue::text("'ran'")),
            },
        ),
    ];
    interp.load_program(&program);
    interp.vars_mut().set("handler", json!("task"));

    let outcome = interp
        .call(
            &CallTarget::Variable("handler".into()),
            &[],
            1,
            None,
            &SimpleExecutor,
        )
        .await
        .unwrap();
    assert_eq!(outcome.return_value, Some(json!("ran")));

    let err = interp
        .call(
            &CallTarget::Variable("unset".into()),
            &[],
            2,
            None,
            &SimpleExecutor,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::UndefinedDynamicTarget { .. }));
}

#[tokio::test]
async fn nested_calls_unwind_both_stacks() {
    let mut interp = Interpreter::new();
    let program = vec![
        Command::new(50, CommandKind::Label { name: "outer".into() }),
        Command::new(
            51,
            CommandKind::Call {
                target: CallTarget::Name("inner".into()),
                args: vec![],
            },
        ),
        Command::new(52, CommandKind::Return { value: None }),
        Command::new(53, CommandKind::Label { name: "inner".into() }),
        Command::new(
            54,
            CommandKind::Return {
                value: Some(RawValue::text("'deep'")),
            },
        ),
    ];
    interp.load_program(&program);

    interp
        .call(
            &CallTarget::Name("outer".into()),
            &[],
            1,
            None,
            &SimpleExecutor,
        )
        .await
        .unwrap();

    assert_eq!(interp.call_depth(), 0);
    assert!(interp.context_chain().is_empty());
    assert_eq!(interp.vars().get("RESULT"), Some(&json!("deep")));
}
