//! CALL / subroutine engine.
//!
//! Subroutines are discovered by a single pass over the top-level command
//! list: each label opens a body that runs to the next label, through a
//! RETURN (inclusive), or to the end of the list.  CALL resolves a name
//! against, in order: external scripts (relative-path prefix), user
//! subroutines, then registered built-in functions.
//!
//! Two stacks track invocation state.  The call stack mirrors active CALLs
//! and is always popped, success or failure.  The execution-context stack
//! exists for error provenance: its frame is pushed before name resolution
//! and is deliberately left in place when an error propagates, so top-level
//! reporting can print the whole chain of active CALLs.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::ast::{CallTarget, Command, CommandKind, RawValue};
use crate::error::{EngineError, Result};
use crate::interpreter::Interpreter;
use crate::traits::{CommandExecutor, ExecOutcome};
use crate::variables::value_to_text;

// ---------------------------------------------------------------------------
//  Subroutine table
// ---------------------------------------------------------------------------

/// A registered built-in function.
pub type BuiltinFn = Arc<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>;

/// Subroutine bodies discovered from the top-level command list, plus
/// dynamically registered built-in functions.  Names are normalized to
/// uppercase.
#[derive(Clone, Default)]
pub struct SubroutineTable {
    bodies: HashMap<String, Arc<Vec<Command>>>,
    builtins: HashMap<String, BuiltinFn>,
}

impl SubroutineTable {
    /// Discovery pass: scan for label markers and record each body span.
    pub fn discover(commands: &[Command]) -> Self {
        let mut bodies = HashMap::new();
        let mut i = 0;
        while i < commands.len() {
            if let CommandKind::Label { name } = &commands[i].kind {
                let start = i + 1;
                let mut end = start;
                while end < commands.len() {
                    match &commands[end].kind {
                        CommandKind::Label { .. } => break,
                        CommandKind::Return { .. } => {
                            end += 1; // RETURN belongs to the body.
                            break;
                        }
                        _ => end += 1,
                    }
                }
                bodies.insert(
                    name.to_uppercase(),
                    Arc::new(commands[start..end].to_vec()),
                );
                i = end;
            } else {
                i += 1;
            }
        }
        Self {
            bodies,
            builtins: HashMap::new(),
        }
    }

    /// Look up a subroutine body.
    pub fn body(&self, name: &str) -> Option<Arc<Vec<Command>>> {
        self.bodies.get(&name.to_uppercase()).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bodies.contains_key(&name.to_uppercase())
    }

    /// Register a built-in function, callable when no user subroutine
    /// shadows the name.
    pub fn register_builtin(&mut self, name: &str, f: BuiltinFn) {
        self.builtins.insert(name.to_uppercase(), f);
    }

    pub fn builtin(&self, name: &str) -> Option<BuiltinFn> {
        self.builtins.get(&name.to_uppercase()).cloned()
    }

    /// Carry registered built-ins over from a previous table.
    pub fn adopt_builtins(&mut self, previous: SubroutineTable) {
        self.builtins.extend(previous.builtins);
    }
}

impl std::fmt::Debug for SubroutineTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubroutineTable")
            .field("bodies", &self.bodies.keys().collect::<Vec<_>>())
            .field("builtins", &self.builtins.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ---------------------------------------------------------------------------
//  Invocation frames
// ---------------------------------------------------------------------------

/// A call-stack frame: one active CALL.
#[derive(Debug, Clone, PartialEq)]
pub struct CallFrame {
    pub name: String,
}

/// Frame kind on the execution-context stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    /// A CALL in flight.
    Subroutine,
    /// A host-pushed statement frame.
    Statement,
}

/// An execution-context frame — diagnostic provenance only, never consulted
/// for control flow.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub kind: ContextKind,
    pub line: u32,
    pub display: String,
    pub source_file: Option<String>,
    pub extra: Value,
}

/// Result of a CALL.
#[derive(Debug, Clone, PartialEq)]
pub struct CallOutcome {
    /// True when the callee terminated the whole script.
    pub terminated: bool,
    /// RETURN's value, or the ambient return-value slot when the body fell
    /// off the end.
    pub return_value: Option<Value>,
}

// ---------------------------------------------------------------------------
//  CALL execution
// ---------------------------------------------------------------------------

impl Interpreter {
    /// Execute a CALL.
    ///
    /// The execution-context frame is pushed immediately, before name
    /// resolution, so even "subroutine not found" carries full call-site
    /// provenance.  It is popped on success and retained on failure.
    pub async fn call(
        &mut self,
        target: &CallTarget,
        args: &[RawValue],
        line: u32,
        source_file: Option<&str>,
        executor: &dyn CommandExecutor,
    ) -> Result<CallOutcome> {
        let display = match target {
            CallTarget::Name(name) => format!("CALL {name}"),
            CallTarget::Variable(var) => format!("CALL ({var})"),
        };
        self.push_context(ExecutionContext {
            kind: ContextKind::Subroutine,
            line,
            display,
            source_file: source_file.map(str::to_string),
            extra: Value::Null,
        });

        let name = match target {
            CallTarget::Name(name) => name.clone(),
            CallTarget::Variable(var) => match self.vars().get(var) {
                Some(v) => value_to_text(v),
                None => {
                    return Err(EngineError::UndefinedDynamicTarget {
                        variable: var.clone(),
                    })
                }
            },
        };

        // External scripts are identified by a relative-path prefix and
        // delegated wholesale; their result propagates untouched.
        if name.starts_with("./") || name.starts_with("../") {
            let runner = self
                .script_runner()
                .ok_or(EngineError::MissingCollaborator("external script runner"))?;
            let arg_values = self.evaluate_call_args(args)?;
            let outcome = runner.run(&name, &arg_values, self).await?;
            self.pop_context();
            return Ok(outcome);
        }

        let body = self.subroutines().body(&name);
        let Some(body) = body else {
            // Built-in fallback: CALL semantics store the value into RESULT
            // instead of yielding a function value.
            if let Some(builtin) = self.subroutines().builtin(&name) {
                let arg_values = self.evaluate_call_args(args)?;
                let value = builtin(&arg_values)?;
                self.vars_mut().set("RESULT", value.clone());
                self.pop_context();
                return Ok(CallOutcome {
                    terminated: false,
                    return_value: Some(value),
                });
            }
            return Err(EngineError::SubroutineNotFound { name });
        };

        let arg_values = self.evaluate_call_args(args)?;

        // The PARSE ARG slot is shared global state with no save/restore:
        // a nested CALL replaces it for the duration of the callee, and a
        // recursive caller sees the callee's arguments afterwards
        // (last-call-wins).
        self.replace_script_args(arg_values.iter().map(value_to_text).collect());

        self.push_call_frame(CallFrame { name: name.clone() });
        tracing::debug!(subroutine = %name, line, "entering subroutine");

        match executor.execute(self, &body).await {
            Ok(ExecOutcome::Returned(value)) => {
                self.pop_call_frame();
                self.pop_context();
                if let Some(v) = &value {
                    self.vars_mut().set("RESULT", v.clone());
                }
                self.set_return_value(value.clone());
                Ok(CallOutcome {
                    terminated: false,
                    return_value: value,
                })
            }
            Ok(ExecOutcome::Completed) => {
                self.pop_call_frame();
                self.pop_context();
                Ok(CallOutcome {
                    terminated: false,
                    return_value: self.return_value().cloned(),
                })
            }
            Ok(ExecOutcome::Terminated) => {
                self.pop_call_frame();
                self.pop_context();
                Ok(CallOutcome {
                    terminated: true,
                    return_value: self.return_value().cloned(),
                })
            }
            Err(e) => {
                // Pop only the call stack; the context frame stays attached
                // so the propagating error still shows the full CALL chain.
                self.pop_call_frame();
                tracing::warn!(subroutine = %name, error = %e, "subroutine failed");
                Err(e)
            }
        }
    }

    /// Evaluate CALL arguments positionally: quoted literal → unquoted;
    /// variable lookup falling back to the raw token; anything else → full
    /// resolution.
    fn evaluate_call_args(&self, args: &[RawValue]) -> Result<Vec<Value>> {
        args.iter().map(|a| self.resolve_operand(a)).collect()
    }
}

// ---------------------------------------------------------------------------
//  Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::CommandKind;

    fn label(line: u32, name: &str) -> Command {
        Command::new(line, CommandKind::Label { name: name.into() })
    }

    fn ret(line: u32) -> Command {
        Command::new(line, CommandKind::Return { value: None })
    }

    fn other(line: u32) -> Command {
        Command::new(line, CommandKind::Other(Value::Null))
    }

    #[test]
    fn test_discovery_body_spans() {
        let commands = vec![
            other(1),
            label(2, "first"),
            other(3),
            ret(4),
            other(5),
            label(6, "second"),
            other(7),
        ];
        let table = SubroutineTable::discover(&commands);

        // Body runs through RETURN inclusive.
        let first = table.body("FIRST").unwrap();
        assert_eq!(first.len(), 2);
        assert!(matches!(first[1].kind, CommandKind::Return { .. }));

        // Body with no RETURN runs to end of list.
        let second = table.body("second").unwrap();
        assert_eq!(second.len(), 1);
    }

    #[test]
    fn test_discovery_adjacent_labels() {
        let commands = vec![label(1, "a"), label(2, "b"), other(3)];
        let table = SubroutineTable::discover(&commands);
        assert_eq!(table.body("A").unwrap().len(), 0);
        assert_eq!(table.body("B").unwrap().len(), 1);
    }

    #[test]
    fn test_names_uppercased() {
        let commands = vec![label(1, "Greet"), ret(2)];
        let table = SubroutineTable::discover(&commands);
        assert!(table.contains("GREET"));
        assert!(table.contains("greet"));
    }

    #[test]
    fn test_builtin_registration() {
        let mut table = SubroutineTable::default();
        table.register_builtin("length", Arc::new(|args| {
            Ok(Value::from(value_to_text(&args[0]).len()))
        }));
        let f = table.builtin("LENGTH").unwrap();
        assert_eq!(f(&[Value::String("abc".into())]).unwrap(), Value::from(3));
    }
}
