//! Execution coordinator: interprets a task, then runs its steps in order,
//! stopping at the first failure.
//!
//! Every step goes through the same gate before its handler runs: the name
//! must resolve in the registry, the argument count must fit the declared
//! parameters, path arguments must pass the guard and URL arguments must be
//! http(s). Handlers are bounded by the configured timeout.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};
use uuid::Uuid;

use super::interpreter::{argument_text, TaskInterpreter};
use super::step::StepExpression;
use crate::capabilities::{check_arity, Capability, CapabilityContext, CapabilityRegistry, ParamKind};
use crate::error::TaskError;
use crate::sandbox::PathGuard;

/// Where a task stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPhase {
    Interpreting,
    Parsing,
    Executing,
}

impl fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TaskPhase::Interpreting => "interpreting",
            TaskPhase::Parsing => "parsing",
            TaskPhase::Executing => "executing",
        })
    }
}

/// One attempted step: its success payload or its failure description.
#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub function: String,
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug)]
pub struct TaskFailure {
    pub error: TaskError,
    pub phase: TaskPhase,
}

/// Aggregate result of one task: every step attempted, up to and including
/// the failing one.
#[derive(Debug)]
pub struct TaskOutcome {
    pub task_id: Uuid,
    pub steps: Vec<StepResult>,
    pub failure: Option<TaskFailure>,
}

impl TaskOutcome {
    fn failed(task_id: Uuid, steps: Vec<StepResult>, error: TaskError, phase: TaskPhase) -> Self {
        Self {
            task_id,
            steps,
            failure: Some(TaskFailure { error, phase }),
        }
    }
}

pub struct ExecutionCoordinator {
    registry: Arc<CapabilityRegistry>,
    interpreter: TaskInterpreter,
    ctx: CapabilityContext,
}

impl ExecutionCoordinator {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        interpreter: TaskInterpreter,
        ctx: CapabilityContext,
    ) -> Self {
        Self {
            registry,
            interpreter,
            ctx,
        }
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn guard(&self) -> &PathGuard {
        &self.ctx.guard
    }

    /// Interprets `task` and runs the resulting steps.
    pub async fn execute(&self, task: &str) -> TaskOutcome {
        let task_id = Uuid::new_v4();
        info!("[{task_id}] Received task: {task}");

        info!("[{task_id}] Interpreting");
        let action = match self.interpreter.request_action(task).await {
            Ok(action) => action,
            Err(e) => {
                warn!("[{task_id}] Interpretation failed: {e}");
                return TaskOutcome::failed(task_id, Vec::new(), e, TaskPhase::Interpreting);
            }
        };

        // Every step is parsed before any of them runs
        info!("[{task_id}] Parsing");
        let steps = match action.into_steps() {
            Ok(steps) => steps,
            Err(e) => {
                warn!("[{task_id}] {e}");
                return TaskOutcome::failed(task_id, Vec::new(), e.into(), TaskPhase::Parsing);
            }
        };

        self.run_steps(task_id, &steps).await
    }

    /// Runs steps in order; the first failure ends the task.
    pub async fn run_steps(&self, task_id: Uuid, steps: &[StepExpression]) -> TaskOutcome {
        info!("[{task_id}] Executing {} step(s)", steps.len());
        let mut results = Vec::with_capacity(steps.len());

        for (index, step) in steps.iter().enumerate() {
            let outcome = self.run_step(step).await;
            let mut record = StepResult {
                function: step.name.clone(),
                args: step.args.clone(),
                result: None,
                error: None,
            };
            match outcome {
                Ok(value) => {
                    info!("[{task_id}] Step {} {} succeeded", index + 1, step.name);
                    record.result = Some(value);
                    results.push(record);
                }
                Err(e) => {
                    warn!("[{task_id}] Step {} {step} failed: {e}", index + 1);
                    record.error = Some(e.to_string());
                    results.push(record);
                    return TaskOutcome::failed(task_id, results, e, TaskPhase::Executing);
                }
            }
        }

        info!("[{task_id}] Completed");
        TaskOutcome {
            task_id,
            steps: results,
            failure: None,
        }
    }

    /// Runs one capability with named arguments (the per-capability endpoints).
    ///
    /// Names are mapped onto the declared positions. A gap before a supplied
    /// optional parameter is filled with an empty string, which handlers
    /// treat as "use the default".
    pub async fn invoke_direct(
        &self,
        capability: &dyn Capability,
        named: &Map<String, Value>,
    ) -> TaskOutcome {
        let task_id = Uuid::new_v4();
        info!("[{task_id}] Direct call to {}", capability.name());

        match positional_args(capability, named) {
            Ok(args) => {
                let step = StepExpression::new(capability.name(), args);
                self.run_steps(task_id, std::slice::from_ref(&step)).await
            }
            Err(e) => {
                warn!("[{task_id}] {e}");
                TaskOutcome::failed(task_id, Vec::new(), e, TaskPhase::Parsing)
            }
        }
    }

    async fn run_step(&self, step: &StepExpression) -> Result<Value, TaskError> {
        let capability = self.registry.resolve(&step.name)?;
        let args = self.checked_args(capability, &step.args)?;

        let timeout = self.ctx.handler_timeout;
        match tokio::time::timeout(timeout, capability.execute(&args, &self.ctx)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(TaskError::from_handler(capability.name(), e)),
            Err(_) => Err(TaskError::HandlerTimeout {
                capability: capability.name().to_string(),
                secs: timeout.as_secs(),
            }),
        }
    }

    /// Arity, guard and URL checks; path arguments come back canonical.
    fn checked_args(
        &self,
        capability: &dyn Capability,
        args: &[String],
    ) -> Result<Vec<String>, TaskError> {
        let params = capability.params();
        check_arity(params, args.len()).map_err(|detail| TaskError::ExecutionError {
            capability: capability.name().to_string(),
            detail,
        })?;

        params
            .iter()
            .zip(args)
            .map(|(param, value)| -> Result<String, TaskError> {
                match param.kind {
                    // Blank optional paths fall back to the handler default
                    ParamKind::Path if value.trim().is_empty() && !param.required => Ok(String::new()),
                    ParamKind::Path => {
                        let path = self.ctx.guard.guard(value)?;
                        Ok(path.to_string_lossy().into_owned())
                    }
                    ParamKind::Url => match url::Url::parse(value.trim()) {
                        Ok(url) if matches!(url.scheme(), "http" | "https") => {
                            Ok(value.trim().to_string())
                        }
                        _ => Err(TaskError::ExecutionError {
                            capability: capability.name().to_string(),
                            detail: format!("{} must be an http(s) URL, got '{value}'", param.name),
                        }),
                    },
                    ParamKind::Text => Ok(value.clone()),
                }
            })
            .collect()
    }
}

/// Maps named values onto a capability's positional parameters.
fn positional_args(
    capability: &dyn Capability,
    named: &Map<String, Value>,
) -> Result<Vec<String>, TaskError> {
    let params = capability.params();
    if let Some(unknown) = named.keys().find(|k| !params.iter().any(|p| p.name == k.as_str())) {
        return Err(TaskError::InvalidRequest(format!(
            "{} has no parameter '{unknown}'",
            capability.name()
        )));
    }

    let last_given = params.iter().rposition(|p| named.contains_key(p.name));
    let Some(last_given) = last_given else {
        return Ok(Vec::new());
    };

    params[..=last_given]
        .iter()
        .map(|param| match named.get(param.name) {
            Some(value) => Ok(argument_text(value)),
            None if !param.required => Ok(String::new()),
            None => Err(TaskError::InvalidRequest(format!(
                "{} needs parameter '{}'",
                capability.name(),
                param.name
            ))),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::capabilities::builtin;
    use crate::capabilities::registry::RegistryBuilder;
    use crate::capabilities::testing::{context_with, ScriptedLlm};
    use crate::capabilities::Param;
    use crate::llm::LlmClient;

    impl TaskOutcome {
        fn is_success(&self) -> bool {
            self.failure.is_none()
        }
    }

    /// Counts invocations and echoes its arguments.
    struct Counting {
        name: &'static str,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Capability for Counting {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "counts calls"
        }
        fn params(&self) -> &[Param] {
            &[]
        }
        async fn execute(&self, args: &[String], _: &CapabilityContext) -> anyhow::Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"status": "success", "args": args}))
        }
    }

    struct Failing;

    #[async_trait]
    impl Capability for Failing {
        fn name(&self) -> &str {
            "explode"
        }
        fn description(&self) -> &str {
            "always fails"
        }
        fn params(&self) -> &[Param] {
            &[]
        }
        async fn execute(&self, _: &[String], _: &CapabilityContext) -> anyhow::Result<Value> {
            anyhow::bail!("handler blew up")
        }
    }

    struct Sleepy;

    #[async_trait]
    impl Capability for Sleepy {
        fn name(&self) -> &str {
            "sleepy"
        }
        fn description(&self) -> &str {
            "never finishes in time"
        }
        fn params(&self) -> &[Param] {
            &[]
        }
        async fn execute(&self, _: &[String], _: &CapabilityContext) -> anyhow::Result<Value> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Value::Null)
        }
    }

    fn coordinator(
        root: &std::path::Path,
        builder: RegistryBuilder,
        replies: Vec<&str>,
    ) -> ExecutionCoordinator {
        let registry = builder.build().unwrap();
        let llm: Arc<dyn LlmClient> = Arc::new(ScriptedLlm::new(replies));
        let interpreter = TaskInterpreter::new(llm.clone(), Duration::from_secs(5), &registry);
        ExecutionCoordinator::new(Arc::new(registry), interpreter, context_with(root, llm))
    }

    fn builtins() -> RegistryBuilder {
        builtin::register_all(CapabilityRegistry::builder())
    }

    fn error_kind(outcome: &TaskOutcome) -> &'static str {
        outcome.failure.as_ref().map(|f| f.error.kind()).unwrap_or("none")
    }

    #[tokio::test]
    async fn test_action_reply_runs_count_weekdays() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("d.txt"),
            "2024-01-03\n2024-01-04\n2024-01-10\n",
        )
        .unwrap();
        let coordinator = coordinator(
            dir.path(),
            builtins(),
            vec![
                r#"{"action":"count_weekdays","file":"/data/d.txt","weekday":"Wednesday","output":"/data/out.txt"}"#,
            ],
        );

        let outcome = coordinator.execute("count wednesdays").await;
        assert!(outcome.is_success(), "{:?}", outcome.failure);
        assert_eq!(outcome.steps.len(), 1);
        assert_eq!(outcome.steps[0].function, "count_weekdays");
        assert_eq!(
            outcome.steps[0].args,
            vec!["/data/d.txt", "Wednesday", "/data/out.txt"]
        );
        assert_eq!(outcome.steps[0].result.as_ref().unwrap()["count"], 2);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("out.txt")).unwrap(),
            "2"
        );
    }

    #[tokio::test]
    async fn test_failing_second_step_stops_the_task() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let builder = CapabilityRegistry::builder()
            .register(Box::new(Counting {
                name: "first",
                calls: calls.clone(),
            }))
            .register(Box::new(Failing))
            .register(Box::new(Counting {
                name: "third",
                calls: calls.clone(),
            }));
        let coordinator = coordinator(
            dir.path(),
            builder,
            vec![r#"{"steps": ["first()", "explode()", "third()"]}"#],
        );

        let outcome = coordinator.execute("three steps").await;
        assert_eq!(outcome.steps.len(), 2);
        assert!(outcome.steps[0].result.is_some());
        assert!(outcome.steps[1].error.as_ref().unwrap().contains("blew up"));
        assert_eq!(calls.load(Ordering::SeqCst), 1, "third step must not run");

        let failure = outcome.failure.unwrap();
        assert_eq!(failure.phase, TaskPhase::Executing);
        assert_eq!(failure.error.kind(), "execution_error");
    }

    #[tokio::test]
    async fn test_unknown_capability_is_unauthorized_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let builder = CapabilityRegistry::builder().register(Box::new(Counting {
            name: "first",
            calls: calls.clone(),
        }));
        let coordinator = coordinator(
            dir.path(),
            builder,
            vec![r#"{"steps": ["os_system('rm -rf /')", "first()"]}"#],
        );

        let outcome = coordinator.execute("be evil").await;
        assert_eq!(error_kind(&outcome), "unauthorized_capability");
        assert_eq!(outcome.steps.len(), 1);
        assert_eq!(outcome.steps[0].function, "os_system");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_lookup_is_case_sensitive() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(dir.path(), builtins(), vec![r#"{"action": "Sort_Contacts"}"#]);
        let outcome = coordinator.execute("sort").await;
        assert_eq!(error_kind(&outcome), "unauthorized_capability");
    }

    #[tokio::test]
    async fn test_guard_rejects_path_argument_before_handler() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(
            dir.path(),
            builtins(),
            vec![r#"{"steps": ["count_weekdays('/etc/passwd', 'Monday', '/data/o.txt')"]}"#],
        );

        let outcome = coordinator.execute("read passwd").await;
        assert_eq!(error_kind(&outcome), "access_denied");
        assert!(!dir.path().join("o.txt").exists());
    }

    #[tokio::test]
    async fn test_traversal_out_of_root_is_denied() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(
            dir.path(),
            builtins(),
            vec![r#"{"action": "sort_contacts", "input_file": "/data/../../etc/passwd"}"#],
        );
        let outcome = coordinator.execute("sort").await;
        assert_eq!(error_kind(&outcome), "access_denied");
    }

    #[tokio::test]
    async fn test_wrong_arity_is_execution_error() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(
            dir.path(),
            builtins(),
            vec![r#"{"steps": ["count_weekdays('/data/d.txt')"]}"#],
        );
        let outcome = coordinator.execute("count").await;
        let failure = outcome.failure.unwrap();
        assert_eq!(failure.error.kind(), "execution_error");
        assert!(failure.error.to_string().contains("expected 3 arguments, got 1"));
    }

    #[tokio::test]
    async fn test_non_http_url_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(
            dir.path(),
            builtins(),
            vec![r#"{"steps": ["fetch_api_data('file:///etc/passwd', '/data/x.txt')"]}"#],
        );
        let outcome = coordinator.execute("fetch").await;
        assert_eq!(error_kind(&outcome), "execution_error");
        assert!(!dir.path().join("x.txt").exists());
    }

    #[tokio::test]
    async fn test_missing_input_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(dir.path(), builtins(), vec![r#"{"action": "sort_contacts"}"#]);
        let outcome = coordinator.execute("sort").await;
        assert_eq!(error_kind(&outcome), "not_found");
    }

    #[tokio::test]
    async fn test_slow_handler_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let mut coordinator = coordinator(
            dir.path(),
            CapabilityRegistry::builder().register(Box::new(Sleepy)),
            vec![r#"{"action": "sleepy"}"#],
        );
        coordinator.ctx.handler_timeout = Duration::from_millis(50);

        let outcome = coordinator.execute("wait").await;
        let failure = outcome.failure.unwrap();
        assert_eq!(failure.error.kind(), "handler_timeout");
        assert!(failure.error.is_retriable());
    }

    #[tokio::test]
    async fn test_malformed_step_fails_before_any_execution() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let builder = CapabilityRegistry::builder().register(Box::new(Counting {
            name: "first",
            calls: calls.clone(),
        }));
        let coordinator = coordinator(
            dir.path(),
            builder,
            vec![r#"{"steps": ["first()", "first"]}"#],
        );

        let outcome = coordinator.execute("two").await;
        let failure = outcome.failure.unwrap();
        assert_eq!(failure.phase, TaskPhase::Parsing);
        assert_eq!(failure.error.kind(), "malformed_step");
        assert!(outcome.steps.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_model_failure_is_reported_at_interpreting() {
        let dir = tempfile::tempdir().unwrap();
        let registry = builtins().build().unwrap();
        let llm: Arc<dyn LlmClient> = Arc::new(ScriptedLlm::failing("connection reset"));
        let interpreter = TaskInterpreter::new(llm.clone(), Duration::from_secs(5), &registry);
        let coordinator =
            ExecutionCoordinator::new(Arc::new(registry), interpreter, context_with(dir.path(), llm));

        let outcome = coordinator.execute("anything").await;
        let failure = outcome.failure.unwrap();
        assert_eq!(failure.phase, TaskPhase::Interpreting);
        assert_eq!(failure.error.kind(), "model_unavailable");
    }

    #[tokio::test]
    async fn test_invoke_direct_maps_named_arguments() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("d.txt"), "2024-01-01\n2024-01-08\n").unwrap();
        let coordinator = coordinator(dir.path(), builtins(), vec![]);
        let capability = coordinator.registry().resolve("count_weekdays").unwrap();

        let named = json!({
            "output_file": "/data/mondays.txt",
            "weekday": "Monday",
            "input_file": "/data/d.txt",
        });
        let outcome = coordinator
            .invoke_direct(capability, named.as_object().unwrap())
            .await;
        assert!(outcome.is_success(), "{:?}", outcome.failure);
        assert_eq!(
            outcome.steps[0].args,
            vec!["/data/d.txt", "Monday", "/data/mondays.txt"]
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join("mondays.txt")).unwrap(),
            "2"
        );
    }

    #[tokio::test]
    async fn test_invoke_direct_fills_optional_gaps() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("contacts.json"),
            r#"[{"first_name":"B","last_name":"Z"},{"first_name":"A","last_name":"Y"}]"#,
        )
        .unwrap();
        let coordinator = coordinator(dir.path(), builtins(), vec![]);
        let capability = coordinator.registry().resolve("sort_contacts").unwrap();

        let named = json!({"output_file": "/data/sorted.json"});
        let outcome = coordinator
            .invoke_direct(capability, named.as_object().unwrap())
            .await;
        assert!(outcome.is_success(), "{:?}", outcome.failure);
        assert_eq!(outcome.steps[0].args, vec!["", "/data/sorted.json"]);
        assert!(dir.path().join("sorted.json").exists());
    }

    #[tokio::test]
    async fn test_invoke_direct_rejects_bad_names() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(dir.path(), builtins(), vec![]);
        let capability = coordinator.registry().resolve("count_weekdays").unwrap();

        let unknown = json!({"input_file": "/data/d.txt", "colour": "red"});
        let outcome = coordinator
            .invoke_direct(capability, unknown.as_object().unwrap())
            .await;
        let error = outcome.failure.unwrap().error;
        assert_eq!(error.kind(), "invalid_request");
        assert!(error.to_string().contains("no parameter 'colour'"));

        let missing = json!({"output_file": "/data/o.txt"});
        let outcome = coordinator
            .invoke_direct(capability, missing.as_object().unwrap())
            .await;
        let error = outcome.failure.unwrap().error;
        assert_eq!(error.kind(), "invalid_request");
        assert!(error.to_string().contains("needs parameter 'input_file'"));
        assert!(outcome.steps.is_empty());
    }
}
