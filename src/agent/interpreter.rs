//! Task interpreter: asks the model to turn free text into a structured action,
//! then normalizes that action into step expressions.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use super::step::{MalformedStep, StepExpression};
use crate::capabilities::CapabilityRegistry;
use crate::error::TaskError;
use crate::llm::{strip_code_fence, LlmClient, Message};

/// The model's reply, before it is reduced to step expressions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructuredAction {
    /// One capability; the field values become positional arguments in reply order.
    Action {
        name: String,
        fields: Vec<(String, String)>,
    },
    /// Explicit `name(args)` expressions, used verbatim.
    Steps(Vec<String>),
}

impl StructuredAction {
    /// Parses a raw model reply (optionally fenced) into an action.
    pub fn from_reply(reply: &str) -> Result<Self, TaskError> {
        let value: Value = serde_json::from_str(strip_code_fence(reply))
            .map_err(|e| TaskError::InvalidModelResponse(format!("{e}: {}", reply.trim())))?;
        let Value::Object(map) = value else {
            return Err(TaskError::InvalidModelResponse(format!(
                "expected a JSON object, got: {}",
                reply.trim()
            )));
        };

        if let Some(action) = map.get("action") {
            let name = action
                .as_str()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .ok_or_else(|| {
                    TaskError::InvalidModelResponse(format!("\"action\" must be a name, got {action}"))
                })?
                .to_string();
            let fields = map
                .iter()
                .filter(|(key, _)| key.as_str() != "action")
                .map(|(key, value)| (key.clone(), argument_text(value)))
                .collect();
            return Ok(StructuredAction::Action { name, fields });
        }

        if let Some(steps) = map.get("steps") {
            let steps = steps
                .as_array()
                .ok_or_else(|| {
                    TaskError::InvalidModelResponse("\"steps\" must be an array".to_string())
                })?
                .iter()
                .map(|step| {
                    step.as_str().map(str::to_string).ok_or_else(|| {
                        TaskError::InvalidModelResponse(format!(
                            "step must be a string, got {step}"
                        ))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            if steps.is_empty() {
                return Err(TaskError::InvalidModelResponse(
                    "\"steps\" is empty".to_string(),
                ));
            }
            return Ok(StructuredAction::Steps(steps));
        }

        Err(TaskError::InvalidModelResponse(
            "reply has neither \"action\" nor \"steps\"".to_string(),
        ))
    }

    /// Reduces the action to the step expressions that will be executed.
    pub fn into_steps(self) -> Result<Vec<StepExpression>, MalformedStep> {
        match self {
            StructuredAction::Action { name, fields } => Ok(vec![StepExpression::new(
                name,
                fields.into_iter().map(|(_, value)| value).collect(),
            )]),
            StructuredAction::Steps(steps) => {
                steps.iter().map(|s| StepExpression::parse(s)).collect()
            }
        }
    }
}

/// Positional argument text for a JSON field value.
pub(crate) fn argument_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        // Numbers, booleans, arrays and objects keep their compact JSON form
        other => other.to_string(),
    }
}

const PROMPT_HEADER: &str = "\
You translate task descriptions into a single JSON object that names the operation to perform.

Return ONLY the JSON object, with no commentary and no code fence. Use one of these shapes:
- {\"action\": \"<capability>\", \"<param>\": \"<value>\", ...} with the parameters in the order the capability declares them
- {\"steps\": [\"<capability>(<arg>, <arg>)\", ...]} when the task needs several operations in sequence

File paths live under /data. Parameters marked with ? are optional and may be omitted.

Available capabilities:
";

const PROMPT_EXAMPLES: &str = "
Examples:
1. Task: \"Count the number of Wednesdays in /data/dates.txt and save to /data/dates-wednesdays.txt\"
   Output: {\"action\": \"count_weekdays\", \"input_file\": \"/data/dates.txt\", \"weekday\": \"Wednesday\", \"output_file\": \"/data/dates-wednesdays.txt\"}
2. Task: \"Format the contents of /data/format.md using Prettier.\"
   Output: {\"action\": \"format_markdown\", \"file\": \"/data/format.md\"}
3. Task: \"Sort the contacts, then convert /data/docs/index.md to HTML\"
   Output: {\"steps\": [\"sort_contacts()\", \"convert_md_to_html('/data/docs/index.md', '/data/docs/index.html')\"]}
";

/// Builds the system prompt listing every registered capability signature.
pub fn system_prompt(registry: &CapabilityRegistry) -> String {
    let mut prompt = String::from(PROMPT_HEADER);
    for capability in registry.iter() {
        prompt.push_str(&format!(
            "- {}: {}\n",
            capability.signature(),
            capability.description()
        ));
    }
    prompt.push_str(PROMPT_EXAMPLES);
    prompt
}

/// Sends task text to the model and normalizes its reply.
pub struct TaskInterpreter {
    llm: Arc<dyn LlmClient>,
    timeout: Duration,
    system_prompt: String,
}

impl TaskInterpreter {
    pub fn new(llm: Arc<dyn LlmClient>, timeout: Duration, registry: &CapabilityRegistry) -> Self {
        Self {
            llm,
            timeout,
            system_prompt: system_prompt(registry),
        }
    }

    /// Asks the model for a structured action.
    ///
    /// Transport failures and timeouts are `ModelUnavailable`; an unusable
    /// reply is `InvalidModelResponse`.
    pub async fn request_action(&self, task: &str) -> Result<StructuredAction, TaskError> {
        let messages = [Message::user(format!("Task: \"{task}\""))];
        let response =
            match tokio::time::timeout(self.timeout, self.llm.complete(&self.system_prompt, &messages))
                .await
            {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => return Err(TaskError::ModelUnavailable(format!("{e:#}"))),
                Err(_) => {
                    return Err(TaskError::ModelUnavailable(format!(
                        "no reply within {}s",
                        self.timeout.as_secs()
                    )))
                }
            };

        debug!(
            "Model reply ({} in / {} out tokens): {}",
            response.input_tokens, response.output_tokens, response.text
        );
        StructuredAction::from_reply(&response.text)
    }
}
