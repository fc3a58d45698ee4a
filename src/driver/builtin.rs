use serde::Deserialize;
use serde_json::{json, Value};

use super::{Run, RunEvent, StepDriver};
use crate::llm::ToolSpec;
use crate::tools::{parse_input, ToolContext};
use crate::types::messages::{ContentPart, Message, Role};
use crate::types::state::generate_id;
use crate::types::tools::{builtin, ToolCall, ToolResult};

#[derive(Debug, Deserialize)]
struct SetMessagesInput {
    messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
struct AddMessageInput {
    role: Role,
    content: String,
}

impl StepDriver {
    /// Execute one tool call on behalf of `run` and record it.
    ///
    /// `record_call` is false for calls the model emitted, since those
    /// already appear in the assistant message that requested them. Results
    /// are recorded either way unless the call opted out of history. A
    /// `set_messages` call leaves exactly the history it set.
    pub(super) async fn execute_tool(
        &self,
        run: &mut Run,
        call: ToolCall,
        record_call: bool,
    ) -> Vec<ToolResult> {
        let tool_call_id = call
            .tool_call_id
            .clone()
            .unwrap_or_else(|| generate_id("call"));
        let recorded = call.include_tool_call && call.tool_name != builtin::SET_MESSAGES;
        if recorded && record_call {
            run.state.push_message(Message::new(
                Role::Assistant,
                vec![ContentPart::ToolCall {
                    tool_call_id: tool_call_id.clone(),
                    tool_name: call.tool_name.clone(),
                    input: call.input.clone(),
                }],
            ));
        }
        self.emit(RunEvent::ToolCallStarted {
            run_id: run.state.run_id.clone(),
            tool_name: call.tool_name.clone(),
            tool_call_id: tool_call_id.clone(),
        });

        let results = match call.tool_name.as_str() {
            builtin::SET_OUTPUT => {
                run.state.output = Some(call.input.clone());
                vec![ToolResult::json(json!({"message": "Output set"}))]
            }
            builtin::SET_MESSAGES => match parse_input::<SetMessagesInput>(call.input.clone()) {
                Ok(input) => {
                    run.state.set_history(input.messages);
                    vec![ToolResult::json(json!({"message": "Messages set"}))]
                }
                Err(err) => err,
            },
            builtin::ADD_MESSAGE => match parse_input::<AddMessageInput>(call.input.clone()) {
                Ok(input) => {
                    run.state.push_message(Message::new(
                        input.role,
                        vec![ContentPart::Text {
                            text: input.content,
                        }],
                    ));
                    vec![ToolResult::json(json!({"message": "Message added"}))]
                }
                Err(err) => err,
            },
            builtin::SPAWN_AGENTS => self.spawn_agents(run, call.input.clone()).await,
            builtin::END_TURN => vec![ToolResult::json(json!({"message": "Turn ended"}))],
            _ if run.cancel.is_cancelled() => vec![ToolResult::error("aborted: run cancelled")],
            _ => {
                let ctx = ToolContext {
                    run_id: run.state.run_id.clone(),
                    agent_id: run.def.id.clone(),
                    cancel: run.cancel.child_token(),
                };
                self.tools.execute(&call, &ctx).await
            }
        };

        let is_error = results.iter().any(ToolResult::is_error);
        if is_error {
            tracing::debug!(run_id = %run.state.run_id, tool = %call.tool_name, "tool returned an error");
        }
        self.emit(RunEvent::ToolCallFinished {
            run_id: run.state.run_id.clone(),
            tool_name: call.tool_name.clone(),
            tool_call_id: tool_call_id.clone(),
            is_error,
        });

        if recorded {
            run.state.push_message(Message::tool_result(
                tool_call_id,
                call.tool_name,
                results.clone(),
            ));
        }
        results
    }

    /// Tools advertised to the model for `run`'s agent.
    pub(super) fn tool_specs(&self, run: &Run) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = builtin_specs()
            .into_iter()
            .chain(self.tools.specs())
            .filter(|spec| run.def.allows_tool(&spec.name))
            .collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs.dedup_by(|a, b| a.name == b.name);
        specs
    }
}

fn builtin_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: builtin::SET_OUTPUT.into(),
            description: "Set the structured output of this agent".into(),
            input_schema: json!({"type": "object"}),
        },
        ToolSpec {
            name: builtin::SET_MESSAGES.into(),
            description: "Replace the conversation history".into(),
            input_schema: json!({
                "type": "object",
                "properties": {"messages": {"type": "array"}},
                "required": ["messages"]
            }),
        },
        ToolSpec {
            name: builtin::ADD_MESSAGE.into(),
            description: "Append a message to the conversation".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "role": {"type": "string", "enum": ["user", "assistant"]},
                    "content": {"type": "string"}
                },
                "required": ["role", "content"]
            }),
        },
        ToolSpec {
            name: builtin::SPAWN_AGENTS.into(),
            description: "Spawn sub-agents and wait for their outputs".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "agents": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "agent_type": {"type": "string"},
                                "prompt": {"type": "string"},
                                "params": {"type": "object"}
                            },
                            "required": ["agent_type"]
                        }
                    }
                },
                "required": ["agents"]
            }),
        },
        ToolSpec {
            name: builtin::END_TURN.into(),
            description: "End this agent's turn".into(),
            input_schema: Value::Object(Default::default()),
        },
    ]
}
