//! Completion-backed responder shared by every role

use super::{Handoff, Responder, ResponderContext, ResponderReply, Role, RoleDescriptor};
use crate::error::{ErrorKind, ErrorRecord, TurnError};
use crate::escalation::EscalationEvaluator;
use crate::llm::{
    ContentBlock, LlmMessage, LlmRequest, LlmResponse, LlmService, MessageRole, RetryController,
    ToolCall, ToolDefinition,
};
use crate::rules::RuleError;
use crate::state_machine::{Turn, TurnRole};
use crate::system_prompt;
use crate::tools::{ToolInvocation, ToolOutput, ToolRegistry};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;

/// Name of the pseudo-tool a responder calls to hand the conversation off
pub const HANDOFF_TOOL: &str = "handoff";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecialistSettings {
    /// Tool rounds before the responder must answer in text
    pub max_tool_rounds: usize,
    pub max_tokens: u32,
}

impl Default for SpecialistSettings {
    fn default() -> Self {
        Self {
            max_tool_rounds: 4,
            max_tokens: 1024,
        }
    }
}

/// Responder driven by the completion backend and a role descriptor
pub struct SpecialistResponder {
    descriptor: RoleDescriptor,
    llm: Arc<dyn LlmService>,
    tools: Arc<ToolRegistry>,
    retry: RetryController,
    evaluator: EscalationEvaluator,
    settings: SpecialistSettings,
}

impl SpecialistResponder {
    pub fn new(
        descriptor: RoleDescriptor,
        llm: Arc<dyn LlmService>,
        tools: Arc<ToolRegistry>,
        retry: RetryController,
        evaluator: &EscalationEvaluator,
        settings: SpecialistSettings,
    ) -> Result<Self, RuleError> {
        let evaluator = evaluator.with_extra(&descriptor.escalation_rules)?;
        Ok(Self {
            descriptor,
            llm,
            tools,
            retry,
            evaluator,
            settings,
        })
    }

    pub fn descriptor(&self) -> &RoleDescriptor {
        &self.descriptor
    }

    fn tool_definitions(&self) -> Vec<ToolDefinition> {
        let mut tools = self.tools.definitions_for(&self.descriptor.tools);
        tools.push(handoff_definition(self.descriptor.role));
        tools
    }

    async fn complete(&self, request: &LlmRequest, attempts: &mut u32) -> Result<LlmResponse, TurnError> {
        let llm = &self.llm;
        let role = self.descriptor.role;
        match self
            .retry
            .execute(move |attempt| {
                tracing::debug!(%role, attempt, "Requesting completion");
                llm.complete(request)
            })
            .await
        {
            Ok(done) => {
                *attempts += done.attempts;
                Ok(done.value)
            }
            Err(exhausted) => {
                *attempts += exhausted.attempts;
                Err(TurnError::Llm {
                    attempts: *attempts,
                    source: exhausted.source,
                })
            }
        }
    }

    async fn run_tool(&self, call: &ToolCall, ctx: &ResponderContext) -> ToolOutput {
        if !self.descriptor.tools.iter().any(|t| t == &call.name) {
            return ToolOutput::error(format!("tool {} is not available to this role", call.name));
        }
        let tool_ctx = self
            .tools
            .context(ctx.cancel.clone(), &ctx.conversation_id, &ctx.tenant_id);
        self.tools
            .execute(&call.name, call.input.clone(), tool_ctx)
            .await
            .unwrap_or_else(|| ToolOutput::error(format!("unknown tool {}", call.name)))
    }
}

#[async_trait]
impl Responder for SpecialistResponder {
    fn role(&self) -> Role {
        self.descriptor.role
    }

    async fn process(&self, ctx: &ResponderContext) -> Result<ResponderReply, TurnError> {
        let role = self.descriptor.role;
        let system = system_prompt::build(&self.descriptor, ctx);
        let tools = self.tool_definitions();
        let mut messages = history_messages(&ctx.history);
        append_message(&mut messages, MessageRole::User, ContentBlock::text(&ctx.user_text));

        let mut attempts = 0;
        let mut tool_results = Vec::new();
        let mut errors = Vec::new();
        let mut handoff: Option<Handoff> = None;
        let mut round = 0;

        let text = loop {
            if ctx.cancel.is_cancelled() {
                return Err(TurnError::Cancelled);
            }

            let offer_tools = round < self.settings.max_tool_rounds;
            let request = LlmRequest {
                system: system.clone(),
                messages: messages.clone(),
                tools: if offer_tools { tools.clone() } else { Vec::new() },
                max_tokens: Some(self.settings.max_tokens),
            };
            let response = self.complete(&request, &mut attempts).await?;
            let calls = response.tool_calls();
            if calls.is_empty() || !offer_tools {
                break response.text();
            }
            round += 1;

            let mut results = Vec::with_capacity(calls.len());
            for call in &calls {
                if call.name == HANDOFF_TOOL {
                    match serde_json::from_value::<Handoff>(call.input.clone()) {
                        Ok(requested) => {
                            tracing::info!(conv_id = %ctx.conversation_id, from = %role, to = %requested.role, "Handoff requested");
                            handoff = Some(requested);
                            results.push(ContentBlock::tool_result(&call.id, "handoff recorded", false));
                        }
                        Err(e) => results.push(ContentBlock::tool_result(
                            &call.id,
                            format!("invalid handoff: {e}"),
                            true,
                        )),
                    }
                    continue;
                }

                let output = self.run_tool(call, ctx).await;
                tool_results.push(ToolInvocation {
                    tool: call.name.clone(),
                    input: call.input.clone(),
                    output: output.output.clone(),
                    success: output.success,
                    role: role.to_string(),
                    at: Utc::now(),
                });

                let content = if output.success {
                    output.output
                } else {
                    tracing::warn!(conv_id = %ctx.conversation_id, tool = %call.name, error = %output.output, "Tool call failed");
                    errors.push(ErrorRecord::new(
                        ErrorKind::Tool,
                        TurnError::Tool {
                            tool: call.name.clone(),
                            message: output.output.clone(),
                        }
                        .to_string(),
                    ));
                    format!("unavailable: {}", output.output)
                };
                results.push(ContentBlock::tool_result(&call.id, content, !output.success));
            }

            messages.push(LlmMessage {
                role: MessageRole::Assistant,
                content: response.content.clone(),
            });
            messages.push(LlmMessage {
                role: MessageRole::User,
                content: results,
            });

            if handoff.is_some() {
                break response.text();
            }
        };

        let evaluation = self.evaluator.evaluate_exchange(&ctx.user_text, &text);
        if evaluation.marker_found {
            tracing::info!(conv_id = %ctx.conversation_id, %role, level = %evaluation.level, "Escalation marker in reply");
        }

        Ok(ResponderReply {
            role,
            text: evaluation.text,
            escalation: evaluation.level,
            handoff,
            tool_results,
            errors,
            attempts,
        })
    }
}

fn handoff_definition(current: Role) -> ToolDefinition {
    let targets: Vec<Value> = Role::ALL
        .into_iter()
        .filter(|r| *r != current)
        .map(|r| json!(r.as_str()))
        .collect();
    ToolDefinition {
        name: HANDOFF_TOOL.to_string(),
        description: "Pass the conversation to another specialist. Use when the patient's \
                      request belongs to a different role. `when` is `now` to let them answer \
                      this message or `next_turn` to take over from the next message."
            .to_string(),
        input_schema: json!({
            "type": "object",
            "required": ["role"],
            "properties": {
                "role": {"type": "string", "enum": targets},
                "when": {"type": "string", "enum": ["now", "next_turn"]}
            }
        }),
    }
}

/// Conversation history as backend messages, merging consecutive same-role turns
fn history_messages(history: &[Turn]) -> Vec<LlmMessage> {
    let mut messages = Vec::new();
    for turn in history {
        let role = match turn.role {
            TurnRole::User => MessageRole::User,
            TurnRole::Responder => MessageRole::Assistant,
            TurnRole::System => continue,
        };
        // The backend expects the first message to come from the user
        if messages.is_empty() && role == MessageRole::Assistant {
            continue;
        }
        append_message(&mut messages, role, ContentBlock::text(&turn.text));
    }
    messages
}

fn append_message(messages: &mut Vec<LlmMessage>, role: MessageRole, block: ContentBlock) {
    match messages.last_mut() {
        Some(last) if last.role == role => last.content.push(block),
        _ => messages.push(LlmMessage {
            role,
            content: vec![block],
        }),
    }
}
