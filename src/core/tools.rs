//! Host tool registry and the dispatcher that answers agent tool calls.
//!
//! Every well-formed call is answered with exactly one
//! `function_call_output`, whether the tool succeeds, fails, panics or does
//! not exist. Calls missing a name or call id are dropped unanswered.

use anyhow::Result;
use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::core::session::{SessionCallbacks, ToolCallNotice};
use crate::core::webrtc::messages::{ServerEvent, event_type, scalar_text};

pub type ToolFn = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Name → async function map, fixed at session construction.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolFn>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, Fut>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let wrapped: ToolFn = Arc::new(move |args| handler(args).boxed());
        self.tools.insert(name.into(), wrapped);
    }

    /// Builder form of [`register`](Self::register).
    pub fn with_tool<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.register(name, handler);
        self
    }

    pub fn get(&self, name: &str) -> Option<ToolFn> {
        self.tools.get(name).cloned()
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Fields of a `response.function_call_arguments.done` event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallRequest {
    pub call_id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

impl ToolCallRequest {
    pub fn from_event(event: &ServerEvent) -> Option<Self> {
        match event {
            ServerEvent::FunctionCallArgumentsDone {
                call_id,
                name,
                arguments,
                ..
            } => Some(Self {
                call_id: call_id.clone(),
                name: name.clone(),
                arguments: arguments.clone(),
            }),
            _ => None,
        }
    }

    /// Lenient read of a raw tool-call payload. Scalar ids are stringified
    /// and structured `arguments` are re-serialized, so a call whose fields
    /// are off-shape is still answered.
    pub fn from_raw(raw: &Value) -> Option<Self> {
        if event_type(raw) != Some(ServerEvent::FUNCTION_CALL_ARGUMENTS_DONE) {
            return None;
        }
        let arguments = match raw.get("arguments") {
            None | Some(Value::Null) => None,
            Some(Value::String(text)) => Some(text.clone()),
            Some(other) => Some(other.to_string()),
        };
        Some(Self {
            call_id: scalar_text(raw.get("call_id")),
            name: scalar_text(raw.get("name")),
            arguments,
        })
    }
}

/// Where tool results go. The realtime client sends them over the data
/// channel as `conversation.item.create` / `function_call_output`.
#[async_trait]
pub trait ToolOutputSink: Send + Sync {
    async fn send_tool_output(&self, call_id: &str, output: String);
}

/// How a tool call was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolOutcome {
    /// Missing name or call id; nothing sent
    Dropped,
    Succeeded,
    NotFound,
    Failed,
}

fn failure(message: impl Into<String>) -> Value {
    json!({ "success": false, "error": message.into() })
}

/// Absent or blank arguments mean "no arguments".
fn parse_arguments(raw: Option<&str>) -> serde_json::Result<Value> {
    match raw.map(str::trim) {
        None | Some("") => Ok(json!({})),
        Some(text) => serde_json::from_str(text),
    }
}

#[derive(Clone, Default)]
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
}

impl ToolDispatcher {
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub async fn handle(
        &self,
        request: ToolCallRequest,
        observer: &SessionCallbacks,
        sink: &dyn ToolOutputSink,
    ) -> ToolOutcome {
        let name = request.name.filter(|n| !n.is_empty());
        let call_id = request.call_id.filter(|c| !c.is_empty());
        let (Some(name), Some(call_id)) = (name, call_id) else {
            warn!("Dropping tool call without name or call_id");
            return ToolOutcome::Dropped;
        };

        let arguments = match parse_arguments(request.arguments.as_deref()) {
            Ok(arguments) => arguments,
            Err(e) => {
                warn!(tool = %name, call_id = %call_id, "Malformed tool arguments: {e}");
                let payload = failure(format!("Invalid arguments for tool {name}: {e}"));
                sink.send_tool_output(&call_id, payload.to_string()).await;
                return ToolOutcome::Failed;
            }
        };

        info!(tool = %name, call_id = %call_id, "Executing tool call");
        observer.emit_tool_call(ToolCallNotice {
            name: name.clone(),
            arguments: arguments.clone(),
            result: None,
        });

        let (outcome, payload) = match self.registry.get(&name) {
            None => {
                warn!(tool = %name, "Tool not registered");
                (ToolOutcome::NotFound, failure(format!("Tool {name} not found")))
            }
            // Run on its own task so a panicking tool still gets answered
            Some(tool) => match tokio::spawn(tool(arguments)).await {
                Ok(Ok(value)) => {
                    debug!(tool = %name, "Tool call succeeded");
                    (ToolOutcome::Succeeded, value)
                }
                Ok(Err(e)) => {
                    error!(tool = %name, "Tool call failed: {e}");
                    (ToolOutcome::Failed, failure(e.to_string()))
                }
                Err(join_err) => {
                    error!(tool = %name, "Tool task aborted: {join_err}");
                    let message = if join_err.is_panic() {
                        format!("Tool {name} panicked")
                    } else {
                        join_err.to_string()
                    };
                    (ToolOutcome::Failed, failure(message))
                }
            },
        };

        sink.send_tool_output(&call_id, payload.to_string()).await;
        outcome
    }
}
