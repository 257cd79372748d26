//! Engine-to-wire stream translation.
//!
//! Consumes the engine's normalized content-event sequence and emits the
//! external protocol, preserving engine order exactly and never buffering
//! beyond the unit being processed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::StreamExt;

use crate::engine::{ContentEvent, ContentEventStream};
use crate::metrics::ExchangeMetrics;
use crate::protocol::{EventSink, ServerEvent, ToolResultPayload, ToolUsePayload};
use crate::store::{ToolCallRecord, ToolCallStatus};

/// Sentinel tool name for results whose call id was never announced.
pub const UNKNOWN_TOOL: &str = "unknown";

/// Cooperative cancellation flag, polled at content-unit boundaries.
/// Advisory: it cannot interrupt a suspended pull, so at most one more
/// in-flight unit may be delivered after the flag is set.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How an exchange ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeStatus {
    Completed,
    Cancelled,
    Failed,
}

/// Everything accumulated while relaying one exchange.
#[derive(Debug, Clone)]
pub struct ExchangeOutcome {
    pub status: ExchangeStatus,
    pub text: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub error: Option<String>,
}

impl ExchangeOutcome {
    /// A failure that produced no streamed content.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: ExchangeStatus::Failed,
            text: String::new(),
            tool_calls: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// Relays one engine content-event sequence onto the wire protocol,
/// correlating tool results to their invocations by call id.
pub struct StreamTranslator {
    cancel: CancelFlag,
    correlation: HashMap<String, String>,
}

impl StreamTranslator {
    pub fn new(cancel: CancelFlag) -> Self {
        Self {
            cancel,
            correlation: HashMap::new(),
        }
    }

    /// Consume `stream` until its terminal marker, cancellation, or failure.
    ///
    /// The cancellation flag is checked once per pulled unit, before the
    /// unit is processed; on cancellation a single `cancelled` event is
    /// emitted and the remainder of the sequence is left undrained.
    pub async fn relay(
        &mut self,
        mut stream: ContentEventStream,
        sink: &EventSink,
        metrics: &mut ExchangeMetrics,
    ) -> ExchangeOutcome {
        let mut text = String::new();
        let mut tool_calls: Vec<ToolCallRecord> = Vec::new();

        while let Some(item) = stream.next().await {
            if self.cancel.is_set() {
                (sink)(ServerEvent::Cancelled);
                return ExchangeOutcome {
                    status: ExchangeStatus::Cancelled,
                    text,
                    tool_calls,
                    error: None,
                };
            }

            let event = match item {
                Ok(event) => event,
                Err(err) => {
                    return ExchangeOutcome {
                        status: ExchangeStatus::Failed,
                        text,
                        tool_calls,
                        error: Some(err.to_string()),
                    };
                }
            };

            match event {
                ContentEvent::Text { text: fragment } => {
                    text.push_str(&fragment);
                    (sink)(ServerEvent::TextDelta { content: fragment });
                }
                ContentEvent::ToolUse { id, name, input } => {
                    self.correlation.insert(id.clone(), name.clone());
                    metrics.record_tool(&name);
                    metrics.record_step(format!("tool:{name}"));
                    tool_calls.push(ToolCallRecord {
                        call_id: id.clone(),
                        name: name.clone(),
                        input: input.clone(),
                        output: None,
                        status: ToolCallStatus::Running,
                    });
                    (sink)(ServerEvent::ToolUse {
                        tool: ToolUsePayload { id, name, input },
                    });
                }
                ContentEvent::ToolResult { id, name, output } => {
                    if !self.correlation.contains_key(&id) {
                        tracing::warn!(
                            call_id = %id,
                            "protocol anomaly: tool result for unannounced call id"
                        );
                    }
                    let resolved = self
                        .correlation
                        .get(&id)
                        .cloned()
                        .or(name)
                        .unwrap_or_else(|| UNKNOWN_TOOL.to_string());
                    if let Some(record) = tool_calls.iter_mut().find(|r| r.call_id == id) {
                        record.output = Some(output.clone());
                        record.status = ToolCallStatus::Completed;
                    }
                    (sink)(ServerEvent::ToolResult {
                        tool: ToolResultPayload {
                            id,
                            name: resolved,
                            output,
                        },
                    });
                }
                ContentEvent::Terminal { success, error } => {
                    let status = if success {
                        ExchangeStatus::Completed
                    } else {
                        ExchangeStatus::Failed
                    };
                    return ExchangeOutcome {
                        status,
                        text,
                        tool_calls,
                        error: if success {
                            None
                        } else {
                            Some(error.unwrap_or_else(|| "engine reported failure".to_string()))
                        },
                    };
                }
            }
        }

        // The engine contract says the sequence ends with a terminal marker.
        ExchangeOutcome {
            status: ExchangeStatus::Failed,
            text,
            tool_calls,
            error: Some("engine stream ended without terminal marker".to_string()),
        }
    }
}
