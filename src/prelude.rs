//! Convenience re-exports for common use.

pub use crate::config::ParleyConfig;
pub use crate::engine::{
    ContentEvent, ContentEventStream, EngineConfig, EngineSession, ExecutionEngine,
};
pub use crate::error::{ParleyError, Result};
pub use crate::metrics::{ExchangeMetrics, ExchangeReport, Reusability, TaskShape};
pub use crate::protocol::{ClientMessage, EventSink, ServerEvent};
pub use crate::session::{
    AgentSessionBinding, CapabilityCatalog, CapabilitySet, ContextSource, ConversationIdentity,
    ConversationSession, ExchangeStatus, OpenRequest, SessionRegistry, SessionServices,
    SessionState, StartOptions,
};
pub use crate::store::{
    ConversationRecord, ConversationStore, MemoryStore, ToolCallRecord, TurnRecord, TurnRole,
};
pub use crate::titles::TitleService;
