//! Session lifecycle: engine binding, stream translation, conversation
//! state machine, and the channel registry.

pub mod binding;
pub mod conversation;
pub mod registry;
pub mod translator;

pub use binding::{AgentSessionBinding, CapabilityCatalog, CapabilitySet, ContextSource};
pub use conversation::{
    ConversationIdentity, ConversationSession, SessionServices, SessionState, StartOptions,
};
pub use registry::{OpenRequest, SessionRegistry};
pub use translator::{CancelFlag, ExchangeOutcome, ExchangeStatus, StreamTranslator, UNKNOWN_TOOL};
