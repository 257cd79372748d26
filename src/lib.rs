//! Parley — conversational session core
//!
//! Turns a single long-lived, stateful agent execution engine into a
//! multiplexed, resumable, cancellable streaming protocol for many
//! concurrent client channels. The engine, the persistent store, and the
//! title-generation service are collaborator traits; transport framing and
//! authentication live outside this crate.
//!
//! # Quick Start
//!
//! ```ignore
//! use parley::prelude::*;
//!
//! let mut registry = SessionRegistry::new(services, ParleyConfig::from_env());
//! let session = registry.open("chan-1", OpenRequest::default(), sink).await?;
//! registry.dispatch("chan-1", ClientMessage::Message {
//!     content: "Hello!".into(),
//!     model: None,
//! })?;
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod prelude;
pub mod protocol;
pub mod session;
pub mod store;
pub mod titles;
