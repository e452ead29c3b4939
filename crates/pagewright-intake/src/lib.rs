//! # pagewright-intake
//!
//! The intake adapter: the façade between the user-facing API and the
//! build manager. Its one contract to the core is that `CreateJob` always
//! receives a fully-formed prompt — an unclear request first goes through
//! a short-lived clarification conversation.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

pub mod clarify;
pub mod clients;
pub mod server;
pub mod service;

pub use clarify::{
    Classification, ConversationMap, LlmClassifier, PassthroughClassifier, PromptClassifier,
};
pub use clients::{ManagerApi, ServingApi};
pub use server::{AppState, create_router};
pub use service::{IntakeService, SubmitOutcome};
