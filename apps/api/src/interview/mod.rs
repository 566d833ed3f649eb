//! Interview practice: the session state machine, its prompts and parsers,
//! and the orchestration that drives it against a model provider.

pub mod generation;
pub mod handlers;
pub mod models;
pub mod parser;
pub mod prompts;
pub mod runner;
pub mod session;
pub mod store;
