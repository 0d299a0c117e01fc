pub mod component;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod export;
pub mod extract;
pub mod models;
pub mod orchestrator;
pub mod phase;
pub mod prompts;
pub mod sse;
pub mod state;
pub mod store;
