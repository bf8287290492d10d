pub mod actions;
pub mod config;
pub mod context;
pub mod engine;
pub mod http_client;
pub mod llm_client;
pub mod log_store;
pub mod presenter;
pub mod prompt;
pub mod repetition;
pub mod runtime;
