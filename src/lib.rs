pub mod broker;
pub mod clock;
pub mod commands;
pub mod config;
pub mod context;
pub mod error;
pub mod fetcher;
pub mod models;
pub mod orchestrator;
pub(crate) mod retry;
pub mod schedule;
pub mod scheduler;
pub mod source;
pub mod store;
