// src/core/errors.rs

//! Defines the primary error type for the entire application.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all possible failures within the agent.
/// Using `thiserror` allows for clean error definitions and automatic `From` trait
/// implementations. Internal code propagates this typed error; `main.rs` and
/// `config.rs` sit at an `anyhow::Error` boundary above it.
#[derive(Error, Debug, Clone)]
pub enum AgentError {
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("store error: {0}")]
    Store(String),

    #[error("record not found")]
    NotFound,

    #[error("invalid condition: {0}")]
    InvalidCondition(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("notification transport error: {0}")]
    Transport(String),

    #[error("container runtime error: {0}")]
    Runtime(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for AgentError {
    fn from(e: std::io::Error) -> Self {
        AgentError::Io(Arc::new(e))
    }
}

impl From<rusqlite::Error> for AgentError {
    fn from(e: rusqlite::Error) -> Self {
        AgentError::Store(e.to_string())
    }
}

impl From<r2d2::Error> for AgentError {
    fn from(e: r2d2::Error) -> Self {
        AgentError::Store(e.to_string())
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        AgentError::Internal(format!("JSON serialization error: {e}"))
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(e: reqwest::Error) -> Self {
        AgentError::Transport(e.to_string())
    }
}

pub type AgentResult<T> = Result<T, AgentError>;
