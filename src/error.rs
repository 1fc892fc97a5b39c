use thiserror::Error;

use crate::core::validate::StructuralError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid graph: {0}")]
    Structural(#[from] StructuralError),

    #[error("Unknown transform {name:?} (available: {available})")]
    UnknownTransform { name: String, available: String },

    #[error("Unsupported graph format: {0}")]
    UnsupportedFormat(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Invalid envelope transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Worker command not found: {0}")]
    CommandNotFound(String),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Task join error: {0}")]
    TaskJoin(String),
}

pub type Result<T> = std::result::Result<T, Error>;
