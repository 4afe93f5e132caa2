//! Error types for the campaign dispatch engine.

use std::time::Duration;

/// Top-level error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Campaign error: {0}")]
    Campaign(#[from] CampaignError),

    #[error("Qualification error: {0}")]
    Qualification(#[from] QualificationError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Caller input rejected before any campaign exists.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Lead list is empty")]
    EmptyLeadList,

    #[error("At least one message template is required")]
    NoTemplates,

    #[error("At most {max} templates per campaign, got {got}")]
    TooManyTemplates { max: usize, got: usize },

    #[error("Template {index} is blank")]
    BlankTemplate { index: usize },

    #[error("Invalid phone number: {0:?}")]
    InvalidPhone(String),

    #[error("Unknown campaign kind: {0}")]
    UnknownCampaignKind(String),

    #[error("Unknown pipeline stage: {0}")]
    UnknownStage(String),

    #[error("Unknown sentiment: {0}")]
    UnknownSentiment(String),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Message transport errors. Per-lead failures are recorded, never bubbled.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Transport {name} is not configured: {reason}")]
    NotConfigured { name: String, reason: String },

    #[error("Transport {name} unreachable: {reason}")]
    Unreachable { name: String, reason: String },

    #[error("Transport {name} rejected message with status {status}: {body}")]
    Rejected {
        name: String,
        status: u16,
        body: String,
    },

    #[error("Transport {name} timed out after {timeout:?}")]
    Timeout { name: String, timeout: Duration },

    #[error("HTTP error: {0}")]
    Http(String),
}

/// Campaign lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum CampaignError {
    #[error("Campaign {id} not found")]
    NotFound { id: String },

    #[error("Campaign {id} could not start: {reason}")]
    SetupFailed { id: String, reason: String },

    #[error("Campaign {id} already in state {from}, cannot transition to {to}")]
    InvalidTransition { id: String, from: String, to: String },
}

/// Qualification pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum QualificationError {
    #[error("Lead {phone} not found")]
    LeadNotFound { phone: String },
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, Error>;
