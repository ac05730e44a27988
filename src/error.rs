//! Error types for the weak-to-strong supervision core

use thiserror::Error;

/// Main error type for w2s operations
#[derive(Error, Debug)]
pub enum Error {
    /// No registry entry exists for the requested model identifier
    #[error("Descriptor not found: {0}")]
    DescriptorNotFound(String),

    /// The requested loss identifier is not one of the supported family
    #[error("Unknown loss: {0}")]
    UnknownLoss(String),

    /// The pretrained-weight provider could not locate weights
    #[error("Weights not found: {0}")]
    WeightsNotFound(String),

    /// The loaded weights do not match a supported causal-LM architecture
    #[error("Incompatible architecture: {0}")]
    IncompatibleArchitecture(String),

    /// None of the architecture config fields carry a hidden width
    #[error("Cannot determine hidden size for {0}")]
    HiddenSizeUndetermined(String),

    /// Persisted state sequence does not line up with the live module list
    #[error("State shape mismatch: expected {expected} blocks, got {actual}")]
    StateShapeMismatch {
        /// Number of blocks the live model expects
        expected: usize,
        /// Number of blocks in the persisted sequence
        actual: usize,
    },

    /// Head-mode options contradict each other or the forward-pass inputs
    #[error("Invalid head configuration: {0}")]
    InvalidHeadConfiguration(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Tensor operation error
    #[error("Tensor operation error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for w2s operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a descriptor-not-found error
    pub fn descriptor_not_found(name: impl Into<String>) -> Self {
        Self::DescriptorNotFound(name.into())
    }

    /// Create an unknown-loss error
    pub fn unknown_loss(name: impl Into<String>) -> Self {
        Self::UnknownLoss(name.into())
    }

    /// Create a weights-not-found error
    pub fn weights_not_found(msg: impl Into<String>) -> Self {
        Self::WeightsNotFound(msg.into())
    }

    /// Create an incompatible-architecture error
    pub fn incompatible_architecture(msg: impl Into<String>) -> Self {
        Self::IncompatibleArchitecture(msg.into())
    }

    /// Create an invalid-head-configuration error
    pub fn invalid_head(msg: impl Into<String>) -> Self {
        Self::InvalidHeadConfiguration(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}
