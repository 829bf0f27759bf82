//! Configuration errors. Raised while turning an
//! [`IterationConfig`](crate::pipeline::IterationConfig) into a runnable
//! [`Iteration`](crate::pipeline::Iteration); never during event processing.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("unknown seeding layer set '{0}'")]
    UnknownLayerSet(String),

    #[error("seeding layer set '{0}' is defined twice")]
    DuplicateLayerSet(String),

    #[error("seeding layer set '{set}' names unknown layer '{layer}'")]
    UnknownLayer { set: String, layer: String },

    #[error("seeding layer set '{set}' has {got} layers, at least 3 are required")]
    LayerSetTooShort { set: String, got: usize },

    #[error("quality tier '{0}' is defined twice")]
    DuplicateTier(String),

    #[error("quality tier '{tier}' names unknown pre-filter '{pre_filter}'")]
    UnknownPreFilter { tier: String, pre_filter: String },

    #[error("quality tiers form a cycle through '{0}'")]
    TierCycle(String),

    #[error("merge set {set} names track list {list}, but only {available} lists are configured")]
    UnknownTrackList {
        set: usize,
        list: usize,
        available: usize,
    },

    #[error("track list {list} selects unknown tier '{tier}'")]
    UnknownSelectedTier { list: usize, tier: String },

    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}
