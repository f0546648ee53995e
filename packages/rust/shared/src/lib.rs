//! Shared types, error model, and configuration for kenect.
//!
//! This crate is the foundation depended on by the other kenect crates.
//! It provides:
//! - [`KenectError`] — the unified error type
//! - Domain types ([`SmartConnector`], [`KnowledgeInteraction`], [`HandleRequest`],
//!   [`BindingSet`], [`GraphPattern`])
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, EngineConfig, StoreConfig, config_dir, config_file_path, init_config, load_config,
    load_config_from,
};
pub use error::{KenectError, Result};
pub use types::{
    Binding, BindingSet, GraphPattern, HandleRequest, InteractionId, InteractionType,
    KnowledgeBaseId, KnowledgeInteraction, PrefixMap, SmartConnector,
};
