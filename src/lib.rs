//! # Nodeflow
//!
//! Nodeflow is an embeddable workflow execution engine written in Rust.
//! Workflows are directed graphs of typed nodes joined by port-to-port connections.
//!
//! ## Core Features
//!
//! - **Graph Validation**: Definitions are checked against the node catalog before anything runs
//! - **Parallel Scheduling**: Ready nodes run concurrently on `tokio`, bounded per execution and engine-wide
//! - **Expressions**: `{{ $json.user.name | upper }}` style references resolved against the variable scope
//! - **Failure Policies**: Per-node retry, fallback, skip, branch and stop strategies
//! - **Control Flow**: Conditional branches, merge barriers and bounded loops
//! - **Inference Gateway**: AI nodes call model providers through an ordered fallback chain
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use nodeflow::{EngineBuilder, WorkflowModel};
//!
//! let engine = EngineBuilder::new().build()?;
//! engine.launch();
//!
//! let workflow = WorkflowModel::from_json(json_str)?;
//! engine.deploy(&workflow)?;
//! let execution = engine.run(&workflow.id, serde_json::json!({ "user": 7 }))?;
//! println!("{:?}", execution.status);
//! ```

mod builder;
pub mod catalog;
mod common;
mod config;
mod dispatcher;
mod engine;
pub mod error;
pub mod events;
pub mod expression;
pub mod gateway;
mod model;
pub mod nodes;
pub mod policy;
mod runtime;
pub mod store;
mod utils;
pub mod workflow;

use std::sync::{Arc, RwLock};

pub use builder::EngineBuilder;
pub use config::{Config, EngineConfig, GatewayConfig, StoreConfig, StoreType};
pub use engine::{Engine, ExecutionFilter};
pub use error::NodeflowError;
pub use model::*;
pub use runtime::{Channel, ChannelEvent, ChannelOptions, ExecutionHandle, ExecutionOptions};

/// Result type alias for Nodeflow operations.
pub type Result<T> = std::result::Result<T, NodeflowError>;

/// Thread-safe shared lock wrapper using Arc<RwLock<T>>.
pub(crate) type ShareLock<T> = Arc<RwLock<T>>;
