//! Signal engine - value propagation for Filament workflows
//!
//! This crate decides, in what order and under what conditions, queued
//! values are delivered to workflow nodes:
//!
//! - An input queue of pending [`Signal`]s with order-preserving
//!   compression of stale updates
//! - A per-(node, channel) output cache with invalidation propagation
//!   so stale producers hold their dependents back
//! - A scheduler computing the update front over the enabled-link graph,
//!   with strongly-connected-component analysis so feedback loops cannot
//!   starve themselves, and a configurable concurrency cap
//!
//! Actual node computation lives behind the [`ExecutionHost`] trait; the
//! engine is single-threaded and host-pumped.
//!
//! # Example
//!
//! ```
//! use filament_scheme::SchemeBuilder;
//! use signal_engine::{ExecutionHost, NodeOutput, Signal, SignalManager};
//!
//! struct PrintHost;
//!
//! impl ExecutionHost for PrintHost {
//!     fn send_to_node(
//!         &mut self,
//!         _scheme: &filament_scheme::Scheme,
//!         node: &filament_scheme::Node,
//!         signals: Vec<Signal>,
//!     ) -> signal_engine::Result<Vec<NodeOutput>> {
//!         println!("{} received {} signal(s)", node.title, signals.len());
//!         Ok(Vec::new())
//!     }
//! }
//!
//! let (mut scheme, ids) = SchemeBuilder::new("wf")
//!     .node("source", &[], &[("out", &["int"])])
//!     .node("sink", &[("in", &["number"])], &[])
//!     .link("source", "out", "sink", "in")
//!     .build()
//!     .unwrap();
//!
//! let mut manager = SignalManager::default();
//! let mut host = PrintHost;
//! manager
//!     .send(&mut scheme, ids["source"], "out", Some(serde_json::json!(5)), None)
//!     .unwrap();
//! manager.run_pending(&mut scheme, &mut host).unwrap();
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod manager;
pub mod signal;

// Re-export key types
pub use config::{EngineSettings, MAX_ACTIVE_ENV};
pub use error::{EngineError, Result};
pub use graph::{strongly_connected_components, traverse_bf};
pub use manager::{ExecutionHost, NodeOutput, RuntimeState, SignalManager, State};
pub use signal::{compress_signals, Signal, SignalKind};
