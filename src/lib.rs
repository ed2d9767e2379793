//! Bidirectional replica synchronization engine.
//!
//! A *replica* is a directory holding a relational store (`papers.db`) and
//! an artifact subdirectory (`pdfs/`). [`orchestrator::Orchestrator`] drives
//! the seven phases of a sync: mutual exclusion ([`lock`]), the bootstrap
//! shortcut, record matching ([`matcher`]), conflict detection
//! ([`conflict`]), resolution application, propagation
//! ([`propagate::records`], [`propagate::collections`],
//! [`propagate::artifacts`]) and unconditional lock release.
//!
//! The engine has no UI or CLI of its own; a host application drives it by
//! constructing an [`orchestrator::Orchestrator`] and supplying a
//! [`resolver::ConflictResolver`] and a [`resolver::ProgressReporter`].

pub mod config;
pub mod conflict;
pub mod error;
pub mod hash;
pub mod lock;
pub mod matcher;
pub mod models;
pub mod orchestrator;
pub mod propagate;
pub mod resolver;
pub mod store;

pub use config::SyncConfig;
pub use error::{EngineResult, SyncError};
pub use orchestrator::{Orchestrator, SyncResult};
pub use resolver::{ConflictResolver, Decision, ProgressCounts, ProgressReporter, SyncLogger};
