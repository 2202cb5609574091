//! formsync core library.
//!
//! Keeps a document tree stored in two interconvertible forms (a rich form
//! edited by humans and a plain-text source form merged by git) consistent
//! across merges: configuration, the command runner, the hook gate, the
//! conflict oracle and policy, git primitives, and the reconciliation
//! orchestrator that drives them.

pub mod config;
pub mod converter;
pub mod envelope;
pub mod errors;
pub mod export;
pub mod gate;
pub mod hooks;
pub mod models;
pub mod oracle;
pub mod orchestrator;
pub mod policy;
pub mod registry;
pub mod runner;
pub mod vcs;

// Re-exports for convenience.
pub use config::SyncConfig;
pub use export::Exporter;
pub use gate::HookGate;
pub use models::{Document, DocumentOutcome, ReconcileStep, RunSummary};
pub use orchestrator::Reconciler;
pub use runner::CommandRunner;
