//! Startup orchestration: sync → reconcile → verify for every artifact kind.

pub mod startup;

pub use startup::{KindReport, StartupOrchestrator, StartupReport, render_summary};
