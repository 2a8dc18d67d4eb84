//! Explicit, lazily populated registry of reconciliation engines.
//!
//! Engines are keyed by `(DeploymentContext, ArtifactKind)` so a request for
//! one scope can never be served by another scope's engine. The registry is
//! an ordinary value owned by the caller and injected where needed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::config::MpmConfig;
use crate::context::DeploymentContext;
use crate::types::ArtifactKind;

use super::reconcile::{ReconcileOptions, ReconciliationEngine};

type EngineKey = (DeploymentContext, ArtifactKind);

#[derive(Debug, Default)]
pub struct EngineRegistry {
    engines: Mutex<HashMap<EngineKey, Arc<ReconciliationEngine>>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine for `(context, kind)`, built from `config` on first use.
    pub fn engine(
        &self,
        context: &DeploymentContext,
        kind: ArtifactKind,
        config: &MpmConfig,
    ) -> Arc<ReconciliationEngine> {
        let mut engines = self.engines.lock().unwrap_or_else(|e| e.into_inner());
        engines
            .entry((context.clone(), kind))
            .or_insert_with(|| {
                tracing::debug!(scope = %context.scope(), kind = %kind, "Creating reconciliation engine");
                Arc::new(ReconciliationEngine::new(
                    context.clone(),
                    kind,
                    ReconcileOptions::from_config(config, kind),
                ))
            })
            .clone()
    }

    pub fn len(&self) -> usize {
        self.engines.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
