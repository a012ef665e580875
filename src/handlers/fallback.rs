//! A lighter worker an agent can switch to when its full worker cannot run.

use std::{
    collections::BTreeSet,
    path::PathBuf,
    sync::{Mutex, OnceLock},
};

use crate::classify::ClassifiedOutcome;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackScript {
    /// Resolver cache key, distinct from the agent id.
    pub id: &'static str,
    pub script_candidates: Vec<PathBuf>,
    /// Attached to every response the fallback produced.
    pub note: String,
}

impl FallbackScript {
    /// Failures the full worker is not expected to recover from on retry.
    pub fn applies_to(outcome: &ClassifiedOutcome) -> bool {
        matches!(
            outcome,
            ClassifiedOutcome::Timeout
                | ClassifiedOutcome::MissingDependency { .. }
                | ClassifiedOutcome::RateLimited { .. }
        )
    }
}

/// Agents that have switched to their fallback for the rest of the process.
#[derive(Debug, Default)]
pub struct FallbackMemo {
    agents: Mutex<BTreeSet<String>>,
}

impl FallbackMemo {
    pub fn global() -> &'static FallbackMemo {
        static GLOBAL: OnceLock<FallbackMemo> = OnceLock::new();
        GLOBAL.get_or_init(FallbackMemo::default)
    }

    pub fn prefer(&self, agent: &str) {
        let mut agents = self.agents.lock().unwrap_or_else(|e| e.into_inner());
        if agents.insert(agent.to_string()) {
            tracing::warn!(agent, "switching to the fallback worker for later runs");
        }
    }

    pub fn prefers(&self, agent: &str) -> bool {
        let agents = self.agents.lock().unwrap_or_else(|e| e.into_inner());
        agents.contains(agent)
    }
}
