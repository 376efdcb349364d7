use std::collections::BTreeMap;

use parking_lot::RwLock;
use tracing::debug;

use vigil_core::risk::{MatrixSnapshot, RiskCategory, RiskMatrixEntry};

use crate::error::EngineError;

/// Shared per-category risk state.
///
/// Every category is present from construction on. Writers validate before
/// taking the lock and replace whole entries under it, so readers only ever
/// see complete entries.
#[derive(Debug)]
pub struct RiskMatrix {
    entries: RwLock<MatrixSnapshot>,
}

impl Default for RiskMatrix {
    fn default() -> Self {
        Self::new()
    }
}

impl RiskMatrix {
    pub fn new() -> Self {
        let entries = RiskCategory::ALL
            .into_iter()
            .map(|category| (category, RiskMatrixEntry::default()))
            .collect();
        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Replace one category's entry.
    pub fn apply_update(&self, category: RiskCategory, delta: RiskMatrixEntry) -> Result<(), EngineError> {
        delta
            .validate()
            .map_err(|violation| EngineError::Validation { category, violation })?;
        self.entries.write().insert(category, delta);
        debug!(%category, "risk matrix entry replaced");
        Ok(())
    }

    /// Replace several entries at once. Nothing is written unless every
    /// delta is valid. Returns the touched categories.
    pub fn apply_batch(
        &self,
        updates: &BTreeMap<RiskCategory, RiskMatrixEntry>,
    ) -> Result<Vec<RiskCategory>, EngineError> {
        validate_batch(updates)?;

        let mut entries = self.entries.write();
        for (&category, delta) in updates {
            entries.insert(category, *delta);
        }
        drop(entries);

        let touched: Vec<_> = updates.keys().copied().collect();
        debug!(categories = touched.len(), "risk matrix batch applied");
        Ok(touched)
    }

    /// The matrix as it would read after `apply_batch(updates)`, without
    /// writing anything.
    pub fn preview(&self, updates: &BTreeMap<RiskCategory, RiskMatrixEntry>) -> Result<MatrixSnapshot, EngineError> {
        validate_batch(updates)?;
        let mut snapshot = self.snapshot();
        snapshot.extend(updates.iter().map(|(&category, delta)| (category, *delta)));
        Ok(snapshot)
    }

    /// Copy of the whole matrix.
    pub fn snapshot(&self) -> MatrixSnapshot {
        self.entries.read().clone()
    }

    pub fn entry(&self, category: RiskCategory) -> RiskMatrixEntry {
        self.entries
            .read()
            .get(&category)
            .copied()
            .unwrap_or_default()
    }
}

fn validate_batch(updates: &BTreeMap<RiskCategory, RiskMatrixEntry>) -> Result<(), EngineError> {
    for (&category, delta) in updates {
        delta
            .validate()
            .map_err(|violation| EngineError::Validation { category, violation })?;
    }
    Ok(())
}
