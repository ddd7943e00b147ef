//! Upstream data sources and per-step allocation.
//!
//! [`SourceCatalog`] holds the read-only payloads fetched from upstream
//! providers at run start. [`DataSourceAllocator`] slices that catalog into a
//! [`DataSourceBundle`] for each step according to the phase-scoped
//! allocation table in [`RunConfig`](crate::RunConfig).

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::config::AllocationTable;
use crate::ports::DataProvider;
use crate::{CalendarError, SourceKey, Step, StepId, Weight};

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Upstream payloads available to a run, keyed by source.
///
/// Never contains [`SourceKey::ACCUMULATED_CONTEXT`].
#[derive(Debug, Clone, Default)]
pub struct SourceCatalog {
    sources: BTreeMap<SourceKey, Arc<Value>>,
}

impl SourceCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) the payload for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`CalendarError::ConfigurationError`] for the reserved
    /// accumulated-context key.
    pub fn insert(&mut self, key: SourceKey, payload: Value) -> Result<(), CalendarError> {
        if key.is_accumulated_context() {
            return Err(CalendarError::config(format!(
                "'{key}' is reserved for the accumulated context and cannot be supplied as data"
            )));
        }
        self.sources.insert(key, Arc::new(payload));
        Ok(())
    }

    /// Builder-style [`SourceCatalog::insert`].
    ///
    /// # Errors
    ///
    /// See [`SourceCatalog::insert`].
    pub fn with(mut self, key: &str, payload: Value) -> Result<Self, CalendarError> {
        let key = SourceKey::new(key)
            .ok_or_else(|| CalendarError::config("source keys must not be empty"))?;
        self.insert(key, payload)?;
        Ok(self)
    }

    /// Returns the payload for `key`, if available.
    pub fn get(&self, key: &SourceKey) -> Option<&Arc<Value>> {
        self.sources.get(key)
    }

    /// Returns the payload stored under a well-known key name.
    pub fn get_str(&self, key: &str) -> Option<&Value> {
        self.sources
            .iter()
            .find(|(k, _)| k.as_str() == key)
            .map(|(_, v)| v.as_ref())
    }

    /// Returns `true` if `key` is available.
    pub fn contains(&self, key: &SourceKey) -> bool {
        self.sources.contains_key(key)
    }

    /// Iterates the available keys in order.
    pub fn keys(&self) -> impl Iterator<Item = &SourceKey> {
        self.sources.keys()
    }

    /// Number of available sources.
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Returns `true` if no source is available.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Fetches `keys` from `providers`.
    ///
    /// Providers are consulted in order; the first that has a key supplies
    /// it. A key no provider has is simply absent from the catalog (the
    /// allocator decides whether that is fatal for a step).
    ///
    /// # Errors
    ///
    /// Returns [`CalendarError::DataProvider`] on the first provider failure.
    pub async fn gather(
        providers: &[Arc<dyn DataProvider>],
        keys: impl IntoIterator<Item = SourceKey>,
    ) -> Result<Self, CalendarError> {
        let mut catalog = Self::new();
        for key in keys {
            for provider in providers {
                let fetched = provider.fetch(&key).await.map_err(|e| CalendarError::DataProvider {
                    provider: provider.name().to_string(),
                    source_key: key.clone(),
                    message: e.to_string(),
                })?;
                if let Some(payload) = fetched {
                    debug!(
                        source = %key,
                        provider = provider.name(),
                        "Fetched upstream data source"
                    );
                    catalog.insert(key.clone(), payload)?;
                    break;
                }
            }
            if !catalog.contains(&key) {
                warn!(source = %key, "No provider supplied data source");
            }
        }
        Ok(catalog)
    }
}

// ---------------------------------------------------------------------------
// Bundle
// ---------------------------------------------------------------------------

/// Content of one bundle slot.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotPayload {
    /// An upstream payload.
    Data(Arc<Value>),
    /// The share reserved for the accumulated context package.
    AccumulatedContext,
}

/// One source in a step's bundle.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSlot {
    /// What the slot carries.
    pub payload: SlotPayload,
    /// Intended share of the step's context budget.
    pub weight: Weight,
}

/// The inputs allocated to one step.
///
/// Invariant: contains every source the step requires, and the slot weights
/// sum to `1.0`.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSourceBundle {
    step: StepId,
    slots: BTreeMap<SourceKey, DataSlot>,
}

impl DataSourceBundle {
    /// The step this bundle was allocated for.
    pub fn step(&self) -> StepId {
        self.step
    }

    /// Iterates slots in key order.
    pub fn slots(&self) -> impl Iterator<Item = (&SourceKey, &DataSlot)> {
        self.slots.iter()
    }

    /// Returns the slot for `key`.
    pub fn get(&self, key: &SourceKey) -> Option<&DataSlot> {
        self.slots.get(key)
    }

    /// Returns `true` if `key` was allocated.
    pub fn contains(&self, key: &SourceKey) -> bool {
        self.slots.contains_key(key)
    }

    /// Upstream (non-context) keys in this bundle.
    pub fn upstream_keys(&self) -> impl Iterator<Item = &SourceKey> {
        self.slots.keys().filter(|k| !k.is_accumulated_context())
    }

    /// Share reserved for the accumulated context (zero if none).
    pub fn context_weight(&self) -> f64 {
        self.slots
            .iter()
            .find(|(k, _)| k.is_accumulated_context())
            .map_or(0.0, |(_, s)| s.weight.as_f64())
    }

    /// Sum of all slot weights.
    pub fn total_weight(&self) -> f64 {
        self.slots.values().map(|s| s.weight.as_f64()).sum()
    }
}

// ---------------------------------------------------------------------------
// Allocator
// ---------------------------------------------------------------------------

/// Selects and weights the sources feeding each step.
///
/// A pure function of the run-scoped catalog and allocation table; it only
/// reads upstream data and never writes back.
#[derive(Debug, Clone)]
pub struct DataSourceAllocator {
    table: AllocationTable,
    catalog: Arc<SourceCatalog>,
}

impl DataSourceAllocator {
    /// Creates an allocator over `catalog` using `table`.
    pub fn new(table: AllocationTable, catalog: Arc<SourceCatalog>) -> Self {
        Self { table, catalog }
    }

    /// The catalog this allocator draws from.
    pub fn catalog(&self) -> &SourceCatalog {
        &self.catalog
    }

    /// Allocates the bundle for `step`.
    ///
    /// Listed sources that are unavailable and not required are dropped and
    /// the remaining weights renormalised so the bundle still sums to `1.0`.
    ///
    /// # Errors
    ///
    /// - [`CalendarError::MissingDataSource`] naming every required key that
    ///   the catalog lacks.
    /// - [`CalendarError::ConfigurationError`] if a required key has no row in
    ///   the phase's allocation table, or no row survives.
    pub fn allocate(&self, step: &Step) -> Result<DataSourceBundle, CalendarError> {
        let missing: Vec<SourceKey> = step
            .required_sources
            .iter()
            .filter(|k| !k.is_accumulated_context() && !self.catalog.contains(k))
            .cloned()
            .collect();
        if !missing.is_empty() {
            warn!(
                step = %step.id,
                phase = %step.phase,
                ?missing,
                "Required data sources unavailable"
            );
            return Err(CalendarError::MissingDataSource {
                step: step.id,
                phase: step.phase,
                missing,
            });
        }

        let table = self.table.get(step.phase);
        if let Some(unlisted) = step
            .required_sources
            .iter()
            .find(|k| !table.iter().any(|e| &e.key == *k))
        {
            return Err(CalendarError::config(format!(
                "step {} requires '{unlisted}' but allocation.{} does not list it",
                step.id, step.phase
            )));
        }

        let included: Vec<(&SourceKey, f64, SlotPayload)> = table
            .iter()
            .filter_map(|entry| {
                if entry.key.is_accumulated_context() {
                    Some((&entry.key, entry.weight, SlotPayload::AccumulatedContext))
                } else {
                    self.catalog
                        .get(&entry.key)
                        .map(|data| (&entry.key, entry.weight, SlotPayload::Data(Arc::clone(data))))
                }
            })
            .collect();

        let total: f64 = included.iter().map(|(_, w, _)| *w).sum();
        if included.is_empty() || total <= 0.0 {
            return Err(CalendarError::config(format!(
                "allocation.{} leaves no weighted source for step {}",
                step.phase, step.id
            )));
        }

        let mut slots = BTreeMap::new();
        for (key, weight, payload) in included {
            let weight = Weight::new((weight / total).min(1.0)).ok_or_else(|| {
                CalendarError::config(format!("invalid allocation weight for '{key}'"))
            })?;
            slots.insert(key.clone(), DataSlot { payload, weight });
        }

        debug!(
            step = %step.id,
            phase = %step.phase,
            sources = ?slots.keys().map(SourceKey::as_str).collect::<Vec<_>>(),
            "Allocated data sources"
        );
        Ok(DataSourceBundle { step: step.id, slots })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::config::default_allocation_table;
    use crate::types::weights_sum_to_one;
    use crate::StepCatalog;

    fn full_catalog() -> SourceCatalog {
        let mut catalog = SourceCatalog::new();
        for key in SourceKey::UPSTREAM {
            catalog
                .insert(SourceKey::from_static(key), json!({ "source": key }))
                .unwrap();
        }
        catalog
    }

    #[test]
    fn every_step_bundle_sums_to_one_and_contains_required_sources() {
        let allocator =
            DataSourceAllocator::new(default_allocation_table(), Arc::new(full_catalog()));
        for step in StepCatalog::standard().iter() {
            let bundle = allocator.allocate(step).unwrap();
            assert!(weights_sum_to_one([bundle.total_weight()]), "step {}", step.id);
            for key in &step.required_sources {
                assert!(bundle.contains(key), "step {} lacks {key}", step.id);
            }
        }
    }

    #[test]
    fn missing_required_source_is_named() {
        let mut catalog = full_catalog();
        catalog.sources.remove(&SourceKey::from_static(SourceKey::KEYWORDS));
        catalog.sources.remove(&SourceKey::from_static(SourceKey::COMPETITOR_DATA));
        let allocator = DataSourceAllocator::new(default_allocation_table(), Arc::new(catalog));
        let catalog_steps = StepCatalog::standard();

        let err = allocator
            .allocate(catalog_steps.get(StepId::new(9).unwrap()))
            .unwrap_err();
        match err {
            CalendarError::MissingDataSource { step, missing, .. } => {
                assert_eq!(step.as_u8(), 9);
                assert_eq!(
                    missing,
                    vec![
                        SourceKey::from_static(SourceKey::KEYWORDS),
                        SourceKey::from_static(SourceKey::COMPETITOR_DATA)
                    ]
                );
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn optional_absent_sources_are_dropped_and_weights_renormalised() {
        let mut catalog = full_catalog();
        catalog.sources.remove(&SourceKey::from_static(SourceKey::COMPETITOR_DATA));
        let allocator = DataSourceAllocator::new(default_allocation_table(), Arc::new(catalog));
        let steps = StepCatalog::standard();

        let bundle = allocator.allocate(steps.get(StepId::FIRST)).unwrap();
        assert!(!bundle.contains(&SourceKey::from_static(SourceKey::COMPETITOR_DATA)));
        assert!(weights_sum_to_one([bundle.total_weight()]));
        let strategy = bundle.get(&SourceKey::from_static(SourceKey::STRATEGY)).unwrap();
        assert!((strategy.weight.as_f64() - 0.40 / 0.90).abs() < 1e-9);
    }

    #[test]
    fn later_phases_reserve_a_context_share() {
        let allocator =
            DataSourceAllocator::new(default_allocation_table(), Arc::new(full_catalog()));
        let steps = StepCatalog::standard();
        assert_eq!(allocator.allocate(steps.get(StepId::FIRST)).unwrap().context_weight(), 0.0);
        let last = allocator.allocate(steps.get(StepId::LAST)).unwrap();
        assert!((last.context_weight() - 0.5).abs() < 1e-9);
        assert!(last.upstream_keys().all(|k| !k.is_accumulated_context()));
    }

    #[test]
    fn reserved_key_cannot_be_supplied() {
        let mut catalog = SourceCatalog::new();
        let err = catalog
            .insert(SourceKey::from_static(SourceKey::ACCUMULATED_CONTEXT), json!({}))
            .unwrap_err();
        assert!(matches!(err, CalendarError::ConfigurationError { .. }));
    }
}
