//! Relay Worker
//!
//! One poll cycle: for every source store in configuration order, acquire
//! its pool, fetch a batch and relay each event in batch order. Failures are
//! contained per event and per store; a cycle always runs to completion.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::fetch::{fetch_batch, FetchCriteria};
use super::pipeline::relay_event;
use super::tracker;
use crate::config::{RelaySettings, StoreConfig};
use crate::error::RelayError;
use crate::notify::Notifier;
use crate::pool::{CloseReport, PoolManager};
use crate::store::{Connector, StorePool, StoreRole};

/// Per-store outcome of one cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceReport {
    pub store: String,
    pub fetched: usize,
    pub relayed: usize,
    pub failed: usize,
    pub notified: usize,
    /// Store-level failure (connect or fetch); the store was skipped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of one poll cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub sources: Vec<SourceReport>,
}

impl CycleReport {
    pub fn total_relayed(&self) -> usize {
        self.sources.iter().map(|s| s.relayed).sum()
    }

    pub fn total_failed(&self) -> usize {
        self.sources.iter().map(|s| s.failed).sum()
    }

    pub fn source(&self, store: &str) -> Option<&SourceReport> {
        self.sources.iter().find(|s| s.store == store)
    }
}

/// Everything a poll cycle needs: pools, store configs, settings, sink
pub struct RelayWorker<C: Connector> {
    pools: PoolManager<C>,
    central: StoreConfig,
    sources: Vec<StoreConfig>,
    settings: RelaySettings,
    notifier: Arc<dyn Notifier>,
}

impl<C: Connector> RelayWorker<C> {
    pub fn new(
        pools: PoolManager<C>,
        central: StoreConfig,
        sources: Vec<StoreConfig>,
        settings: RelaySettings,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            pools,
            central,
            sources,
            settings,
            notifier,
        }
    }

    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    pub fn sources(&self) -> &[StoreConfig] {
        &self.sources
    }

    pub fn pools(&self) -> &PoolManager<C> {
        &self.pools
    }

    /// Connect every store and check its table before scheduling starts.
    ///
    /// The central store is required; a source that fails is only logged and
    /// will be retried by regular cycles.
    pub async fn validate_stores(&mut self) -> Result<(), RelayError> {
        let central = self
            .pools
            .acquire(&self.central)
            .await
            .map_err(|source| RelayError::Connectivity {
                store: self.central.name.clone(),
                source,
            })?;

        let ok = central
            .check_schema(StoreRole::Central)
            .await
            .map_err(|e| RelayError::from_store(&self.central.name, e))?;
        if !ok {
            return Err(RelayError::MissingTable {
                store: self.central.name.clone(),
                table: StoreRole::Central.table(),
            });
        }
        tracing::info!(store = %self.central.name, "Central store validated");

        for source in &self.sources {
            let checked = match self.pools.acquire(source).await {
                Ok(pool) => pool.check_schema(StoreRole::Source).await,
                Err(e) => Err(e),
            };

            match checked {
                Ok(true) => tracing::info!(store = %source.name, "Source store validated"),
                Ok(false) => tracing::warn!(
                    store = %source.name,
                    "Source store is missing table {}",
                    StoreRole::Source.table()
                ),
                Err(e) => tracing::warn!(
                    store = %source.name,
                    error = %e,
                    "Source store unavailable at startup; will retry on poll"
                ),
            }
        }

        Ok(())
    }

    /// Run one poll cycle over all source stores
    pub async fn poll_all(&mut self) -> CycleReport {
        let cycle_id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = Instant::now();

        tracing::info!(cycle_id = %cycle_id, "Starting poll cycle");

        let Self {
            pools,
            central,
            sources,
            settings,
            notifier,
        } = self;

        let criteria = FetchCriteria::new(settings.batch_size, settings.max_retries);
        let mut reports = Vec::with_capacity(sources.len());

        for source in sources.iter() {
            let report = poll_source(pools, central, source, &criteria, &**notifier).await;
            reports.push(report);
        }

        let duration_ms = clock.elapsed().as_millis() as u64;
        let report = CycleReport {
            cycle_id,
            started_at,
            finished_at: Utc::now(),
            duration_ms,
            sources: reports,
        };

        tracing::info!(
            cycle_id = %cycle_id,
            duration_ms = duration_ms,
            relayed = report.total_relayed(),
            failed = report.total_failed(),
            "Poll cycle completed"
        );

        report
    }

    /// Close every pool; used at shutdown
    pub async fn close_all(&mut self) -> CloseReport {
        self.pools.close_all().await
    }
}

async fn poll_source<C: Connector>(
    pools: &mut PoolManager<C>,
    central: &StoreConfig,
    source: &StoreConfig,
    criteria: &FetchCriteria,
    notifier: &dyn Notifier,
) -> SourceReport {
    let mut report = SourceReport {
        store: source.name.clone(),
        ..SourceReport::default()
    };

    tracing::debug!(store = %source.name, "Checking for changes");

    let pools_for_store = async {
        let local = pools
            .acquire(source)
            .await
            .map_err(|e| RelayError::Connectivity {
                store: source.name.clone(),
                source: e,
            })?;
        let audit = pools
            .acquire(central)
            .await
            .map_err(|e| RelayError::Connectivity {
                store: central.name.clone(),
                source: e,
            })?;
        Ok::<_, RelayError>((local, audit))
    };

    let (local, audit) = match pools_for_store.await {
        Ok(pair) => pair,
        Err(e) => {
            tracing::error!(store = %source.name, error = %e, "Skipping store for this cycle");
            report.error = Some(e.to_string());
            return report;
        }
    };

    let events = match fetch_batch(&*local, criteria).await {
        Ok(events) => events,
        Err(e) => {
            let err = RelayError::from_store(&source.name, e);
            tracing::error!(store = %source.name, error = %err, "Failed to fetch pending changes");
            report.error = Some(err.to_string());
            return report;
        }
    };

    report.fetched = events.len();
    if events.is_empty() {
        tracing::debug!(store = %source.name, "No pending changes");
        return report;
    }

    tracing::info!(store = %source.name, batch = events.len(), "Found pending changes");

    for event in &events {
        match relay_event(event, &*audit, &*local, notifier).await {
            Ok(receipt) => {
                report.relayed += 1;
                if receipt.notified {
                    report.notified += 1;
                }
                tracing::info!(
                    store = %source.name,
                    event_id = event.id,
                    relayed_id = receipt.relayed_id,
                    "Change relayed"
                );
            }
            Err(e) => {
                report.failed += 1;
                tracing::error!(
                    store = %source.name,
                    event_id = event.id,
                    kind = e.kind(),
                    error = %e,
                    "Failed to relay change"
                );

                if let Err(track_err) =
                    tracker::record_failure(&*local, event.id, &e.to_string()).await
                {
                    tracing::error!(
                        store = %source.name,
                        event_id = event.id,
                        error = %track_err,
                        "Failed to record relay failure"
                    );
                }
            }
        }
    }

    report
}
