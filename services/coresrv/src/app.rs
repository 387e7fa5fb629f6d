//! Application state shared across all handlers
//!
//! Every engine shares one in-memory store and one keyspace. Engines are cheap
//! handles (`Arc` inside), so handlers clone what they need.

use crate::config::CoresrvConfig;
use std::sync::Arc;
use tracing::{debug, info};
use voltage_entity::EntityStore;
use voltage_lifecycle::LifecycleEngine;
use voltage_model::KeySpaceConfig;
use voltage_rtdb::MemoryRtdb;
use voltage_rules::{RuleExecutor, RuleScheduler};
use voltage_sync::SyncEngine;

pub struct AppState {
    pub rtdb: Arc<MemoryRtdb>,
    pub keyspace: KeySpaceConfig,
    pub entities: EntityStore<MemoryRtdb>,
    pub lifecycle: LifecycleEngine<MemoryRtdb>,
    pub sync: SyncEngine<MemoryRtdb>,
    pub rules: RuleExecutor<MemoryRtdb>,
    pub scheduler: Arc<RuleScheduler<MemoryRtdb>>,
    pub config: Arc<CoresrvConfig>,
    /// Store clock at startup (ms)
    pub started_at: i64,
}

impl AppState {
    /// State over a fresh in-memory store
    pub fn new(config: CoresrvConfig) -> Arc<Self> {
        Self::with_rtdb(config, Arc::new(MemoryRtdb::new()))
    }

    /// State over an existing store (tests use a manual clock)
    pub fn with_rtdb(config: CoresrvConfig, rtdb: Arc<MemoryRtdb>) -> Arc<Self> {
        let keyspace = config.store.keyspace();
        let entities = EntityStore::new(Arc::clone(&rtdb), keyspace.clone())
            .with_scan_batch(config.store.scan_batch);
        let lifecycle = LifecycleEngine::new(Arc::clone(&rtdb), keyspace.clone())
            .with_history_limit(config.store.history_limit);
        let sync = SyncEngine::new(Arc::clone(&rtdb), keyspace.clone());
        let rules = RuleExecutor::new(Arc::clone(&rtdb), keyspace.clone())
            .with_entity_store(entities.clone())
            .with_sync_engine(sync.clone())
            .with_lifecycle(lifecycle.clone())
            .with_max_depth(config.store.max_rule_depth)
            .with_execution_log_limit(config.store.execution_log_limit);
        let scheduler = Arc::new(
            RuleScheduler::new(rules.clone(), sync.clone(), config.scheduler.tick_ms)
                .with_sweep_page(config.store.scan_batch),
        );
        let started_at = voltage_rtdb::Rtdb::now_millis(rtdb.as_ref());

        debug!(
            "Engines ready (prefix '{}', history {}, depth {})",
            keyspace.prefix, config.store.history_limit, config.store.max_rule_depth
        );
        info!("{} state initialized", config.service.name);

        Arc::new(Self {
            rtdb,
            keyspace,
            entities,
            lifecycle,
            sync,
            rules,
            scheduler,
            config: Arc::new(config),
            started_at,
        })
    }
}
