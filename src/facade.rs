//! Client façade: composes the Store, Session Tracker, Query Engine,
//! Feedback Engine, and Sync Engine behind the operations the shell calls.

use chrono::Utc;

use crate::clock::{Clock, SystemClock};
use crate::config::ClientConfig;
use crate::error::{EngramError, LabeledError, Result};
use crate::feedback::{FeedbackBatchParams, FeedbackBatchResult, FeedbackEngine};
use crate::id::new_lore_id;
use crate::model::{Category, Lore, Outcome, StoreStats};
use crate::query::{QueryEngine, QueryParams, QueryResult};
use crate::session::SessionTracker;
use crate::store::Store;
use crate::sync::transport::HttpTransport;
use crate::sync::{BootstrapOutcome, DeltaReport, SyncContext, SyncEngine};

pub type FacadeResult<T> = std::result::Result<T, LabeledError>;

#[derive(Debug, Clone, Default)]
pub struct RecordOptions {
    pub context: Option<String>,
    pub confidence: Option<f64>,
    pub embedding: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Default)]
pub struct ReinitializeOptions {
    pub force: bool,
    pub allow_empty: bool,
}

#[derive(Debug, Clone)]
pub struct ReinitializeReport {
    pub source: String,
    pub lore_count: i64,
    pub backup_path: Option<std::path::PathBuf>,
    pub timestamp: chrono::DateTime<Utc>,
}

pub struct Client {
    config: ClientConfig,
    store: Store,
    session: SessionTracker,
    clock: Box<dyn Clock>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Client> {
        crate::sync::validate_store_id(&config.store_id)?;
        let store = Store::open(&config.store_path)?;
        Ok(Client { config, store, session: SessionTracker::new(), clock: Box::new(SystemClock) })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn session(&self) -> &SessionTracker {
        &self.session
    }

    /// Validate and persist a new lore entry.
    pub fn record(&self, content: impl Into<String>, category: Category, opts: RecordOptions) -> FacadeResult<Lore> {
        self.try_record(content, category, opts).map_err(|e| e.label("record"))
    }

    fn try_record(&self, content: impl Into<String>, category: Category, opts: RecordOptions) -> Result<Lore> {
        let source_id = self.store.source_id()?;
        let mut lore = Lore::new(new_lore_id(), content.into(), category, source_id);
        lore.context = opts.context;
        if let Some(confidence) = opts.confidence {
            lore.confidence = confidence;
        }
        if let Some(embedding) = opts.embedding {
            lore.embedding = Some(embedding);
            lore.embedding_status = crate::model::EmbeddingStatus::Complete;
        }
        self.store.insert_lore(&lore)?;
        Ok(lore)
    }

    pub fn query(&self, params: &QueryParams) -> FacadeResult<QueryResult> {
        QueryEngine::new(&self.store, &self.session)
            .query(params)
            .map_err(|e| e.label("query"))
    }

    pub fn feedback(&self, reference: &str, outcome: Outcome) -> FacadeResult<Lore> {
        FeedbackEngine::new(&self.store, &self.session)
            .feedback(reference, outcome)
            .map_err(|e| e.label("feedback"))
    }

    pub fn feedback_batch(&self, params: &FeedbackBatchParams) -> FeedbackBatchResult {
        FeedbackEngine::new(&self.store, &self.session).feedback_batch(params)
    }

    pub fn stats(&self) -> FacadeResult<StoreStats> {
        self.store.stats().map_err(|e| e.label("stats"))
    }

    pub fn close(&self) -> FacadeResult<()> {
        self.session.clear();
        self.store.close().map_err(|e| e.label("close"))
    }

    fn build_transport(&self) -> Result<HttpTransport> {
        let base_url = self.config.remote_base_url.clone().ok_or(EngramError::Offline)?;
        let source_id = self.store.source_id()?;
        HttpTransport::new(
            base_url,
            self.config.api_key.clone(),
            self.config.user_agent.clone(),
            self.config.request_timeout,
            Some(source_id),
        )
    }

    fn with_sync_engine<R>(
        &self,
        op: &'static str,
        f: impl FnOnce(&SyncEngine<'_>) -> Result<R>,
    ) -> FacadeResult<R> {
        let run = || -> Result<R> {
            let transport = self.build_transport()?;
            let engine = SyncEngine::new(
                &self.store,
                &transport,
                self.clock.as_ref(),
                self.config.retry,
                self.config.store_id.clone(),
            )?;
            f(&engine)
        };
        run().map_err(|e| e.label(op))
    }

    pub fn bootstrap(&self, ctx: &SyncContext) -> FacadeResult<BootstrapOutcome> {
        self.with_sync_engine("bootstrap", |engine| engine.bootstrap(ctx))
    }

    pub fn sync_push(&self, ctx: &SyncContext) -> FacadeResult<crate::sync::PushReport> {
        self.with_sync_engine("sync push", |engine| engine.push(ctx))
    }

    pub fn sync_delta(&self, ctx: &SyncContext) -> FacadeResult<DeltaReport> {
        self.with_sync_engine("sync delta", |engine| engine.delta(ctx))
    }

    /// Flush is Push invoked synchronously on shutdown.
    pub fn flush(&self, ctx: &SyncContext) -> FacadeResult<crate::sync::PushReport> {
        self.sync_push(ctx)
    }

    pub fn reinitialize(&self, ctx: &SyncContext, opts: ReinitializeOptions) -> FacadeResult<ReinitializeReport> {
        self.try_reinitialize(ctx, opts).map_err(|e| e.label("reinitialize"))
    }

    fn try_reinitialize(&self, ctx: &SyncContext, opts: ReinitializeOptions) -> Result<ReinitializeReport> {
        let source_id = self.store.source_id()?;
        let cursor = self.store.last_push_seq()?;
        let pending = self.store.pending_sync_count(&source_id, cursor)?;
        if pending > 0 && !opts.force {
            return Err(EngramError::PendingSyncExists { count: pending });
        }

        if self.config.remote_base_url.is_none() {
            if opts.allow_empty {
                self.store.clear_all_lore()?;
                self.store.set_store_meta("source_kind", "empty")?;
                let lore_count = self.store.stats()?.total_lore;
                return Ok(ReinitializeReport {
                    source: "empty".to_string(),
                    lore_count,
                    backup_path: None,
                    timestamp: Utc::now(),
                });
            }
            return Err(EngramError::Offline);
        }

        let transport = self.build_transport()?;
        let engine = SyncEngine::new(
            &self.store,
            &transport,
            self.clock.as_ref(),
            self.config.retry,
            self.config.store_id.clone(),
        )?;
        let outcome = engine.bootstrap(ctx)?;
        let lore_count = self.store.stats()?.total_lore;
        Ok(ReinitializeReport {
            source: outcome.embedding_model,
            lore_count,
            backup_path: None,
            timestamp: Utc::now(),
        })
    }
}
