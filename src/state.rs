use crate::config::AppConfig;
use crate::db::DbPool;
use crate::errors::{EngineError, EngineResult};
use crate::portfolio::report::RunReport;
use portable_atomic::{AtomicU64, Ordering};
use smallvec::SmallVec;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};

// ── Service state ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Starting,
    Ready,
    Degraded,
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Ready => write!(f, "ready"),
            Self::Degraded => write!(f, "degraded"),
        }
    }
}

// ── Messages OUT to WebSocket clients ──

#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "type")]
pub enum WsMessage {
    #[serde(rename = "run_completed")]
    RunCompleted {
        run_id: String,
        timestamp: String,
        strategy: String,
        positions: usize,
        total_allocated: f64,
        cash_remaining: f64,
        allocation_percentage: f64,
        option_positions: usize,
        /// Top entries by quality, for a compact feed
        top: SmallVec<[TopEntry; 4]>,
    },

    #[serde(rename = "asset_excluded")]
    AssetExcluded {
        run_id: String,
        ticker: String,
        stage: String,
        reason: String,
    },

    #[serde(rename = "run_failed")]
    RunFailed { error: String, timestamp: String },

    #[serde(rename = "service_state")]
    ServiceStateMsg { state: String, reason: String },
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct TopEntry {
    pub ticker: String,
    pub dollar_allocation: f64,
    pub unified_score: f64,
}

impl WsMessage {
    pub fn run_completed(report: &RunReport) -> Self {
        let plan = &report.equity_plan;
        WsMessage::RunCompleted {
            run_id: report.run_id.clone(),
            timestamp: report.timestamp.clone(),
            strategy: report.strategy.to_string(),
            positions: plan.entries.len(),
            total_allocated: plan.total_allocated,
            cash_remaining: plan.cash_remaining,
            allocation_percentage: plan.allocation_percentage,
            option_positions: report.options_plan.entries.len(),
            top: plan
                .entries
                .iter()
                .take(4)
                .map(|e| TopEntry {
                    ticker: e.ticker.clone(),
                    dollar_allocation: e.dollar_allocation,
                    unified_score: e.unified_score,
                })
                .collect(),
        }
    }
}

// ── DB Commands (sent to writer task via bounded channel) ──

#[derive(Debug)]
pub enum DbCommand {
    /// Persist a whole run: header, both books' entries, every exclusion.
    InsertRun(Arc<RunReport>),
    InsertFailure { timestamp: String, error: String },
}

// ── Snapshot for HTTP/WS readers (sent via watch channel) ──

#[derive(Debug, Clone, serde::Serialize)]
pub struct ServiceSnapshot {
    pub state: ServiceState,
    pub last_error: Option<String>,
    pub report: Option<Arc<RunReport>>,
}

impl Default for ServiceSnapshot {
    fn default() -> Self {
        Self {
            state: ServiceState::Starting,
            last_error: None,
            report: None,
        }
    }
}

// ── Counters (lock-free) ──

pub struct RunCounters {
    pub runs_completed: AtomicU64,
    pub runs_failed: AtomicU64,
    pub assets_fetched: AtomicU64,
    pub assets_excluded: AtomicU64,
    pub ws_messages_sent: AtomicU64,
}

impl RunCounters {
    pub fn new() -> Self {
        Self {
            runs_completed: AtomicU64::new(0),
            runs_failed: AtomicU64::new(0),
            assets_fetched: AtomicU64::new(0),
            assets_excluded: AtomicU64::new(0),
            ws_messages_sent: AtomicU64::new(0),
        }
    }
}

// ── Application shared state (channels, not locks) ──

pub struct AppState {
    pub config: AppConfig,
    pub db: DbPool,

    // Scheduler -> HTTP/WS: latest run (watch = single producer, multi consumer)
    pub snapshot_tx: watch::Sender<ServiceSnapshot>,
    pub snapshot_rx: watch::Receiver<ServiceSnapshot>,

    // Scheduler -> WS clients: event stream
    pub ws_tx: broadcast::Sender<WsMessage>,

    // Scheduler -> DB writer: bounded command channel
    pub db_tx: mpsc::Sender<DbCommand>,

    pub counters: RunCounters,
}

impl AppState {
    pub fn new(config: AppConfig, db: DbPool, db_tx: mpsc::Sender<DbCommand>) -> Arc<Self> {
        let (ws_tx, _) = broadcast::channel(256);
        let (snapshot_tx, snapshot_rx) = watch::channel(ServiceSnapshot::default());

        Arc::new(Self {
            config,
            db,
            snapshot_tx,
            snapshot_rx,
            ws_tx,
            db_tx,
            counters: RunCounters::new(),
        })
    }

    #[inline]
    pub fn broadcast(&self, msg: WsMessage) {
        self.counters.ws_messages_sent.fetch_add(1, Ordering::Relaxed);
        let _ = self.ws_tx.send(msg);
    }

    /// Publish a finished run to every reader and queue it for persistence.
    pub async fn publish_run(&self, report: RunReport) -> EngineResult<()> {
        let excluded = report
            .exclusions
            .iter()
            .filter(|x| matches!(x.stage, "fetch" | "score"))
            .count() as u64;
        self.counters.runs_completed.fetch_add(1, Ordering::Relaxed);
        self.counters
            .assets_fetched
            .fetch_add(report.assets_fetched as u64, Ordering::Relaxed);
        self.counters.assets_excluded.fetch_add(excluded, Ordering::Relaxed);

        for x in &report.exclusions {
            self.broadcast(WsMessage::AssetExcluded {
                run_id: report.run_id.clone(),
                ticker: x.ticker.clone(),
                stage: x.stage.to_string(),
                reason: x.reason.clone(),
            });
        }
        self.broadcast(WsMessage::run_completed(&report));

        let report = Arc::new(report);
        let _ = self.snapshot_tx.send(ServiceSnapshot {
            state: ServiceState::Ready,
            last_error: None,
            report: Some(Arc::clone(&report)),
        });

        self.db_tx
            .send(DbCommand::InsertRun(report))
            .await
            .map_err(|_| EngineError::ChannelClosed("db writer, run not persisted".into()))
    }

    /// Record a failed run. The previous report stays visible.
    pub async fn publish_failure(&self, error: String) -> EngineResult<()> {
        self.counters.runs_failed.fetch_add(1, Ordering::Relaxed);
        let timestamp = chrono::Utc::now().to_rfc3339();

        self.broadcast(WsMessage::RunFailed {
            error: error.clone(),
            timestamp: timestamp.clone(),
        });
        self.snapshot_tx.send_modify(|s| {
            s.state = ServiceState::Degraded;
            s.last_error = Some(error.clone());
        });

        self.db_tx
            .send(DbCommand::InsertFailure { timestamp, error })
            .await
            .map_err(|_| EngineError::ChannelClosed("db writer, failure not persisted".into()))
    }
}
