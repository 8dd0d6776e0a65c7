mod config;
mod db;
mod errors;
mod feeds;
mod models;
mod pipeline;
mod portfolio;
mod risk;
mod server;
mod state;

use crate::config::AppConfig;
use crate::errors::EngineResult;
use crate::feeds::fixture::FixtureProvider;
use crate::feeds::quotes::QuoteFileProvider;
use crate::feeds::yahoo::YahooChartProvider;
use crate::feeds::{MarketData, NoOptions, OptionData};
use crate::portfolio::report;
use crate::state::{AppState, DbCommand, ServiceState, WsMessage};
use std::sync::Arc;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() {
    // Structured logging on stderr; stdout is reserved for the one-shot report
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("confident_kelly starting");

    // Load config
    let cfg = match AppConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("config error: {e}");
            std::process::exit(1);
        }
    };

    let (market_data, option_data) = match build_providers(&cfg) {
        Ok(p) => p,
        Err(e) => {
            tracing::error!("provider setup error: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        tickers = cfg.tickers.len(),
        portfolio_value = cfg.portfolio_value,
        strategy = %cfg.strategy,
        one_shot = cfg.is_one_shot(),
        "configuration loaded"
    );

    if cfg.is_one_shot() {
        run_once(&cfg, &market_data, &option_data).await;
    } else {
        run_service(cfg, market_data, option_data).await;
    }
}

fn build_providers(cfg: &AppConfig) -> EngineResult<(MarketData, OptionData)> {
    let market_data = match &cfg.returns_fixture_path {
        Some(path) => MarketData::Fixture(FixtureProvider::from_file(path)?),
        None => MarketData::Yahoo(YahooChartProvider::new(
            &cfg.market_data_base_url,
            &cfg.market_data_user_agent,
            cfg.fetch_timeout_secs,
        )?),
    };
    let option_data = match &cfg.option_quotes_path {
        Some(path) => OptionData::File(QuoteFileProvider::from_file(path)?),
        None => OptionData::Disabled(NoOptions),
    };
    Ok((market_data, option_data))
}

/// One batch: JSON report on stdout, table on stderr, non-zero exit on failure.
async fn run_once(cfg: &AppConfig, market_data: &MarketData, option_data: &OptionData) {
    match pipeline::run_batch(market_data, option_data, cfg).await {
        Ok(run) => {
            eprint!("{}", report::render_report(&run));
            match serde_json::to_string_pretty(&run) {
                Ok(json) => println!("{json}"),
                Err(e) => {
                    tracing::error!("report serialization error: {e}");
                    std::process::exit(1);
                }
            }
        }
        Err(e) => {
            tracing::error!("run failed: {e}");
            std::process::exit(1);
        }
    }
}

async fn run_service(cfg: AppConfig, market_data: MarketData, option_data: OptionData) {
    // Init database
    let db_pool = match db::init_db(&cfg.data_dir) {
        Ok(d) => d,
        Err(e) => {
            tracing::error!("database init error: {e}");
            std::process::exit(1);
        }
    };

    let (db_tx, db_rx) = mpsc::channel::<DbCommand>(64);
    let app_state = AppState::new(cfg.clone(), db_pool.clone(), db_tx);

    // ── Spawn tasks ──

    // 1. DB writer task (dedicated, owns all writes)
    tokio::spawn(async move {
        db::run_db_writer(db_pool, db_rx).await;
    });

    // 2. Axum HTTP + WS server
    let addr = format!("0.0.0.0:{}", cfg.server_port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("bind error: {e}");
            std::process::exit(1);
        }
    };
    tracing::info!("server listening on {addr}");

    let app = server::router(app_state.clone());
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("server error: {e}");
        }
    });

    // 3. Batch scheduler (this task)
    run_scheduler(app_state, &cfg, &market_data, &option_data).await;
}

/// Run a batch every refresh interval and publish each outcome.
async fn run_scheduler(state: Arc<AppState>, cfg: &AppConfig, market_data: &MarketData, option_data: &OptionData) {
    let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(cfg.refresh_interval_secs));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        match pipeline::run_batch(market_data, option_data, cfg).await {
            Ok(run) => {
                tracing::info!(
                    run_id = %run.run_id,
                    allocated = %report::format_currency(run.equity_plan.total_allocated),
                    pct = %report::format_percentage(run.equity_plan.allocation_percentage / 100.0),
                    "run published"
                );
                if let Err(send_err) = state.publish_run(run).await {
                    tracing::error!("{send_err}");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "run failed");
                if let Err(send_err) = state.publish_failure(e.to_string()).await {
                    tracing::error!("{send_err}");
                }
                state.broadcast(WsMessage::ServiceStateMsg {
                    state: ServiceState::Degraded.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }
}
