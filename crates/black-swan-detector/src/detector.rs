use chrono::{DateTime, Local, NaiveDate, Utc};
use market_core::{BarSeries, Interval, MarketDataSource, Symbol};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::alert::{Alert, CompositeEvent, EventHistory};
use crate::baseline::{load_baseline, Baseline, BaselineSummary};
use crate::config::{
    DetectorConfig, ERROR_BACKOFF, HIGH_SEVERITY_CUTOFF, MAX_EVENT_HISTORY, RECENT_BAR_LIMIT,
    STOP_JOIN_TIMEOUT,
};
use crate::error::DetectorError;
use crate::gate::{AlertGate, GateDecision, SuppressionReason};
use crate::severity::Thresholds;
use crate::signals;
use crate::sink::NotificationSink;
use crate::stats;

/// Bars needed for the 24-bar price change in a manual check.
const PRICE_CHANGE_BARS: usize = 24;
const ATR_PERIOD: usize = 14;

/// What one evaluation tick did with the alerts it produced
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    NoAlerts,
    Suppressed(SuppressionReason),
    Dispatched(CompositeEvent),
}

/// Result of an on-demand single-symbol check. Never dispatched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManualCheckReport {
    pub symbol: Symbol,
    pub current_price: f64,
    /// Percent change over the last 24 bars
    pub price_change_24h: Option<f64>,
    pub atr: Option<f64>,
    /// Intraday return std scaled by sqrt(24)
    pub volatility: Option<f64>,
    pub alerts: Vec<Alert>,
    pub alert_count: usize,
    pub timestamp: DateTime<Utc>,
    /// Whether the gate would have held back a real notification
    pub notification_suppressed: bool,
    pub suppression_reason: Option<SuppressionReason>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectorStatus {
    pub is_monitoring: bool,
    pub last_check_time: Option<DateTime<Utc>>,
    pub last_alert_time: Option<DateTime<Utc>>,
    pub alert_count_today: u32,
    pub max_alerts_per_day: u32,
    pub watch_list: Vec<Symbol>,
    pub event_count: usize,
    pub high_severity_count: usize,
    pub thresholds: Thresholds,
    pub baseline_symbols: usize,
    pub baseline_loaded_at: Option<DateTime<Utc>>,
}

/// Mutable state written by the monitoring loop
struct MonitorState {
    gate: AlertGate,
    history: EventHistory,
    last_check_time: Option<DateTime<Utc>>,
}

struct MonitorTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct Inner {
    config: DetectorConfig,
    thresholds: Thresholds,
    data_source: RwLock<Option<Arc<dyn MarketDataSource>>>,
    /// Swapped whole on reload so readers always see one consistent snapshot
    baseline: RwLock<Arc<Baseline>>,
    state: Mutex<MonitorState>,
    sinks: RwLock<Vec<Arc<dyn NotificationSink>>>,
    monitoring: AtomicBool,
    task: Mutex<Option<MonitorTask>>,
}

/// Watches a basket of symbols for extreme market moves.
///
/// Cheap to clone; clones share state. At most one monitoring loop runs per
/// detector.
#[derive(Clone)]
pub struct BlackSwanDetector {
    inner: Arc<Inner>,
}

impl BlackSwanDetector {
    pub fn new(config: DetectorConfig) -> Self {
        let thresholds = Thresholds::from(&config);
        let gate = AlertGate::new(
            config.max_alerts_per_day,
            config.alert_cooldown(),
            Local::now().date_naive(),
        );

        info!(
            "Black swan detector initialized: {} symbols, thresholds volatility={} volume={} correlation={}",
            config.watch_list.len(),
            thresholds.volatility,
            thresholds.volume,
            thresholds.correlation
        );

        Self {
            inner: Arc::new(Inner {
                config,
                thresholds,
                data_source: RwLock::new(None),
                baseline: RwLock::new(Arc::new(Baseline::default())),
                state: Mutex::new(MonitorState {
                    gate,
                    history: EventHistory::new(MAX_EVENT_HISTORY),
                    last_check_time: None,
                }),
                sinks: RwLock::new(Vec::new()),
                monitoring: AtomicBool::new(false),
                task: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.inner.config
    }

    pub async fn set_data_source(&self, source: Arc<dyn MarketDataSource>) {
        *self.inner.data_source.write().await = Some(source);
        info!("Market data source attached");
    }

    pub async fn register_sink(&self, sink: Arc<dyn NotificationSink>) {
        info!("Notification sink registered: {}", sink.name());
        self.inner.sinks.write().await.push(sink);
    }

    pub fn is_monitoring(&self) -> bool {
        self.inner.monitoring.load(Ordering::SeqCst)
    }

    async fn data_source(&self) -> Result<Arc<dyn MarketDataSource>, DetectorError> {
        self.inner
            .data_source
            .read()
            .await
            .clone()
            .ok_or(DetectorError::NoDataSource)
    }

    pub async fn baseline(&self) -> Arc<Baseline> {
        self.inner.baseline.read().await.clone()
    }

    /// Rebuild the baseline from daily history and swap it in.
    ///
    /// When no symbol yields a baseline the previous snapshot is kept.
    pub async fn reload_baseline(&self) -> Result<BaselineSummary, DetectorError> {
        let source = self.data_source().await?;
        let now = Utc::now();

        let (baseline, summary) = load_baseline(
            source.as_ref(),
            &self.inner.config.watch_list,
            self.inner.config.historical_lookback_days,
            Local::now().date_naive(),
            now,
        )
        .await;

        if baseline.is_empty() {
            return Err(DetectorError::InsufficientData(
                "no symbol returned enough daily history".to_string(),
            ));
        }

        *self.inner.baseline.write().await = Arc::new(baseline);
        info!(
            "Baseline loaded for {} symbols ({} skipped), correlation matrix: {}",
            summary.loaded.len(),
            summary.skipped.len(),
            summary.has_correlation
        );
        Ok(summary)
    }

    /// Load the baseline and spawn the monitoring loop. Returns false when a
    /// loop is already running.
    pub async fn start_monitoring(&self) -> bool {
        // held until the task is stored so a concurrent stop waits for it
        let mut task = self.inner.task.lock().await;
        if self
            .inner
            .monitoring
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Monitoring already running");
            return false;
        }

        if let Err(e) = self.reload_baseline().await {
            warn!("Baseline load failed, evaluators idle until the next reload: {}", e);
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_loop(self.clone(), shutdown_rx));
        *task = Some(MonitorTask { shutdown, handle });

        info!("Black swan monitoring started");
        true
    }

    /// Signal the loop to stop and wait a bounded time for it to exit. A tick
    /// in progress is allowed to finish. Returns false when not running.
    pub async fn stop_monitoring(&self) -> bool {
        let mut task = self.inner.task.lock().await;
        if !self.inner.monitoring.swap(false, Ordering::SeqCst) {
            warn!("Monitoring not running");
            return false;
        }

        if let Some(running) = task.take() {
            let _ = running.shutdown.send(true);
            match tokio::time::timeout(STOP_JOIN_TIMEOUT, running.handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Monitoring task ended abnormally: {}", e),
                Err(_) => warn!(
                    "Monitoring loop did not exit within {:?}, leaving it to finish",
                    STOP_JOIN_TIMEOUT
                ),
            }
        }

        info!("Black swan monitoring stopped");
        true
    }

    /// Run one evaluation tick now.
    pub async fn check_market_conditions(&self) -> Result<TickOutcome, DetectorError> {
        self.evaluate_tick(Utc::now(), Local::now().date_naive()).await
    }

    pub(crate) async fn evaluate_tick(
        &self,
        now: DateTime<Utc>,
        today: NaiveDate,
    ) -> Result<TickOutcome, DetectorError> {
        {
            let mut state = self.inner.state.lock().await;
            if state.gate.roll_over(today) {
                info!("Daily alert counter reset for {}", today);
            }
        }

        let source = match self.data_source().await {
            Ok(source) => source,
            Err(e) => {
                // the attempt still counts as a check
                self.inner.state.lock().await.last_check_time = Some(now);
                return Err(e);
            }
        };
        let baseline = self.baseline().await;

        let current = self.fetch_current(source.as_ref()).await;
        let alerts = if current.is_empty() {
            warn!("No current market data for any watched symbol");
            Vec::new()
        } else {
            let t = &self.inner.thresholds;
            let mut alerts = signals::check_volatility(&current, &baseline, t, now);
            alerts.extend(signals::check_volume(&current, &baseline, t, now));
            alerts.extend(signals::check_correlation_breakdown(&current, &baseline, t, now));
            alerts
        };

        let event = {
            let mut state = self.inner.state.lock().await;
            state.last_check_time = Some(now);

            if alerts.is_empty() {
                debug!("Market check complete, no alerts");
                return Ok(TickOutcome::NoAlerts);
            }

            match state.gate.evaluate(now) {
                GateDecision::Suppress(SuppressionReason::DailyLimit) => {
                    warn!(
                        "Daily alert limit reached ({}), {} alerts not sent",
                        state.gate.max_alerts_per_day(),
                        alerts.len()
                    );
                    return Ok(TickOutcome::Suppressed(SuppressionReason::DailyLimit));
                }
                GateDecision::Suppress(reason) => {
                    if let Some(end) = state.gate.cooldown_end() {
                        info!("Alert cooldown active until {}", end.format("%H:%M:%S"));
                    }
                    return Ok(TickOutcome::Suppressed(reason));
                }
                GateDecision::Dispatch => {}
            }

            let event = CompositeEvent::from_alerts(alerts, now);
            state.history.push(event.clone());
            state.gate.record_dispatch(now);
            event
        };

        let affected: Vec<String> = event
            .affected_symbols()
            .iter()
            .map(|s| s.to_string())
            .collect();
        warn!(
            "BLACK SWAN EVENT detected! severity: {:.2} ({}), affected assets: {}",
            event.severity,
            event.priority().label(),
            affected.join(", ")
        );

        self.notify(&event).await;
        Ok(TickOutcome::Dispatched(event))
    }

    async fn fetch_current(&self, source: &dyn MarketDataSource) -> BTreeMap<Symbol, BarSeries> {
        let mut current = BTreeMap::new();
        for symbol in &self.inner.config.watch_list {
            match source
                .fetch_recent_bars(symbol.base(), Interval::OneHour, RECENT_BAR_LIMIT)
                .await
            {
                Ok(Some(series)) => {
                    current.insert(symbol.clone(), series);
                }
                Ok(None) => warn!("No current data for {}", symbol),
                Err(e) => warn!("Current data fetch failed for {}: {}", symbol, e),
            }
        }
        current
    }

    async fn notify(&self, event: &CompositeEvent) {
        let sinks = self.inner.sinks.read().await.clone();
        for sink in sinks {
            match sink.deliver(event).await {
                Ok(()) => debug!("Event delivered via {}", sink.name()),
                Err(e) => error!("Notification sink {} failed: {:#}", sink.name(), e),
            }
        }
    }

    /// Volatility and volume checks for one symbol outside the schedule.
    /// Reports what the gate would do but never changes it.
    pub async fn manual_check(&self, symbol: &str) -> Result<ManualCheckReport, DetectorError> {
        self.manual_check_at(Symbol::new(symbol), Utc::now(), Local::now().date_naive())
            .await
    }

    pub(crate) async fn manual_check_at(
        &self,
        symbol: Symbol,
        now: DateTime<Utc>,
        today: NaiveDate,
    ) -> Result<ManualCheckReport, DetectorError> {
        let source = self.data_source().await?;
        info!("Running manual check for {}", symbol);

        let series = source
            .fetch_recent_bars(symbol.base(), Interval::OneHour, RECENT_BAR_LIMIT)
            .await?
            .filter(|s| !s.is_empty())
            .ok_or_else(|| DetectorError::NoData(symbol.clone()))?;

        let current_price = series
            .last()
            .map(|b| b.close)
            .ok_or_else(|| DetectorError::NoData(symbol.clone()))?;
        let closes = series.closes();
        let price_change_24h = (closes.len() >= PRICE_CHANGE_BARS)
            .then(|| (closes[closes.len() - 1] / closes[closes.len() - PRICE_CHANGE_BARS] - 1.0) * 100.0);
        let atr = stats::average_true_range(series.bars(), ATR_PERIOD);
        let volatility = signals::intraday_volatility(&series);

        let baseline = self.baseline().await;
        let mut current = BTreeMap::new();
        current.insert(symbol.clone(), series);

        let t = &self.inner.thresholds;
        let mut alerts = signals::check_volatility(&current, &baseline, t, now);
        alerts.extend(signals::check_volume(&current, &baseline, t, now));

        let suppression_reason = if alerts.is_empty() {
            None
        } else {
            // evaluate against a rolled-over copy; the real gate is untouched
            let mut gate = self.inner.state.lock().await.gate.clone();
            gate.roll_over(today);
            match gate.evaluate(now) {
                GateDecision::Suppress(reason) => Some(reason),
                GateDecision::Dispatch => None,
            }
        };

        Ok(ManualCheckReport {
            symbol,
            current_price,
            price_change_24h,
            atr,
            volatility,
            alert_count: alerts.len(),
            alerts,
            timestamp: now,
            notification_suppressed: suppression_reason.is_some(),
            suppression_reason,
        })
    }

    /// Dispatched events, oldest first.
    pub async fn event_history(&self) -> Vec<CompositeEvent> {
        self.inner.state.lock().await.history.to_vec()
    }

    pub async fn status(&self) -> DetectorStatus {
        let baseline = self.baseline().await;
        let state = self.inner.state.lock().await;

        DetectorStatus {
            is_monitoring: self.is_monitoring(),
            last_check_time: state.last_check_time,
            last_alert_time: state.gate.last_alert_time(),
            alert_count_today: state.gate.alert_count_today(),
            max_alerts_per_day: state.gate.max_alerts_per_day(),
            watch_list: self.inner.config.watch_list.clone(),
            event_count: state.history.len(),
            high_severity_count: state.history.count_above(HIGH_SEVERITY_CUTOFF),
            thresholds: self.inner.thresholds,
            baseline_symbols: baseline.stats.len(),
            baseline_loaded_at: baseline.loaded_at,
        }
    }
}

async fn run_loop(detector: BlackSwanDetector, mut shutdown: watch::Receiver<bool>) {
    info!("Monitoring loop started");
    let interval = detector.config().check_interval();

    while detector.is_monitoring() && !*shutdown.borrow() {
        // a panic inside the tick surfaces as a JoinError instead of killing the loop
        let tick = detector.clone();
        let result = tokio::spawn(async move { tick.check_market_conditions().await }).await;

        let pause = match result {
            Ok(Ok(outcome)) => {
                debug!("Tick finished: {}", outcome_label(&outcome));
                interval
            }
            Ok(Err(e)) => {
                error!("Monitoring loop error: {}", e);
                ERROR_BACKOFF
            }
            Err(e) => {
                error!("Monitoring tick aborted: {}", e);
                ERROR_BACKOFF
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(pause) => {}
            _ = shutdown.changed() => {}
        }
    }

    info!("Monitoring loop finished");
}

fn outcome_label(outcome: &TickOutcome) -> String {
    match outcome {
        TickOutcome::NoAlerts => "no alerts".to_string(),
        TickOutcome::Suppressed(reason) => format!("suppressed ({})", reason),
        TickOutcome::Dispatched(event) => format!("dispatched {} alerts", event.alerts.len()),
    }
}
