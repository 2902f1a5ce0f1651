//! Main application orchestration.
//!
//! One task owns the `Reconciler` and handles, one at a time:
//! - session events from the push channel
//! - fetch results, returned by spawned fetch tasks as `AppEvent`s
//! - operator commands
//! - refresh timers and shutdown signals
//!
//! After every change the view is published on a `watch` channel and the
//! displayed temple is logged.

use crate::command::Command;
use crate::config::AppConfig;
use crate::error::AppResult;
use crowd_core::{EntityKey, Reading};
use crowd_feed::{
    ApplyOutcome, FeedEvent, HistoryOutcome, HistoryRequest, MessageParser, Reconciler,
    ViewSnapshot,
};
use crowd_registry::{ApiClient, HistoryFetcher, RegistryResult, SnapshotFetcher};
use crowd_telemetry::Metrics;
use crowd_ws::{ConnectionSession, SessionEvent};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Grace period for the session task after teardown.
const SESSION_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Result of a spawned fetch.
#[derive(Debug)]
pub enum AppEvent {
    SnapshotFetched(RegistryResult<Vec<Reading>>),
    HistoryFetched {
        request: HistoryRequest,
        result: RegistryResult<Vec<Reading>>,
    },
    SingleFetched {
        entity: EntityKey,
        result: RegistryResult<Reading>,
    },
}

/// Shuts the session down when dropped, on every exit path.
struct SessionGuard {
    session: Arc<ConnectionSession>,
    handle: Option<JoinHandle<()>>,
}

impl SessionGuard {
    fn spawn(session: Arc<ConnectionSession>) -> Self {
        let task_session = session.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = task_session.run().await {
                error!(error = %e, "Push session ended");
            }
        });
        Self {
            session,
            handle: Some(handle),
        }
    }

    async fn close(mut self) {
        self.session.shutdown();
        if let Some(handle) = self.handle.take() {
            if tokio::time::timeout(SESSION_CLOSE_TIMEOUT, handle).await.is_err() {
                warn!("Push session did not stop in time");
            }
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.session.shutdown();
    }
}

/// Main application, generic over the REST backend.
pub struct Application<F = ApiClient> {
    config: AppConfig,
    reconciler: Reconciler,
    api: F,
    parser: MessageParser,
    initial_selection: EntityKey,
    view_tx: watch::Sender<ViewSnapshot>,
    app_tx: mpsc::Sender<AppEvent>,
    app_rx: mpsc::Receiver<AppEvent>,
    shutdown_token: CancellationToken,
    /// Whether the push channel has connected at least once.
    connected_once: bool,
}

impl Application<ApiClient> {
    /// Create a new application talking to `config.api_url`.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        config.validate()?;
        let api = ApiClient::with_timeout(config.api_url.clone(), config.http_timeout())?;
        Self::with_fetcher(config, api)
    }
}

impl<F> Application<F>
where
    F: SnapshotFetcher + HistoryFetcher + Clone,
{
    /// Create an application that fetches through `api`.
    pub fn with_fetcher(config: AppConfig, api: F) -> AppResult<Self> {
        config.validate()?;

        let registry = config.registry()?;
        let initial_selection = config.initial_selection(&registry)?;
        let reconciler =
            Reconciler::with_history_capacity(registry, config.merge_policy, config.history_limit);
        let (view_tx, _) = watch::channel(reconciler.snapshot());
        let (app_tx, app_rx) = mpsc::channel(256);

        info!(
            api_url = %config.api_url,
            push_url = %config.push_url,
            temples = reconciler.registry().len(),
            merge_policy = ?reconciler.merge_policy(),
            "Application configured"
        );

        Ok(Self {
            config,
            reconciler,
            api,
            parser: MessageParser::new(),
            initial_selection,
            view_tx,
            app_tx,
            app_rx,
            shutdown_token: CancellationToken::new(),
            connected_once: false,
        })
    }

    /// Receiver of view updates.
    pub fn subscribe(&self) -> watch::Receiver<ViewSnapshot> {
        self.view_tx.subscribe()
    }

    /// Token that stops `run()` when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Run the event loop until `Quit`, command EOF, Ctrl-C or the
    /// shutdown token.
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) -> AppResult<()> {
        info!("Starting application");

        let (session_tx, mut session_rx) = mpsc::channel::<SessionEvent>(1000);
        let session = Arc::new(ConnectionSession::new(
            self.config.session_config(),
            session_tx,
        ));
        info!(session_id = %session.session_id(), "Push session created");
        let guard = SessionGuard::spawn(session);

        self.spawn_snapshot_fetch();
        let initial = self.initial_selection.clone();
        self.select(&initial);
        self.publish();

        let mut history_timer = self.config.history_refresh_interval().map(periodic);
        let mut snapshot_timer = self.config.snapshot_refresh_interval().map(periodic);
        let mut commands_open = true;

        info!("Entering main event loop");
        loop {
            tokio::select! {
                Some(event) = session_rx.recv() => {
                    self.handle_session_event(event);
                }

                Some(event) = self.app_rx.recv() => {
                    self.handle_app_event(event);
                }

                command = commands.recv(), if commands_open => {
                    match command {
                        Some(Command::Quit) => {
                            info!("Quit requested");
                            break;
                        }
                        Some(command) => self.handle_command(command),
                        None => commands_open = false,
                    }
                }

                () = tick(&mut history_timer) => {
                    if let Some(request) = self.reconciler.refresh_history_request() {
                        debug!(entity = %request.entity, "Periodic history refresh");
                        self.spawn_history_fetch(request);
                    }
                }

                () = tick(&mut snapshot_timer) => {
                    debug!("Periodic snapshot refresh");
                    self.spawn_snapshot_fetch();
                }

                () = self.shutdown_token.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }

                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        guard.close().await;

        match Metrics::render() {
            Ok(text) => debug!(metrics = %text, "Final metrics"),
            Err(e) => warn!(error = %e, "Failed to render metrics"),
        }
        info!("Application stopped");
        Ok(())
    }

    fn handle_session_event(&mut self, event: SessionEvent) {
        let feed_event = match self.parser.parse_session_event(&event) {
            Ok(Some(feed_event)) => feed_event,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "Dropping push event");
                Metrics::reading_dropped("malformed");
                return;
            }
        };

        match feed_event {
            FeedEvent::Reading(reading) => {
                self.apply("push", reading);
            }
            FeedEvent::Connectivity(state) => {
                if !self.reconciler.set_connection_state(state) {
                    return;
                }
                if state.is_connected() {
                    Metrics::push_connected();
                    if self.connected_once {
                        Metrics::reconnect();
                    }
                    self.connected_once = true;
                    // Resync whatever was missed while disconnected.
                    self.spawn_snapshot_fetch();
                } else {
                    Metrics::push_disconnected();
                }
            }
        }
        self.publish();
    }

    fn handle_app_event(&mut self, event: AppEvent) {
        match event {
            AppEvent::SnapshotFetched(Ok(readings)) => {
                let summary = self.reconciler.apply_snapshot(readings);
                Metrics::readings_applied("snapshot", summary.applied);
                Metrics::readings_dropped("unknown_key", summary.unknown);
                Metrics::readings_dropped("stale", summary.stale);
                self.record_counts();
            }
            AppEvent::SnapshotFetched(Err(e)) => {
                warn!(error = %e, "Snapshot fetch failed, keeping current view");
                Metrics::fetch_failed("snapshot");
                return;
            }
            AppEvent::HistoryFetched {
                request,
                result: Ok(readings),
            } => match self.reconciler.apply_history(&request, readings) {
                HistoryOutcome::Replaced(count) => {
                    debug!(entity = %request.entity, count, "History updated");
                }
                outcome => {
                    debug!(entity = %request.entity, ?outcome, "History response ignored");
                    return;
                }
            },
            AppEvent::HistoryFetched {
                request,
                result: Err(e),
            } => {
                warn!(entity = %request.entity, error = %e, "History fetch failed, keeping current history");
                Metrics::fetch_failed("history");
                return;
            }
            AppEvent::SingleFetched {
                result: Ok(reading),
                ..
            } => {
                self.apply("refresh", reading);
            }
            AppEvent::SingleFetched {
                entity,
                result: Err(e),
            } => {
                warn!(entity = %entity, error = %e, "Temple refresh failed");
                Metrics::fetch_failed("single");
                return;
            }
        }
        self.publish();
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Select(key) => {
                self.select(&key);
                self.publish();
            }
            Command::Refresh(key) => {
                if self.reconciler.registry().contains(&key) {
                    self.spawn_single_fetch(key);
                } else {
                    warn!(entity = %key, "Cannot refresh unknown temple");
                }
            }
            Command::Show => self.log_view(),
            Command::Quit => {}
        }
    }

    fn select(&mut self, key: &EntityKey) {
        match self.reconciler.select_entity(key) {
            Ok(request) => self.spawn_history_fetch(request),
            Err(e) => warn!(error = %e, "Selection rejected"),
        }
    }

    fn apply(&mut self, source: &str, reading: Reading) {
        let entity = reading.entity.clone();
        let people_count = reading.people_count;
        match self.reconciler.apply_reading(reading) {
            ApplyOutcome::Applied | ApplyOutcome::AppliedToHistory => {
                Metrics::reading_applied(source);
                Metrics::people_count(entity.as_str(), people_count);
            }
            ApplyOutcome::UnknownKey => Metrics::reading_dropped("unknown_key"),
            ApplyOutcome::Stale => Metrics::reading_dropped("stale"),
        }
    }

    fn record_counts(&self) {
        for key in self.reconciler.registry().keys() {
            if let Some(reading) = self.reconciler.reading(key) {
                Metrics::people_count(key.as_str(), reading.people_count);
            }
        }
    }

    fn publish(&self) {
        let view = self.reconciler.snapshot();
        let displayed = &view.displayed;
        info!(
            temple = %displayed.metadata.name,
            people_count = displayed.reading.people_count,
            crowd_level = %displayed.reading.crowd_level,
            next_hour = %displayed.reading.next_hour,
            last_updated = %displayed.reading.last_updated,
            history = view.history.len(),
            connectivity = %view.connectivity,
            "View updated"
        );
        self.view_tx.send_replace(view);
    }

    fn log_view(&self) {
        let view = self.reconciler.snapshot();
        for entity in &view.entities {
            info!(
                temple = %entity.metadata.key,
                name = %entity.metadata.name,
                image = %entity.metadata.image,
                people_count = entity.reading.people_count,
                crowd_level = %entity.reading.crowd_level,
                next_hour = %entity.reading.next_hour,
                last_updated = %entity.reading.last_updated,
                selected = view.selected.as_ref() == Some(&entity.metadata.key),
                "Temple"
            );
        }
        for (idx, reading) in view.history.iter().enumerate() {
            info!(
                idx,
                people_count = reading.people_count,
                crowd_level = %reading.crowd_level,
                last_updated = %reading.last_updated,
                "History"
            );
        }
        info!(connectivity = %view.connectivity, "Push channel");
    }

    fn spawn_snapshot_fetch(&self) {
        let api = self.api.clone();
        let tx = self.app_tx.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let result = api.fetch_all().await;
            Metrics::fetch_duration("snapshot", started.elapsed().as_secs_f64() * 1000.0);
            let _ = tx.send(AppEvent::SnapshotFetched(result)).await;
        });
    }

    fn spawn_history_fetch(&self, request: HistoryRequest) {
        let api = self.api.clone();
        let tx = self.app_tx.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let result = api.fetch_history(&request.entity, request.limit).await;
            Metrics::fetch_duration("history", started.elapsed().as_secs_f64() * 1000.0);
            let _ = tx.send(AppEvent::HistoryFetched { request, result }).await;
        });
    }

    fn spawn_single_fetch(&self, entity: EntityKey) {
        let api = self.api.clone();
        let tx = self.app_tx.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let result = api.fetch_entity(&entity).await;
            Metrics::fetch_duration("single", started.elapsed().as_secs_f64() * 1000.0);
            let _ = tx.send(AppEvent::SingleFetched { entity, result }).await;
        });
    }
}

/// Interval whose first tick is one period from now.
fn periodic(period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval
}

/// Wait for the next tick; never completes for a disabled timer.
async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crowd_core::{ConnectivityState, CrowdLevel};
    use crowd_registry::RegistryError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory backend with a fixed snapshot and no history.
    #[derive(Clone, Default)]
    struct StaticFetcher {
        readings: Vec<Reading>,
        snapshot_calls: Arc<AtomicUsize>,
    }

    impl SnapshotFetcher for StaticFetcher {
        async fn fetch_all(&self) -> RegistryResult<Vec<Reading>> {
            self.snapshot_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.readings.clone())
        }

        async fn fetch_entity(&self, entity: &EntityKey) -> RegistryResult<Reading> {
            self.readings
                .iter()
                .find(|r| &r.entity == entity)
                .cloned()
                .ok_or_else(|| RegistryError::EntityNotFound(entity.to_string()))
        }
    }

    impl HistoryFetcher for StaticFetcher {
        async fn fetch_history(&self, _entity: &EntityKey, _limit: usize) -> RegistryResult<Vec<Reading>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_new_publishes_placeholders() {
        let app = Application::new(AppConfig::default()).unwrap();
        let view = app.subscribe().borrow().clone();

        assert_eq!(view.entities.len(), 3);
        assert!(view.entities.iter().all(|e| e.reading.is_placeholder()));
        assert_eq!(view.connectivity, ConnectivityState::Disconnected);
        assert_eq!(view.displayed.metadata.key.as_str(), "KashiVishwanath");
    }

    #[test]
    fn test_new_rejects_bad_selection() {
        let config = AppConfig {
            selected: Some("TempleX".to_string()),
            ..Default::default()
        };
        assert!(Application::new(config).is_err());
    }

    #[tokio::test]
    async fn test_custom_fetcher_drives_view() {
        let fetcher = StaticFetcher {
            readings: vec![Reading::new(
                EntityKey::from("TempleC"),
                25,
                "2024-03-01 10:00:00",
                CrowdLevel::Low,
                CrowdLevel::Medium,
            )],
            ..Default::default()
        };
        let calls = fetcher.snapshot_calls.clone();
        let config = AppConfig {
            // Nothing listens here; the push session keeps retrying.
            push_url: "ws://127.0.0.1:1".to_string(),
            history_refresh_interval_ms: 0,
            ..Default::default()
        };

        let app = Application::with_fetcher(config, fetcher).unwrap();
        let mut view = app.subscribe();
        let shutdown = app.shutdown_token();
        let (_commands, command_rx) = mpsc::channel(1);
        let handle = tokio::spawn(app.run(command_rx));

        let applied = tokio::time::timeout(
            Duration::from_secs(5),
            view.wait_for(|v| v.entities.iter().any(|e| e.reading.people_count == 25)),
        )
        .await
        .map(|seen| seen.is_ok());
        assert_eq!(applied, Ok(true), "snapshot from custom fetcher should reach the view");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        shutdown.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }

    #[tokio::test]
    async fn test_disabled_timer_never_ticks() {
        let mut timer = None;
        let result = tokio::time::timeout(Duration::from_millis(20), tick(&mut timer)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_periodic_first_tick_after_period() {
        let mut timer = Some(periodic(Duration::from_millis(30)));
        let started = Instant::now();
        tick(&mut timer).await;
        assert!(started.elapsed() >= Duration::from_millis(25));
    }
}
