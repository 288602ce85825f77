//! Routes start/stop/restart commands to per-platform supervisors.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock, RwLockReadGuard, Weak},
    time::Duration,
};

use {
    chatrelay_bus::{EventBus, Subscription, handler_fn},
    chatrelay_channels::{ConnectorFactory, Supervisor, SupervisorState},
    chatrelay_common::{ControlAction, ControlCommand, Event, EventKind, Platform, StatusKind},
    chatrelay_config::SupervisorConfig,
    chatrelay_oauth::{CredentialStore, TokenRefresher},
    chrono::{DateTime, Utc},
    serde::Serialize,
    tokio::{
        sync::{Mutex, mpsc, watch},
        task::{AbortHandle, JoinHandle},
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

use crate::error::{Error, Result};

/// A supervisor task the control plane tracks.
struct RunningTask {
    cancel: CancellationToken,
    /// Watcher task; finishes after the supervisor does.
    handle: JoinHandle<()>,
    /// The supervisor itself, for aborting a stop that overruns.
    abort: AbortHandle,
}

impl RunningTask {
    fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

/// Read side of a tracked task, readable without waiting on a command in
/// flight.
struct TaskView {
    /// Cancelled once the watcher task finishes.
    finished: CancellationToken,
    state: watch::Receiver<SupervisorState>,
    started_at: DateTime<Utc>,
}

impl TaskView {
    fn is_running(&self) -> bool {
        !self.finished.is_cancelled()
    }
}

/// Point-in-time view of one tracked platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskStatus {
    pub platform: Platform,
    pub running: bool,
    pub state: String,
    pub started_at: DateTime<Utc>,
}

struct Inner {
    bus: EventBus,
    factory: Arc<dyn ConnectorFactory>,
    store: Arc<dyn CredentialStore>,
    refresher: RwLock<Arc<dyn TokenRefresher>>,
    config: RwLock<SupervisorConfig>,
    /// Held for the whole of every start/stop/restart.
    tasks: Mutex<HashMap<Platform, RunningTask>>,
    /// Mirrors `tasks`; an entry leaves only once its stop completes.
    views: RwLock<HashMap<Platform, TaskView>>,
}

/// Owns the `platform -> running supervisor` map.
///
/// Guarantees at most one supervisor per platform. Every operation is
/// idempotent: starting a running platform and stopping a stopped one are
/// logged no-ops.
#[derive(Clone)]
pub struct ControlPlane {
    inner: Arc<Inner>,
}

impl ControlPlane {
    pub fn new(
        bus: EventBus,
        factory: Arc<dyn ConnectorFactory>,
        store: Arc<dyn CredentialStore>,
        refresher: Arc<dyn TokenRefresher>,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                bus,
                factory,
                store,
                refresher: RwLock::new(refresher),
                config: RwLock::new(config),
                tasks: Mutex::new(HashMap::new()),
                views: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Settings used by supervisors started from now on.
    pub fn set_config(&self, config: SupervisorConfig) {
        *self.inner.config.write().unwrap_or_else(|e| e.into_inner()) = config;
    }

    pub fn set_refresher(&self, refresher: Arc<dyn TokenRefresher>) {
        *self.inner.refresher.write().unwrap_or_else(|e| e.into_inner()) = refresher;
    }

    /// Start a supervisor for `platform`.
    ///
    /// Returns `Ok(false)` when one is already running.
    pub async fn start(&self, platform: Platform) -> Result<bool> {
        let mut tasks = self.inner.tasks.lock().await;
        self.inner.start_locked(&mut tasks, platform)
    }

    /// Stop the platform's supervisor. Returns `false` when none was running.
    pub async fn stop(&self, platform: Platform) -> bool {
        let mut tasks = self.inner.tasks.lock().await;
        self.inner.stop_locked(&mut tasks, platform).await
    }

    /// Stop, pause briefly, start a fresh supervisor.
    pub async fn restart(&self, platform: Platform) -> Result<bool> {
        let mut tasks = self.inner.tasks.lock().await;
        self.inner.stop_locked(&mut tasks, platform).await;
        let delay = self.inner.supervisor_config().restart_delay_secs;
        tokio::time::sleep(Duration::from_secs(delay)).await;
        self.inner.start_locked(&mut tasks, platform)
    }

    /// Apply one control command.
    pub async fn handle(&self, command: ControlCommand) -> Result<()> {
        let ControlCommand { platform, command } = command;
        debug!(%platform, %command, "control command");
        match command {
            ControlAction::Start => self.start(platform).await.map(|_| ()),
            ControlAction::Stop => {
                self.stop(platform).await;
                Ok(())
            },
            ControlAction::Restart => self.restart(platform).await.map(|_| ()),
        }
    }

    pub async fn stop_all(&self) {
        let mut tasks = self.inner.tasks.lock().await;
        let platforms: Vec<Platform> = tasks.keys().copied().collect();
        for platform in platforms {
            self.inner.stop_locked(&mut tasks, platform).await;
        }
    }

    /// A platform being stopped counts as running until its stop completes.
    pub async fn is_running(&self, platform: Platform) -> bool {
        self.inner
            .views()
            .get(&platform)
            .is_some_and(TaskView::is_running)
    }

    /// Tracked platforms, sorted.
    pub async fn status(&self) -> Vec<TaskStatus> {
        let views = self.inner.views();
        let mut out: Vec<TaskStatus> = views
            .iter()
            .map(|(platform, task)| TaskStatus {
                platform: *platform,
                running: task.is_running(),
                state: task.state.borrow().to_string(),
                started_at: task.started_at,
            })
            .collect();
        out.sort_by_key(|s| s.platform);
        out
    }

    /// Consume `control-command` events from the bus.
    ///
    /// Commands are applied one at a time in arrival order on a dedicated
    /// task, so a slow stop never holds up the bus worker. Dropping the
    /// returned subscription ends that task.
    pub fn listen(&self) -> Subscription {
        let (tx, mut rx) = mpsc::unbounded_channel::<ControlCommand>();
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);

        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let control = ControlPlane { inner };
                if let Err(e) = control.handle(command).await {
                    warn!(platform = %command.platform, command = %command.command, error = %e, "control command failed");
                }
            }
            debug!("control listener finished");
        });

        self.inner.bus.subscribe_scoped(
            EventKind::ControlCommand,
            handler_fn("control-plane", move |event: Arc<Event>| {
                let tx = tx.clone();
                async move {
                    if let Event::ControlCommand(command) = event.as_ref() {
                        tx.send(*command)
                            .map_err(|_| anyhow::anyhow!("control listener gone"))?;
                    }
                    Ok(())
                }
            }),
        )
    }
}

impl Inner {
    fn views(&self) -> RwLockReadGuard<'_, HashMap<Platform, TaskView>> {
        self.views.read().unwrap_or_else(|e| e.into_inner())
    }

    fn set_view(&self, platform: Platform, view: Option<TaskView>) {
        let mut views = self.views.write().unwrap_or_else(|e| e.into_inner());
        match view {
            Some(view) => views.insert(platform, view),
            None => views.remove(&platform),
        };
    }

    fn supervisor_config(&self) -> SupervisorConfig {
        self.config.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn start_locked(
        &self,
        tasks: &mut HashMap<Platform, RunningTask>,
        platform: Platform,
    ) -> Result<bool> {
        if let Some(task) = tasks.get(&platform)
            && task.is_running()
        {
            warn!(%platform, "start ignored: supervisor already running");
            return Ok(false);
        }

        let Some(connector) = self.factory.create(platform) else {
            self.bus.publish(Event::status(
                platform,
                StatusKind::Disabled,
                Some("no connector available".into()),
            ));
            return Err(Error::NoConnector(platform));
        };
        let refresher = Arc::clone(&*self.refresher.read().unwrap_or_else(|e| e.into_inner()));
        let supervisor = Supervisor::new(
            connector,
            Arc::clone(&self.store),
            refresher,
            self.bus.clone(),
            self.supervisor_config(),
        );
        let state = supervisor.watch_state();
        let cancel = CancellationToken::new();

        let run = tokio::spawn(supervisor.run(cancel.clone()));
        let abort = run.abort_handle();
        let bus = self.bus.clone();
        let finished = CancellationToken::new();
        let done = finished.clone().drop_guard();
        let handle = tokio::spawn(async move {
            let _done = done;
            match run.await {
                Ok(()) => {},
                Err(e) if e.is_panic() => {
                    error!(%platform, "supervisor task panicked");
                    bus.publish(Event::status(
                        platform,
                        StatusKind::Error,
                        Some("supervisor task panicked".into()),
                    ));
                },
                Err(_) => {
                    warn!(%platform, "supervisor task aborted");
                    bus.publish(Event::status(
                        platform,
                        StatusKind::Stopped,
                        Some("aborted".into()),
                    ));
                },
            }
        });

        // A finished entry from an earlier run is simply replaced.
        self.set_view(
            platform,
            Some(TaskView {
                finished,
                state,
                started_at: Utc::now(),
            }),
        );
        tasks.insert(platform, RunningTask {
            cancel,
            handle,
            abort,
        });
        info!(%platform, "supervisor task started");
        Ok(true)
    }

    async fn stop_locked(
        &self,
        tasks: &mut HashMap<Platform, RunningTask>,
        platform: Platform,
    ) -> bool {
        let Some(mut task) = tasks.remove(&platform) else {
            debug!(%platform, "stop ignored: nothing running");
            return false;
        };
        if !task.is_running() {
            debug!(%platform, "stop: clearing finished task");
            self.set_view(platform, None);
            return false;
        }

        let timeout = Duration::from_secs(self.supervisor_config().stop_timeout_secs);
        task.cancel.cancel();
        if tokio::time::timeout(timeout, &mut task.handle).await.is_err() {
            warn!(%platform, timeout_secs = timeout.as_secs(), "supervisor did not stop in time, aborting");
            task.abort.abort();
            if tokio::time::timeout(timeout, &mut task.handle).await.is_err() {
                error!(%platform, "supervisor task still running after abort");
                task.handle.abort();
            }
        }
        self.set_view(platform, None);
        info!(%platform, "supervisor task stopped");
        true
    }
}
