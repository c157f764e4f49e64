//! Local backend supervisor.
//!
//! Spawns the dashboard backend as a child process, forwards its output to
//! the log, probes it over HTTPS until it answers and picks the endpoint the
//! frontend should load: the local backend when ready, the hosted dashboard
//! otherwise.
//!
//! State machine, observable through [`ServiceSupervisor::subscribe`]:
//!
//! ```text
//! Stopped -> Starting -> Probing -> Ready | Fallback
//! ```
//!
//! A child that exits on its own moves the state back to `Stopped`. A later
//! `start` (or `restart`) re-enters `Starting`.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::BackendConfig;
use crate::error::{BridgeError, BridgeResult};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Stopped,
    Starting,
    Probing,
    Ready,
    Fallback,
}

/// Where the frontend should point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "url", rename_all = "snake_case")]
pub enum Endpoint {
    Local(String),
    Hosted(String),
}

impl Endpoint {
    pub fn url(&self) -> &str {
        match self {
            Endpoint::Local(url) | Endpoint::Hosted(url) => url,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Endpoint::Local(_))
    }
}

/// `{base}/{startup_path}`, the way the frontend expects startup views.
pub fn with_startup_path(base: &str, startup_path: &str) -> String {
    format!("{base}/{startup_path}")
}

// ---------------------------------------------------------------------------
// Readiness
// ---------------------------------------------------------------------------

#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// One attempt. `true` only for a 200 response.
    async fn probe(&self) -> bool;
}

/// HTTPS GET against the backend health URL.
///
/// Certificate validation is disabled only when the URL's host is the
/// configured local hostname (the backend uses a self-signed certificate).
/// Redirects are never followed, so the relaxed client cannot be steered to
/// another host.
pub struct HttpsProbe {
    client: reqwest::Client,
    url: String,
    relaxed: bool,
}

impl HttpsProbe {
    pub fn new(url: &str, local_host: &str) -> BridgeResult<Self> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| BridgeError::Config(format!("health url {url}: {e}")))?;
        let relaxed = parsed.host_str() == Some(local_host);
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(relaxed)
            .redirect(reqwest::redirect::Policy::none())
            .timeout(PROBE_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            url: url.to_string(),
            relaxed,
        })
    }

    /// Whether certificate validation is off for this probe.
    pub fn accepts_invalid_certs(&self) -> bool {
        self.relaxed
    }
}

#[async_trait]
impl HealthProbe for HttpsProbe {
    async fn probe(&self) -> bool {
        match self.client.get(&self.url).send().await {
            Ok(resp) if resp.status() == reqwest::StatusCode::OK => true,
            Ok(resp) => {
                debug!(status = %resp.status(), url = %self.url, "backend not ready");
                false
            }
            Err(e) => {
                debug!(error = %e, url = %self.url, "backend unreachable");
                false
            }
        }
    }
}

/// Probe up to `max_attempts` times, `interval` apart. Never errors.
pub async fn wait_until_ready(probe: &dyn HealthProbe, interval: Duration, max_attempts: u32) -> bool {
    for attempt in 1..=max_attempts {
        if probe.probe().await {
            info!(attempt, "backend is ready");
            return true;
        }
        if attempt < max_attempts {
            debug!(attempt, retry_ms = interval.as_millis() as u64, "readiness attempt failed");
            tokio::time::sleep(interval).await;
        }
    }
    warn!(max_attempts, "backend not ready after maximum attempts");
    false
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

struct RunningChild {
    pid: Option<u32>,
    kill: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

pub struct ServiceSupervisor {
    config: BackendConfig,
    hosted_url: String,
    probe: Arc<dyn HealthProbe>,
    state: Arc<watch::Sender<ServiceState>>,
    child: Mutex<Option<RunningChild>>,
}

impl ServiceSupervisor {
    pub fn new(config: BackendConfig, hosted_url: String) -> BridgeResult<Self> {
        let probe = HttpsProbe::new(&config.health_url(), &config.local_host)?;
        Ok(Self::with_probe(config, hosted_url, Arc::new(probe)))
    }

    pub fn with_probe(config: BackendConfig, hosted_url: String, probe: Arc<dyn HealthProbe>) -> Self {
        let (state, _) = watch::channel(ServiceState::Stopped);
        Self {
            config,
            hosted_url,
            probe,
            state: Arc::new(state),
            child: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ServiceState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ServiceState> {
        self.state.subscribe()
    }

    pub fn local_url(&self) -> String {
        self.config.local_url()
    }

    pub fn hosted_url(&self) -> &str {
        &self.hosted_url
    }

    /// Spawn the backend unless one is already running.
    pub async fn start(&self) -> BridgeResult<()> {
        let mut slot = self.child.lock().await;
        if let Some(running) = slot.as_ref() {
            if !running.task.is_finished() {
                debug!(pid = ?running.pid, "backend already running");
                return Ok(());
            }
        }

        self.state.send_replace(ServiceState::Starting);
        let mut child = match self.spawn_child() {
            Ok(child) => child,
            Err(e) => {
                error!(error = %e, "failed to start backend");
                self.state.send_replace(ServiceState::Stopped);
                return Err(e);
            }
        };
        let pid = child.id();
        info!(?pid, program = %self.config.program, entry = %self.config.entry, port = self.config.port, "backend started");

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, false));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, true));
        }

        let (kill, kill_rx) = oneshot::channel();
        let state = Arc::clone(&self.state);
        let task = tokio::spawn(watch_child(child, kill_rx, state));
        *slot = Some(RunningChild { pid, kill, task });
        Ok(())
    }

    fn spawn_child(&self) -> BridgeResult<Child> {
        let mut command = Command::new(&self.config.program);
        command
            .arg(&self.config.entry)
            .env("ELECTRON_PORT", self.config.port.to_string())
            .env("NODE_ENV", &self.config.node_env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = Path::new(&self.config.entry)
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty() && dir.is_dir())
        {
            command.current_dir(dir);
        }
        command
            .spawn()
            .map_err(|e| BridgeError::Backend(format!("spawn {}: {e}", self.config.program)))
    }

    /// Terminate the backend. No-op when nothing is running.
    pub async fn stop(&self) {
        let Some(running) = self.child.lock().await.take() else {
            debug!("stop requested with no backend running");
            return;
        };
        let _ = running.kill.send(());
        if let Err(e) = running.task.await {
            warn!(error = %e, "backend watcher task failed");
        }
        self.state.send_replace(ServiceState::Stopped);
    }

    /// Probe the backend and record `Ready` or `Fallback`.
    pub async fn wait_until_ready(&self) -> bool {
        self.state.send_replace(ServiceState::Probing);
        let ready = wait_until_ready(
            self.probe.as_ref(),
            self.config.ready_interval,
            self.config.ready_max_attempts,
        )
        .await;
        self.state.send_replace(if ready {
            ServiceState::Ready
        } else {
            ServiceState::Fallback
        });
        ready
    }

    /// Start (if needed), probe, and choose the endpoint to load.
    ///
    /// A failed spawn still probes: a backend started outside this process
    /// may already be listening on the port.
    pub async fn start_and_resolve(&self, startup_path: &str) -> Endpoint {
        if let Err(e) = self.start().await {
            warn!(error = %e, "probing without a supervised backend");
        }
        if self.wait_until_ready().await {
            Endpoint::Local(with_startup_path(&self.local_url(), startup_path))
        } else {
            info!("local backend not ready; using hosted endpoint");
            Endpoint::Hosted(with_startup_path(&self.hosted_url, startup_path))
        }
    }

    pub async fn restart(&self) -> BridgeResult<bool> {
        self.stop().await;
        self.start().await?;
        Ok(self.wait_until_ready().await)
    }
}

async fn forward_lines<R>(stream: R, is_stderr: bool)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if is_stderr => warn!(target: "backend", "{line}"),
            Ok(Some(line)) => info!(target: "backend", "{line}"),
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "backend output stream closed");
                break;
            }
        }
    }
}

async fn watch_child(
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    state: Arc<watch::Sender<ServiceState>>,
) {
    let exited = tokio::select! {
        status = child.wait() => Some(status),
        _ = kill_rx => None,
    };
    match exited {
        Some(Ok(status)) => warn!(code = ?status.code(), "backend process exited"),
        Some(Err(e)) => error!(error = %e, "failed waiting on backend process"),
        None => match child.kill().await {
            Ok(()) => info!("backend process terminated"),
            Err(e) => warn!(error = %e, "failed to terminate backend process"),
        },
    }
    state.send_replace(ServiceState::Stopped);
}
