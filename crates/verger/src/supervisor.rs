//! Process supervision for the services a run depends on.
//!
//! Each service is spawned in its own process group with output redirected
//! to a log file, then polled until its readiness probe answers. Teardown
//! signals exactly the groups this supervisor created: SIGTERM, a grace
//! period, then SIGKILL.

use crate::result::{VergerError, VergerResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Default time a service gets to become ready
pub const DEFAULT_STARTUP_TIMEOUT_MS: u64 = 60_000;

/// Default time between SIGTERM and SIGKILL
pub const DEFAULT_GRACE: Duration = Duration::from_secs(3);

const BACKOFF_INITIAL: Duration = Duration::from_millis(100);
const BACKOFF_MAX: Duration = Duration::from_secs(2);
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const GROUP_POLL: Duration = Duration::from_millis(50);

/// How the supervisor decides a service is up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    /// A TCP connect succeeds
    Port {
        /// Host to connect to
        #[serde(default = "default_host")]
        host: String,
        /// Port to connect to
        port: u16,
    },
    /// A GET returns the expected status
    Http {
        /// URL to request
        url: String,
        /// Expected status
        #[serde(default = "default_status")]
        status: u16,
    },
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

const fn default_status() -> u16 {
    200
}

const fn default_startup_timeout() -> u64 {
    DEFAULT_STARTUP_TIMEOUT_MS
}

impl Readiness {
    /// TCP readiness on localhost
    #[must_use]
    pub fn port(port: u16) -> Self {
        Self::Port {
            host: default_host(),
            port,
        }
    }

    /// HTTP readiness expecting 200
    #[must_use]
    pub fn http(url: impl Into<String>) -> Self {
        Self::Http {
            url: url.into(),
            status: default_status(),
        }
    }

    /// What the probe targets, for messages
    #[must_use]
    pub fn target(&self) -> String {
        match self {
            Self::Port { host, port } => format!("{host}:{port}"),
            Self::Http { url, .. } => url.clone(),
        }
    }

    async fn probe(&self, client: &reqwest::Client) -> bool {
        match self {
            Self::Port { host, port } => matches!(
                tokio::time::timeout(
                    PROBE_TIMEOUT,
                    tokio::net::TcpStream::connect((host.as_str(), *port))
                )
                .await,
                Ok(Ok(_))
            ),
            Self::Http { url, status } => match client.get(url).send().await {
                Ok(resp) => resp.status().as_u16() == *status,
                Err(e) => {
                    if !e.is_connect() && !e.is_timeout() {
                        debug!(%url, error = %e, "readiness request failed");
                    }
                    false
                }
            },
        }
    }
}

/// A process the run depends on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceSpec {
    /// Name used in logs and errors
    pub name: String,
    /// Program to run
    pub command: String,
    /// Program arguments
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Working directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    /// Extra environment
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    /// Readiness probe
    pub readiness: Readiness,
    /// Time allowed to become ready
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_ms: u64,
    /// File receiving stdout and stderr; discarded when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
    /// Treat an already-answering target as this service instead of failing
    #[serde(default)]
    pub reuse_existing: bool,
}

impl ServiceSpec {
    /// Create a spec with defaults
    #[must_use]
    pub fn new(name: impl Into<String>, command: impl Into<String>, readiness: Readiness) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
            readiness,
            startup_timeout_ms: DEFAULT_STARTUP_TIMEOUT_MS,
            log_file: None,
            reuse_existing: false,
        }
    }

    /// Set arguments
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set working directory
    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Add an environment variable
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Redirect output to a file
    #[must_use]
    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    /// Set the startup timeout
    #[must_use]
    pub const fn with_startup_timeout(mut self, ms: u64) -> Self {
        self.startup_timeout_ms = ms;
        self
    }

    /// Accept a service that is already running
    #[must_use]
    pub const fn reusing_existing(mut self) -> Self {
        self.reuse_existing = true;
        self
    }

    fn output(&self) -> VergerResult<(Stdio, Stdio)> {
        let Some(path) = &self.log_file else {
            return Ok((Stdio::null(), Stdio::null()));
        };
        let spawn_err = |e: std::io::Error| VergerError::ProcessSpawn {
            service: self.name.clone(),
            message: format!("cannot open log file {}: {e}", path.display()),
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(spawn_err)?;
        }
        let file = std::fs::File::create(path).map_err(spawn_err)?;
        let err = file.try_clone().map_err(spawn_err)?;
        Ok((Stdio::from(file), Stdio::from(err)))
    }
}

#[derive(Debug)]
struct Tracked {
    name: String,
    child: Option<Child>,
    pgid: Option<i32>,
    done: bool,
}

impl Tracked {
    /// SIGTERM the whole group, wait for it to empty, then SIGKILL what is
    /// left. The leader exiting early does not end the group.
    async fn shut_down(&mut self, grace: Duration) {
        let Some(child) = self.child.as_mut() else {
            self.done = true;
            return;
        };
        signal_group(self.pgid, child, Signal::Term);
        let deadline = Instant::now() + grace;
        while group_alive(self.pgid, child) {
            if Instant::now() >= deadline {
                warn!(service = %self.name, grace_ms = grace.as_millis() as u64, "service ignored SIGTERM");
                signal_group(self.pgid, child, Signal::Kill);
                break;
            }
            tokio::time::sleep(GROUP_POLL).await;
        }
        if let Err(e) = child.wait().await {
            warn!(service = %self.name, error = %e, "failed to reap service");
        }
        self.done = true;
        info!(service = %self.name, "service stopped");
    }
}

/// Starts services and hands back their handles
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    grace: Duration,
    client: reqwest::Client,
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSupervisor {
    /// Supervisor with the default grace period
    #[must_use]
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            grace: DEFAULT_GRACE,
            client,
        }
    }

    /// Change the SIGTERM to SIGKILL grace period
    #[must_use]
    pub const fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Start every service in order and wait for each to be ready.
    ///
    /// On failure, services started so far are stopped before returning.
    ///
    /// # Errors
    ///
    /// Returns `PortInUse`, `ProcessSpawn` or `StartupTimeout` for the first
    /// service that could not be brought up
    pub async fn start(&self, specs: &[ServiceSpec]) -> VergerResult<RunningServices> {
        let mut running = RunningServices {
            services: Vec::new(),
            grace: self.grace,
            stopped: false,
        };
        for spec in specs {
            if let Err(e) = self.start_one(spec, &mut running).await {
                warn!(service = %spec.name, error = %e, "service failed to start");
                running.stop().await;
                return Err(e);
            }
        }
        Ok(running)
    }

    async fn start_one(&self, spec: &ServiceSpec, running: &mut RunningServices) -> VergerResult<()> {
        if spec.readiness.probe(&self.client).await {
            if spec.reuse_existing {
                info!(service = %spec.name, target = %spec.readiness.target(), "reusing running service");
                running.services.push(Tracked {
                    name: spec.name.clone(),
                    child: None,
                    pgid: None,
                    done: false,
                });
                return Ok(());
            }
            return Err(VergerError::PortInUse {
                service: spec.name.clone(),
                target: spec.readiness.target(),
            });
        }

        let (stdout, stderr) = spec.output()?;
        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr);
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().map_err(|e| VergerError::ProcessSpawn {
            service: spec.name.clone(),
            message: format!("{}: {e}", spec.command),
        })?;
        let pid = child.id().map(|id| id as i32);
        info!(service = %spec.name, pid, command = %spec.command, "service spawned");
        running.services.push(Tracked {
            name: spec.name.clone(),
            child: Some(child),
            pgid: pid,
            done: false,
        });

        self.wait_ready(spec, running).await
    }

    async fn wait_ready(&self, spec: &ServiceSpec, running: &mut RunningServices) -> VergerResult<()> {
        let start = Instant::now();
        let timeout = Duration::from_millis(spec.startup_timeout_ms);
        let mut backoff = BACKOFF_INITIAL;
        loop {
            if spec.readiness.probe(&self.client).await {
                info!(
                    service = %spec.name,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "service ready"
                );
                return Ok(());
            }
            let exited = running
                .services
                .last_mut()
                .and_then(|t| t.child.as_mut())
                .and_then(|c| c.try_wait().ok().flatten());
            let elapsed = start.elapsed();
            if let Some(status) = exited {
                warn!(service = %spec.name, %status, "service exited before becoming ready");
            }
            if exited.is_some() || elapsed >= timeout {
                return Err(VergerError::StartupTimeout {
                    service: spec.name.clone(),
                    waited_ms: elapsed.as_millis() as u64,
                });
            }
            tokio::time::sleep(backoff.min(timeout - elapsed)).await;
            backoff = (backoff * 2).min(BACKOFF_MAX);
        }
    }
}

/// Handles to started services
#[derive(Debug)]
pub struct RunningServices {
    services: Vec<Tracked>,
    grace: Duration,
    stopped: bool,
}

impl RunningServices {
    /// No services at all
    #[must_use]
    pub const fn none() -> Self {
        Self {
            services: Vec::new(),
            grace: DEFAULT_GRACE,
            stopped: false,
        }
    }

    /// Names in start order
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.services.iter().map(|t| t.name.as_str()).collect()
    }

    /// Process ids of services this run spawned
    #[must_use]
    pub fn pids(&self) -> Vec<u32> {
        self.services.iter().filter_map(|t| t.pgid).map(|p| p as u32).collect()
    }

    /// Whether [`RunningServices::stop`] already ran
    #[must_use]
    pub const fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Stop every spawned service, newest first. Safe to call repeatedly.
    ///
    /// A service counts as stopped only once its process group is gone, so
    /// dropping this future partway leaves the rest to [`Drop`].
    pub async fn stop(&mut self) {
        if self.stopped {
            return;
        }
        for tracked in self.services.iter_mut().rev().filter(|t| !t.done) {
            tracked.shut_down(self.grace).await;
        }
        self.stopped = true;
    }
}

impl Drop for RunningServices {
    fn drop(&mut self) {
        for tracked in self.services.iter_mut().filter(|t| !t.done) {
            if let Some(child) = tracked.child.as_mut() {
                signal_group(tracked.pgid, child, Signal::Kill);
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Term,
    Kill,
}

#[cfg(unix)]
fn signal_group(pgid: Option<i32>, child: &mut Child, signal: Signal) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal as NixSignal};
    use nix::unistd::Pid;

    let Some(pgid) = pgid else {
        return;
    };
    let sig = match signal {
        Signal::Term => NixSignal::SIGTERM,
        Signal::Kill => NixSignal::SIGKILL,
    };
    match killpg(Pid::from_raw(pgid), sig) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => {
            warn!(pgid, error = %e, "killpg failed; signalling the leader only");
            if matches!(signal, Signal::Kill) {
                let _ = child.start_kill();
            }
        }
    }
}

/// Whether any member of the group still exists. Reaps the leader first so
/// it does not linger as a zombie member.
#[cfg(unix)]
fn group_alive(pgid: Option<i32>, child: &mut Child) -> bool {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    let leader_running = matches!(child.try_wait(), Ok(None));
    match pgid {
        Some(pgid) => killpg(Pid::from_raw(pgid), None).is_ok(),
        None => leader_running,
    }
}

#[cfg(not(unix))]
fn signal_group(_pgid: Option<i32>, child: &mut Child, _signal: Signal) {
    let _ = child.start_kill();
}

#[cfg(not(unix))]
fn group_alive(_pgid: Option<i32>, child: &mut Child) -> bool {
    matches!(child.try_wait(), Ok(None))
}
