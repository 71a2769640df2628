//! The supervisor
//!
//! Owns the process tree: spawns the binder, the configuration service,
//! the store and one child per source protocol; distributes configuration
//! snapshots; relays stashed messages from source children onto the store
//! child's message pipe; multiplexes signals, child exits and fatal
//! events. Children that die unexpectedly are restarted under an
//! exponential back-off budget; a store fatal or a termination signal
//! starts the ordered shutdown.

use std::collections::HashMap;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::Arc;

use anyhow::{Context, Result};
use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use skewer_config::{BaseConfig, DestinationType};
use skewer_kring::{seal_blob, Frame, Keyring};

use crate::child_proc::{self, ChildEvent, ChildProcess, ChildState};
use crate::handles::{self, Role};
use crate::ipc;
use crate::logging::LogOutput;
use crate::metrics_server;

const RESTART_BUDGET: u32 = 5;
const RESTART_BASE_DELAY: std::time::Duration = std::time::Duration::from_secs(1);
const RESTART_MAX_DELAY: std::time::Duration = std::time::Duration::from_secs(60);
const CHILD_EXIT_GRACE: std::time::Duration = std::time::Duration::from_secs(5);

/// Settings handed down from the CLI.
pub struct ServeOptions {
    pub test: bool,
    pub conf_dir: String,
    pub store_path: String,
    pub profile: bool,
    pub uid: String,
    pub gid: String,
    pub log_output: LogOutput,
}

/// Switch to an unprivileged user/group. Names and numeric ids are both
/// accepted; empty strings mean "keep the current one".
fn drop_privileges(uid: &str, gid: &str) -> Result<()> {
    if !gid.is_empty() {
        let group = match gid.parse::<u32>() {
            Ok(id) => nix::unistd::Gid::from_raw(id),
            Err(_) => nix::unistd::Group::from_name(gid)
                .context("looking up the group")?
                .with_context(|| format!("unknown group {gid:?}"))?
                .gid,
        };
        nix::unistd::setgid(group).context("setgid failed")?;
    }
    if !uid.is_empty() {
        let user = match uid.parse::<u32>() {
            Ok(id) => nix::unistd::Uid::from_raw(id),
            Err(_) => nix::unistd::User::from_name(uid)
                .context("looking up the user")?
                .with_context(|| format!("unknown user {uid:?}"))?
                .uid,
        };
        nix::unistd::setuid(user).context("setuid failed")?;
    }
    Ok(())
}

/// Requests from outside the event loop (metrics server, timers).
pub enum Control {
    Gather(oneshot::Sender<String>),
    GatherDeadline,
    Respawn(Role),
}

/// Persistent wiring for one child: the descriptors the supervisor keeps
/// so a respawned child plugs into the same channels.
struct ChildWiring {
    extra_fds: Vec<(OwnedFd, RawFd)>,
    envs: Vec<(String, String)>,
}

struct GatherState {
    remaining: Vec<Role>,
    acc: String,
    reply: oneshot::Sender<String>,
}

pub struct Supervisor {
    keyring: Arc<Keyring>,
    options: ServeOptions,
    children: HashMap<Role, ChildProcess>,
    wirings: HashMap<Role, ChildWiring>,
    events_tx: mpsc::UnboundedSender<ChildEvent>,
    events_rx: mpsc::UnboundedReceiver<ChildEvent>,
    control_tx: mpsc::UnboundedSender<Control>,
    control_rx: mpsc::UnboundedReceiver<Control>,
    /// Relay queue toward the store child's message pipe
    stash_tx: mpsc::Sender<Vec<u8>>,
    config: Option<BaseConfig>,
    shutting_down: bool,
    gather: Option<GatherState>,
    exit_code: i32,
}

impl Supervisor {
    pub fn new(options: ServeOptions) -> Result<Supervisor> {
        let keyring = Arc::new(Keyring::create());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        // message pipe: supervisor writes, store child reads
        let (pipe_read, pipe_write) = nix::unistd::pipe().context("creating the message pipe")?;
        let (stash_tx, stash_rx) = mpsc::channel::<Vec<u8>>(4096);
        tokio::spawn(relay_stashes(pipe_write, stash_rx));

        let mut supervisor = Supervisor {
            keyring,
            options,
            children: HashMap::new(),
            wirings: HashMap::new(),
            events_tx,
            events_rx,
            control_tx,
            control_rx,
            stash_tx,
            config: None,
            shutting_down: false,
            gather: None,
            exit_code: 0,
        };
        supervisor.build_wirings(pipe_read)?;
        Ok(supervisor)
    }

    pub fn control_handle(&self) -> mpsc::UnboundedSender<Control> {
        self.control_tx.clone()
    }

    /// Create the sockets every child plugs into. The supervisor retains
    /// its copies so respawns reuse the same channels.
    fn build_wirings(&mut self, store_pipe_read: OwnedFd) -> Result<()> {
        // binder sockets: one seqpacket pair per network source
        let mut binder_client_ends = Vec::new();
        for role in [Role::TcpSource, Role::UdpSource, Role::RelpSource] {
            let (service_end, binder_end) = socketpair(
                AddressFamily::Unix,
                SockType::SeqPacket,
                None,
                SockFlag::empty(),
            )
            .context("creating a binder socket pair")?;
            let fd = role.binder_fd().expect("network sources have a binder fd");
            let wiring = self.wiring_for(role);
            wiring.extra_fds.push((service_end, fd));
            wiring
                .envs
                .push((handles::ENV_HAS_BINDER.into(), "TRUE".into()));
            binder_client_ends.push(binder_end);
        }
        {
            let count = binder_client_ends.len();
            let wiring = self.wiring_for(Role::Binder);
            for (i, end) in binder_client_ends.into_iter().enumerate() {
                wiring.extra_fds.push((end, handles::CHILD_BINDER + i as RawFd));
            }
            wiring
                .envs
                .push((handles::ENV_BINDER_COUNT.into(), count.to_string()));
        }

        // logger sockets: one stream pair per role, with a persistent sink
        for role in Role::ALL {
            let (parent_end, child_end) =
                std::os::unix::net::UnixStream::pair().context("creating a logger pair")?;
            parent_end.set_nonblocking(true)?;
            let parent_end = tokio::net::UnixStream::from_std(parent_end)?;
            tokio::spawn(crate::logging::run_logger_sink(
                parent_end,
                self.keyring.box_cipher(),
                role.as_str(),
                self.options.log_output.clone(),
            ));
            self.wiring_for(role)
                .extra_fds
                .push((OwnedFd::from(child_end), role.logger_fd()));
        }

        // role-specific environment
        let conf_dir = self.options.conf_dir.clone();
        self.wiring_for(Role::Configuration)
            .envs
            .push((handles::ENV_CONF_DIR.into(), conf_dir));
        let store_path = self.options.store_path.clone();
        {
            let wiring = self.wiring_for(Role::Store);
            wiring.extra_fds.push((store_pipe_read, handles::MESSAGE_PIPE));
            wiring.envs.push((handles::ENV_STORE_PATH.into(), store_path));
            wiring.envs.push((handles::ENV_HAS_PIPE.into(), "TRUE".into()));
        }
        if self.options.profile {
            for role in Role::ALL {
                self.wiring_for(role)
                    .envs
                    .push((handles::ENV_PROFILE.into(), "TRUE".into()));
            }
        }
        Ok(())
    }

    fn wiring_for(&mut self, role: Role) -> &mut ChildWiring {
        self.wirings.entry(role).or_insert_with(|| ChildWiring {
            extra_fds: Vec::new(),
            envs: Vec::new(),
        })
    }

    fn spawn_child(&mut self, role: Role) -> Result<()> {
        let wiring = self
            .wirings
            .get(&role)
            .with_context(|| format!("no wiring for {role}"))?;
        let restarts = self.children.get(&role).map(|c| c.restarts).unwrap_or(0);
        let mut child = child_proc::spawn(
            role,
            &wiring.extra_fds,
            &wiring.envs,
            &self.keyring,
            self.events_tx.clone(),
        )?;
        child.restarts = restarts;
        tracing::info!(role = %role, pid = child.pid(), "child spawned");
        self.children.insert(role, child);
        Ok(())
    }

    async fn send_to(&self, role: Role, frame: Frame) {
        if let Some(child) = self.children.get(&role) {
            if child.state != ChildState::Exited {
                if let Err(e) = child.send(&frame).await {
                    tracing::warn!(role = %role, error = %e, "command delivery failed");
                }
            }
        }
    }

    /// Boot: spawn the binder while still privileged, drop privileges,
    /// spawn the rest, then ask the configuration service for the first
    /// snapshot.
    pub async fn start(&mut self) -> Result<()> {
        self.spawn_child(Role::Binder)?;
        drop_privileges(&self.options.uid, &self.options.gid)?;

        for role in [
            Role::Configuration,
            Role::Store,
            Role::TcpSource,
            Role::UdpSource,
            Role::RelpSource,
            Role::JournalSource,
            Role::AccountingSource,
        ] {
            self.spawn_child(role)?;
        }
        self.send_to(Role::Configuration, Frame::bare(ipc::CMD_START))
            .await;
        Ok(())
    }

    /// The main select loop. Returns the process exit code.
    pub async fn run(mut self) -> i32 {
        let mut sighup =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
                .expect("installing the SIGHUP handler");
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("installing the SIGTERM handler");
        let mut sigint =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
                .expect("installing the SIGINT handler");

        loop {
            tokio::select! {
                _ = sighup.recv() => {
                    if !self.shutting_down {
                        tracing::info!("SIGHUP received: reloading configuration");
                        self.send_to(Role::Configuration, Frame::bare(ipc::CMD_RELOAD)).await;
                    }
                }
                _ = sigterm.recv() => {
                    tracing::info!(signal = "SIGTERM", "termination signal received");
                    self.begin_shutdown().await;
                }
                _ = sigint.recv() => {
                    tracing::info!(signal = "SIGINT", "termination signal received");
                    self.begin_shutdown().await;
                }
                Some(control) = self.control_rx.recv() => self.handle_control(control).await,
                Some(event) = self.events_rx.recv() => {
                    if self.handle_event(event).await {
                        break;
                    }
                }
            }
        }
        self.exit_code
    }

    async fn handle_control(&mut self, control: Control) {
        match control {
            Control::Gather(reply) => {
                if self.gather.is_some() {
                    let _ = reply.send(String::new());
                    return;
                }
                let mut remaining = Vec::new();
                for role in Role::ALL {
                    if role == Role::Binder || role == Role::Configuration {
                        continue;
                    }
                    if matches!(
                        self.children.get(&role).map(|c| c.state),
                        Some(ChildState::Started)
                    ) {
                        remaining.push(role);
                        self.send_to(role, Frame::bare(ipc::CMD_GATHER)).await;
                    }
                }
                if remaining.is_empty() {
                    let _ = reply.send(String::new());
                    return;
                }
                self.gather = Some(GatherState {
                    remaining,
                    acc: String::new(),
                    reply,
                });
                let control = self.control_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(std::time::Duration::from_secs(2)).await;
                    let _ = control.send(Control::GatherDeadline);
                });
            }
            Control::GatherDeadline => {
                if let Some(gather) = self.gather.take() {
                    let _ = gather.reply.send(gather.acc);
                }
            }
            Control::Respawn(role) => {
                if self.shutting_down {
                    return;
                }
                if let Err(e) = self.spawn_child(role) {
                    tracing::error!(role = %role, error = %e, "respawn failed");
                    return;
                }
                // bring the newcomer up to date
                if let Some(config) = self.config.clone() {
                    self.configure_child(role, &config).await;
                }
                if role == Role::Configuration {
                    self.send_to(role, Frame::bare(ipc::CMD_START)).await;
                }
            }
        }
    }

    /// Returns true when the supervisor is done.
    async fn handle_event(&mut self, event: ChildEvent) -> bool {
        match event {
            ChildEvent::Frame(role, frame) => self.handle_frame(role, frame).await,
            ChildEvent::Exited(role, code) => return self.handle_exit(role, code).await,
        }
        false
    }

    async fn handle_frame(&mut self, role: Role, frame: Frame) {
        match frame.command.as_str() {
            ipc::EVT_STASH => {
                // seal and relay to the store child
                match seal_blob(&self.keyring.box_cipher(), &frame.payload) {
                    Ok(sealed) => {
                        if self.stash_tx.try_send(sealed).is_err() {
                            tracing::warn!("stash relay queue full, message delayed to the source");
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "could not seal a stash payload"),
                }
            }
            ipc::EVT_NEWCONF => match BaseConfig::import(&frame.payload) {
                Ok(config) => self.apply_config(config).await,
                Err(e) => tracing::error!(error = %e, "undecodable snapshot from the configuration service"),
            },
            ipc::EVT_STARTED => {
                if let Some(child) = self.children.get_mut(&role) {
                    child.state = ChildState::Started;
                    child.restarts = 0;
                }
                tracing::debug!(role = %role, "child reported started");
            }
            ipc::EVT_STOPPED => {
                tracing::debug!(role = %role, "child reported stopped");
            }
            ipc::EVT_LISTENERS => {
                tracing::info!(role = %role, listeners = %String::from_utf8_lossy(&frame.payload), "listeners active");
            }
            ipc::EVT_RELOADED => {
                tracing::info!("configuration service finished reloading");
            }
            ipc::EVT_STARTERROR => {
                tracing::error!(
                    role = %role,
                    error = %String::from_utf8_lossy(&frame.payload),
                    "child failed to start"
                );
            }
            ipc::EVT_METRICS => {
                let text = String::from_utf8_lossy(&frame.payload).into_owned();
                let mut finished = false;
                if let Some(gather) = self.gather.as_mut() {
                    gather.remaining.retain(|r| *r != role);
                    gather.acc.push_str(&text);
                    finished = gather.remaining.is_empty();
                }
                if finished {
                    if let Some(gather) = self.gather.take() {
                        let _ = gather.reply.send(gather.acc);
                    }
                }
            }
            ipc::EVT_FATAL => {
                if role == Role::Store {
                    tracing::error!("store reported fatal: aborting all operations");
                    self.exit_code = 2;
                    self.begin_shutdown().await;
                } else {
                    tracing::warn!(role = %role, "child reported fatal, restarting it");
                    self.send_to(role, Frame::bare(ipc::CMD_SHUTDOWN)).await;
                    // the exit event drives the restart
                }
            }
            other => {
                tracing::debug!(role = %role, event = other, "unhandled child event");
            }
        }
    }

    async fn handle_exit(&mut self, role: Role, code: Option<i32>) -> bool {
        tracing::info!(role = %role, code = ?code, "child exited");
        if let Some(child) = self.children.get_mut(&role) {
            child.state = ChildState::Exited;
        }

        if self.shutting_down {
            return self
                .children
                .values()
                .all(|c| c.state == ChildState::Exited);
        }

        // unexpected death: restart under budget
        let restarts = self
            .children
            .get(&role)
            .map(|c| c.restarts)
            .unwrap_or(0);
        if restarts >= RESTART_BUDGET {
            tracing::error!(role = %role, restarts, "restart budget exhausted");
            if matches!(role, Role::Store | Role::Configuration | Role::Binder) {
                self.exit_code = 2;
                self.begin_shutdown().await;
            }
            return false;
        }
        if let Some(child) = self.children.get_mut(&role) {
            child.restarts = restarts + 1;
        }
        let delay = RESTART_BASE_DELAY
            .saturating_mul(1 << restarts.min(16))
            .min(RESTART_MAX_DELAY);
        tracing::info!(role = %role, delay = ?delay, attempt = restarts + 1, "scheduling restart");
        let control = self.control_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = control.send(Control::Respawn(role));
        });
        false
    }

    /// A new snapshot from the configuration service: first one boots the
    /// data plane, later ones run the reload protocol.
    async fn apply_config(&mut self, mut config: BaseConfig) {
        if self.shutting_down {
            return;
        }
        if self.options.test {
            // test mode: everything to stderr, regardless of configuration
            config.main.destinations = vec![DestinationType::Stderr];
        }
        if let Some(previous) = &self.config {
            // parameters that cannot change online
            config.store.dirname = previous.store.dirname.clone();
            config.main.encrypt_ipc = previous.main.encrypt_ipc;
        }

        let first = self.config.is_none();
        self.config = Some(config.clone());

        if first {
            tracing::info!("first configuration snapshot received, starting the data plane");
            self.configure_child(Role::Store, &config).await;
            for role in Role::SOURCES {
                self.configure_child(role, &config).await;
            }
        } else {
            tracing::info!("reloading services with the new snapshot");
            // stop sources first so no new input lands on the old wiring,
            // then reconfigure the store in place, then bring sources back
            for role in Role::SOURCES {
                self.send_to(role, Frame::bare(ipc::CMD_STOP)).await;
            }
            self.send_to(Role::Store, Frame::bare(ipc::CMD_STOP)).await;
            self.configure_child(Role::Store, &config).await;
            for role in Role::SOURCES {
                self.configure_child(role, &config).await;
            }
        }
    }

    async fn configure_child(&self, role: Role, config: &BaseConfig) {
        let payload = match config.export() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, "snapshot export failed");
                return;
            }
        };
        self.send_to(role, Frame::new(ipc::CMD_SETCONF, payload)).await;
        self.send_to(role, Frame::bare(ipc::CMD_START)).await;
    }

    /// Ordered shutdown: sources first (no new input), then the store
    /// (flushes), then configuration, then the binder.
    async fn begin_shutdown(&mut self) {
        if self.shutting_down {
            return;
        }
        self.shutting_down = true;
        tracing::info!("shutting down");

        for role in Role::SOURCES {
            self.send_to(role, Frame::bare(ipc::CMD_SHUTDOWN)).await;
        }
        self.send_to(Role::Store, Frame::bare(ipc::CMD_SHUTDOWN)).await;
        self.send_to(Role::Configuration, Frame::bare(ipc::CMD_SHUTDOWN))
            .await;
        for child in self.children.values_mut() {
            if child.state != ChildState::Exited {
                child.state = ChildState::Stopping;
            }
        }

        // the binder exits when its clients hang up; drop our retained
        // copies of their sockets and nudge it to be sure
        for role in [Role::TcpSource, Role::UdpSource, Role::RelpSource, Role::Binder] {
            if let Some(wiring) = self.wirings.get_mut(&role) {
                wiring
                    .extra_fds
                    .retain(|(_, target)| *target >= handles::CHILD_LOGGER);
            }
        }
        if let Some(binder) = self.children.get(&Role::Binder) {
            if let Some(pid) = binder.pid() {
                let _ = nix::sys::signal::kill(
                    nix::unistd::Pid::from_raw(pid as i32),
                    nix::sys::signal::Signal::SIGTERM,
                );
            }
        }

        // hard deadline for stragglers
        let pids: Vec<u32> = self.children.values().filter_map(|c| c.pid()).collect();
        tokio::spawn(async move {
            tokio::time::sleep(CHILD_EXIT_GRACE).await;
            for pid in pids {
                let _ = nix::sys::signal::kill(
                    nix::unistd::Pid::from_raw(pid as i32),
                    nix::sys::signal::Signal::SIGKILL,
                );
            }
        });
    }
}

/// Relay sealed stash payloads onto the store child's message pipe.
async fn relay_stashes(pipe_write: OwnedFd, mut stashes: mpsc::Receiver<Vec<u8>>) {
    let file = std::fs::File::from(pipe_write);
    let mut pipe = tokio::fs::File::from_std(file);
    while let Some(sealed) = stashes.recv().await {
        let len = (sealed.len() as u32).to_be_bytes();
        if pipe.write_all(&len).await.is_err() || pipe.write_all(&sealed).await.is_err() {
            tracing::error!("message pipe to the store broke");
            return;
        }
    }
}

/// Run the serve command: build the supervisor, start the metrics server,
/// loop until shutdown.
pub async fn serve(options: ServeOptions, metrics: skewer_config::MetricsConfig) -> Result<i32> {
    let mut supervisor = Supervisor::new(options)?;
    let control = supervisor.control_handle();
    if metrics.enabled {
        tokio::spawn(metrics_server::run(metrics, control));
    }
    supervisor.start().await?;
    Ok(supervisor.run().await)
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        for child in self.children.values() {
            if let Some(pid) = child.pid() {
                let _ = nix::sys::signal::kill(
                    nix::unistd::Pid::from_raw(pid as i32),
                    nix::sys::signal::Signal::SIGKILL,
                );
            }
        }
    }
}
