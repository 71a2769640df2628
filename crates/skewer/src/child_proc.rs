//! Spawning and supervising one worker process
//!
//! Each child is this same binary re-executed with `SKEWER_ROLE` set, a
//! signed command channel on stdin, a sealed event channel on stdout, and
//! its extra descriptors dup2'ed onto the fixed handle table before exec.

use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;

use skewer_kring::{Frame, FrameCodec, FrameReader, FrameWriter, Keyring};

use crate::handles::{self, Role};

/// Per-child lifecycle, as tracked by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildState {
    Spawning,
    Started,
    Stopping,
    Exited,
}

/// What the supervisor's event loop receives.
#[derive(Debug)]
pub enum ChildEvent {
    Frame(Role, Frame),
    Exited(Role, Option<i32>),
}

/// The supervisor's handle on one running child.
pub struct ChildProcess {
    pub role: Role,
    pub state: ChildState,
    pub restarts: u32,
    writer: Arc<tokio::sync::Mutex<FrameWriter<ChildStdin>>>,
    pid: Option<u32>,
}

impl ChildProcess {
    pub async fn send(&self, frame: &Frame) -> Result<()> {
        self.writer
            .lock()
            .await
            .write(frame)
            .await
            .with_context(|| format!("sending {} to {}", frame.command, self.role))
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }
}

/// Spawn a child and wire its channels. `extra_fds` are
/// `(descriptor kept by the supervisor, fixed target fd)` pairs - the
/// supervisor retains them so a respawned child plugs into the same
/// sockets. Events (frames and the final exit) are forwarded to `events`.
pub fn spawn(
    role: Role,
    extra_fds: &[(OwnedFd, RawFd)],
    envs: &[(String, String)],
    keyring: &Keyring,
    events: mpsc::UnboundedSender<ChildEvent>,
) -> Result<ChildProcess> {
    let exe = std::env::current_exe().context("resolving our own binary")?;

    // the secret pipe: the child reads the master key from fd 15
    let (secret_read, secret_write) =
        nix::unistd::pipe().context("creating the secret pipe")?;

    let mut command = Command::new(exe);
    command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .env(handles::ENV_ROLE, role.as_str())
        .env(handles::ENV_SESSION, keyring.session().to_string())
        .env(handles::ENV_HAS_LOGGER, "TRUE");
    for (key, value) in envs {
        command.env(key, value);
    }
    for var in handles::PASSTHROUGH_ENV {
        if let Ok(value) = std::env::var(var) {
            command.env(var, value);
        }
    }

    let mut mappings: Vec<(RawFd, RawFd)> = vec![(secret_read.as_raw_fd(), handles::SECRET_PIPE)];
    for (fd, target) in extra_fds {
        mappings.push((fd.as_raw_fd(), *target));
    }

    // SAFETY: only async-signal-safe calls (fcntl/dup2/close) run between
    // fork and exec.
    unsafe {
        command.pre_exec(move || {
            // park every source fd above the target range, then move each
            // onto its fixed number (dup2 clears CLOEXEC on the target)
            let mut parked = Vec::with_capacity(mappings.len());
            for (i, (src, _)) in mappings.iter().enumerate() {
                let tmp = libc::fcntl(*src, libc::F_DUPFD, 64 + i as libc::c_int);
                if tmp < 0 {
                    return Err(std::io::Error::last_os_error());
                }
                parked.push(tmp);
            }
            for ((_, dst), tmp) in mappings.iter().zip(&parked) {
                if libc::dup2(*tmp, *dst) < 0 {
                    return Err(std::io::Error::last_os_error());
                }
                libc::close(*tmp);
            }
            Ok(())
        });
    }

    let mut child: Child = command
        .spawn()
        .with_context(|| format!("spawning the {role} child"))?;
    let pid = child.id();
    drop(secret_read);

    // hand over the master secret, then close our end
    {
        use std::io::Write;
        let mut pipe = std::fs::File::from(secret_write);
        pipe.write_all(keyring.master().expose())
            .context("writing the master secret to the child")?;
    }

    let stdin = child.stdin.take().context("child stdin")?;
    let stdout = child.stdout.take().context("child stdout")?;
    let writer = Arc::new(tokio::sync::Mutex::new(FrameWriter::new(
        stdin,
        FrameCodec::Sign(keyring.signing_key()),
    )));
    let reader = FrameReader::new(stdout, FrameCodec::Open(keyring.box_cipher()));

    tokio::spawn(pump(role, child, reader, events));

    Ok(ChildProcess {
        role,
        state: ChildState::Spawning,
        restarts: 0,
        writer,
        pid,
    })
}

async fn pump(
    role: Role,
    mut child: Child,
    mut reader: FrameReader<tokio::process::ChildStdout>,
    events: mpsc::UnboundedSender<ChildEvent>,
) {
    loop {
        match reader.next().await {
            Ok(Some(frame)) => {
                if events.send(ChildEvent::Frame(role, frame)).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(role = %role, error = %e, "child event channel broke");
                break;
            }
        }
    }
    let code = match child.wait().await {
        Ok(status) => status.code(),
        Err(_) => None,
    };
    let _ = events.send(ChildEvent::Exited(role, code));
}
