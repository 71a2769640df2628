//! Parent/child IPC vocabulary
//!
//! Commands ride parent->child on stdin (signed frames); events ride
//! child->parent on stdout (sealed frames).

/// Distribute a configuration snapshot (payload: JSON `BaseConfig`).
pub const CMD_SETCONF: &str = "setconf";
/// Start the service with the last snapshot.
pub const CMD_START: &str = "start";
/// Stop the service, keep the process alive.
pub const CMD_STOP: &str = "stop";
/// Stop and exit.
pub const CMD_SHUTDOWN: &str = "shutdown";
/// Report metrics (answered with [`EVT_METRICS`]).
pub const CMD_GATHER: &str = "gather";
/// Configuration service only: reload and publish a new snapshot.
pub const CMD_RELOAD: &str = "reload";

/// Service is running.
pub const EVT_STARTED: &str = "started";
/// Service has stopped.
pub const EVT_STOPPED: &str = "stopped";
/// Payload: JSON `Vec<ListenerInfo>`.
pub const EVT_LISTENERS: &str = "listeners";
/// Configuration service: payload is a JSON snapshot.
pub const EVT_NEWCONF: &str = "newconf";
/// Configuration service: a reload round-trip finished.
pub const EVT_RELOADED: &str = "reloaded";
/// Service could not start (payload: message).
pub const EVT_STARTERROR: &str = "starterror";
/// Payload: Prometheus text exposition.
pub const EVT_METRICS: &str = "metrics";
/// Source roles: payload is one serialized `FullMessage` to relay to the
/// store child.
pub const EVT_STASH: &str = "stash";
/// The service hit an unrecoverable error.
pub const EVT_FATAL: &str = "fatal";
