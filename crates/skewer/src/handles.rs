//! Child roles and the inherited file-descriptor table
//!
//! Children are re-executions of this binary selected by `SKEWER_ROLE`.
//! Descriptors land on fixed numbers so a child never has to guess:
//!
//! | fd | handle |
//! |----|--------|
//! | 3  | `CHILD_BINDER` (binder child: first client socket) |
//! | 4  | `TCP_BINDER` |
//! | 5  | `UDP_BINDER` |
//! | 6  | `RELP_BINDER` |
//! | 7  | `CHILD_LOGGER` |
//! | 8  | `TCP_LOGGER` |
//! | 9  | `UDP_LOGGER` |
//! | 10 | `RELP_LOGGER` |
//! | 11 | `JOURNAL_LOGGER` |
//! | 12 | `CONFIG_LOGGER` |
//! | 13 | `STORE_LOGGER` |
//! | 14 | `ACCT_LOGGER` |
//! | 15 | secret pipe (read side) |
//! | 16 | message pipe (store child only, read side) |

use std::os::fd::RawFd;

pub const CHILD_BINDER: RawFd = 3;
pub const TCP_BINDER: RawFd = 4;
pub const UDP_BINDER: RawFd = 5;
pub const RELP_BINDER: RawFd = 6;
pub const CHILD_LOGGER: RawFd = 7;
pub const TCP_LOGGER: RawFd = 8;
pub const UDP_LOGGER: RawFd = 9;
pub const RELP_LOGGER: RawFd = 10;
pub const JOURNAL_LOGGER: RawFd = 11;
pub const CONFIG_LOGGER: RawFd = 12;
pub const STORE_LOGGER: RawFd = 13;
pub const ACCT_LOGGER: RawFd = 14;
pub const SECRET_PIPE: RawFd = 15;
pub const MESSAGE_PIPE: RawFd = 16;

/// Environment variables of the parent/child contract.
pub const ENV_SESSION: &str = "SKEWER_SESSION";
pub const ENV_ROLE: &str = "SKEWER_ROLE";
pub const ENV_HAS_BINDER: &str = "SKEWER_HAS_BINDER";
pub const ENV_HAS_LOGGER: &str = "SKEWER_HAS_LOGGER";
pub const ENV_HAS_PIPE: &str = "SKEWER_HAS_PIPE";
pub const ENV_PROFILE: &str = "SKEWER_PROFILE";
pub const ENV_CONF_DIR: &str = "SKEWER_CONF_DIR";
pub const ENV_STORE_PATH: &str = "SKEWER_STORE_PATH";
pub const ENV_ACCT_DIR: &str = "SKEWER_ACCT_DIR";
pub const ENV_FILEDEST_DIR: &str = "SKEWER_FILEDEST_DIR";
pub const ENV_BINDER_COUNT: &str = "SKEWER_BINDER_COUNT";

/// Variables forwarded verbatim to every child when set on the parent:
/// they configure external facilities (secure transport material, journal
/// polling, terminal detection) the children hand to their libraries.
pub const PASSTHROUGH_ENV: [&str; 5] = [
    "SKEWER_CERT_FILES",
    "SKEWER_CERT_PATHS",
    "SKEWER_POLLDIRS",
    "SKEWER_TTYNAME",
    "SKEWER_HAVE_SYSTEMCTL",
];

/// The worker processes the supervisor runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Role {
    Configuration,
    Store,
    TcpSource,
    UdpSource,
    RelpSource,
    JournalSource,
    AccountingSource,
    Binder,
}

impl Role {
    pub const ALL: [Role; 8] = [
        Role::Configuration,
        Role::Store,
        Role::TcpSource,
        Role::UdpSource,
        Role::RelpSource,
        Role::JournalSource,
        Role::AccountingSource,
        Role::Binder,
    ];

    /// The source roles restarted on reload.
    pub const SOURCES: [Role; 5] = [
        Role::TcpSource,
        Role::UdpSource,
        Role::RelpSource,
        Role::JournalSource,
        Role::AccountingSource,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Configuration => "configuration",
            Role::Store => "store",
            Role::TcpSource => "tcp-source",
            Role::UdpSource => "udp-source",
            Role::RelpSource => "relp-source",
            Role::JournalSource => "journal-source",
            Role::AccountingSource => "accounting-source",
            Role::Binder => "binder",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        Role::ALL.iter().copied().find(|r| r.as_str() == s)
    }

    /// The fd this role's logger socket lands on.
    pub fn logger_fd(self) -> RawFd {
        match self {
            Role::Configuration => CONFIG_LOGGER,
            Role::Store => STORE_LOGGER,
            Role::TcpSource => TCP_LOGGER,
            Role::UdpSource => UDP_LOGGER,
            Role::RelpSource => RELP_LOGGER,
            Role::JournalSource => JOURNAL_LOGGER,
            Role::AccountingSource => ACCT_LOGGER,
            Role::Binder => CHILD_LOGGER,
        }
    }

    /// The fd this role's binder socket lands on, if it gets one.
    pub fn binder_fd(self) -> Option<RawFd> {
        match self {
            Role::TcpSource => Some(TCP_BINDER),
            Role::UdpSource => Some(UDP_BINDER),
            Role::RelpSource => Some(RELP_BINDER),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_roundtrip() {
        for role in Role::ALL {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("nope"), None);
    }

    #[test]
    fn logger_fds_are_distinct() {
        let mut fds: Vec<_> = Role::ALL.iter().map(|r| r.logger_fd()).collect();
        fds.sort_unstable();
        fds.dedup();
        assert_eq!(fds.len(), Role::ALL.len());
    }
}
