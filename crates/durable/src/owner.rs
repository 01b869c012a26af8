//! Identity of the process that owns a claimed job or a lease.
//!
//! A bare pid is not enough: after a crash the restarted worker may get the
//! same pid (routinely so inside containers), which would make its dead
//! predecessor look alive. Each process therefore carries a random token,
//! and an owner is live only if its pid exists and, for our own pid, the
//! token is ours.

use std::fmt;
use std::sync::OnceLock;

use reelcast_common::process::{current_pid, pid_is_alive};

static PROCESS_TOKEN: OnceLock<String> = OnceLock::new();

/// Random token for this process, stable for its lifetime.
pub fn process_token() -> &'static str {
    PROCESS_TOKEN.get_or_init(|| {
        let mut token = uuid::Uuid::new_v4().simple().to_string();
        token.truncate(8);
        token
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerTag {
    pub pid: u32,
    pub token: String,
}

impl OwnerTag {
    pub fn current() -> Self {
        Self {
            pid: current_pid(),
            token: process_token().to_string(),
        }
    }

    pub fn new(pid: u32, token: impl Into<String>) -> Self {
        Self {
            pid,
            token: token.into(),
        }
    }

    /// Parse the `<pid>-<token>` form used in file names.
    pub fn parse(s: &str) -> Option<Self> {
        let (pid, token) = s.split_once('-')?;
        let pid = pid.parse().ok()?;
        if token.is_empty() || !token.chars().all(|c| c.is_ascii_alphanumeric()) {
            return None;
        }
        Some(Self::new(pid, token))
    }

    pub fn is_current(&self) -> bool {
        self.pid == current_pid() && self.token == process_token()
    }

    /// Whether the owning process is still running.
    pub fn is_alive(&self) -> bool {
        if self.pid == current_pid() {
            // An empty token predates tokens; trust the pid.
            return self.token.is_empty() || self.token == process_token();
        }
        pid_is_alive(self.pid)
    }
}

impl fmt::Display for OwnerTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.pid, self.token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_display_parse() {
        let tag = OwnerTag::current();
        assert_eq!(OwnerTag::parse(&tag.to_string()), Some(tag.clone()));
        assert!(tag.is_current());
        assert!(tag.is_alive());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(OwnerTag::parse("abc"), None);
        assert_eq!(OwnerTag::parse("12-"), None);
        assert_eq!(OwnerTag::parse("x-abc"), None);
    }

    #[test]
    fn test_reused_pid_with_other_token_is_dead() {
        let stale = OwnerTag::new(current_pid(), "deadbeef");
        if process_token() != "deadbeef" {
            assert!(!stale.is_alive());
        }
    }
}
