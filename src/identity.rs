//! Collision-free names for environments and build scratch directories.
//!
//! Names combine the host, the wall clock in milliseconds and the process
//! id, so concurrent processes on shared infrastructure never pick the same
//! name without coordinating. Names minted repeatedly inside one process
//! also carry a strictly increasing counter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::SystemTime;

/// Prefix of every environment name.
pub const ENVIRONMENT_PREFIX: &str = "ptest";

/// Prefix of build scratch directory names.
pub const BUILD_PREFIX: &str = "ptbuild";

/// Host, time and process that together identify one minting process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seed {
    pub host: String,
    pub millis: u128,
    pub pid: u32,
}

impl Seed {
    /// Seed for the current process at the current instant.
    pub fn current() -> Self {
        let millis = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self {
            host: hostname(),
            millis,
            pid: std::process::id(),
        }
    }

    /// `<kind>_<host>_<millis>_<pid>`, usable as a package or directory name.
    pub fn token(&self, kind: &str) -> String {
        format!(
            "{kind}_{}_{}_{}",
            sanitize_host(&self.host),
            self.millis,
            self.pid
        )
    }
}

/// Mints `<prefix>_<n>` names with a strictly increasing `n`.
#[derive(Debug)]
pub struct NameMinter {
    prefix: String,
    counter: AtomicU64,
}

impl NameMinter {
    pub fn new(seed: &Seed, kind: &str) -> Self {
        Self {
            prefix: seed.token(kind),
            counter: AtomicU64::new(0),
        }
    }

    pub fn next_name(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}_{n}", self.prefix)
    }
}

/// A fresh environment name, unique across hosts, processes and calls.
pub fn next_environment_name() -> String {
    static MINTER: OnceLock<NameMinter> = OnceLock::new();
    MINTER
        .get_or_init(|| NameMinter::new(&Seed::current(), ENVIRONMENT_PREFIX))
        .next_name()
}

/// Token naming one build attempt's scratch directory.
pub fn build_token() -> String {
    Seed::current().token(BUILD_PREFIX)
}

/// Get the system hostname, or "unknown" if it can't be determined.
fn hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("HOST"))
        .ok()
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|s| s.trim().to_string())
        })
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown".into())
}

/// Names double as package names, so only letters and underscores survive.
fn sanitize_host(host: &str) -> String {
    host.chars()
        .map(|c| if c.is_ascii_alphabetic() || c == '_' { c } else { '_' })
        .collect()
}
