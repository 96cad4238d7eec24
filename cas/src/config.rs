//! Resolves the environment into the handful of knobs the engines need.
//! CLI argument parsing itself is out of scope (spec.md §1); this only
//! reads the environment variables spec.md §6 names.

use std::env;
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Worker-pool sizing; callers may clamp `DEFAULT_CONCURRENCY` down for
/// small repositories or test runs.
pub struct Limits {
    pub push_concurrency: usize,
    pub fetch_concurrency: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            push_concurrency: crate::push::DEFAULT_CONCURRENCY,
            fetch_concurrency: crate::fetch::DEFAULT_CONCURRENCY,
        }
    }
}

pub struct Config {
    pub git_dir: PathBuf,
    pub tracker_path: PathBuf,
    pub cas_base_url: String,
    pub vfs_enabled: bool,
    pub limits: Limits,
}

impl Config {
    /// `argv0` is the program's own invocation name, checked for the
    /// `-ipvfs` suffix per spec.md §4.3.
    pub fn from_env(argv0: &str) -> Result<Self> {
        let git_dir = env::var("GIT_DIR")
            .map(PathBuf::from)
            .map_err(|_| Error::ProtocolError("GIT_DIR is not set".into()))?;
        let tracker_path = git_dir.join("remote-cas").join("tracker.db");
        let cas_base_url = env::var("GIT_CAS_DAEMON")
            .unwrap_or_else(|_| "http://127.0.0.1:5001".to_string());
        let vfs_enabled = env::var("GIT_IPFS_VFS")
            .map(|v| !v.is_empty())
            .unwrap_or(false)
            || argv0.ends_with("-ipvfs");

        Ok(Config {
            git_dir,
            tracker_path,
            cas_base_url,
            vfs_enabled,
            limits: Limits::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vfs_enabled_by_binary_name_suffix() {
        std::env::remove_var("GIT_IPFS_VFS");
        std::env::set_var("GIT_DIR", "/tmp/does-not-need-to-exist/.git");
        let config = Config::from_env("git-remote-ipvfs").unwrap();
        assert!(config.vfs_enabled);
        std::env::remove_var("GIT_DIR");
    }
}
