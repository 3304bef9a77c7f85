//! Server configuration.
//!
//! Every field has a default; environment variables override them:
//!
//! | Variable | Field |
//! |---|---|
//! | `TASKGATE_BIND` | `bind` |
//! | `TASKGATE_UPLOAD_DIR` | `upload_dir` |
//! | `TASKGATE_HISTORY_FILE` | `history_file` (empty keeps history in memory) |
//! | `TASKGATE_RECENT_DIRS` | `recent_dirs` |

use std::{net::SocketAddr, path::PathBuf};

use anyhow::Context;

/// Runtime settings for the demo server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to.
    pub bind: SocketAddr,
    /// Directory uploaded files are stored in.
    pub upload_dir: PathBuf,
    /// JSON file holding task history; `None` keeps it in memory.
    pub history_file: Option<PathBuf>,
    /// Length of the recent base directory list.
    pub recent_dirs: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 3000)),
            upload_dir: std::env::temp_dir().join("taskgate-uploads"),
            history_file: dirs::data_dir().map(|dir| dir.join("taskgate").join("history.json")),
            recent_dirs: 10,
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Some(bind) = lookup("TASKGATE_BIND") {
            config.bind = bind
                .parse()
                .with_context(|| format!("TASKGATE_BIND is not a socket address: {bind}"))?;
        }
        if let Some(dir) = lookup("TASKGATE_UPLOAD_DIR") {
            config.upload_dir = PathBuf::from(dir);
        }
        if let Some(file) = lookup("TASKGATE_HISTORY_FILE") {
            config.history_file = (!file.trim().is_empty()).then(|| PathBuf::from(file));
        }
        if let Some(limit) = lookup("TASKGATE_RECENT_DIRS") {
            config.recent_dirs = limit
                .parse()
                .with_context(|| format!("TASKGATE_RECENT_DIRS is not a number: {limit}"))?;
        }

        Ok(config)
    }
}
