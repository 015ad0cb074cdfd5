use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};

/// Stores references to all the paths relevant to snitray, and abstracts access to these files and directories
#[derive(Debug, Clone)]
pub struct SnitrayPaths {
    pub log_file: PathBuf,
    pub log_dir: PathBuf,
    pub ipc_socket_file: PathBuf,
    pub config_dir: PathBuf,
}

impl SnitrayPaths {
    pub fn from_config_dir<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref();
        if config_dir.is_file() {
            bail!("Please provide the path to the config directory, not a file within it")
        }

        // the configuration is optional, so a missing directory is fine
        let config_dir = if config_dir.exists() { config_dir.canonicalize()? } else { config_dir.to_path_buf() };

        let mut hasher = DefaultHasher::new();
        format!("{}", config_dir.display()).hash(&mut hasher);
        // daemon_id is a hash of the config dir path to ensure that, given a normal XDG_RUNTIME_DIR,
        // the absolute path to the socket stays under the 108 bytes limit. (see man 7 unix)
        let daemon_id = format!("{:x}", hasher.finish());

        let ipc_socket_file = std::env::var("XDG_RUNTIME_DIR")
            .map(std::path::PathBuf::from)
            .unwrap_or_else(|_| std::path::PathBuf::from("/tmp"))
            .join(format!("snitray-server_{}", daemon_id));

        // 100 as the limit isn't quite 108 everywhere (i.e 104 on BSD or mac)
        if format!("{}", ipc_socket_file.display()).len() > 100 {
            log::warn!("The IPC socket file's absolute path exceeds 100 bytes, the socket may fail to create.");
        }

        let log_dir = match std::env::var("XDG_CACHE_HOME") {
            Ok(cache) => PathBuf::from(cache),
            Err(_) => home_dir()?.join(".cache"),
        }
        .join("snitray");

        if !log_dir.exists() {
            log::info!("Creating log dir");
            std::fs::create_dir_all(&log_dir)?;
        }

        Ok(SnitrayPaths {
            config_dir,
            log_file: log_dir.join(format!("snitray_{}.log", daemon_id)),
            log_dir,
            ipc_socket_file,
        })
    }

    pub fn default() -> Result<Self> {
        let config_dir = match std::env::var("XDG_CONFIG_HOME") {
            Ok(config) => PathBuf::from(config),
            Err(_) => home_dir()?.join(".config"),
        }
        .join("snitray");

        Self::from_config_dir(config_dir)
    }

    pub fn get_log_file(&self) -> &Path {
        self.log_file.as_path()
    }

    pub fn get_ipc_socket_file(&self) -> &Path {
        self.ipc_socket_file.as_path()
    }

    pub fn get_config_file(&self) -> PathBuf {
        self.config_dir.join("config.json")
    }
}

fn home_dir() -> Result<PathBuf> {
    std::env::var("HOME").map(PathBuf::from).context("Neither the XDG directory nor HOME is set")
}

impl std::fmt::Display for SnitrayPaths {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "config-dir: {}, ipc-socket: {}, log-file: {}",
            self.config_dir.display(),
            self.ipc_socket_file.display(),
            self.log_file.display()
        )
    }
}
