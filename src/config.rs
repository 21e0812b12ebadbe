//! Server configuration.
//!
//! Settings come from three places, highest precedence first: command-line
//! flags (or their `BEACON_*` environment variables), an optional YAML file
//! given with `--config`, and built-in defaults. They are resolved once at
//! startup into an immutable [`ServerConfig`] that the server, every
//! connection and the path resolver share.
//!
//! ```yaml
//! host: 0.0.0.0
//! port: 8080
//! workers: 4
//! document_root: /srv/www
//! directory_index: forbidden
//! idle_timeout_secs: 10
//! ```

use std::fs;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use serde::Deserialize;

use crate::http::parser::{DEFAULT_MAX_BODY_BYTES, DEFAULT_MAX_HEADER_BYTES, Limits};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8889;
pub const DEFAULT_WORKERS: usize = 1;
pub const DEFAULT_DOCUMENT_ROOT: &str = ".";
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_BACKLOG: i32 = 128;

/// What to do with a directory that has no `index.html`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectoryIndex {
    /// Generate an HTML listing of the directory
    #[default]
    Listing,
    /// Answer 403 Forbidden
    Forbidden,
}

/// Command-line interface.
#[derive(Debug, Clone, Parser)]
#[command(name = "beacon", version, about = "Event-driven static file server")]
pub struct Cli {
    /// Number of worker processes [default: 1]
    #[arg(short, long, env = "BEACON_WORKERS")]
    pub workers: Option<usize>,

    /// Directory files are served from [default: .]
    #[arg(short = 'r', long = "root", env = "BEACON_ROOT")]
    pub document_root: Option<PathBuf>,

    /// Address to listen on [default: 127.0.0.1]
    #[arg(long, env = "BEACON_HOST")]
    pub host: Option<String>,

    /// Port to listen on [default: 8889]
    #[arg(short, long, env = "BEACON_PORT")]
    pub port: Option<u16>,

    /// Append logs to this file instead of standard output
    #[arg(long)]
    pub log: Option<PathBuf>,

    /// YAML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directories without index.html [default: listing]
    #[arg(long, value_enum)]
    pub directory_index: Option<DirectoryIndex>,

    /// Set by the worker pool when it starts a worker process
    #[arg(long, hide = true)]
    pub worker_id: Option<usize>,
}

/// Contents of the optional YAML file. Every key may be omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub workers: Option<usize>,
    pub document_root: Option<PathBuf>,
    pub directory_index: Option<DirectoryIndex>,
    pub max_header_bytes: Option<usize>,
    pub max_body_bytes: Option<usize>,
    pub idle_timeout_secs: Option<u64>,
    pub poll_timeout_ms: Option<u64>,
    pub backlog: Option<i32>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        serde_yaml::from_str(&text)
            .with_context(|| format!("parsing config file {}", path.display()))
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
    /// Canonical absolute path; every served file must resolve below it
    pub document_root: PathBuf,
    pub directory_index: DirectoryIndex,
    pub max_header_bytes: usize,
    pub max_body_bytes: usize,
    pub idle_timeout: Duration,
    pub poll_timeout: Duration,
    pub backlog: i32,
}

impl ServerConfig {
    /// Defaults for everything except the document root.
    pub fn new(document_root: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            workers: DEFAULT_WORKERS,
            document_root: canonical_root(document_root.as_ref())?,
            directory_index: DirectoryIndex::default(),
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            backlog: DEFAULT_BACKLOG,
        })
    }

    pub fn load(cli: &Cli) -> Result<Self> {
        let file = match &cli.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::from_sources(cli, file)
    }

    pub fn from_sources(cli: &Cli, file: FileConfig) -> Result<Self> {
        let root = cli
            .document_root
            .clone()
            .or(file.document_root)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DOCUMENT_ROOT));

        let mut cfg = Self::new(root)?;
        cfg.host = cli.host.clone().or(file.host).unwrap_or(cfg.host);
        cfg.port = cli.port.or(file.port).unwrap_or(cfg.port);
        cfg.workers = cli.workers.or(file.workers).unwrap_or(cfg.workers);
        cfg.directory_index = cli
            .directory_index
            .or(file.directory_index)
            .unwrap_or(cfg.directory_index);
        cfg.max_header_bytes = file.max_header_bytes.unwrap_or(cfg.max_header_bytes);
        cfg.max_body_bytes = file.max_body_bytes.unwrap_or(cfg.max_body_bytes);
        if let Some(secs) = file.idle_timeout_secs {
            cfg.idle_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = file.poll_timeout_ms {
            cfg.poll_timeout = Duration::from_millis(ms);
        }
        cfg.backlog = file.backlog.unwrap_or(cfg.backlog);

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            bail!("at least one worker is required");
        }
        if self.backlog <= 0 {
            bail!("listen backlog must be positive, got {}", self.backlog);
        }
        if self.poll_timeout.is_zero() {
            bail!("poll timeout must be greater than zero");
        }
        Ok(())
    }

    /// Resolves `host:port`; the first address wins.
    pub fn address(&self) -> Result<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .with_context(|| format!("resolving {}:{}", self.host, self.port))?
            .next()
            .with_context(|| format!("{} resolved to no address", self.host))
    }

    pub fn limits(&self) -> Limits {
        Limits {
            max_header_bytes: self.max_header_bytes,
            max_body_bytes: self.max_body_bytes,
        }
    }
}

fn canonical_root(path: &Path) -> Result<PathBuf> {
    let root = path
        .canonicalize()
        .with_context(|| format!("document root {} is not accessible", path.display()))?;
    if !root.is_dir() {
        bail!("document root {} is not a directory", root.display());
    }
    Ok(root)
}
