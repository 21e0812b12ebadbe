use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber.
///
/// Level comes from `RUST_LOG` and defaults to `info`. With `log_file` set,
/// output is appended to that file instead of standard output.
pub fn init(log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true);

    let installed = match log_file {
        None => builder.try_init(),
        Some(path) => {
            let appender = file_appender(path)?;
            builder.with_writer(appender).with_ansi(false).try_init()
        }
    };

    installed.map_err(|e| anyhow!("installing log subscriber: {e}"))
}

fn file_appender(path: &Path) -> Result<RollingFileAppender> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("log path {} has no usable file name", path.display()))?;
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(name)
        .build(dir)
        .with_context(|| format!("opening log file {}", path.display()))
}
