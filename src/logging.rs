/// Logging setup
///
/// Everything goes to stdout. Optionally all events are appended to a log
/// file and error events to a separate error file.
use crate::config::LoggingConfig;
use std::{
    fs::{File, OpenOptions},
    path::Path,
    sync::Arc,
};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_FILTER: &str = "padlock_cloud=info,tower_http=info";

fn open_append(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Install the global subscriber. `RUST_LOG` overrides the default filter.
pub fn init(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let log_file = config
        .log_file
        .as_deref()
        .map(open_append)
        .transpose()?
        .map(|file| fmt::layer().with_ansi(false).with_writer(Arc::new(file)));

    let err_file = config
        .err_file
        .as_deref()
        .map(open_append)
        .transpose()?
        .map(|file| {
            fmt::layer()
                .with_ansi(false)
                .with_writer(Arc::new(file))
                .with_filter(LevelFilter::ERROR)
        });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(log_file)
        .with(err_file)
        .try_init()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_append_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/nested/padlock.log");
        open_append(&path).unwrap();
        assert!(path.exists());
    }
}
