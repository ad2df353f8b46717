use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::error::{ShellError, ShellResult};

/// Derives the log file name from an input file: extension replaced by
/// `.log`, or appended when the file has none.
pub fn log_file_name(basename: &Path) -> std::path::PathBuf {
    basename.with_extension("log")
}

/// Installs the global tracing subscriber. With `log_to` set, output goes
/// to that file instead of stderr; `verbose` lowers the default filter to
/// debug.
pub fn init(log_to: Option<&Path>, verbose: bool) -> ShellResult<()> {
    let default_filter = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    match log_to {
        Some(path) => {
            let file = File::create(path).map_err(|source| ShellError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            builder.with_ansi(false).with_writer(Arc::new(file)).init();
        }
        None => builder.init(),
    }
    Ok(())
}
