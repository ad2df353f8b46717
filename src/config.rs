use std::path::PathBuf;

use crate::error::{ShellError, ShellResult};

/// Tuning parameters forwarded unchanged to every heap the shell creates.
#[derive(Debug, Clone)]
pub struct HeapConfig {
    /// Live bytes that trigger a collection.
    pub collection_threshold: usize,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            collection_threshold: 1 << 20,
        }
    }
}

/// What happens to per-task exit codes in multi-worker mode.
///
/// The historical behavior is to discard them; `Collect` routes every
/// outcome through a side channel guarded by the scheduler's shared
/// monitor so the caller can inspect failures afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutcomePolicy {
    #[default]
    FireAndForget,
    Collect,
}

/// Fully resolved shell configuration, passed by reference through the
/// call chain. There is no ambient global.
#[derive(Debug, Clone)]
pub struct ShellConfig {
    /// Input script or bytecode files, dispatched in list order.
    pub files: Vec<PathBuf>,
    /// Number of reusable cores (C). Must be >= `num_threads`.
    pub num_workers: usize,
    /// Number of worker OS threads (W).
    pub num_threads: usize,
    /// Passes over the file list.
    pub repeats: usize,
    pub heap: HeapConfig,
    pub policy: OutcomePolicy,
    /// Trace VM execution instruction by instruction.
    pub trace: bool,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            files: Vec::new(),
            num_workers: 1,
            num_threads: 1,
            repeats: 1,
            heap: HeapConfig::default(),
            policy: OutcomePolicy::default(),
            trace: false,
        }
    }
}

impl ShellConfig {
    /// The scheduler would stall rather than fail on a bad worker/thread
    /// ratio, so the ratio is rejected up front.
    pub fn validate(&self) -> ShellResult<()> {
        if self.num_threads < 1 {
            return Err(ShellError::Config(
                "at least one worker thread is required".into(),
            ));
        }
        if self.num_workers < self.num_threads {
            return Err(ShellError::Config(format!(
                "need at least as many cores as threads ({} cores < {} threads)",
                self.num_workers, self.num_threads
            )));
        }
        if self.repeats < 1 {
            return Err(ShellError::Config("repeats must be at least 1".into()));
        }
        if self.heap.collection_threshold == 0 {
            return Err(ShellError::Config(
                "heap collection threshold must be nonzero".into(),
            ));
        }
        Ok(())
    }
}

/// Parse the `--workers C,T[,R]` argument: cores, threads and optionally
/// repeats, in that order.
pub fn parse_workers(value: &str) -> ShellResult<(usize, usize, usize)> {
    let bad = || ShellError::Config(format!("bad value to --workers: {value}"));
    let fields: Vec<&str> = value.split(',').collect();
    if fields.len() != 2 && fields.len() != 3 {
        return Err(bad());
    }
    let mut parsed = Vec::with_capacity(3);
    for field in &fields {
        parsed.push(field.trim().parse::<usize>().map_err(|_| bad())?);
    }
    let workers = parsed[0];
    let threads = parsed[1];
    let repeats = parsed.get(2).copied().unwrap_or(1);
    if threads < 1 || workers < threads || repeats < 1 {
        return Err(bad());
    }
    Ok((workers, threads, repeats))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_two_field_workers() {
        assert_eq!(parse_workers("4,2").unwrap(), (4, 2, 1));
    }

    #[test]
    fn parses_three_field_workers() {
        assert_eq!(parse_workers("4,2,10").unwrap(), (4, 2, 10));
    }

    #[test]
    fn rejects_more_threads_than_workers() {
        assert!(parse_workers("1,2").is_err());
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_workers("").is_err());
        assert!(parse_workers("1").is_err());
        assert!(parse_workers("1,2,3,4").is_err());
        assert!(parse_workers("a,b").is_err());
        assert!(parse_workers("2,0").is_err());
        assert!(parse_workers("2,2,0").is_err());
    }

    #[test]
    fn validate_rejects_bad_ratio() {
        let config = ShellConfig {
            num_workers: 1,
            num_threads: 2,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_accepts_default() {
        assert!(ShellConfig::default().validate().is_ok());
    }
}
