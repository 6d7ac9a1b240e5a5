//! Scan options and exclude rules.
//!
//! Options are plain data (serde-enabled so a host application can embed them
//! in its own settings); exclude patterns are compiled once into
//! [`ExcludeRules`] when the options are applied to a tree.

use std::path::Path;
use std::thread::available_parallelism;

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{DirTreeError, Result};

/// Minimum spacing of `ProgressInfo` events, in milliseconds.
pub const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 250;

/// Options that govern how a tree reads directories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanOptions {
    /// Descend into directories residing on another device.
    pub cross_filesystems: bool,
    /// How many queued directory listings may be fetched in parallel.
    /// `1` reads strictly one directory at a time.
    pub parallel_reads: usize,
    /// Gitignore-style patterns of directories that are never read.
    pub exclude_patterns: Vec<String>,
    pub progress_interval_ms: u64,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            cross_filesystems: false,
            parallel_reads: available_parallelism().map(|n| n.get()).unwrap_or(4),
            exclude_patterns: Vec::new(),
            progress_interval_ms: DEFAULT_PROGRESS_INTERVAL_MS,
        }
    }
}

impl ScanOptions {
    pub fn with_cross_filesystems(mut self, cross: bool) -> Self {
        self.cross_filesystems = cross;
        self
    }

    pub fn with_parallel_reads(mut self, parallel_reads: usize) -> Self {
        self.parallel_reads = parallel_reads.max(1);
        self
    }

    pub fn with_exclude_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.exclude_patterns.push(pattern.into());
        self
    }

    pub fn with_progress_interval_ms(mut self, interval_ms: u64) -> Self {
        self.progress_interval_ms = interval_ms;
        self
    }
}

/// Compiled exclude patterns, matched against absolute directory paths.
#[derive(Debug, Clone)]
pub struct ExcludeRules {
    matcher: Gitignore,
}

impl Default for ExcludeRules {
    fn default() -> Self {
        Self {
            matcher: Gitignore::empty(),
        }
    }
}

impl ExcludeRules {
    /// Compiles gitignore-style patterns. Anchored patterns (leading `/`)
    /// are relative to the filesystem root.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        if patterns.is_empty() {
            return Ok(Self::default());
        }
        let mut builder = GitignoreBuilder::new("/");
        for pattern in patterns {
            builder.add_line(None, pattern.as_ref()).map_err(|error| {
                DirTreeError::InvalidInput(format!(
                    "invalid exclude pattern {:?}: {error}",
                    pattern.as_ref()
                ))
            })?;
        }
        let matcher = builder.build().map_err(|error| {
            DirTreeError::InvalidInput(format!("failed to build exclude rules: {error}"))
        })?;
        Ok(Self { matcher })
    }

    /// Returns true if the directory at `path` must not be read.
    pub fn excludes_dir(&self, path: &Path) -> bool {
        if self.matcher.is_empty() {
            return false;
        }
        self.matcher.matched(path, true).is_ignore()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_stay_on_one_filesystem() {
        let options = ScanOptions::default();
        assert!(!options.cross_filesystems);
        assert!(options.parallel_reads >= 1);
        assert!(options.exclude_patterns.is_empty());
    }

    #[test]
    fn parallel_reads_never_drop_below_one() {
        let options = ScanOptions::default().with_parallel_reads(0);
        assert_eq!(options.parallel_reads, 1);
    }

    #[test]
    fn exclude_by_basename_and_anchor() {
        let rules = ExcludeRules::new(&["node_modules", "/var/cache"]).unwrap();
        assert!(rules.excludes_dir(Path::new("/home/me/project/node_modules")));
        assert!(rules.excludes_dir(Path::new("/var/cache")));
        assert!(!rules.excludes_dir(Path::new("/home/me/var/cache")));
        assert!(!rules.excludes_dir(Path::new("/home/me/project/src")));
    }

    #[test]
    fn empty_rules_exclude_nothing() {
        let rules = ExcludeRules::default();
        assert!(!rules.excludes_dir(Path::new("/anything")));
    }
}
