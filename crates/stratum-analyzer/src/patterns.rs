//! File include/exclude globs and cluster name patterns

use globset::{Glob, GlobBuilder, GlobMatcher, GlobSet, GlobSetBuilder};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PatternError {
    #[error("invalid glob '{pattern}': {source}")]
    InvalidGlob {
        pattern: String,
        source: globset::Error,
    },
    #[error("invalid cluster pattern '{pattern}': {source}")]
    InvalidRegex {
        pattern: String,
        source: regex::Error,
    },
}

/// Anything that can decide whether a full type name belongs to it.
pub trait Matches {
    fn matches(&self, name: &str) -> bool;
}

fn glob(pattern: &str) -> Result<Glob, PatternError> {
    // `*` stays inside one directory; `**` crosses directories.
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .case_insensitive(true)
        .build()
        .map_err(|source| PatternError::InvalidGlob {
            pattern: pattern.to_string(),
            source,
        })
}

/// Selects module files below a root: included by some include pattern and
/// not matched by any exclude pattern.
#[derive(Debug, Clone)]
pub struct FileSelector {
    includes: Vec<GlobMatcher>,
    excludes: GlobSet,
}

impl FileSelector {
    pub fn new(includes: &[String], excludes: &[String]) -> Result<Self, PatternError> {
        let includes = includes
            .iter()
            .map(|p| glob(p).map(|g| g.compile_matcher()))
            .collect::<Result<Vec<_>, _>>()?;

        let mut builder = GlobSetBuilder::new();
        for pattern in excludes {
            builder.add(glob(pattern)?);
        }
        let excludes = builder.build().map_err(|source| PatternError::InvalidGlob {
            pattern: excludes.join(", "),
            source,
        })?;

        Ok(FileSelector { includes, excludes })
    }

    /// True if the path (relative to the root) is excluded. Exclusions are
    /// checked against both the relative path and the bare file name.
    pub fn is_excluded(&self, relative: &Path) -> bool {
        self.excludes.is_match(relative)
            || relative
                .file_name()
                .is_some_and(|name| self.excludes.is_match(Path::new(name)))
    }

    /// Matching files in include-pattern order, each file once.
    pub fn select(&self, root: &Path) -> Vec<PathBuf> {
        let candidates = walk_files(root, None);
        let mut seen = HashSet::new();
        let mut selected = Vec::new();

        for include in &self.includes {
            for relative in &candidates {
                if include.is_match(relative)
                    && !self.is_excluded(relative)
                    && seen.insert(relative.clone())
                {
                    selected.push(root.join(relative));
                }
            }
        }

        tracing::debug!(
            "Selected {} of {} files under {}",
            selected.len(),
            candidates.len(),
            root.display()
        );
        selected
    }
}

/// All files below `root` as sorted root-relative paths. A `max_depth` of
/// `Some(1)` lists only the root directory itself.
pub fn walk_files(root: &Path, max_depth: Option<usize>) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = ignore::WalkBuilder::new(root)
        .standard_filters(false)
        .max_depth(max_depth)
        .build()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!("Cannot read entry: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_some_and(|t| t.is_file()))
        .filter_map(|entry| entry.path().strip_prefix(root).ok().map(Path::to_path_buf))
        .collect();
    files.sort();
    files
}

/// How a cluster pattern string is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternSyntax {
    /// `*` matches any run of characters, `?` one character; whole name.
    #[default]
    Wildcard,
    /// Regular expression, unanchored.
    Regex,
}

/// A compiled name pattern.
#[derive(Debug, Clone)]
pub struct NamePattern {
    source: String,
    regex: Regex,
}

impl NamePattern {
    pub fn new(pattern: &str, syntax: PatternSyntax) -> Result<Self, PatternError> {
        let expr = match syntax {
            PatternSyntax::Wildcard => wildcard_to_regex(pattern),
            PatternSyntax::Regex => pattern.to_string(),
        };
        let regex = Regex::new(&expr).map_err(|source| PatternError::InvalidRegex {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(NamePattern {
            source: pattern.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl Matches for NamePattern {
    fn matches(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }
}

fn wildcard_to_regex(pattern: &str) -> String {
    let escaped = regex::escape(pattern)
        .replace(r"\*", ".*")
        .replace(r"\?", ".");
    format!("^{escaped}$")
}

/// A named group of patterns; a name belongs to it if any pattern matches.
#[derive(Debug, Clone)]
pub struct Cluster {
    pub name: String,
    patterns: Vec<NamePattern>,
}

impl Cluster {
    pub fn new(
        name: impl Into<String>,
        patterns: &[String],
        syntax: PatternSyntax,
    ) -> Result<Self, PatternError> {
        let patterns = patterns
            .iter()
            .map(|p| NamePattern::new(p, syntax))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Cluster {
            name: name.into(),
            patterns,
        })
    }

    pub fn patterns(&self) -> &[NamePattern] {
        &self.patterns
    }
}

impl Matches for Cluster {
    fn matches(&self, name: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(name))
    }
}

/// First cluster in declared order whose patterns match the name.
pub fn first_match<'a, C: Matches>(clusters: &'a [C], full_name: &str) -> Option<&'a C> {
    clusters.iter().find(|c| c.matches(full_name))
}
