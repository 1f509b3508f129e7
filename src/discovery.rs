//! Directory traversal and ignore filtering.
//!
//! Walks the indexed root and yields the files worth chunking. Ignored
//! directories are pruned before they are opened, which matters because
//! dependency and build trees usually dwarf the real sources.
//!
//! The ignore set is the union of:
//! - built-in directory names ([`ALWAYS_IGNORE_DIRS`]),
//! - directory names pulled from the ignore file by a quick line scan,
//! - the full ignore-file matcher (negations honored),
//! - user exclude globs from `[discovery].exclude_globs`,
//! - per-file rules in [`should_index_file`].
//!
//! Symbolic links are never followed.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use walkdir::WalkDir;

use crate::progress::{ProgressEvent, ProgressReporter};

/// Directories that are never worth indexing.
pub const ALWAYS_IGNORE_DIRS: &[&str] = &[
    ".git", ".yarn", "assets", "docs", "cypress", "storybook", "__mocks__",
    ".maestro", ".github", "examples", "codemods", "msw", "fastlane",
    "code-signing", ".reassure", ".vscode", ".claude", "build", "Pods",
    ".gradle", "node_modules", "dist", "coverage", ".next", ".cache",
    "tmp", "temp", "target", "test-utils", "__fixture__", "Locales",
    "translations", "generated", "cache", "logs",
];

/// Extensions of files that are binary or otherwise not source text.
pub const BINARY_EXTENSIONS: &[&str] = &[
    ".png", ".jpg", ".jpeg", ".gif", ".bmp", ".ico", ".svg", ".webp",
    ".zip", ".tar", ".gz", ".bz2", ".7z", ".rar", ".xz",
    ".exe", ".dll", ".so", ".dylib", ".a", ".o", ".obj", ".bin",
    ".rmeta", ".rlib", ".os", ".bs",
    ".ttf", ".otf", ".woff", ".woff2", ".eot",
    ".mp3", ".mp4", ".avi", ".mov", ".wav", ".flac", ".ogg",
    ".pdf", ".doc", ".docx", ".xls", ".xlsx", ".ppt", ".pptx",
    ".db", ".sqlite", ".sql", ".pyc", ".pyo", ".class", ".jar", ".war",
    ".onnx", ".ort", ".pck", ".tscn", ".lock", ".po", ".mo",
];

/// Filename suffixes of generated artifacts.
pub const GENERATED_SUFFIXES: &[&str] =
    &[".map", ".d", ".timestamp", ".min.js", ".min.css", ".d.ts"];

/// File names skipped regardless of location (compared case-insensitively).
pub const ALWAYS_IGNORE_FILES: &[&str] = &[
    ".DS_Store", "package-lock.json", "yarn.lock", "pnpm-lock.yaml",
    "Cargo.lock", ".eslintrc", ".prettierrc", ".npmignore", ".gitignore",
];

/// Extensionless files that are still source (lowercase basenames).
pub const ALLOWED_NO_EXTENSION: &[&str] = &[
    "makefile", "dockerfile", "gemfile", "rakefile", "podfile", "containerfile",
];

/// Discovery progress is reported every this many directories, or every
/// `PROGRESS_TIME_INTERVAL`, whichever comes first.
const PROGRESS_DIR_INTERVAL: u64 = 100;
const PROGRESS_TIME_INTERVAL: Duration = Duration::from_secs(2);

/// The combined ignore set for one run. Built once, read-only afterwards.
pub struct IgnoreRules {
    dir_names: HashSet<String>,
    ignore_file: Option<Gitignore>,
    excludes: GlobSet,
}

impl IgnoreRules {
    /// Build the rule set for `root`, reading `ignore_file_name` if present.
    pub fn load(root: &Path, ignore_file_name: &str, exclude_globs: &[String]) -> Result<Self> {
        let mut dir_names: HashSet<String> =
            ALWAYS_IGNORE_DIRS.iter().map(|d| d.to_string()).collect();

        let ignore_path = root.join(ignore_file_name);
        let ignore_file = if ignore_path.is_file() {
            let content = std::fs::read_to_string(&ignore_path)
                .with_context(|| format!("Failed to read {}", ignore_path.display()))?;
            let quick = extract_directory_patterns(&content);
            tracing::debug!(
                "{}: {} directory patterns extracted",
                ignore_file_name,
                quick.len()
            );
            dir_names.extend(quick);

            let mut builder = GitignoreBuilder::new(root);
            if let Some(err) = builder.add(&ignore_path) {
                tracing::warn!("Some patterns in {} were skipped: {}", ignore_path.display(), err);
            }
            Some(builder.build().with_context(|| {
                format!("Failed to compile patterns from {}", ignore_path.display())
            })?)
        } else {
            None
        };

        Ok(Self {
            dir_names,
            ignore_file,
            excludes: build_globset(exclude_globs)?,
        })
    }

    /// Rules made only of the built-in sets.
    pub fn builtin() -> Self {
        Self {
            dir_names: ALWAYS_IGNORE_DIRS.iter().map(|d| d.to_string()).collect(),
            ignore_file: None,
            excludes: GlobSet::empty(),
        }
    }

    /// Whether a directory (relative to the root) should be skipped entirely.
    pub fn prune_dir(&self, relative: &Path) -> bool {
        let name = relative
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();
        if self.dir_names.contains(name.as_ref()) {
            return true;
        }
        if let Some(gi) = &self.ignore_file {
            if gi.matched(relative, true).is_ignore() {
                return true;
            }
        }
        let rel = to_forward_slashes(relative);
        self.excludes.is_match(&rel) || self.excludes.is_match(format!("{}/", rel))
    }

    /// Whether a file (relative to the root) is excluded.
    pub fn ignores_file(&self, relative: &Path) -> bool {
        if let Some(gi) = &self.ignore_file {
            if gi.matched(relative, false).is_ignore() {
                return true;
            }
        }
        if self.excludes.is_match(to_forward_slashes(relative)) {
            return true;
        }
        !should_index_file(relative)
    }
}

/// Pull plain directory names out of ignore-file content.
///
/// Only lines that name a single directory (`node_modules/`, `vendor`) are
/// taken: no wildcards, no inner slashes. Comments, blank lines and
/// negations are skipped; the full matcher still sees all of them.
pub fn extract_directory_patterns(content: &str) -> HashSet<String> {
    let mut dirs = HashSet::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }
        if let Some(stripped) = line.strip_suffix('/') {
            let name = stripped.trim_end_matches('/');
            if !name.is_empty() && !name.contains('/') {
                dirs.insert(name.to_string());
            }
        } else if !line.contains('/') && !line.contains('*') {
            dirs.insert(line.to_string());
        }
    }
    dirs
}

/// Per-file rules: names, extensions, test markers, extensionless files.
pub fn should_index_file(relative: &Path) -> bool {
    let file_name = relative
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");
    let lower = file_name.to_lowercase();

    if ALWAYS_IGNORE_FILES.iter().any(|f| lower == f.to_lowercase()) {
        return false;
    }

    if let Some(ext) = relative.extension().and_then(|e| e.to_str()) {
        let dotted = format!(".{}", ext.to_lowercase());
        if BINARY_EXTENSIONS.contains(&dotted.as_str()) {
            return false;
        }
    }

    if GENERATED_SUFFIXES.iter().any(|s| lower.ends_with(s)) {
        return false;
    }

    if lower.contains(".test.") || lower.contains(".spec.") {
        return false;
    }

    if relative
        .components()
        .any(|c| match c {
            Component::Normal(n) => n.to_string_lossy().eq_ignore_ascii_case("__tests__"),
            _ => false,
        })
    {
        return false;
    }

    if relative.extension().is_none() && !ALLOWED_NO_EXTENSION.contains(&lower.as_str()) {
        return false;
    }

    true
}

/// A file that survived filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    /// Path relative to the root, `/`-separated.
    pub relative: String,
}

/// Lazily walk `root`, yielding indexable files in file-name order.
///
/// The walk can only be restarted from the root.
pub fn discover<'a>(
    root: &'a Path,
    rules: &'a IgnoreRules,
    progress: &'a dyn ProgressReporter,
) -> Discovery<'a> {
    Discovery {
        root,
        rules,
        walker: WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter(),
        progress,
        dirs_scanned: 0,
        files_found: 0,
        last_report: Instant::now(),
        finished: false,
    }
}

/// Iterator returned by [`discover`].
pub struct Discovery<'a> {
    root: &'a Path,
    rules: &'a IgnoreRules,
    walker: walkdir::IntoIter,
    progress: &'a dyn ProgressReporter,
    dirs_scanned: u64,
    files_found: u64,
    last_report: Instant,
    finished: bool,
}

impl Discovery<'_> {
    pub fn dirs_scanned(&self) -> u64 {
        self.dirs_scanned
    }

    fn report(&mut self) {
        self.last_report = Instant::now();
        self.progress.report(ProgressEvent::Discovering {
            dirs: self.dirs_scanned,
            files: self.files_found,
        });
    }
}

impl Iterator for Discovery<'_> {
    type Item = DiscoveredFile;

    fn next(&mut self) -> Option<DiscoveredFile> {
        if self.finished {
            return None;
        }
        loop {
            let entry = match self.walker.next() {
                Some(Ok(entry)) => entry,
                Some(Err(err)) => {
                    tracing::warn!("Skipping unreadable path: {}", err);
                    continue;
                }
                None => {
                    self.finished = true;
                    self.report();
                    return None;
                }
            };

            let relative = match entry.path().strip_prefix(self.root) {
                Ok(rel) => rel.to_path_buf(),
                Err(_) => continue,
            };
            let file_type = entry.file_type();

            if file_type.is_dir() {
                if entry.depth() > 0 && self.rules.prune_dir(&relative) {
                    self.walker.skip_current_dir();
                    continue;
                }
                self.dirs_scanned += 1;
                if self.dirs_scanned % PROGRESS_DIR_INTERVAL == 0
                    || self.last_report.elapsed() > PROGRESS_TIME_INTERVAL
                {
                    self.report();
                }
                continue;
            }

            // Symlinks are reported as such because links are not followed.
            if !file_type.is_file() || self.rules.ignores_file(&relative) {
                continue;
            }

            self.files_found += 1;
            return Some(DiscoveredFile {
                path: entry.into_path(),
                relative: to_forward_slashes(&relative),
            });
        }
    }
}

fn to_forward_slashes(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(n) => Some(n.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}
