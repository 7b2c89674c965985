//! Filesystem scanner: walks directories, reads supported files, and
//! normalizes them into records for the indexer.
//!
//! Hidden entries are skipped, include/exclude globs from config are
//! honored, and every file gets a SHA-256 content fingerprint for change
//! detection. A file that cannot be read or parsed becomes a recorded
//! failure, never a run abort.

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use walkdir::WalkDir;

use crate::config::ScanConfig;
use crate::error::Error;
use crate::models::NormalizedRecord;
use crate::parser;

const READ_ATTEMPTS: u32 = 3;
const READ_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Records ready for indexing plus the files that could not be normalized.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub records: Vec<NormalizedRecord>,
    pub failures: Vec<ScanFailure>,
}

#[derive(Debug)]
pub struct ScanFailure {
    pub locator: String,
    pub error: Error,
}

/// Walk the given files and directories and normalize every supported
/// file. Unsupported extensions and hidden entries are silently skipped;
/// read and parse failures are collected per file.
pub async fn scan_paths(paths: &[PathBuf], config: &ScanConfig) -> Result<ScanOutcome> {
    let include = build_globset(&config.include_globs)?;
    let exclude = build_globset(&config.exclude_globs)?;

    let mut outcome = ScanOutcome::default();

    for root in paths {
        if root.is_file() {
            normalize_file(root, &mut outcome).await;
            continue;
        }

        let walker = WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| !is_hidden(e.path()));

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable directory entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if let Some(include) = &include {
                if !include.is_match(path) {
                    continue;
                }
            }
            if let Some(exclude) = &exclude {
                if exclude.is_match(path) {
                    continue;
                }
            }
            normalize_file(path, &mut outcome).await;
        }
    }

    tracing::info!(
        records = outcome.records.len(),
        failures = outcome.failures.len(),
        "scan finished"
    );
    Ok(outcome)
}

async fn normalize_file(path: &Path, outcome: &mut ScanOutcome) {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return;
    };
    let Some(file_parser) = parser::parser_for_extension(ext) else {
        return;
    };

    let locator = path.to_string_lossy().into_owned();
    match normalize_one(path, &locator, file_parser).await {
        Ok(record) => outcome.records.push(record),
        Err(error) => {
            tracing::warn!(locator = %locator, error = %error, "failed to normalize file");
            outcome.failures.push(ScanFailure { locator, error });
        }
    }
}

async fn normalize_one(
    path: &Path,
    locator: &str,
    file_parser: &dyn parser::Parser,
) -> Result<NormalizedRecord, Error> {
    let raw = read_with_retry(path, locator).await?;
    let fingerprint = fingerprint(raw.as_bytes());
    let modified_at = file_mtime(path);

    let doc = file_parser.parse(locator, &raw)?;

    Ok(NormalizedRecord {
        locator: locator.to_string(),
        fingerprint,
        title: doc.title,
        text: doc.text,
        metadata: doc.metadata,
        source_type: file_parser.source_type().to_string(),
        content_class: file_parser.content_class(),
        modified_at,
    })
}

/// Read a file, retrying a bounded number of times when another process
/// holds it. Gives up with [`Error::SourceLocked`] after the last attempt;
/// non-contention failures surface immediately.
pub async fn read_with_retry(path: &Path, locator: &str) -> Result<String, Error> {
    let mut attempt = 1;
    loop {
        match std::fs::read_to_string(path) {
            Ok(raw) => return Ok(raw),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                return Err(Error::ParseFailure {
                    locator: locator.to_string(),
                    reason: "not valid UTF-8".to_string(),
                });
            }
            Err(e) if is_contention(&e) => {
                if attempt >= READ_ATTEMPTS {
                    return Err(Error::SourceLocked {
                        locator: locator.to_string(),
                        attempts: READ_ATTEMPTS,
                    });
                }
                tracing::debug!(locator, attempt, "file busy, retrying");
                tokio::time::sleep(READ_RETRY_DELAY * attempt).await;
                attempt += 1;
            }
            Err(e) => return Err(Error::Io(e)),
        }
    }
}

// Locked files surface as WouldBlock on Unix and PermissionDenied on
// Windows.
fn is_contention(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::PermissionDenied | std::io::ErrorKind::WouldBlock
    )
}

/// Hex-encoded SHA-256 of the raw content.
pub fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn file_mtime(path: &Path) -> Option<String> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    Some(chrono::DateTime::<chrono::Utc>::from(modified).to_rfc3339())
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.') && n != "." && n != "..")
}

fn build_globset(patterns: &[String]) -> Result<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("invalid glob: {pattern}"))?);
    }
    Ok(Some(builder.build()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
        path
    }

    #[tokio::test]
    async fn test_scans_supported_files_only() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "note.md", "# Hello\n\nworld");
        write(dir.path(), "plain.txt", "some text");
        write(dir.path(), "binary.exe", "ignored");
        write(dir.path(), ".hidden.md", "ignored");
        write(dir.path(), ".git/config.md", "ignored");

        let outcome = scan_paths(&[dir.path().to_path_buf()], &ScanConfig::default())
            .await
            .unwrap();

        let mut types: Vec<&str> = outcome
            .records
            .iter()
            .map(|r| r.source_type.as_str())
            .collect();
        types.sort();
        assert_eq!(types, vec!["markdown", "plaintext"]);
        assert!(outcome.failures.is_empty());
    }

    #[tokio::test]
    async fn test_fingerprint_tracks_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "a.md", "version one");

        let first = scan_paths(&[path.clone()], &ScanConfig::default())
            .await
            .unwrap();
        std::fs::write(&path, "version two").unwrap();
        let second = scan_paths(&[path.clone()], &ScanConfig::default())
            .await
            .unwrap();
        std::fs::write(&path, "version one").unwrap();
        let third = scan_paths(&[path], &ScanConfig::default()).await.unwrap();

        assert_ne!(first.records[0].fingerprint, second.records[0].fingerprint);
        assert_eq!(first.records[0].fingerprint, third.records[0].fingerprint);
    }

    #[tokio::test]
    async fn test_exclude_globs_are_honored() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "keep.md", "keep");
        write(dir.path(), "drafts/skip.md", "skip");

        let config = ScanConfig {
            include_globs: vec![],
            exclude_globs: vec!["**/drafts/**".to_string()],
        };
        let outcome = scan_paths(&[dir.path().to_path_buf()], &config)
            .await
            .unwrap();

        assert_eq!(outcome.records.len(), 1);
        assert!(outcome.records[0].locator.ends_with("keep.md"));
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_a_parse_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.md");
        std::fs::write(&path, [0xff, 0xfe, 0x00, 0xc3]).unwrap();

        let outcome = scan_paths(&[path], &ScanConfig::default()).await.unwrap();
        assert!(outcome.records.is_empty());
        assert_eq!(outcome.failures.len(), 1);
        assert!(matches!(
            outcome.failures[0].error,
            Error::ParseFailure { .. }
        ));
    }

    #[test]
    fn test_sha256_known_vector() {
        assert_eq!(
            fingerprint(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
