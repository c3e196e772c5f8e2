// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Persisted session records: which stores were open, in which mode, and
//! which of their nodes were being viewed.
//!
//! One record per line: `mode#path#nodepath1#nodepath2...`.

use diagnostics::log_warn;
use hstore::OpenMode;
use std::path::{Path, PathBuf};

use crate::error::{GroveError, Result};

const SEPARATOR: char = '#';

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub mode: OpenMode,
    pub path: PathBuf,
    pub nodes: Vec<String>,
}

impl SessionRecord {
    pub fn new<P: Into<PathBuf>>(mode: OpenMode, path: P) -> Self {
        Self {
            mode,
            path: path.into(),
            nodes: Vec::new(),
        }
    }

    pub fn parse(line: &str) -> Result<Self> {
        let malformed = |why: &str| GroveError::Config(format!("session record {line:?}: {why}"));
        let mut fields = line.trim_end_matches(['\r', '\n']).split(SEPARATOR);
        let mode = fields
            .next()
            .and_then(OpenMode::from_flag)
            .ok_or_else(|| malformed("mode must be r or a"))?;
        let path = fields
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| malformed("missing file path"))?;
        let nodes = fields
            .map(|n| {
                if n.starts_with('/') {
                    Ok(n.to_string())
                } else {
                    Err(malformed("node paths must be absolute"))
                }
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            mode,
            path: PathBuf::from(path),
            nodes,
        })
    }
}

impl std::fmt::Display for SessionRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{SEPARATOR}{}", self.mode.as_flag(), self.path.display())?;
        for node in &self.nodes {
            write!(f, "{SEPARATOR}{node}")?;
        }
        Ok(())
    }
}

/// Parse a session file's text. Malformed lines are skipped.
#[must_use]
pub fn parse_records(text: &str) -> Vec<SessionRecord> {
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|line| match SessionRecord::parse(line) {
            Ok(record) => Some(record),
            Err(e) => {
                log_warn!("skipping session record: {error}", error: e.to_string());
                None
            }
        })
        .collect()
}

/// Records from `path`; a missing file is an empty session.
pub async fn load(path: &Path) -> Result<Vec<SessionRecord>> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(parse_records(&text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

pub async fn save(path: &Path, records: &[SessionRecord]) -> Result<()> {
    let mut text = String::new();
    for record in records {
        text.push_str(&record.to_string());
        text.push('\n');
    }
    tokio::fs::write(path, text).await?;
    Ok(())
}
