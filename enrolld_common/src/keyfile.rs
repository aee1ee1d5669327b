//! # Key file
//!
//! The canonical on-disk record of every enrolled agent (§6 "Key file
//! format"): one line per agent, space-separated fields, optional group
//! tagged with a leading `#` comment-style suffix the original reader
//! tolerates but never writes. Writes are atomic: build the full contents in
//! memory, write to a temp file in the same directory, fsync, then rename
//! over the canonical path, so a crash never leaves a half-written file.

use std::io::Write as _;
use std::path::Path;

use thiserror::Error;

use crate::core::agent::AgentEntry;

#[derive(Debug, Error)]
pub enum KeyFileError {
    #[error("io error reading/writing key file: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed key file line {line_no}: {text:?}")]
    Malformed { line_no: usize, text: String },
}

/// Parse the full contents of a key file into entries, skipping blank lines
/// and `#`-prefixed comments.
pub fn parse(contents: &str) -> Result<Vec<AgentEntry>, KeyFileError> {
    use chrono::Utc;

    let mut out = Vec::new();
    for (idx, raw_line) in contents.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.splitn(5, ' ');
        let id = fields.next();
        let name = fields.next();
        let ip = fields.next();
        let raw_key = fields.next();
        let (id, name, ip, raw_key) = match (id, name, ip, raw_key) {
            (Some(id), Some(name), Some(ip), Some(raw_key)) => (id, name, ip, raw_key),
            _ => {
                return Err(KeyFileError::Malformed {
                    line_no: idx + 1,
                    text: line.to_string(),
                })
            }
        };
        let rest = fields.next();
        let group = rest
            .and_then(|r| r.strip_prefix('#'))
            .map(|g| g.trim().to_string())
            .filter(|g| !g.is_empty());

        out.push(AgentEntry {
            id: id.to_string(),
            name: name.to_string(),
            ip: ip.to_string(),
            raw_key: raw_key.to_string(),
            group,
            created_at: Utc::now(),
            flags: Default::default(),
        });
    }
    Ok(out)
}

/// Render entries back to the line format `parse` accepts, skipping
/// revoked entries — the writer's flush is the point at which a revoked
/// entry is actually dropped from disk.
pub fn render(entries: &[&AgentEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        if entry.flags.revoked {
            continue;
        }
        out.push_str(&entry.id);
        out.push(' ');
        out.push_str(&entry.name);
        out.push(' ');
        out.push_str(&entry.ip);
        out.push(' ');
        out.push_str(&entry.raw_key);
        if let Some(group) = &entry.group {
            out.push_str(" #");
            out.push_str(group);
        }
        out.push('\n');
    }
    out
}

/// Atomically write `contents` to `path`: write to a sibling temp file in
/// the same directory, fsync, then rename over `path` so a reader never
/// observes a partial file.
pub fn write_atomic(path: &Path, contents: &str) -> Result<(), KeyFileError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
