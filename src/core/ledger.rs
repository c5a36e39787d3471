//! Append-only, hash-chained event ledger.
//!
//! One canonical-JSON record per line in `ledger_main.jsonl`. Every record
//! carries `line_sha` (SHA-256 of the record minus `line_sha`) and `prev`
//! (the previous record's `line_sha`). The genesis record is written without
//! `prev`; the first non-genesis record links to it. Appends serialize
//! through a mutex that also guards the cached tail hash, and each append is
//! fsynced before it returns.

use crate::core::canon::{canonical_json, canonical_sha256_without};
use crate::core::error::MeshResult;
use crate::core::time;
use serde_json::{Map, Value};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// A parsed ledger record.
#[derive(Debug, Clone)]
pub struct Event {
    pub ts: String,
    pub event: String,
    pub note: String,
    pub prev: Option<String>,
    pub line_sha: String,
    /// Full record including extension fields.
    pub record: Value,
}

/// Structured result of a full-log verification pass.
#[derive(Debug, Clone, serde::Serialize)]
pub struct LedgerReport {
    pub ok: bool,
    pub first_bad_offset: Option<usize>,
    pub reason: Option<String>,
    pub events_checked: usize,
}

struct LedgerTail {
    last_line_sha: Option<String>,
    initialized: bool,
}

pub struct Ledger {
    path: PathBuf,
    tail: Mutex<LedgerTail>,
}

impl Ledger {
    /// Open a ledger file, recovering the tail hash from the last valid
    /// line. A trailing partial line left by a crashed writer is truncated
    /// so the next append starts on a fresh line.
    pub fn open<P: AsRef<Path>>(path: P) -> MeshResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut last = None;
        if path.exists() {
            truncate_partial_tail(&path)?;
            for ev in read_events(&path)? {
                last = Some(ev.line_sha);
            }
        }
        Ok(Self {
            path,
            tail: Mutex::new(LedgerTail {
                last_line_sha: last,
                initialized: true,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the genesis record if the ledger is empty. Idempotent.
    pub fn ensure_genesis(&self, note: &str) -> MeshResult<()> {
        {
            let tail = self.tail.lock().expect("ledger tail lock poisoned");
            if tail.last_line_sha.is_some() {
                return Ok(());
            }
        }
        self.append("genesis", note, Map::new()).map(|_| ())
    }

    /// Atomic append. Computes `prev` from the cached tail and `line_sha`
    /// over the canonical record, writes one line, and fsyncs before
    /// returning. On I/O failure the tail is not advanced.
    pub fn append(&self, event: &str, note: &str, extra: Map<String, Value>) -> MeshResult<Event> {
        let mut tail = self.tail.lock().expect("ledger tail lock poisoned");
        debug_assert!(tail.initialized);

        let ts = time::now_rfc3339();
        let mut record = Map::new();
        record.insert("ts".to_string(), Value::String(ts.clone()));
        record.insert("event".to_string(), Value::String(event.to_string()));
        record.insert("note".to_string(), Value::String(note.to_string()));
        for (k, v) in extra {
            record.insert(k, v);
        }
        let prev = match (&tail.last_line_sha, event) {
            // The genesis record itself carries no prev link.
            (None, "genesis") => None,
            (None, _) => Some("genesis".to_string()),
            (Some(sha), _) => Some(sha.clone()),
        };
        if let Some(p) = &prev {
            record.insert("prev".to_string(), Value::String(p.clone()));
        }

        let value = Value::Object(record);
        let line_sha = canonical_sha256_without(&value, "line_sha");
        let mut full = value;
        if let Some(obj) = full.as_object_mut() {
            obj.insert("line_sha".to_string(), Value::String(line_sha.clone()));
        }

        let line = canonical_json(&full);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_all()?;

        tail.last_line_sha = Some(line_sha.clone());
        Ok(Event {
            ts,
            event: event.to_string(),
            note: note.to_string(),
            prev,
            line_sha,
            record: full,
        })
    }

    /// Convenience append with JSON extension fields.
    pub fn append_json(&self, event: &str, note: &str, extra: Value) -> MeshResult<Event> {
        let map = match extra {
            Value::Object(m) => m,
            Value::Null => Map::new(),
            other => {
                let mut m = Map::new();
                m.insert("data".to_string(), other);
                m
            }
        };
        self.append(event, note, map)
    }

    /// Restartable, finite iteration over parseable events. Trailing partial
    /// lines (a crashed writer's last write) are skipped.
    pub fn iter_events(&self) -> MeshResult<Vec<Event>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        read_events(&self.path)
    }

    /// Scan from the head, recomputing every `line_sha` and checking every
    /// `prev` link. Never mutates.
    pub fn verify(&self) -> MeshResult<LedgerReport> {
        if !self.path.exists() {
            return Ok(LedgerReport {
                ok: false,
                first_bad_offset: Some(0),
                reason: Some("json_parse: ledger file missing".to_string()),
                events_checked: 0,
            });
        }
        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);
        let mut prev_line_sha: Option<String> = None;
        let mut offset = 0usize;

        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let value: Value = match serde_json::from_str(&line) {
                Ok(v) => v,
                Err(e) => {
                    return Ok(bad(offset, format!("json_parse: {}", e), offset));
                }
            };
            let Some(obj) = value.as_object() else {
                return Ok(bad(offset, "json_parse: record is not an object".to_string(), offset));
            };
            let recorded_sha = obj.get("line_sha").and_then(|v| v.as_str()).unwrap_or("");
            let computed = canonical_sha256_without(&value, "line_sha");
            if recorded_sha != computed {
                return Ok(bad(
                    offset,
                    format!(
                        "line_hash_mismatch: recorded {} computed {}",
                        recorded_sha, computed
                    ),
                    offset,
                ));
            }
            let prev_field = obj.get("prev").and_then(|v| v.as_str());
            match (&prev_line_sha, prev_field) {
                // Offset 0 accepts an absent prev (genesis record) or the
                // literal "genesis" marker.
                (None, None) | (None, Some("genesis")) => {}
                (None, Some(other)) => {
                    return Ok(bad(
                        offset,
                        format!("chain_break: unexpected prev {} at head", other),
                        offset,
                    ));
                }
                (Some(expected), Some(actual)) if expected == actual => {}
                (Some(expected), actual) => {
                    return Ok(bad(
                        offset,
                        format!(
                            "chain_break: expected prev {} got {}",
                            expected,
                            actual.unwrap_or("<missing>")
                        ),
                        offset,
                    ));
                }
            }
            prev_line_sha = Some(recorded_sha.to_string());
            offset += 1;
        }

        Ok(LedgerReport {
            ok: true,
            first_bad_offset: None,
            reason: None,
            events_checked: offset,
        })
    }
}

/// Drop bytes after the last newline. The discarded tail is an interrupted
/// write that no reader could parse; removing it keeps both appends and
/// `verify` sound after a crash.
fn truncate_partial_tail(path: &Path) -> MeshResult<()> {
    let bytes = fs::read(path)?;
    if bytes.is_empty() || bytes.ends_with(b"\n") {
        return Ok(());
    }
    let keep = bytes
        .iter()
        .rposition(|b| *b == b'\n')
        .map(|i| i + 1)
        .unwrap_or(0);
    let file = OpenOptions::new().write(true).open(path)?;
    file.set_len(keep as u64)?;
    file.sync_all()?;
    Ok(())
}

fn bad(offset: usize, reason: String, checked: usize) -> LedgerReport {
    LedgerReport {
        ok: false,
        first_bad_offset: Some(offset),
        reason: Some(reason),
        events_checked: checked,
    }
}

fn read_events(path: &Path) -> MeshResult<Vec<Event>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut events = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let Ok(value) = serde_json::from_str::<Value>(&line) else {
            continue;
        };
        let Some(obj) = value.as_object() else {
            continue;
        };
        let (Some(ts), Some(event), Some(line_sha)) = (
            obj.get("ts").and_then(|v| v.as_str()),
            obj.get("event").and_then(|v| v.as_str()),
            obj.get("line_sha").and_then(|v| v.as_str()),
        ) else {
            continue;
        };
        events.push(Event {
            ts: ts.to_string(),
            event: event.to_string(),
            note: obj
                .get("note")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string(),
            prev: obj.get("prev").and_then(|v| v.as_str()).map(String::from),
            line_sha: line_sha.to_string(),
            record: value.clone(),
        });
    }
    Ok(events)
}

impl Ledger {
    /// Current tail hash, if any event has been written.
    pub fn tail_sha(&self) -> Option<String> {
        self.tail
            .lock()
            .expect("ledger tail lock poisoned")
            .last_line_sha
            .clone()
    }
}
