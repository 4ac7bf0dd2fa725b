//! Process table records and snapshots.
//!
//! A [`ProcessSnapshot`] is built from the textual output of the system
//! process listing (`ps aux`). Each row has eleven whitespace separated
//! columns; the last one (`COMMAND`) may itself contain whitespace and is
//! kept verbatim.

use chrono::{Local, SecondsFormat};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Number of columns in a `ps aux` row.
pub const PS_COLUMNS: usize = 11;

// ============================================================================
// ProcessRecord
// ============================================================================

/// One row of the process table.
///
/// Field order matches the `ps aux` column order and is the order used by
/// every serialized format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub user: String,
    pub pid: u32,
    /// CPU percentage exactly as the OS reported it (e.g. "0.3")
    pub cpu: String,
    /// Memory percentage exactly as the OS reported it
    pub mem: String,
    /// Virtual memory size in KB
    pub vsz: u64,
    /// Resident set size in KB
    pub rss: u64,
    pub tty: String,
    pub stat: String,
    pub start: String,
    pub time: String,
    /// Full command line, embedded whitespace preserved
    pub command: String,
}

impl ProcessRecord {
    /// Field names in column order.
    pub const FIELDS: [&'static str; PS_COLUMNS] = [
        "user", "pid", "cpu", "mem", "vsz", "rss", "tty", "stat", "start", "time", "command",
    ];

    /// Parses a single `ps aux` row.
    ///
    /// Returns `None` for rows with fewer than eleven columns or with a
    /// non-numeric `pid`, `vsz` or `rss`.
    pub fn parse_line(line: &str) -> Option<Self> {
        let [user, pid, cpu, mem, vsz, rss, tty, stat, start, time, command] =
            split_columns(line)?;

        Some(Self {
            user: user.to_string(),
            pid: pid.parse().ok()?,
            cpu: cpu.to_string(),
            mem: mem.to_string(),
            vsz: vsz.parse().ok()?,
            rss: rss.parse().ok()?,
            tty: tty.to_string(),
            stat: stat.to_string(),
            start: start.to_string(),
            time: time.to_string(),
            command: command.to_string(),
        })
    }

    /// Returns `(name, value)` pairs in column order, values in textual form.
    pub fn fields(&self) -> [(&'static str, String); PS_COLUMNS] {
        [
            ("user", self.user.clone()),
            ("pid", self.pid.to_string()),
            ("cpu", self.cpu.clone()),
            ("mem", self.mem.clone()),
            ("vsz", self.vsz.to_string()),
            ("rss", self.rss.to_string()),
            ("tty", self.tty.clone()),
            ("stat", self.stat.clone()),
            ("start", self.start.clone()),
            ("time", self.time.clone()),
            ("command", self.command.clone()),
        ]
    }
}

/// Splits a row into exactly [`PS_COLUMNS`] columns.
///
/// The first ten columns are whitespace delimited; the eleventh is the rest
/// of the line with only surrounding whitespace removed.
fn split_columns(line: &str) -> Option<[&str; PS_COLUMNS]> {
    let mut columns = [""; PS_COLUMNS];
    let mut rest = line.trim();

    for slot in columns.iter_mut().take(PS_COLUMNS - 1) {
        let end = rest.find(char::is_whitespace)?;
        let (head, tail) = rest.split_at(end);
        *slot = head;
        rest = tail.trim_start();
    }

    if rest.is_empty() {
        return None;
    }
    if let Some(last) = columns.last_mut() {
        *last = rest;
    }

    Some(columns)
}

// ============================================================================
// ProcessSnapshot
// ============================================================================

/// Timestamped capture of the whole process table.
///
/// Built once per request and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSnapshot {
    /// ISO-8601 creation instant (local time with offset)
    pub timestamp: String,

    /// Records in the order the OS listed them
    pub processes: Vec<ProcessRecord>,
}

impl ProcessSnapshot {
    /// Creates a snapshot stamped with the current local time.
    pub fn new(processes: Vec<ProcessRecord>) -> Self {
        Self::with_timestamp(
            Local::now().to_rfc3339_opts(SecondsFormat::Micros, false),
            processes,
        )
    }

    /// Creates a snapshot with an explicit timestamp.
    pub fn with_timestamp(timestamp: impl Into<String>, processes: Vec<ProcessRecord>) -> Self {
        Self {
            timestamp: timestamp.into(),
            processes,
        }
    }

    /// Builds a snapshot from raw `ps aux` output.
    ///
    /// The first line is the column header and is skipped. Malformed rows are
    /// dropped.
    pub fn from_ps_output(output: &str) -> Self {
        Self::new(parse_ps_output(output))
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.processes.len()
    }

    /// Returns true if the snapshot holds no records.
    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Looks up a record by pid.
    pub fn find(&self, pid: u32) -> Option<&ProcessRecord> {
        self.processes.iter().find(|p| p.pid == pid)
    }
}

/// Parses `ps aux` output into records, skipping the header line.
pub fn parse_ps_output(output: &str) -> Vec<ProcessRecord> {
    output
        .lines()
        .skip(1)
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let record = ProcessRecord::parse_line(line);
            if record.is_none() {
                debug!(line, "Skipping malformed process row");
            }
            record
        })
        .collect()
}
