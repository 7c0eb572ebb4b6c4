//! Parser for the `key=value` suite descriptor format.
//!
//! # Format
//!
//! ```text
//! suite_id=unit
//! test_command=cargo test --lib
//! test_image=rust:1.85
//! working_directory=/workspace
//! cpu_cores=2
//!
//! # comments and unknown keys are ignored
//! suite_id=integration
//! test_command=cargo test --test '*'
//! test_image=rust:1.85
//! working_directory=/workspace
//! cpu_cores=4
//! owner=platform-team
//! ```
//!
//! Records are separated by blank lines, a `---` line, or a `suite_id=` line
//! that shows up while the current record already has one. Each line is split
//! at its first `=`; keys and values are trimmed.
//!
//! Input without a single `suite_id=` line yields no records at all. A block
//! that holds no `key=value` line is not a record and is not counted.

use std::collections::HashSet;

use super::{SuiteConfig, SuiteRecord};

const SUITE_ID: &str = "suite_id";
const TEST_COMMAND: &str = "test_command";
const TEST_IMAGE: &str = "test_image";
const WORKING_DIRECTORY: &str = "working_directory";
const CPU_CORES: &str = "cpu_cores";

const RECORD_SEPARATOR: &str = "---";

/// Why a descriptor record could not become a [`SuiteConfig`].
///
/// Every variant carries the 0-based position of the record in the input and
/// the record's `suite_id` when it had one.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// One or more required keys are absent or have an empty value.
    #[error("record {record}: missing required field(s): {}", .fields.join(", "))]
    MissingFields {
        record: usize,
        suite_id: Option<String>,
        fields: Vec<&'static str>,
    },

    /// `cpu_cores` is not a positive integer.
    #[error("record {record}: cpu_cores must be a positive integer, got '{value}'")]
    InvalidCpuCores {
        record: usize,
        suite_id: Option<String>,
        value: String,
    },

    /// The `suite_id` was already used by an earlier valid record.
    #[error("record {record}: duplicate suite_id '{suite_id}'")]
    DuplicateSuiteId { record: usize, suite_id: String },
}

impl ParseError {
    /// Position of the offending record in the input.
    pub fn record(&self) -> usize {
        match self {
            Self::MissingFields { record, .. }
            | Self::InvalidCpuCores { record, .. }
            | Self::DuplicateSuiteId { record, .. } => *record,
        }
    }

    /// The record's `suite_id`, if it had one.
    pub fn suite_id(&self) -> Option<&str> {
        match self {
            Self::MissingFields { suite_id, .. } | Self::InvalidCpuCores { suite_id, .. } => {
                suite_id.as_deref()
            }
            Self::DuplicateSuiteId { suite_id, .. } => Some(suite_id),
        }
    }
}

/// Parses a descriptor blob into one result per record, in input order.
///
/// This is a pure transformation. Invalid records are returned as
/// [`ParseError`]s in their input position rather than dropped.
///
/// # Example
///
/// ```
/// use suitey::suite::{ParseError, parse_descriptors};
///
/// let records = parse_descriptors("suite_id=broken\ncpu_cores=zero\n");
/// assert_eq!(records.len(), 1);
/// assert!(matches!(records[0], Err(ParseError::MissingFields { .. })));
///
/// assert!(parse_descriptors("").is_empty());
/// ```
pub fn parse_descriptors(text: &str) -> Vec<SuiteRecord> {
    if !text
        .lines()
        .filter_map(split_line)
        .any(|(key, _)| key == SUITE_ID)
    {
        return Vec::new();
    }

    let mut seen_ids = HashSet::new();

    split_records(text)
        .into_iter()
        .enumerate()
        .map(|(index, fields)| {
            let suite = validate_record(index, &fields)?;
            if !seen_ids.insert(suite.suite_id.clone()) {
                return Err(ParseError::DuplicateSuiteId {
                    record: index,
                    suite_id: suite.suite_id,
                });
            }
            Ok(suite)
        })
        .collect()
}

/// Splits a line into a trimmed `(key, value)` pair.
///
/// Returns `None` for comments, lines without `=`, and lines with an empty key.
fn split_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.starts_with('#') {
        return None;
    }
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key, value.trim()))
}

type RawRecord<'a> = Vec<(&'a str, &'a str)>;

fn split_records(text: &str) -> Vec<RawRecord<'_>> {
    let mut records = Vec::new();
    let mut current: RawRecord<'_> = Vec::new();

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed == RECORD_SEPARATOR {
            if !current.is_empty() {
                records.push(std::mem::take(&mut current));
            }
            continue;
        }

        let Some((key, value)) = split_line(trimmed) else {
            continue;
        };

        if key == SUITE_ID && current.iter().any(|(k, _)| *k == SUITE_ID) {
            records.push(std::mem::take(&mut current));
        }
        current.push((key, value));
    }

    if !current.is_empty() {
        records.push(current);
    }

    records
}

fn validate_record(index: usize, fields: &[(&str, &str)]) -> Result<SuiteConfig, ParseError> {
    // Later occurrences of a key override earlier ones.
    let lookup = |name: &str| {
        fields
            .iter()
            .rev()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| *value)
            .filter(|value| !value.is_empty())
    };

    let suite_id = lookup(SUITE_ID);
    let test_command = lookup(TEST_COMMAND);
    let test_image = lookup(TEST_IMAGE);
    let working_directory = lookup(WORKING_DIRECTORY);
    let cpu_cores = lookup(CPU_CORES);

    let missing: Vec<&'static str> = [
        (SUITE_ID, suite_id.is_none()),
        (TEST_COMMAND, test_command.is_none()),
        (TEST_IMAGE, test_image.is_none()),
        (WORKING_DIRECTORY, working_directory.is_none()),
        (CPU_CORES, cpu_cores.is_none()),
    ]
    .into_iter()
    .filter_map(|(name, absent)| absent.then_some(name))
    .collect();

    let (
        Some(suite_id),
        Some(test_command),
        Some(test_image),
        Some(working_directory),
        Some(cpu_cores),
    ) = (suite_id, test_command, test_image, working_directory, cpu_cores)
    else {
        return Err(ParseError::MissingFields {
            record: index,
            suite_id: suite_id.map(str::to_string),
            fields: missing,
        });
    };

    let Some(cores) = parse_cpu_cores(cpu_cores) else {
        return Err(ParseError::InvalidCpuCores {
            record: index,
            suite_id: Some(suite_id.to_string()),
            value: cpu_cores.to_string(),
        });
    };

    Ok(SuiteConfig {
        suite_id: suite_id.to_string(),
        test_command: test_command.to_string(),
        test_image: test_image.to_string(),
        working_directory: working_directory.to_string(),
        cpu_cores: cores,
    })
}

/// Parses a positive decimal core count.
///
/// Only ASCII digits are accepted. A value too large for `usize` is still a
/// valid count and saturates, so admission rejects it as exceeding the budget.
fn parse_cpu_cores(value: &str) -> Option<usize> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    match value.parse::<usize>() {
        Ok(0) => None,
        Ok(cores) => Some(cores),
        Err(_) => Some(usize::MAX),
    }
}
