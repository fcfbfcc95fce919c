use crate::error::{Origin, Result, SourceError};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::PathBuf;

/// One executed query job, as exported from `INFORMATION_SCHEMA.JOBS_BY_*`.
///
/// Field names deserialize from both the snake_case spelling used on output and
/// the PascalCase column aliases produced by the export query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryJob {
    #[serde(alias = "CreationTime", deserialize_with = "timestamp::deserialize")]
    pub creation_time: DateTime<Utc>,
    #[serde(alias = "ProjectId")]
    pub project_id: String,
    #[serde(alias = "ProjectNumber", deserialize_with = "int64::deserialize")]
    pub project_number: i64,
    #[serde(alias = "UserEmail")]
    pub user_email: String,
    #[serde(alias = "JobId")]
    pub job_id: String,
    #[serde(alias = "JobType")]
    pub job_type: String,
    #[serde(alias = "StatementType", default)]
    pub statement_type: Option<String>,
    #[serde(alias = "Priority")]
    pub priority: String,
    #[serde(alias = "StartTime", deserialize_with = "timestamp::deserialize")]
    pub start_time: DateTime<Utc>,
    #[serde(alias = "EndTime", deserialize_with = "timestamp::deserialize")]
    pub end_time: DateTime<Utc>,
    #[serde(alias = "Query")]
    pub query: String,
    #[serde(alias = "DestinationTable", default)]
    pub destination_table: Option<String>,
    #[serde(alias = "State")]
    pub state: String,
    #[serde(alias = "ReservationId", default)]
    pub reservation_id: Option<String>,
    #[serde(alias = "TotalBytesProcessed", default, deserialize_with = "int64::deserialize_optional")]
    pub total_bytes_processed: Option<i64>,
    #[serde(alias = "TotalSlotMs", default, deserialize_with = "int64::deserialize_optional")]
    pub total_slot_ms: Option<i64>,
}

impl QueryJob {
    /// Bytes processed, counting an absent value as zero.
    pub fn bytes_processed(&self) -> i64 {
        self.total_bytes_processed.unwrap_or(0)
    }

    pub fn slot_ms(&self) -> i64 {
        self.total_slot_ms.unwrap_or(0)
    }
}

/// The `bq` CLI renders INT64 columns as JSON strings, hand-written exports use numbers.
mod int64 {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(i64),
        Text(String),
    }

    impl Repr {
        fn into_i64<E: Error>(self) -> Result<i64, E> {
            match self {
                Repr::Number(n) => Ok(n),
                Repr::Text(s) => s
                    .trim()
                    .parse()
                    .map_err(|_| E::custom(format!("invalid integer {:?}", s))),
            }
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        Repr::deserialize(deserializer)?.into_i64()
    }

    pub fn deserialize_optional<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
        Option::<Repr>::deserialize(deserializer)?
            .map(Repr::into_i64)
            .transpose()
    }
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS[.f][ UTC]` and epoch seconds.
mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Seconds(f64),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Seconds(secs) => from_epoch_seconds(secs),
            Repr::Text(s) => parse(&s),
        }
        .ok_or_else(|| D::Error::custom("invalid timestamp"))
    }

    pub(super) fn parse(s: &str) -> Option<DateTime<Utc>> {
        let s = s.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(dt.with_timezone(&Utc));
        }
        let naive = s.strip_suffix(" UTC").unwrap_or(s);
        for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
            if let Ok(dt) = NaiveDateTime::parse_from_str(naive, format) {
                return Some(dt.and_utc());
            }
        }
        s.parse::<f64>().ok().and_then(from_epoch_seconds)
    }

    fn from_epoch_seconds(secs: f64) -> Option<DateTime<Utc>> {
        if !secs.is_finite() {
            return None;
        }
        let whole = secs.floor();
        let nanos = (((secs - whole) * 1e9).round() as u32).min(999_999_999);
        DateTime::from_timestamp(whole as i64, nanos)
    }
}

enum Mode {
    Detect,
    Lines,
    Array(std::vec::IntoIter<QueryJob>),
    Done,
}

/// Reads query jobs from a JSON array or newline-delimited JSON stream.
pub struct JobReader<R> {
    reader: R,
    origin: Origin,
    line_no: usize,
    read_buffer: String,
    mode: Mode,
}

impl<R: BufRead> JobReader<R> {
    /// Creates a new `JobReader`; `origin` is only used in error messages.
    pub fn new(reader: R, origin: Origin) -> Self {
        Self {
            reader,
            origin,
            line_no: 0,
            read_buffer: String::new(),
            mode: Mode::Detect,
        }
    }

    fn io_error(&self, source: io::Error) -> SourceError {
        SourceError::Io { origin: self.origin.clone(), source }
    }

    /// Skips leading whitespace and picks array or line mode from the first byte.
    fn detect_mode(&mut self) -> Result<Mode, SourceError> {
        loop {
            let buf = match self.reader.fill_buf() {
                Ok(buf) => buf,
                Err(source) => {
                    return Err(SourceError::Io { origin: self.origin.clone(), source });
                }
            };
            if buf.is_empty() {
                return Ok(Mode::Done);
            }
            let skip = buf.iter().take_while(|b| b.is_ascii_whitespace()).count();
            let first = buf.get(skip).copied();
            self.line_no += buf[..skip].iter().filter(|&&b| b == b'\n').count();
            self.reader.consume(skip);

            match first {
                Some(b'[') => return self.read_array(),
                Some(_) => return Ok(Mode::Lines),
                None => continue,
            }
        }
    }

    fn read_array(&mut self) -> Result<Mode, SourceError> {
        let mut text = String::new();
        if let Err(e) = self.reader.read_to_string(&mut text) {
            return Err(self.io_error(e));
        }
        let jobs: Vec<QueryJob> = serde_json::from_str(&text).map_err(|source| SourceError::Malformed {
            origin: self.origin.clone(),
            line: self.line_no + source.line(),
            source,
        })?;
        debug!("{}: read {} jobs from JSON array", self.origin, jobs.len());
        Ok(Mode::Array(jobs.into_iter()))
    }

    fn next_line(&mut self) -> Option<Result<QueryJob, SourceError>> {
        loop {
            self.read_buffer.clear();
            match self.reader.read_line(&mut self.read_buffer) {
                Ok(0) => {
                    self.mode = Mode::Done;
                    return None;
                }
                Ok(_) => {}
                Err(e) => {
                    self.mode = Mode::Done;
                    return Some(Err(self.io_error(e)));
                }
            }
            self.line_no += 1;

            let trimmed = self.read_buffer.trim();
            if trimmed.is_empty() {
                continue;
            }
            return Some(serde_json::from_str(trimmed).map_err(|source| SourceError::Malformed {
                origin: self.origin.clone(),
                line: self.line_no,
                source,
            }));
        }
    }
}

impl<R: BufRead> Iterator for JobReader<R> {
    type Item = Result<QueryJob, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Mode::Detect = self.mode {
            match self.detect_mode() {
                Ok(mode) => self.mode = mode,
                Err(e) => {
                    self.mode = Mode::Done;
                    return Some(Err(e));
                }
            }
        }
        if let Mode::Lines = self.mode {
            return self.next_line();
        }
        match &mut self.mode {
            Mode::Array(jobs) => jobs.next().map(Ok),
            _ => None,
        }
    }
}

/// Convenience function to create a `JobReader`.
pub fn read_jobs<R: BufRead>(reader: R, origin: Origin) -> JobReader<R> {
    JobReader::new(reader, origin)
}

/// Loads every job from `files` in order, or from stdin when `files` is empty.
///
/// The first unreadable file or malformed record aborts the whole load.
pub fn load_jobs(files: &[PathBuf]) -> Result<Vec<QueryJob>> {
    let mut jobs = Vec::new();
    if files.is_empty() {
        let stdin = io::stdin();
        for job in read_jobs(stdin.lock(), Origin::Stdin) {
            jobs.push(job?);
        }
    } else {
        for path in files {
            let origin = Origin::File(path.clone());
            let file = File::open(path).map_err(|source| SourceError::Io {
                origin: origin.clone(),
                source,
            })?;
            for job in read_jobs(BufReader::new(file), origin) {
                jobs.push(job?);
            }
        }
    }

    let mut seen = HashSet::new();
    for job in &jobs {
        if !seen.insert(job.job_id.as_str()) {
            warn!("duplicate job id {} in input", job.job_id);
        }
    }
    debug!("loaded {} jobs", jobs.len());
    Ok(jobs)
}
