use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bail;
use crate::error::{ErrorKind, MedallionError, MedallionResult};

const SECONDS_FORMAT: &str = "%Y%m%dT%H%M%S";

/// Length of `yyyyMMddTHHmmss`.
const SECONDS_LEN: usize = 15;

/// Run timestamp in the `yyyyMMddTHHmmssSSS` form.
///
/// The text is kept as given: it is the value written to `_bronze_load_ts` and the Silver
/// audit columns. Because the format is fixed-width, text order equals time order, so the
/// seconds-only form `yyyyMMddTHHmmss` is also accepted and sorts before any millisecond
/// suffix of the same second.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RunTimestamp {
    raw: String,
    datetime: NaiveDateTime,
}

impl RunTimestamp {
    pub fn parse(raw: &str) -> MedallionResult<Self> {
        let raw = raw.trim();
        if !raw.is_ascii() || raw.len() < SECONDS_LEN {
            bail!(
                ErrorKind::ConversionError,
                "Invalid run timestamp",
                format!("expected yyyyMMddTHHmmssSSS, got '{raw}'")
            );
        }

        let (seconds, millis) = raw.split_at(SECONDS_LEN);
        if millis.len() > 3 || !millis.chars().all(|c| c.is_ascii_digit()) {
            bail!(
                ErrorKind::ConversionError,
                "Invalid run timestamp",
                format!("expected yyyyMMddTHHmmssSSS, got '{raw}'")
            );
        }

        let datetime = NaiveDateTime::parse_from_str(seconds, SECONDS_FORMAT)?;
        let millis: i64 = if millis.is_empty() {
            0
        } else {
            format!("{millis:0<3}").parse()?
        };

        Ok(Self {
            raw: raw.to_string(),
            datetime: datetime + chrono::Duration::milliseconds(millis),
        })
    }

    /// Current UTC time with millisecond precision.
    pub fn now() -> Self {
        let now = Utc::now().naive_utc();
        Self {
            raw: now.format("%Y%m%dT%H%M%S%3f").to_string(),
            datetime: now,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn datetime(&self) -> NaiveDateTime {
        self.datetime
    }

    /// Calendar date of the run.
    pub fn run_date(&self) -> NaiveDate {
        self.datetime.date()
    }

    /// `yyyy`, `mm` and `dd` segments of the export path.
    pub fn date_segments(&self) -> (&str, &str, &str) {
        (&self.raw[0..4], &self.raw[4..6], &self.raw[6..8])
    }
}

impl PartialEq for RunTimestamp {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for RunTimestamp {}

impl Hash for RunTimestamp {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl PartialOrd for RunTimestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RunTimestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.raw.cmp(&other.raw)
    }
}

impl fmt::Display for RunTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for RunTimestamp {
    type Err = MedallionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RunTimestamp::parse(s)
    }
}

impl TryFrom<String> for RunTimestamp {
    type Error = MedallionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        RunTimestamp::parse(&value)
    }
}

impl From<RunTimestamp> for String {
    fn from(value: RunTimestamp) -> Self {
        value.raw
    }
}
