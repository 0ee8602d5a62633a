use chrono::{DateTime, Days, Months, NaiveDate, Utc};

/// How precisely a job date was written, which decides how its end bound is widened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateGranularity {
    /// `MMYYYY`
    Month,
    /// `YYYY-MM-DD`
    Day,
    /// RFC 3339, with or without fractional seconds
    Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobDate {
    pub at: DateTime<Utc>,
    pub granularity: DateGranularity,
}

impl JobDate {
    pub fn parse(value: &str) -> Option<Self> {
        if let Some(at) = parse_month_year(value) {
            return Some(Self {
                at,
                granularity: DateGranularity::Month,
            });
        }
        if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
            return Some(Self {
                at: date.and_hms_opt(0, 0, 0)?.and_utc(),
                granularity: DateGranularity::Day,
            });
        }
        DateTime::parse_from_rfc3339(value).ok().map(|at| Self {
            at: at.with_timezone(&Utc),
            granularity: DateGranularity::Instant,
        })
    }

    /// The exclusive upper bound this date denotes when used as a window end:
    /// a month covers the whole month, a day covers the whole day, an instant is taken as-is.
    pub fn exclusive_end(&self) -> Option<DateTime<Utc>> {
        match self.granularity {
            DateGranularity::Month => self.at.checked_add_months(Months::new(1)),
            DateGranularity::Day => self.at.checked_add_days(Days::new(1)),
            DateGranularity::Instant => Some(self.at),
        }
    }
}

// MMYYYY, e.g. "012025" is January 2025
fn parse_month_year(value: &str) -> Option<DateTime<Utc>> {
    if value.len() != 6 || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let month: u32 = value[..2].parse().ok()?;
    let year: i32 = value[2..].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, 1)?
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
}

/// Half-open `[start, end)` interval of object modification times a job covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ArchiveWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn from_dates(start: &JobDate, end: &JobDate) -> Option<Self> {
        Some(Self {
            start: start.at,
            end: end.exclusive_end()?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }
}
