use crate::error::{BiomassError, Result};
use crate::raster::Raster;
use chrono::{DateTime, Datelike, NaiveDate, Utc};

/// Closed date interval `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl TimeWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(BiomassError::Configuration(format!(
                "time window start {} is after end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Jan 1 of `start_year` through Dec 31 of `end_year`.
    pub fn years(start_year: i32, end_year: i32) -> Result<Self> {
        let start = year_bounds(start_year)?.start;
        let end = year_bounds(end_year)?.end;
        Self::new(start, end)
    }

    /// Inclusive membership test on the UTC calendar date.
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        let date = instant.date_naive();
        self.start <= date && date <= self.end
    }
}

/// Calendar year of the raster's `time_start`.
pub fn year_of(raster: &Raster) -> Result<i32> {
    raster
        .time_start()
        .map(|t| t.year())
        .ok_or_else(|| BiomassError::MissingMetadata(raster.label()))
}

/// Jan 1 ..= Dec 31 of `year`.
pub fn year_bounds(year: i32) -> Result<TimeWindow> {
    let start = NaiveDate::from_ymd_opt(year, 1, 1);
    let end = NaiveDate::from_ymd_opt(year, 12, 31);
    match (start, end) {
        (Some(start), Some(end)) => Ok(TimeWindow { start, end }),
        _ => Err(BiomassError::Configuration(format!(
            "year {} is out of range",
            year
        ))),
    }
}
