use std::fmt;
use std::time::{Duration, SystemTime};

/// MS-DOS timestamp as stored in ZIP headers (two little-endian u16 fields).
///
/// time: bits 0-4 seconds/2, bits 5-10 minutes, bits 11-15 hours
/// date: bits 0-4 day, bits 5-8 month, bits 9-15 years since 1980
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DosDateTime {
    pub time: u16,
    pub date: u16,
}

impl DosDateTime {
    pub fn new(time: u16, date: u16) -> Self {
        Self { time, date }
    }

    pub fn year(&self) -> u32 {
        ((self.date >> 9) & 0x7f) as u32 + 1980
    }

    pub fn month(&self) -> u32 {
        ((self.date >> 5) & 0x0f) as u32
    }

    pub fn day(&self) -> u32 {
        (self.date & 0x1f) as u32
    }

    pub fn hour(&self) -> u32 {
        ((self.time >> 11) & 0x1f) as u32
    }

    pub fn minute(&self) -> u32 {
        ((self.time >> 5) & 0x3f) as u32
    }

    pub fn second(&self) -> u32 {
        ((self.time & 0x1f) as u32) << 1
    }

    /// Interpreted as UTC; ZIP timestamps carry no zone.
    /// Returns None for impossible dates (month or day zero, e.g. an unset field).
    pub fn to_system_time(&self) -> Option<SystemTime> {
        let (month, day) = (self.month(), self.day());
        if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
            return None;
        }

        let days = days_from_epoch(self.year(), month, day);
        let secs = days as u64 * 86400
            + self.hour() as u64 * 3600
            + self.minute() as u64 * 60
            + self.second() as u64;

        Some(SystemTime::UNIX_EPOCH + Duration::from_secs(secs))
    }
}

impl fmt::Display for DosDateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year(),
            self.month(),
            self.day(),
            self.hour(),
            self.minute(),
            self.second()
        )
    }
}

fn days_from_epoch(year: u32, month: u32, day: u32) -> i64 {
    // Howard Hinnant's algorithm for days since 1970-01-01.
    let y = if month <= 2 {
        year as i64 - 1
    } else {
        year as i64
    };
    let era = y.div_euclid(400);
    let yoe = y.rem_euclid(400) as u64;
    let m = month as i64;
    let doy = if m > 2 {
        (153 * (m - 3) + 2) / 5 + day as i64 - 1
    } else {
        (153 * (m + 9) + 2) / 5 + day as i64 - 1
    };
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy as u64;
    era * 146097 + doe as i64 - 719468
}
