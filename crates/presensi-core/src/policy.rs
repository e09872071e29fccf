//! Attendance windows, geofence classification and the per-day state machine.
//!
//! Each (student, local day) moves `None → CheckedIn → CheckedInAndOut`.
//! Check-in may arrive late (it is labelled, not refused) but never before the
//! window opens. Check-out is refused outside its window and has no lateness.

use crate::error::{MarkConflict, PresensiError};
use crate::types::{AttendanceRecord, Coordinates, Geofence};
use chrono::{DateTime, FixedOffset, NaiveTime, Offset, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Local offset of the school (WIB, UTC+7).
pub const DEFAULT_UTC_OFFSET_HOURS: i32 = 7;

const ON_TIME: &str = "ON_TIME";
const LATE: &str = "LATE";
const OUT_OF_AREA: &str = "OUT_OF_AREA";

/// Inclusive local-time range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AttendanceWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl AttendanceWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Result<Self, PresensiError> {
        if end < start {
            return Err(PresensiError::InvalidInput(format!(
                "window end {} precedes start {}",
                end.format("%H:%M"),
                start.format("%H:%M")
            )));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, t: NaiveTime) -> bool {
        self.start <= t && t <= self.end
    }
}

impl fmt::Display for AttendanceWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start.format("%H:%M"), self.end.format("%H:%M"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceEvent {
    CheckIn,
    CheckOut,
}

impl fmt::Display for AttendanceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AttendanceEvent::CheckIn => "check-in",
            AttendanceEvent::CheckOut => "check-out",
        })
    }
}

/// Outcome label of an accepted check-in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckInStatus {
    OnTime,
    Late,
    OutOfArea { distance_m: f64 },
}

/// Outcome label of an accepted check-out.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckOutStatus {
    OnTime,
    OutOfArea { distance_m: f64 },
}

fn write_out_of_area(f: &mut fmt::Formatter<'_>, distance_m: f64) -> fmt::Result {
    write!(f, "{OUT_OF_AREA} ({distance_m:.0}m)")
}

/// Parses `OUT_OF_AREA (123m)`.
fn parse_out_of_area(label: &str) -> Option<f64> {
    label
        .strip_prefix(OUT_OF_AREA)?
        .trim()
        .strip_prefix('(')?
        .strip_suffix("m)")?
        .parse()
        .ok()
}

impl fmt::Display for CheckInStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckInStatus::OnTime => f.write_str(ON_TIME),
            CheckInStatus::Late => f.write_str(LATE),
            CheckInStatus::OutOfArea { distance_m } => write_out_of_area(f, *distance_m),
        }
    }
}

impl FromStr for CheckInStatus {
    type Err = String;

    fn from_str(label: &str) -> Result<Self, Self::Err> {
        match label {
            ON_TIME => Ok(CheckInStatus::OnTime),
            LATE => Ok(CheckInStatus::Late),
            other => parse_out_of_area(other)
                .map(|distance_m| CheckInStatus::OutOfArea { distance_m })
                .ok_or_else(|| format!("unknown check-in status {other:?}")),
        }
    }
}

impl fmt::Display for CheckOutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckOutStatus::OnTime => f.write_str(ON_TIME),
            CheckOutStatus::OutOfArea { distance_m } => write_out_of_area(f, *distance_m),
        }
    }
}

impl FromStr for CheckOutStatus {
    type Err = String;

    fn from_str(label: &str) -> Result<Self, Self::Err> {
        match label {
            ON_TIME => Ok(CheckOutStatus::OnTime),
            other => parse_out_of_area(other)
                .map(|distance_m| CheckOutStatus::OutOfArea { distance_m })
                .ok_or_else(|| format!("unknown check-out status {other:?}")),
        }
    }
}

/// Attendance progress of one student on one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayState {
    None,
    CheckedIn,
    CheckedInAndOut,
}

impl DayState {
    pub fn of(record: Option<&AttendanceRecord>) -> Self {
        match record {
            None => DayState::None,
            Some(r) if r.check_out.is_none() => DayState::CheckedIn,
            Some(_) => DayState::CheckedInAndOut,
        }
    }

    /// State after a check-in, or the conflict that forbids it.
    pub fn check_in(self) -> Result<DayState, MarkConflict> {
        match self {
            DayState::None => Ok(DayState::CheckedIn),
            DayState::CheckedIn | DayState::CheckedInAndOut => Err(MarkConflict::AlreadyCheckedIn),
        }
    }

    /// State after a check-out, or the conflict that forbids it.
    pub fn check_out(self) -> Result<DayState, MarkConflict> {
        match self {
            DayState::None => Err(MarkConflict::NotCheckedIn),
            DayState::CheckedIn => Ok(DayState::CheckedInAndOut),
            DayState::CheckedInAndOut => Err(MarkConflict::AlreadyCheckedOut),
        }
    }
}

/// Time-of-day and location rules for attendance events.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttendancePolicy {
    pub check_in: AttendanceWindow,
    pub check_out: AttendanceWindow,
    pub utc_offset: FixedOffset,
}

fn hm(hour: u32, min: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, min, 0).unwrap_or(NaiveTime::MIN)
}

impl Default for AttendancePolicy {
    fn default() -> Self {
        Self {
            check_in: AttendanceWindow {
                start: hm(6, 0),
                end: hm(7, 30),
            },
            check_out: AttendanceWindow {
                start: hm(10, 0),
                end: hm(17, 0),
            },
            utc_offset: FixedOffset::east_opt(DEFAULT_UTC_OFFSET_HOURS * 3600)
                .unwrap_or(Utc.fix()),
        }
    }
}

impl AttendancePolicy {
    /// Convert a UTC instant into school-local time.
    pub fn to_local(&self, now: DateTime<Utc>) -> DateTime<FixedOffset> {
        now.with_timezone(&self.utc_offset)
    }

    /// Label a check-in made at local time `t` from `position`.
    ///
    /// Lateness overrides location: anything after the window closes is `Late`.
    pub fn classify_check_in(
        &self,
        t: NaiveTime,
        position: &Coordinates,
        fence: &Geofence,
    ) -> Result<CheckInStatus, PresensiError> {
        if t < self.check_in.start {
            return Err(PresensiError::OutsideWindow {
                event: AttendanceEvent::CheckIn,
                window: self.check_in,
                local_time: t,
            });
        }
        if t > self.check_in.end {
            return Ok(CheckInStatus::Late);
        }
        let distance_m = fence.distance_to(position);
        if distance_m <= fence.radius_m {
            Ok(CheckInStatus::OnTime)
        } else {
            Ok(CheckInStatus::OutOfArea { distance_m })
        }
    }

    /// Label a check-out made at local time `t` from `position`.
    pub fn classify_check_out(
        &self,
        t: NaiveTime,
        position: &Coordinates,
        fence: &Geofence,
    ) -> Result<CheckOutStatus, PresensiError> {
        if !self.check_out.contains(t) {
            return Err(PresensiError::OutsideWindow {
                event: AttendanceEvent::CheckOut,
                window: self.check_out,
                local_time: t,
            });
        }
        let distance_m = fence.distance_to(position);
        if distance_m <= fence.radius_m {
            Ok(CheckOutStatus::OnTime)
        } else {
            Ok(CheckOutStatus::OutOfArea { distance_m })
        }
    }
}
