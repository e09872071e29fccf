//! Storage boundary for the student catalogue, attendance records and geofence.

use crate::error::PresensiError;
use crate::policy::CheckOutStatus;
use crate::types::{
    AttendanceCounts, AttendanceId, AttendanceRecord, CatalogueEntry, Geofence, Mark, NewAttendance,
    NewStudent, Student, StudentId,
};
use chrono::NaiveDate;
use thiserror::Error;

pub mod memory;

#[derive(Error, Debug)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write (roll number, or student + day).
    #[error("unique constraint violated: {0}")]
    Conflict(String),
    /// Another writer held the database lock past the busy timeout.
    #[error("database busy: {0}")]
    Busy(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("backend: {0}")]
    Backend(String),
}

/// Veto over a registration, run against the catalogue while the store holds its write lock.
pub type Admission<'a> = dyn FnMut(&[CatalogueEntry]) -> Result<(), PresensiError> + 'a;

/// Persistent catalogue shared by every request.
///
/// Implementations must enforce uniqueness of roll numbers and of
/// (student, day) attendance at the storage layer, reporting violations as
/// [`StoreError::Conflict`].
pub trait AttendanceStore: Send + Sync {
    /// Every registered student with its vector (if any), in registration order.
    fn list_all_vectors(&self) -> Result<Vec<CatalogueEntry>, StoreError>;

    /// Highest numeric sequence among roll numbers starting with `prefix`.
    fn max_roll_sequence(&self, prefix: &str) -> Result<Option<u32>, StoreError>;

    /// Insert `student` under the next roll number of its (class, major) cohort.
    ///
    /// Reading the catalogue, running `admit`, picking the sequence and the
    /// insert form one write: no other writer, in this process or another,
    /// can interleave. An `admit` error aborts with nothing written.
    fn append_student_next(
        &self,
        student: &NewStudent,
        admit: &mut Admission<'_>,
    ) -> Result<Student, PresensiError>;

    fn list_students(&self) -> Result<Vec<Student>, StoreError>;

    fn get_attendance_for(
        &self,
        student: StudentId,
        day: NaiveDate,
    ) -> Result<Option<AttendanceRecord>, StoreError>;

    /// Create the day's record; `Conflict` when one already exists.
    fn insert_attendance(&self, record: &NewAttendance) -> Result<AttendanceRecord, StoreError>;

    /// Write check-out fields if still empty. `Ok(false)` when they were already set.
    fn update_checkout(
        &self,
        record: AttendanceId,
        mark: &Mark<CheckOutStatus>,
    ) -> Result<bool, StoreError>;

    /// Records newest first, optionally restricted to one day.
    fn list_attendance(&self, day: Option<NaiveDate>) -> Result<Vec<AttendanceRecord>, StoreError>;

    fn counts(&self, day: NaiveDate) -> Result<AttendanceCounts, StoreError>;

    fn get_geofence(&self) -> Result<Geofence, StoreError>;

    fn set_geofence(&self, fence: &Geofence) -> Result<(), StoreError>;

    /// Delete every student and attendance record and restore the default geofence.
    fn reset_all(&self) -> Result<(), StoreError>;
}
