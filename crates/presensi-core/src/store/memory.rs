//! In-process [`AttendanceStore`] with the same uniqueness rules as the SQLite store.

use super::{Admission, AttendanceStore, StoreError};
use crate::error::PresensiError;
use crate::geo::default_geofence;
use crate::policy::CheckOutStatus;
use crate::roll::{max_sequence, next_roll_number};
use crate::types::{
    AttendanceCounts, AttendanceId, AttendanceRecord, CatalogueEntry, Geofence, Mark, NewAttendance,
    NewStudent, Student, StudentId,
};
use chrono::NaiveDate;
#[cfg(test)]
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

struct Inner {
    students: Vec<Student>,
    attendance: Vec<AttendanceRecord>,
    fence: Geofence,
    next_student: StudentId,
    next_record: AttendanceId,
}

pub struct MemoryStore {
    inner: Mutex<Inner>,
    default_fence: Geofence,
    #[cfg(test)]
    injected_conflicts: AtomicU32,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(default_geofence())
    }
}

impl MemoryStore {
    pub fn new(default_fence: Geofence) -> Self {
        Self {
            inner: Mutex::new(Inner {
                students: Vec::new(),
                attendance: Vec::new(),
                fence: default_fence,
                next_student: 1,
                next_record: 1,
            }),
            default_fence,
            #[cfg(test)]
            injected_conflicts: AtomicU32::new(0),
        }
    }

    /// Make the next `n` student inserts fail with `Conflict`, as if another
    /// writer had taken the roll number first.
    #[cfg(test)]
    pub fn inject_conflicts(&self, n: u32) {
        self.injected_conflicts.store(n, Ordering::SeqCst);
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    fn take_injected_conflict(&self) -> bool {
        self.injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    #[cfg(not(test))]
    fn take_injected_conflict(&self) -> bool {
        false
    }
}

impl AttendanceStore for MemoryStore {
    fn list_all_vectors(&self) -> Result<Vec<CatalogueEntry>, StoreError> {
        Ok(self.lock().students.iter().cloned().map(CatalogueEntry::from).collect())
    }

    fn max_roll_sequence(&self, prefix: &str) -> Result<Option<u32>, StoreError> {
        let inner = self.lock();
        Ok(max_sequence(inner.students.iter().map(|s| &s.roll_number), prefix))
    }

    fn append_student_next(
        &self,
        student: &NewStudent,
        admit: &mut Admission<'_>,
    ) -> Result<Student, PresensiError> {
        let mut inner = self.lock();
        let catalogue: Vec<CatalogueEntry> =
            inner.students.iter().cloned().map(CatalogueEntry::from).collect();
        admit(&catalogue)?;

        let profile = &student.profile;
        let roll_number = next_roll_number(
            &profile.class_label,
            &profile.major,
            inner.students.iter().map(|s| &s.roll_number),
        );
        if self.take_injected_conflict() {
            return Err(StoreError::Conflict(format!("roll number {roll_number} (injected)")).into());
        }
        let stored = Student {
            id: inner.next_student,
            profile: profile.clone(),
            roll_number,
            photo_path: student.photo_path.clone(),
            vector: Some(student.vector.clone()),
            registered_at: student.registered_at,
        };
        inner.next_student += 1;
        inner.students.push(stored.clone());
        Ok(stored)
    }

    fn list_students(&self) -> Result<Vec<Student>, StoreError> {
        Ok(self.lock().students.clone())
    }

    fn get_attendance_for(
        &self,
        student: StudentId,
        day: NaiveDate,
    ) -> Result<Option<AttendanceRecord>, StoreError> {
        Ok(self
            .lock()
            .attendance
            .iter()
            .find(|r| r.student_id == student && r.day == day)
            .cloned())
    }

    fn insert_attendance(&self, record: &NewAttendance) -> Result<AttendanceRecord, StoreError> {
        let mut inner = self.lock();
        if inner
            .attendance
            .iter()
            .any(|r| r.student_id == record.student_id && r.day == record.day)
        {
            return Err(StoreError::Conflict(format!(
                "attendance for student {} on {}",
                record.student_id, record.day
            )));
        }
        let stored = AttendanceRecord {
            id: inner.next_record,
            student_id: record.student_id,
            profile: record.profile.clone(),
            day: record.day,
            check_in: record.check_in.clone(),
            check_out: None,
        };
        inner.next_record += 1;
        inner.attendance.push(stored.clone());
        Ok(stored)
    }

    fn update_checkout(
        &self,
        record: AttendanceId,
        mark: &Mark<CheckOutStatus>,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        let row = inner
            .attendance
            .iter_mut()
            .find(|r| r.id == record)
            .ok_or_else(|| StoreError::NotFound(format!("attendance {record}")))?;
        if row.check_out.is_some() {
            return Ok(false);
        }
        row.check_out = Some(mark.clone());
        Ok(true)
    }

    fn list_attendance(&self, day: Option<NaiveDate>) -> Result<Vec<AttendanceRecord>, StoreError> {
        let inner = self.lock();
        let mut rows: Vec<AttendanceRecord> = inner
            .attendance
            .iter()
            .filter(|r| day.map_or(true, |d| r.day == d))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.check_in.at.cmp(&a.check_in.at).then(b.id.cmp(&a.id)));
        Ok(rows)
    }

    fn counts(&self, day: NaiveDate) -> Result<AttendanceCounts, StoreError> {
        let inner = self.lock();
        Ok(AttendanceCounts {
            students: inner.students.len() as u64,
            records: inner.attendance.len() as u64,
            records_on_day: inner.attendance.iter().filter(|r| r.day == day).count() as u64,
        })
    }

    fn get_geofence(&self) -> Result<Geofence, StoreError> {
        Ok(self.lock().fence)
    }

    fn set_geofence(&self, fence: &Geofence) -> Result<(), StoreError> {
        self.lock().fence = *fence;
        Ok(())
    }

    fn reset_all(&self) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.students.clear();
        inner.attendance.clear();
        inner.fence = self.default_fence;
        Ok(())
    }
}
