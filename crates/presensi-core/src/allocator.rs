//! Roll-number allocation on top of the store's atomic append.

use crate::error::PresensiError;
use crate::roll::{next_sequence, RollNumber};
use crate::store::{Admission, AttendanceStore};
use crate::types::{NewStudent, Student};

/// Extra attempts after a roll-number collision or busy database before giving up.
const ALLOCATION_RETRIES: u32 = 1;

/// Issues `{class}-{major}-{seq}` roll numbers, one cohort sequence per (class, major).
///
/// The store reads the cohort maximum and inserts under one write lock. A
/// `StorageConflict` can still surface from a writer that bypassed that lock or
/// from a lock wait that timed out; it is retried once.
pub struct IdentifierAllocator<'a, S: ?Sized> {
    store: &'a S,
}

impl<'a, S: AttendanceStore + ?Sized> IdentifierAllocator<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Roll number the next registration in this cohort would receive.
    ///
    /// Only a preview: a concurrent registration may take it first.
    pub fn next_id(&self, class_label: &str, major: &str) -> Result<RollNumber, PresensiError> {
        let prefix = RollNumber::cohort_prefix(class_label, major);
        let current = self.store.max_roll_sequence(&prefix)?;
        Ok(RollNumber::compose(class_label, major, next_sequence(current)))
    }

    /// Insert `student` under its cohort's next roll number once `admit` accepts the catalogue.
    pub fn register(
        &self,
        student: &NewStudent,
        admit: &mut Admission<'_>,
    ) -> Result<Student, PresensiError> {
        let mut attempt = 0;
        loop {
            match self.store.append_student_next(student, admit) {
                Ok(stored) => {
                    tracing::info!(student = stored.id, roll_number = %stored.roll_number, "roll number allocated");
                    return Ok(stored);
                }
                Err(PresensiError::StorageConflict(msg)) if attempt < ALLOCATION_RETRIES => {
                    attempt += 1;
                    tracing::warn!(reason = %msg, attempt, "roll number allocation collided, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }
}
