//! Registration and attendance pipelines.
//!
//! Each call runs upload → encode → match → decide → persist to completion on
//! the calling thread. Nothing is written until every check has passed.

use crate::allocator::IdentifierAllocator;
use crate::clock::Clock;
use crate::encoder::{exactly_one_face, FaceEncoder};
use crate::error::{MarkConflict, PresensiError};
use crate::matcher::{DuplicateGuard, FaceMatcher, NearestFace};
use crate::photo::{Photo, TempPhoto, Upload};
use crate::policy::{CheckInStatus, DayState};
use crate::roll::RollNumber;
use crate::settings::Settings;
use crate::store::{AttendanceStore, StoreError};
use crate::types::{
    AttendanceCounts, AttendanceRecord, CatalogueEntry, Coordinates, FaceVector, Geofence, Mark,
    NewAttendance, NewStudent, Student, StudentProfile,
};
use chrono::NaiveDate;
use serde::Serialize;

/// Accepted check-in or check-out.
#[derive(Debug, Clone, Serialize)]
pub struct AttendanceReceipt {
    pub record: AttendanceRecord,
    pub roll_number: RollNumber,
    /// Face distance of the recognised student.
    pub match_distance: f32,
    /// Distance from the geofence center in meters.
    pub distance_m: f64,
}

/// Admin dashboard figures for one local day.
#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub day: NaiveDate,
    #[serde(flatten)]
    pub counts: AttendanceCounts,
    /// Share of students with a record on `day`, rounded to two decimals.
    pub attendance_rate_pct: f64,
}

pub struct Presensi<S, E, C> {
    store: S,
    encoder: E,
    clock: C,
    settings: Settings,
    matcher: FaceMatcher,
    guard: DuplicateGuard,
}

fn already(face: &NearestFace, conflict: MarkConflict) -> PresensiError {
    PresensiError::AlreadyMarked {
        name: face.profile.name.clone(),
        conflict,
    }
}

impl<S: AttendanceStore, E: FaceEncoder, C: Clock> Presensi<S, E, C> {
    pub fn new(store: S, encoder: E, clock: C, settings: Settings) -> Self {
        Self {
            matcher: FaceMatcher::new(settings.recognition_threshold),
            guard: DuplicateGuard::new(settings.duplicate_threshold),
            store,
            encoder,
            clock,
            settings,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Current school-local calendar day.
    pub fn today(&self) -> NaiveDate {
        self.settings.policy.to_local(self.clock.now_utc()).date_naive()
    }

    /// Validate, store temporarily and encode an upload. Exactly one face is required.
    fn accept_upload(&self, tag: &str, upload: &Upload) -> Result<(TempPhoto, FaceVector), PresensiError> {
        upload.validate(self.settings.max_upload_bytes)?;
        let temp = TempPhoto::create(&self.settings.upload_dir, tag, upload)?;
        let photo = Photo::decode(&upload.bytes)?;
        let faces = self.encoder.encode(&photo)?;
        tracing::debug!(
            faces = faces.len(),
            width = photo.width(),
            height = photo.height(),
            "photo encoded"
        );
        let vector = exactly_one_face(faces)?;
        Ok((temp, vector))
    }

    /// Register a student: photo, metadata and vector are committed together.
    ///
    /// Rejects photos without exactly one face, then faces already in the catalogue.
    pub fn register(&self, profile: StudentProfile, upload: &Upload) -> Result<Student, PresensiError> {
        tracing::info!(name = %profile.name, class = %profile.class_label, major = %profile.major, "registration started");
        let (temp, vector) = self.accept_upload("register", upload)?;

        let photo = temp.persist_into(&self.settings.faces_dir)?;
        let new = NewStudent {
            profile,
            photo_path: photo.path().to_path_buf(),
            vector,
            registered_at: self.clock.now_utc(),
        };
        // The duplicate check runs inside the store's write, so two uploads of
        // one face cannot both pass it.
        let guard = self.guard;
        let student = IdentifierAllocator::new(&self.store).register(
            &new,
            &mut |catalogue: &[CatalogueEntry]| guard.check(&new.vector, catalogue),
        )?;
        photo.commit();

        tracing::info!(
            student = student.id,
            roll_number = %student.roll_number,
            photo = %student.photo_path.display(),
            "registration complete"
        );
        Ok(student)
    }

    fn recognise(&self, tag: &str, upload: &Upload) -> Result<NearestFace, PresensiError> {
        let (_temp, probe) = self.accept_upload(tag, upload)?;
        let catalogue = self.store.list_all_vectors()?;
        self.matcher.identify(&probe, &catalogue)
    }

    /// Record today's arrival for the student in the photo.
    pub fn check_in(&self, upload: &Upload, position: Coordinates) -> Result<AttendanceReceipt, PresensiError> {
        let face = self.recognise("absen", upload)?;
        let fence = self.store.get_geofence()?;
        let now = self.settings.policy.to_local(self.clock.now_utc());
        let status = self
            .settings
            .policy
            .classify_check_in(now.time(), &position, &fence)?;
        let day = now.date_naive();

        let existing = self.store.get_attendance_for(face.id, day)?;
        DayState::of(existing.as_ref())
            .check_in()
            .map_err(|conflict| already(&face, conflict))?;

        let new = NewAttendance {
            student_id: face.id,
            profile: face.profile.clone(),
            day,
            check_in: Mark {
                position,
                status,
                at: now,
            },
        };
        let record = match self.store.insert_attendance(&new) {
            Ok(record) => record,
            // Lost the race against a concurrent check-in for the same day.
            Err(StoreError::Conflict(_)) => return Err(already(&face, MarkConflict::AlreadyCheckedIn)),
            Err(e) => return Err(e.into()),
        };

        let distance_m = fence.distance_to(&position);
        match status {
            CheckInStatus::OnTime => tracing::info!(student = face.id, distance_m, "checked in on time"),
            CheckInStatus::Late => tracing::info!(student = face.id, at = %now.time(), "checked in late"),
            CheckInStatus::OutOfArea { .. } => {
                tracing::warn!(student = face.id, distance_m, radius_m = fence.radius_m, "checked in outside area")
            }
        }
        Ok(AttendanceReceipt {
            record,
            roll_number: face.roll_number,
            match_distance: face.distance,
            distance_m,
        })
    }

    /// Record today's departure for the student in the photo.
    pub fn check_out(&self, upload: &Upload, position: Coordinates) -> Result<AttendanceReceipt, PresensiError> {
        let face = self.recognise("pulang", upload)?;
        let fence = self.store.get_geofence()?;
        let now = self.settings.policy.to_local(self.clock.now_utc());
        let status = self
            .settings
            .policy
            .classify_check_out(now.time(), &position, &fence)?;

        let existing = self.store.get_attendance_for(face.id, now.date_naive())?;
        let mut record = match (DayState::of(existing.as_ref()).check_out(), existing) {
            (Ok(_), Some(record)) => record,
            (Err(conflict), _) => return Err(already(&face, conflict)),
            (Ok(_), None) => return Err(already(&face, MarkConflict::NotCheckedIn)),
        };

        let mark = Mark {
            position,
            status,
            at: now,
        };
        if !self.store.update_checkout(record.id, &mark)? {
            return Err(already(&face, MarkConflict::AlreadyCheckedOut));
        }
        record.check_out = Some(mark);

        let distance_m = fence.distance_to(&position);
        tracing::info!(student = face.id, record = record.id, status = %status, distance_m, "checked out");
        Ok(AttendanceReceipt {
            record,
            roll_number: face.roll_number,
            match_distance: face.distance,
            distance_m,
        })
    }

    pub fn geofence(&self) -> Result<Geofence, PresensiError> {
        Ok(self.store.get_geofence()?)
    }

    pub fn set_geofence(&self, fence: Geofence) -> Result<(), PresensiError> {
        let fence = Geofence::new(
            Coordinates::new(fence.center.latitude, fence.center.longitude)?,
            fence.radius_m,
        )?;
        self.store.set_geofence(&fence)?;
        tracing::info!(
            latitude = fence.center.latitude,
            longitude = fence.center.longitude,
            radius_m = fence.radius_m,
            "attendance area updated"
        );
        Ok(())
    }

    pub fn students(&self) -> Result<Vec<Student>, PresensiError> {
        Ok(self.store.list_students()?)
    }

    /// Number of students that can be recognised.
    pub fn registered_faces(&self) -> Result<usize, PresensiError> {
        Ok(self
            .store
            .list_all_vectors()?
            .iter()
            .filter(|e| e.vector.is_some())
            .count())
    }

    pub fn attendance(&self, day: Option<NaiveDate>) -> Result<Vec<AttendanceRecord>, PresensiError> {
        Ok(self.store.list_attendance(day)?)
    }

    pub fn dashboard(&self) -> Result<Dashboard, PresensiError> {
        let day = self.today();
        let counts = self.store.counts(day)?;
        let attendance_rate_pct = if counts.students == 0 {
            0.0
        } else {
            let pct = counts.records_on_day as f64 / counts.students as f64 * 100.0;
            (pct * 100.0).round() / 100.0
        };
        Ok(Dashboard {
            day,
            counts,
            attendance_rate_pct,
        })
    }

    /// Roll number the next registration in this cohort would receive.
    pub fn next_roll_number(&self, class_label: &str, major: &str) -> Result<RollNumber, PresensiError> {
        let (class_label, major) = (class_label.trim(), major.trim());
        if class_label.is_empty() || major.is_empty() {
            return Err(PresensiError::InvalidInput("class and major must not be empty".into()));
        }
        IdentifierAllocator::new(&self.store).next_id(class_label, major)
    }

    /// Delete every student and attendance record, their photos included.
    pub fn reset_all(&self) -> Result<(), PresensiError> {
        let students = self.store.list_students()?;
        self.store.reset_all()?;
        for s in &students {
            if let Err(e) = std::fs::remove_file(&s.photo_path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %s.photo_path.display(), error = %e, "failed to remove face photo");
                }
            }
        }
        tracing::warn!(students = students.len(), "all records deleted");
        Ok(())
    }
}
