use crate::encoder::EncoderError;
use crate::photo::PhotoError;
use crate::policy::{AttendanceEvent, AttendanceWindow};
use crate::roll::RollNumber;
use crate::store::StoreError;
use crate::types::StudentId;
use chrono::NaiveTime;
use std::fmt;
use thiserror::Error;

/// Why an attendance mark was refused for the day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkConflict {
    AlreadyCheckedIn,
    AlreadyCheckedOut,
    NotCheckedIn,
}

impl fmt::Display for MarkConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MarkConflict::AlreadyCheckedIn => "already checked in today",
            MarkConflict::AlreadyCheckedOut => "already checked out today",
            MarkConflict::NotCheckedIn => "must check in before checking out",
        })
    }
}

/// Every way a registration or attendance request can fail.
///
/// All variants are local to one request; none leave partial writes behind.
#[derive(Error, Debug)]
pub enum PresensiError {
    #[error("no face detected in the photo")]
    NoFaceDetected,
    #[error("{count} faces detected; the photo must show exactly one face")]
    AmbiguousFace { count: usize },
    #[error(
        "face already registered as {name} ({roll_number}, {class_label} {major}); cannot register again"
    )]
    DuplicateFace {
        id: StudentId,
        name: String,
        class_label: String,
        major: String,
        roll_number: RollNumber,
        distance: f32,
    },
    #[error("face not recognised; make sure you are registered and the photo is clear")]
    NoMatch { closest: Option<f32> },
    #[error("{event} is accepted {window} local time, it is now {}", .local_time.format("%H:%M"))]
    OutsideWindow {
        event: AttendanceEvent,
        window: AttendanceWindow,
        local_time: NaiveTime,
    },
    #[error("{name}: {conflict}")]
    AlreadyMarked { name: String, conflict: MarkConflict },
    #[error("storage conflict: {0}")]
    StorageConflict(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("photo: {0}")]
    Photo(#[from] PhotoError),
    #[error("encoder: {0}")]
    Encoder(#[from] EncoderError),
    #[error("storage: {0}")]
    Storage(StoreError),
}

impl From<StoreError> for PresensiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(msg) | StoreError::Busy(msg) => PresensiError::StorageConflict(msg),
            other => PresensiError::Storage(other),
        }
    }
}

impl PresensiError {
    /// Stable machine-readable tag for callers (web layer, CLI JSON output).
    pub fn kind(&self) -> &'static str {
        match self {
            PresensiError::NoFaceDetected => "no_face_detected",
            PresensiError::AmbiguousFace { .. } => "ambiguous_face",
            PresensiError::DuplicateFace { .. } => "duplicate_face",
            PresensiError::NoMatch { .. } => "no_match",
            PresensiError::OutsideWindow { .. } => "outside_window",
            PresensiError::AlreadyMarked { .. } => "already_marked",
            PresensiError::StorageConflict(_) => "storage_conflict",
            PresensiError::InvalidInput(_) => "invalid_input",
            PresensiError::Photo(PhotoError::InvalidUpload(_) | PhotoError::Decode(_)) => {
                "invalid_input"
            }
            PresensiError::Photo(_) | PresensiError::Encoder(_) | PresensiError::Storage(_) => {
                "processing_failed"
            }
        }
    }

    /// `true` when the user can fix the request and resubmit.
    pub fn is_rejection(&self) -> bool {
        self.kind() != "processing_failed"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_conflict_maps_to_storage_conflict() {
        let err: PresensiError = StoreError::Conflict("roll_number".into()).into();
        assert!(matches!(err, PresensiError::StorageConflict(_)));
        let err: PresensiError = StoreError::Backend("disk full".into()).into();
        assert_eq!(err.kind(), "processing_failed");
        assert!(!err.is_rejection());
    }

    #[test]
    fn test_busy_database_maps_to_storage_conflict() {
        let err: PresensiError = StoreError::Busy("database is locked".into()).into();
        assert_eq!(err.kind(), "storage_conflict");
    }

    #[test]
    fn test_undecodable_photo_is_invalid_input() {
        let decode = crate::photo::Photo::decode(b"definitely not an image").unwrap_err();
        assert!(matches!(decode, PhotoError::Decode(_)), "{decode:?}");
        let err = PresensiError::from(decode);
        assert_eq!(err.kind(), "invalid_input");
        assert!(err.is_rejection());
    }

    #[test]
    fn test_outside_window_message_names_window() {
        let err = PresensiError::OutsideWindow {
            event: AttendanceEvent::CheckOut,
            window: AttendanceWindow {
                start: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
                end: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            },
            local_time: NaiveTime::from_hms_opt(9, 15, 42).unwrap(),
        };
        assert_eq!(
            err.to_string(),
            "check-out is accepted 10:00-17:00 local time, it is now 09:15"
        );
    }

    #[test]
    fn test_duplicate_message_names_owner() {
        let err = PresensiError::DuplicateFace {
            id: 1,
            name: "Ani".into(),
            class_label: "X".into(),
            major: "SIJA1".into(),
            roll_number: RollNumber::compose("X", "SIJA1", 1),
            distance: 0.1,
        };
        let msg = err.to_string();
        assert!(msg.contains("Ani") && msg.contains("X-SIJA1-001"), "{msg}");
        assert!(err.is_rejection());
    }
}
