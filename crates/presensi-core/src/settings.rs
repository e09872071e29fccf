use crate::geo::default_geofence;
use crate::matcher::{DUPLICATE_THRESHOLD, RECOGNITION_THRESHOLD};
use crate::photo::MAX_UPLOAD_BYTES;
use crate::policy::AttendancePolicy;
use crate::types::Geofence;
use std::path::PathBuf;

/// Tunables shared by registration and attendance.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Maximum Euclidean distance accepted as the same person at check-in/out.
    pub recognition_threshold: f32,
    /// Distance below which a new face counts as already registered.
    pub duplicate_threshold: f32,
    pub policy: AttendancePolicy,
    pub max_upload_bytes: usize,
    /// Scratch directory for uploads being processed.
    pub upload_dir: PathBuf,
    /// Permanent home of registered face photos.
    pub faces_dir: PathBuf,
    /// Area seeded into a fresh database and restored by reset.
    pub default_geofence: Geofence,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            recognition_threshold: RECOGNITION_THRESHOLD,
            duplicate_threshold: DUPLICATE_THRESHOLD,
            policy: AttendancePolicy::default(),
            max_upload_bytes: MAX_UPLOAD_BYTES,
            upload_dir: PathBuf::from("uploads"),
            faces_dir: PathBuf::from("faces"),
            default_geofence: default_geofence(),
        }
    }
}
