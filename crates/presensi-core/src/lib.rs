//! presensi-core: face-based attendance engine.
//!
//! Matches face vectors against the registered catalogue, guards against
//! duplicate registrations, allocates roll numbers and decides whether a
//! check-in or check-out is on time and inside the school area. Face
//! encoding and persistence are pluggable through [`FaceEncoder`] and
//! [`AttendanceStore`].

pub mod allocator;
pub mod clock;
pub mod encoder;
pub mod error;
pub mod geo;
pub mod matcher;
pub mod photo;
pub mod policy;
pub mod roll;
pub mod service;
pub mod settings;
pub mod store;
pub mod types;

pub use allocator::IdentifierAllocator;
pub use clock::{Clock, SystemClock};
pub use encoder::{EncoderError, FaceEncoder};
pub use error::{MarkConflict, PresensiError};
pub use matcher::{DuplicateGuard, FaceMatcher, NearestFace};
pub use photo::{Photo, PhotoError, Upload};
pub use policy::{AttendancePolicy, AttendanceWindow, CheckInStatus, CheckOutStatus};
pub use roll::RollNumber;
pub use service::{AttendanceReceipt, Dashboard, Presensi};
pub use settings::Settings;
pub use store::{Admission, AttendanceStore, StoreError};
pub use types::{
    AttendanceRecord, Coordinates, FaceVector, Geofence, Student, StudentProfile,
};
