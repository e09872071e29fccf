use crate::error::PresensiError;
use crate::policy::{CheckInStatus, CheckOutStatus};
use crate::roll::RollNumber;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub type StudentId = i64;
pub type AttendanceId = i64;

const F32_BYTES: usize = std::mem::size_of::<f32>();

#[derive(Error, Debug, PartialEq)]
pub enum VectorError {
    #[error("face vector is empty")]
    Empty,
    #[error("face vector component {index} is not finite")]
    NonFinite { index: usize },
    #[error("face vector blob of {0} bytes is not a whole number of f32 values")]
    BadBlobLength(usize),
}

/// Face embedding produced by the external encoder (128-dimensional for dlib models).
///
/// Immutable once built. Persisted as little-endian `f32` values, never as text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct FaceVector {
    values: Vec<f32>,
}

impl FaceVector {
    pub fn new(values: Vec<f32>) -> Result<Self, VectorError> {
        if values.is_empty() {
            return Err(VectorError::Empty);
        }
        if let Some(index) = values.iter().position(|v| !v.is_finite()) {
            return Err(VectorError::NonFinite { index });
        }
        Ok(Self { values })
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Euclidean distance. Callers must only compare vectors of equal dimension.
    pub fn euclidean_distance(&self, other: &FaceVector) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.values.len() * F32_BYTES);
        for v in &self.values {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, VectorError> {
        if bytes.len() % F32_BYTES != 0 {
            return Err(VectorError::BadBlobLength(bytes.len()));
        }
        let values = bytes
            .chunks_exact(F32_BYTES)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Self::new(values)
    }
}

impl TryFrom<Vec<f32>> for FaceVector {
    type Error = VectorError;

    fn try_from(values: Vec<f32>) -> Result<Self, Self::Error> {
        Self::new(values)
    }
}

impl From<FaceVector> for Vec<f32> {
    fn from(v: FaceVector) -> Self {
        v.values
    }
}

/// Identity metadata captured at registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentProfile {
    pub name: String,
    pub class_label: String,
    pub major: String,
}

impl StudentProfile {
    /// Trims every field and rejects blanks.
    pub fn new(name: &str, class_label: &str, major: &str) -> Result<Self, PresensiError> {
        let field = |label: &str, value: &str| -> Result<String, PresensiError> {
            let value = value.trim();
            if value.is_empty() {
                return Err(PresensiError::InvalidInput(format!("{label} must not be empty")));
            }
            Ok(value.to_string())
        };
        Ok(Self {
            name: field("name", name)?,
            class_label: field("class", class_label)?,
            major: field("major", major)?,
        })
    }
}

/// A registered student as stored in the catalogue.
#[derive(Debug, Clone, Serialize)]
pub struct Student {
    pub id: StudentId,
    #[serde(flatten)]
    pub profile: StudentProfile,
    pub roll_number: RollNumber,
    pub photo_path: PathBuf,
    #[serde(skip)]
    pub vector: Option<FaceVector>,
    pub registered_at: DateTime<Utc>,
}

/// Student about to be committed: photo, metadata and vector go in together.
#[derive(Debug, Clone)]
pub struct NewStudent {
    pub profile: StudentProfile,
    pub photo_path: PathBuf,
    pub vector: FaceVector,
    pub registered_at: DateTime<Utc>,
}

/// One gallery entry for matching. Entries without a vector are never matched.
#[derive(Debug, Clone)]
pub struct CatalogueEntry {
    pub id: StudentId,
    pub profile: StudentProfile,
    pub roll_number: RollNumber,
    pub vector: Option<FaceVector>,
}

impl From<Student> for CatalogueEntry {
    fn from(s: Student) -> Self {
        Self {
            id: s.id,
            profile: s.profile,
            roll_number: s.roll_number,
            vector: s.vector,
        }
    }
}

/// WGS84 position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    /// Rejects NaN and out-of-range values before any distance is computed.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, PresensiError> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(PresensiError::InvalidInput(format!(
                "latitude {latitude} outside [-90, 90]"
            )));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(PresensiError::InvalidInput(format!(
                "longitude {longitude} outside [-180, 180]"
            )));
        }
        Ok(Self { latitude, longitude })
    }
}

/// Circular attendance area.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geofence {
    pub center: Coordinates,
    pub radius_m: f64,
}

impl Geofence {
    pub fn new(center: Coordinates, radius_m: f64) -> Result<Self, PresensiError> {
        if !radius_m.is_finite() || radius_m <= 0.0 {
            return Err(PresensiError::InvalidInput(format!(
                "radius {radius_m} must be a positive number of meters"
            )));
        }
        Ok(Self { center, radius_m })
    }

    /// Distance from the fence center in meters.
    pub fn distance_to(&self, position: &Coordinates) -> f64 {
        crate::geo::haversine_m(&self.center, position)
    }

    /// Inclusive: a point exactly on the boundary is inside.
    pub fn contains(&self, position: &Coordinates) -> bool {
        self.distance_to(position) <= self.radius_m
    }
}

/// One attendance event (check-in or check-out) as written to the record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mark<S> {
    pub position: Coordinates,
    pub status: S,
    pub at: DateTime<FixedOffset>,
}

/// Attendance for one student on one local calendar day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceRecord {
    pub id: AttendanceId,
    pub student_id: StudentId,
    #[serde(flatten)]
    pub profile: StudentProfile,
    pub day: NaiveDate,
    pub check_in: Mark<CheckInStatus>,
    pub check_out: Option<Mark<CheckOutStatus>>,
}

#[derive(Debug, Clone)]
pub struct NewAttendance {
    pub student_id: StudentId,
    pub profile: StudentProfile,
    pub day: NaiveDate,
    pub check_in: Mark<CheckInStatus>,
}

/// Totals backing the admin dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AttendanceCounts {
    pub students: u64,
    pub records: u64,
    pub records_on_day: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_to_self_is_zero() {
        let v = FaceVector::new(vec![0.25, -0.5, 0.125, 0.9]).unwrap();
        assert_eq!(v.euclidean_distance(&v), 0.0);
    }

    #[test]
    fn test_distance_known_value() {
        let a = FaceVector::new(vec![0.0, 0.0]).unwrap();
        let b = FaceVector::new(vec![3.0, 4.0]).unwrap();
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
        assert!((b.euclidean_distance(&a) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_rejects_empty_and_non_finite() {
        assert_eq!(FaceVector::new(vec![]), Err(VectorError::Empty));
        assert_eq!(
            FaceVector::new(vec![0.1, f32::NAN]),
            Err(VectorError::NonFinite { index: 1 })
        );
    }

    #[test]
    fn test_blob_encoding_is_little_endian_f32() {
        let v = FaceVector::new(vec![1.0, -2.5]).unwrap();
        let bytes = v.to_bytes();
        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[..4], &1.0f32.to_le_bytes());
        assert_eq!(FaceVector::from_bytes(&bytes).unwrap(), v);
    }

    #[test]
    fn test_blob_with_partial_value_rejected() {
        assert_eq!(
            FaceVector::from_bytes(&[0, 0, 128]),
            Err(VectorError::BadBlobLength(3))
        );
    }

    #[test]
    fn test_vector_deserializes_from_json_array() {
        let v: FaceVector = serde_json::from_str("[0.5, 0.25]").unwrap();
        assert_eq!(v.values(), &[0.5, 0.25]);
        assert!(serde_json::from_str::<FaceVector>("[]").is_err());
    }

    #[test]
    fn test_profile_trims_and_rejects_blank() {
        let p = StudentProfile::new("  Budi ", "X", " SIJA1").unwrap();
        assert_eq!(p.name, "Budi");
        assert_eq!(p.major, "SIJA1");
        assert!(StudentProfile::new("Budi", "  ", "SIJA1").is_err());
    }

    #[test]
    fn test_coordinates_range_checked() {
        assert!(Coordinates::new(-6.27, 106.96).is_ok());
        assert!(Coordinates::new(91.0, 0.0).is_err());
        assert!(Coordinates::new(0.0, -180.5).is_err());
        assert!(Coordinates::new(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn test_geofence_radius_must_be_positive() {
        let c = Coordinates::new(0.0, 0.0).unwrap();
        assert!(Geofence::new(c, 15.0).is_ok());
        assert!(Geofence::new(c, 0.0).is_err());
        assert!(Geofence::new(c, -1.0).is_err());
    }
}
