//! Nearest-face search over the registered catalogue.
//!
//! Finding the closest face and deciding whether it is close enough are kept
//! apart: [`find_best_match`] never applies a threshold, [`FaceMatcher`] and
//! [`DuplicateGuard`] gate its result with their own limits.

use crate::error::PresensiError;
use crate::roll::RollNumber;
use crate::types::{CatalogueEntry, FaceVector, StudentId, StudentProfile};

/// Maximum distance accepted when recognising a face at check-in/check-out.
pub const RECOGNITION_THRESHOLD: f32 = 0.45;

/// Distance below which a new registration is treated as an already-known face.
/// Stricter than recognition: a rejected registration is cheaper than a duplicate identity.
pub const DUPLICATE_THRESHOLD: f32 = 0.40;

/// Closest catalogue entry to a probe vector.
#[derive(Debug, Clone, PartialEq)]
pub struct NearestFace {
    pub id: StudentId,
    pub profile: StudentProfile,
    pub roll_number: RollNumber,
    pub distance: f32,
}

/// `true` when `distance` is strictly below `threshold`.
pub fn is_within(distance: f32, threshold: f32) -> bool {
    distance < threshold
}

/// Strategy for locating the closest face in a gallery.
pub trait Matcher {
    fn nearest(&self, probe: &FaceVector, gallery: &[CatalogueEntry]) -> Option<NearestFace>;
}

/// Euclidean nearest neighbour. Exact ties keep the first entry seen.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn nearest(&self, probe: &FaceVector, gallery: &[CatalogueEntry]) -> Option<NearestFace> {
        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, entry) in gallery.iter().enumerate() {
            let Some(vector) = entry.vector.as_ref() else {
                continue;
            };
            if vector.dim() != probe.dim() {
                tracing::warn!(
                    student = entry.id,
                    stored = vector.dim(),
                    probe = probe.dim(),
                    "skipping face vector with mismatched dimension"
                );
                continue;
            }
            let dist = probe.euclidean_distance(vector);
            tracing::debug!(student = entry.id, distance = dist, "candidate distance");
            if best_idx.is_none() || dist < best_dist {
                best_dist = dist;
                best_idx = Some(i);
            }
        }

        best_idx.map(|idx| {
            let entry = &gallery[idx];
            NearestFace {
                id: entry.id,
                profile: entry.profile.clone(),
                roll_number: entry.roll_number.clone(),
                distance: best_dist,
            }
        })
    }
}

/// Closest entry to `probe`, or `None` when no entry carries a vector.
pub fn find_best_match(probe: &FaceVector, gallery: &[CatalogueEntry]) -> Option<NearestFace> {
    EuclideanMatcher.nearest(probe, gallery)
}

/// Recognition gate for attendance.
#[derive(Debug, Clone, Copy)]
pub struct FaceMatcher {
    threshold: f32,
}

impl Default for FaceMatcher {
    fn default() -> Self {
        Self::new(RECOGNITION_THRESHOLD)
    }
}

impl FaceMatcher {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Identify `probe`, failing with `NoMatch` when the nearest face is not close enough.
    pub fn identify(
        &self,
        probe: &FaceVector,
        gallery: &[CatalogueEntry],
    ) -> Result<NearestFace, PresensiError> {
        match find_best_match(probe, gallery) {
            Some(best) if is_within(best.distance, self.threshold) => {
                tracing::info!(
                    student = best.id,
                    roll_number = %best.roll_number,
                    distance = best.distance,
                    "face recognised"
                );
                Ok(best)
            }
            Some(best) => {
                tracing::info!(
                    closest = best.id,
                    distance = best.distance,
                    threshold = self.threshold,
                    "closest face above recognition threshold"
                );
                Err(PresensiError::NoMatch {
                    closest: Some(best.distance),
                })
            }
            None => Err(PresensiError::NoMatch { closest: None }),
        }
    }
}

/// Pre-registration check that the face is not already in the catalogue.
#[derive(Debug, Clone, Copy)]
pub struct DuplicateGuard {
    threshold: f32,
}

impl Default for DuplicateGuard {
    fn default() -> Self {
        Self::new(DUPLICATE_THRESHOLD)
    }
}

impl DuplicateGuard {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// `Ok` when the face may be registered; `DuplicateFace` naming the owner otherwise.
    pub fn check(&self, probe: &FaceVector, gallery: &[CatalogueEntry]) -> Result<(), PresensiError> {
        match find_best_match(probe, gallery) {
            Some(best) if is_within(best.distance, self.threshold) => {
                tracing::warn!(
                    existing = best.id,
                    roll_number = %best.roll_number,
                    distance = best.distance,
                    "duplicate face rejected"
                );
                Err(PresensiError::DuplicateFace {
                    id: best.id,
                    name: best.profile.name,
                    class_label: best.profile.class_label,
                    major: best.profile.major,
                    roll_number: best.roll_number,
                    distance: best.distance,
                })
            }
            best => {
                tracing::debug!(
                    closest = best.as_ref().map(|b| b.distance),
                    "no duplicate face"
                );
                Ok(())
            }
        }
    }
}
