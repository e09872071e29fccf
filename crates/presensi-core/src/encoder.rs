//! Boundary to the external face-embedding capability.

use crate::error::PresensiError;
use crate::photo::Photo;
use crate::types::FaceVector;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("encoder unavailable: {0}")]
    Unavailable(String),
    #[error("encoding failed: {0}")]
    Failed(String),
}

/// Turns a decoded photo into one vector per detected face.
///
/// Implementations wrap a detection + embedding model; an empty result means
/// no face was found.
pub trait FaceEncoder: Send + Sync {
    fn encode(&self, photo: &Photo) -> Result<Vec<FaceVector>, EncoderError>;
}

impl<E: FaceEncoder + ?Sized> FaceEncoder for &E {
    fn encode(&self, photo: &Photo) -> Result<Vec<FaceVector>, EncoderError> {
        (**self).encode(photo)
    }
}

impl<E: FaceEncoder + ?Sized> FaceEncoder for std::sync::Arc<E> {
    fn encode(&self, photo: &Photo) -> Result<Vec<FaceVector>, EncoderError> {
        (**self).encode(photo)
    }
}

/// The single face in `faces`; zero or several faces are rejected.
pub fn exactly_one_face(mut faces: Vec<FaceVector>) -> Result<FaceVector, PresensiError> {
    match faces.len() {
        0 => Err(PresensiError::NoFaceDetected),
        1 => Ok(faces.remove(0)),
        count => Err(PresensiError::AmbiguousFace { count }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(v: f32) -> FaceVector {
        FaceVector::new(vec![v, v]).unwrap()
    }

    #[test]
    fn test_exactly_one_face() {
        assert_eq!(exactly_one_face(vec![face(0.5)]).unwrap(), face(0.5));
        assert!(matches!(
            exactly_one_face(vec![]),
            Err(PresensiError::NoFaceDetected)
        ));
        assert!(matches!(
            exactly_one_face(vec![face(0.1), face(0.2)]),
            Err(PresensiError::AmbiguousFace { count: 2 })
        ));
    }
}
