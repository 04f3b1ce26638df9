use std::fmt;

/// Separator between the photo and face parts of a record key.
pub const FACE_SEPARATOR: &str = "||";

/// Parsed form of a `"<photo>||face_<index>"` record key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FaceKey {
    pub photo: String,
    pub index: usize,
}

impl FaceKey {
    pub fn new(photo: impl AsRef<str>, index: usize) -> Self {
        Self {
            photo: photo.as_ref().replace('\\', "/"),
            index,
        }
    }

    /// Lenient parse. A key without a separator names a whole photo (face 0);
    /// an unreadable face part also falls back to 0.
    pub fn parse(key: &str) -> Self {
        match key.split_once(FACE_SEPARATOR) {
            Some((photo, face)) => {
                let face = face.trim();
                let index = face
                    .strip_prefix("face_")
                    .unwrap_or(face)
                    .parse()
                    .unwrap_or(0);
                Self::new(photo, index)
            }
            None => Self::new(key, 0),
        }
    }
}

impl fmt::Display for FaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}face_{}", self.photo, FACE_SEPARATOR, self.index)
    }
}
