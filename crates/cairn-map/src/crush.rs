//! Opaque CRUSH configuration blob
//!
//! The monitor stores, versions, and replaces the placement configuration
//! wholesale; it never interprets the contents. A CRC32C over the bytes
//! catches corruption on the way in and out of persistence.

use cairn_common::{Error, Result};
use serde::{Deserialize, Serialize};

/// Versioned, checksummed placement configuration
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrushBlob {
    /// Version, bumped on every replacement
    pub version: u32,
    /// Opaque encoded configuration
    bytes: Vec<u8>,
    /// CRC32C of `bytes`
    crc32c: u32,
}

impl CrushBlob {
    /// Wrap raw configuration bytes, computing the checksum
    #[must_use]
    pub fn new(version: u32, bytes: Vec<u8>) -> Self {
        let crc32c = crc32c::crc32c(&bytes);
        Self {
            version,
            bytes,
            crc32c,
        }
    }

    /// A replacement blob with the version advanced past `prev`
    #[must_use]
    pub fn replacing(prev: &CrushBlob, bytes: Vec<u8>) -> Self {
        Self::new(prev.version + 1, bytes)
    }

    /// The raw configuration bytes
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Verify the stored checksum against the bytes
    pub fn validate(&self) -> Result<()> {
        let actual = crc32c::crc32c(&self.bytes);
        if actual != self.crc32c {
            return Err(Error::BadCrushChecksum {
                expected: self.crc32c,
                actual,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_blob_validates() {
        let blob = CrushBlob::new(1, vec![1, 2, 3]);
        assert!(blob.validate().is_ok());
    }

    #[test]
    fn test_corruption_detected() {
        let mut blob = CrushBlob::new(1, vec![1, 2, 3]);
        blob.bytes[0] = 9;
        assert!(matches!(
            blob.validate(),
            Err(Error::BadCrushChecksum { .. })
        ));
    }

    #[test]
    fn test_replacing_bumps_version() {
        let a = CrushBlob::new(4, vec![]);
        let b = CrushBlob::replacing(&a, vec![7]);
        assert_eq!(b.version, 5);
        assert!(b.validate().is_ok());
    }
}
