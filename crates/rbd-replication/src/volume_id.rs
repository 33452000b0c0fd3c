//! CSI volume identifier encoding.
//!
//! A volume ID packs the cluster, pool and image identity into a string the
//! orchestrator can hand back verbatim:
//!
//! ```text
//! [version:4 hex]-[clusterID length:4 hex]-[clusterID]-[poolID:16 hex]-[object uuid:36]
//! ```
//!
//! Constant fields plus separators take 64 characters; the whole ID may not
//! exceed 128.

use std::fmt;

use thiserror::Error;

const MAX_VOL_ID_LEN: usize = 128;
const KNOWN_FIELD_SIZE: usize = 64;
const UUID_SIZE: usize = 36;
const POOL_ID_HEX_LEN: usize = 16;

/// Errors decoding or encoding a volume ID.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VolumeIdError {
    /// Input shorter than the encoding requires.
    #[error("failed to decode CSI identifier, string underflow")]
    Underflow,

    /// Trailing object UUID has the wrong length.
    #[error("failed to decode CSI identifier, string size mismatch")]
    SizeMismatch,

    /// A hex field failed to decode.
    #[error("failed to decode CSI identifier, invalid hex in {field}")]
    InvalidHex {
        /// Name of the offending field.
        field: &'static str,
    },

    /// A separator was not where the encoding puts it.
    #[error("failed to decode CSI identifier, missing separator at offset {offset}")]
    MissingSeparator {
        /// Byte offset of the expected '-'.
        offset: usize,
    },

    /// Encoded ID would exceed the maximum length.
    #[error("CSI ID encoding length overflow")]
    Overflow,

    /// Object UUID is not 36 characters.
    #[error("CSI ID invalid object uuid")]
    InvalidUuid,
}

/// Decoded CSI volume identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsiIdentifier {
    /// Version of the encoding scheme.
    pub encoding_version: u16,
    /// Cluster the volume lives in.
    pub cluster_id: String,
    /// Pool ID holding the image.
    pub location_id: i64,
    /// On-disk UUID of the image.
    pub object_uuid: String,
}

impl CsiIdentifier {
    /// Encodes the identifier.
    pub fn compose(&self) -> Result<String, VolumeIdError> {
        if KNOWN_FIELD_SIZE + self.cluster_id.len() > MAX_VOL_ID_LEN {
            return Err(VolumeIdError::Overflow);
        }
        if self.object_uuid.len() != UUID_SIZE {
            return Err(VolumeIdError::InvalidUuid);
        }
        Ok(format!(
            "{}-{}-{}-{}-{}",
            hex::encode(self.encoding_version.to_be_bytes()),
            hex::encode((self.cluster_id.len() as u16).to_be_bytes()),
            self.cluster_id,
            hex::encode(self.location_id.to_be_bytes()),
            self.object_uuid
        ))
    }

    /// Decodes a composed volume ID.
    pub fn decompose(composed: &str) -> Result<Self, VolumeIdError> {
        if !composed.is_ascii() || composed.len() < KNOWN_FIELD_SIZE {
            return Err(VolumeIdError::Underflow);
        }

        let encoding_version = u16::from_be_bytes(decode_hex::<2>(&composed[0..4], "version")?);
        expect_separator(composed, 4)?;
        let cluster_len =
            u16::from_be_bytes(decode_hex::<2>(&composed[5..9], "cluster ID length")?) as usize;
        expect_separator(composed, 9)?;

        let mut remaining = composed.len() - 10;
        if remaining < cluster_len + 1 {
            return Err(VolumeIdError::Underflow);
        }
        let cluster_id = composed[10..10 + cluster_len].to_string();
        expect_separator(composed, 10 + cluster_len)?;
        remaining -= cluster_len + 1;

        let pool_start = 10 + cluster_len + 1;
        if remaining < POOL_ID_HEX_LEN + 1 {
            return Err(VolumeIdError::Underflow);
        }
        let location_id = i64::from_be_bytes(decode_hex::<8>(
            &composed[pool_start..pool_start + POOL_ID_HEX_LEN],
            "pool ID",
        )?);
        expect_separator(composed, pool_start + POOL_ID_HEX_LEN)?;
        remaining -= POOL_ID_HEX_LEN + 1;

        if remaining != UUID_SIZE {
            return Err(VolumeIdError::SizeMismatch);
        }
        let uuid_start = pool_start + POOL_ID_HEX_LEN + 1;

        Ok(Self {
            encoding_version,
            cluster_id,
            location_id,
            object_uuid: composed[uuid_start..].to_string(),
        })
    }
}

impl fmt::Display for CsiIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cluster={} pool={} uuid={}",
            self.cluster_id, self.location_id, self.object_uuid
        )
    }
}

fn decode_hex<const N: usize>(s: &str, field: &'static str) -> Result<[u8; N], VolumeIdError> {
    let mut out = [0u8; N];
    hex::decode_to_slice(s, &mut out).map_err(|_| VolumeIdError::InvalidHex { field })?;
    Ok(out)
}

fn expect_separator(s: &str, offset: usize) -> Result<(), VolumeIdError> {
    if s.as_bytes().get(offset) == Some(&b'-') {
        Ok(())
    } else {
        Err(VolumeIdError::MissingSeparator { offset })
    }
}
