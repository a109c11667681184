//! Mutation frame codec
//!
//! Frame layout:
//! ```text
//! +--------+--------+--------+--------------------+
//! | CRC32  |  Kind  |  Len   |  Body (variable)   |
//! | 4 bytes| 1 byte |4 bytes |                    |
//! +--------+--------+--------+--------------------+
//! ```
//!
//! - CRC32: checksum of kind + len + body
//! - Kind: mutation kind discriminator
//! - Len: body length (max 16 MiB)
//! - Body: bincode-encoded mutation
//!
//! The kind byte makes frames self-describing: decode needs no schema
//! information beyond this module. Round-trips are exact.

pub mod error;
pub mod mutation;

use serde::de::DeserializeOwned;
use serde::Serialize;

pub use error::{DecodeError, DecodeResult, EncodeError, EncodeResult};
pub use mutation::{
    AddVersion, CreateArtifact, DeleteArtifact, DeleteRule, Mutation, MutationKind, SetRule,
    UpdateMetadata, GLOBAL_PARTITION_KEY,
};

/// Frame header size in bytes
pub const HEADER_SIZE: usize = 9; // 4 + 1 + 4

/// Maximum body size (16 MiB)
pub const MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

/// Encode a mutation into a framed log entry
pub fn encode(mutation: &Mutation) -> EncodeResult<Vec<u8>> {
    let body = match mutation {
        Mutation::CreateArtifact(m) => serialize_body(m),
        Mutation::AddVersion(m) => serialize_body(m),
        Mutation::UpdateMetadata(m) => serialize_body(m),
        Mutation::SetRule(m) => serialize_body(m),
        Mutation::DeleteRule(m) => serialize_body(m),
        Mutation::DeleteArtifact(m) => serialize_body(m),
    }?;

    if body.len() > MAX_BODY_SIZE {
        return Err(EncodeError::TooLarge {
            size: body.len(),
            max: MAX_BODY_SIZE,
        });
    }

    let mut buf = Vec::with_capacity(HEADER_SIZE + body.len());

    // Reserve space for CRC (filled in at the end)
    buf.extend_from_slice(&[0u8; 4]);

    // Kind
    buf.push(mutation.kind() as u8);

    // Body length (big-endian)
    buf.extend_from_slice(&(body.len() as u32).to_be_bytes());

    // Body
    buf.extend_from_slice(&body);

    // Checksum over everything after the CRC field
    let crc = crc32fast::hash(&buf[4..]);
    buf[0..4].copy_from_slice(&crc.to_be_bytes());

    Ok(buf)
}

/// Decode a framed log entry back into a mutation
pub fn decode(buf: &[u8]) -> DecodeResult<Mutation> {
    if buf.len() < HEADER_SIZE {
        return Err(DecodeError::Truncated { len: buf.len() });
    }

    let stored_crc = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let computed_crc = crc32fast::hash(&buf[4..]);
    if stored_crc != computed_crc {
        return Err(DecodeError::CrcMismatch {
            expected: stored_crc,
            actual: computed_crc,
        });
    }

    let kind = MutationKind::try_from(buf[4])?;
    let declared = u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]) as usize;
    let actual = buf.len() - HEADER_SIZE;
    if declared != actual {
        return Err(DecodeError::LengthMismatch { declared, actual });
    }

    let body = &buf[HEADER_SIZE..];
    let mutation = match kind {
        MutationKind::CreateArtifact => Mutation::CreateArtifact(deserialize_body(body)?),
        MutationKind::AddVersion => Mutation::AddVersion(deserialize_body(body)?),
        MutationKind::UpdateMetadata => Mutation::UpdateMetadata(deserialize_body(body)?),
        MutationKind::SetRule => Mutation::SetRule(deserialize_body(body)?),
        MutationKind::DeleteRule => Mutation::DeleteRule(deserialize_body(body)?),
        MutationKind::DeleteArtifact => Mutation::DeleteArtifact(deserialize_body(body)?),
    };

    Ok(mutation)
}

fn serialize_body<T: Serialize>(body: &T) -> EncodeResult<Vec<u8>> {
    bincode::serialize(body).map_err(|e| EncodeError::Serialization(e.to_string()))
}

fn deserialize_body<T: DeserializeOwned>(body: &[u8]) -> DecodeResult<T> {
    bincode::deserialize(body).map_err(|e| DecodeError::Body(e.to_string()))
}
