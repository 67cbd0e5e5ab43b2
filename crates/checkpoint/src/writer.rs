//! Global state serialization
//!
//! A state file is a fixed header followed by the bincode encoding of the
//! [`GlobalState`]:
//!
//! | field       | size | encoding      |
//! |-------------|------|---------------|
//! | magic       | 4    | `b"GSTA"`     |
//! | version     | 4    | u32 LE        |
//! | epoch       | 8    | u64 LE        |
//! | payload len | 8    | u64 LE        |
//! | payload     | n    | bincode       |

use bytes::{BufMut, Bytes, BytesMut};
use runtime_core::{Epoch, Error, GlobalState, Result};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Magic bytes for state files
pub const STATE_MAGIC: [u8; 4] = *b"GSTA";

/// State format version
pub const STATE_VERSION: u32 = 1;

/// Header length in bytes
pub const HEADER_LEN: usize = 4 + 4 + 8 + 8;

/// Upper bound on payload size accepted by the reader
const MAX_PAYLOAD_LEN: u64 = 4 * 1024 * 1024 * 1024;

/// State file header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateHeader {
    pub version: u32,
    pub epoch: Epoch,
    pub payload_len: u64,
}

impl StateHeader {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(&STATE_MAGIC);
        buf.put_u32_le(self.version);
        buf.put_u64_le(self.epoch);
        buf.put_u64_le(self.payload_len);
    }

    fn decode(raw: &[u8; HEADER_LEN]) -> Result<Self> {
        if raw[0..4] != STATE_MAGIC {
            return Err(Error::CheckpointCorrupted {
                reason: "invalid state magic".to_string(),
            });
        }

        let version = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);
        let mut word = [0u8; 8];
        word.copy_from_slice(&raw[8..16]);
        let epoch = u64::from_le_bytes(word);
        word.copy_from_slice(&raw[16..24]);
        let payload_len = u64::from_le_bytes(word);

        Ok(Self {
            version,
            epoch,
            payload_len,
        })
    }
}

/// Encode a state into header + payload bytes
pub fn encode_state(state: &GlobalState) -> Result<Bytes> {
    let payload = bincode::serialize(state)?;
    let header = StateHeader {
        version: STATE_VERSION,
        epoch: state.epoch(),
        payload_len: payload.len() as u64,
    };

    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    header.encode(&mut buf);
    buf.put_slice(&payload);
    Ok(buf.freeze())
}

/// Write a state to any byte sink
///
/// Returns the number of bytes written.
pub fn write_state<W: Write>(sink: &mut W, state: &GlobalState) -> Result<u64> {
    let bytes = encode_state(state)?;
    sink.write_all(&bytes)?;
    sink.flush()?;

    debug!(epoch = state.epoch(), size_bytes = bytes.len(), "State written to sink");
    Ok(bytes.len() as u64)
}

/// Read a state previously written by [`write_state`]
pub fn read_state<R: Read>(source: &mut R) -> Result<GlobalState> {
    let mut raw = [0u8; HEADER_LEN];
    source.read_exact(&mut raw)?;
    let header = StateHeader::decode(&raw)?;

    if header.version != STATE_VERSION {
        warn!(
            "State version mismatch: expected {}, got {}",
            STATE_VERSION, header.version
        );
    }
    if header.payload_len > MAX_PAYLOAD_LEN {
        return Err(Error::CheckpointCorrupted {
            reason: format!("payload length {} exceeds limit", header.payload_len),
        });
    }

    // grow with the bytes actually present, not the claimed length
    let mut payload = Vec::new();
    source
        .by_ref()
        .take(header.payload_len)
        .read_to_end(&mut payload)?;
    if payload.len() as u64 != header.payload_len {
        return Err(Error::CheckpointCorrupted {
            reason: format!(
                "truncated payload: expected {} bytes, got {}",
                header.payload_len,
                payload.len()
            ),
        });
    }
    let state: GlobalState = bincode::deserialize(&payload)?;

    if state.epoch() != header.epoch {
        return Err(Error::CheckpointCorrupted {
            reason: format!(
                "header epoch {} does not match payload epoch {}",
                header.epoch,
                state.epoch()
            ),
        });
    }

    Ok(state)
}

/// Write a state file atomically (temp file, sync, rename)
#[instrument(skip(state, path), fields(epoch = state.epoch(), path = %path.display()))]
pub async fn write_state_file(path: &Path, state: &GlobalState) -> Result<u64> {
    let start = std::time::Instant::now();
    let data = encode_state(state)?;

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let temp_path = temp_path(path);
    let mut file = File::create(&temp_path).await?;
    file.write_all(&data).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&temp_path, path).await?;

    info!(
        size_bytes = data.len(),
        elapsed_ms = start.elapsed().as_millis(),
        "State file write complete"
    );

    Ok(data.len() as u64)
}

/// Read a state file written by [`write_state_file`]
pub async fn read_state_file(path: &Path) -> Result<GlobalState> {
    let data = tokio::fs::read(path).await?;
    read_state(&mut data.as_slice())
}

/// Generate a unique temporary path next to the target
fn temp_path(path: &Path) -> PathBuf {
    let temp_name = format!(
        ".{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        Uuid::new_v4()
    );
    path.with_file_name(temp_name)
}
