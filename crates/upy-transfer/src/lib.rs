//! CRC-verified chunked file transfer (§4.8) and whole-archive hash
//! verification (§4.9), built on top of [`upy_board::Session`]'s
//! statement-execution primitives.

use std::path::Path;

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};
use upy_board::{py_repr, BoardChannel, Session};

/// The chunk size a fresh transfer should start at, absent an explicit
/// override (§4.13's ambient `Config` default).
pub const DEFAULT_INITIAL_CHUNK_SIZE: usize = 512;

#[derive(Debug, Error)]
pub enum Error {
    #[error("chunk corruption could not be recovered between offsets {offset} and {end_offset}")]
    ChunkCorruption { offset: usize, end_offset: usize },
    #[error("archive hash mismatch between host and device copies")]
    HashMismatch,
    #[error(transparent)]
    Board(#[from] upy_board::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

const VALIDATE_CRC_HELPER: &str = "\
def _crc32(data):
    crc = 0xFFFFFFFF
    for b in data:
        crc ^= b
        for _ in range(8):
            crc = (crc >> 1) ^ (0xEDB88320 & -(crc & 1))
    return crc ^ 0xFFFFFFFF

def validate_crc(data):
    payload = data[:-4]
    expected = int.from_bytes(data[-4:], 'big')
    return _crc32(payload) == expected
";

const SHA256_HELPER: &str = "\
import uhashlib
import ubinascii

def _sha256_hex(path):
    h = uhashlib.sha256()
    with open(path, 'rb') as f:
        while True:
            chunk = f.read(512)
            if not chunk:
                break
            h.update(chunk)
    return ubinascii.hexlify(h.digest()).decode()
";

/// Writes `local_path` to `device_path`, chunk by chunk, with per-chunk
/// CRC32 verification and adaptive chunk-size shrinking on mismatch.
///
/// `on_progress` is called with an integer percentage, only when it
/// changes from the previous call.
///
/// `initial_chunk_size` is the starting chunk size in bytes (halved on
/// each CRC mismatch). `max_retries`, when non-zero, additionally bounds
/// how many times a single offset may be retried before giving up, on top
/// of the natural floor of the chunk size reaching zero; `0` relies on
/// that floor alone.
pub async fn write_file_chunked<C: BoardChannel>(
    session: &mut Session<C>,
    local_path: &Path,
    device_path: &str,
    initial_chunk_size: usize,
    max_retries: u32,
    mut on_progress: impl FnMut(u8),
) -> Result<(), Error> {
    let data = tokio::fs::read(local_path).await?;
    let total = data.len();

    session.enter_raw_mode().await?;
    session.exec_statement(VALIDATE_CRC_HELPER).await?;
    session
        .exec_statement(&format!("_f = open({}, 'wb')\n_w = _f.write", py_repr(device_path)))
        .await?;

    let mut offset = 0usize;
    let mut chunk_size = initial_chunk_size;
    let mut retries_at_offset = 0u32;
    let mut last_reported: Option<u8> = None;

    while offset < total {
        let end = (offset + chunk_size).min(total);
        let chunk = &data[offset..end];
        let crc = crc32fast::hash(chunk);

        let mut payload = chunk.to_vec();
        payload.extend_from_slice(&crc.to_be_bytes());

        let statement =
            format!("_buf = {}\nprint(1 if validate_crc(_buf) else 0)", bytes_literal(&payload));
        let reply = session.exec_statement(&statement).await?;

        if reply.stdout_trimmed().trim() != "1" {
            warn!(offset, chunk_size, "chunk CRC mismatch; chunk size reduced");
            chunk_size /= 2;
            retries_at_offset += 1;
            if chunk_size == 0 || (max_retries > 0 && retries_at_offset > max_retries) {
                return Err(Error::ChunkCorruption { offset, end_offset: end });
            }
            continue;
        }

        session.exec_statement("_w(_buf[:-4])").await?;
        offset = end;
        retries_at_offset = 0;

        let percent = ((offset as f64 / total.max(1) as f64) * 100.0) as u8;
        if last_reported != Some(percent) {
            on_progress(percent);
            last_reported = Some(percent);
        }
    }

    if last_reported != Some(100) {
        on_progress(100);
    }

    session.exec_statement("_f.close()").await?;
    session.exit_raw_mode().await?;
    debug!(bytes = total, path = device_path, "chunked transfer complete");
    Ok(())
}

/// Compares the SHA-256 of `local_path` against the SHA-256 the board
/// computes for `device_path`.
pub async fn verify_hash<C: BoardChannel>(
    session: &mut Session<C>,
    local_path: &Path,
    device_path: &str,
) -> Result<(), Error> {
    let data = tokio::fs::read(local_path).await?;
    let local_hex = hex::encode(Sha256::digest(&data));

    session.enter_raw_mode().await?;
    session.exec_statement(SHA256_HELPER).await?;
    let statement = format!(
        "print(1 if _sha256_hex({}) == {} else 0)",
        py_repr(device_path),
        py_repr(&local_hex)
    );
    let reply = session.exec_statement(&statement).await?;
    session.exit_raw_mode().await?;

    if reply.stdout_trimmed().trim() == "1" {
        Ok(())
    } else {
        Err(Error::HashMismatch)
    }
}

fn bytes_literal(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 4 + 3);
    out.push_str("b'");
    for &byte in data {
        match byte {
            b'\\' => out.push_str("\\\\"),
            b'\'' => out.push_str("\\'"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            0x20..=0x7e => out.push(byte as char),
            _ => out.push_str(&format!("\\x{byte:02x}")),
        }
    }
    out.push('\'');
    out
}
