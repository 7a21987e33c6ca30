//! The board session façade (§4.6): an interactive raw-REPL session driven
//! over any `AsyncRead + AsyncWrite` channel.

use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tracing::{debug, trace};

use crate::quote::py_repr;

const CTRL_A: u8 = 0x01;
const CTRL_B: u8 = 0x02;
const CTRL_D: u8 = 0x04;

#[derive(Debug, Error)]
pub enum Error {
    #[error("board did not reach a ready prompt in time")]
    PromptTimeout,
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Any byte-oriented transport a [`Session`] can be driven over. Blanket
/// implemented for anything `AsyncRead + AsyncWrite + Unpin + Send` — the
/// actual serial transport and its enumeration are external collaborators
/// this crate has no knowledge of.
pub trait BoardChannel: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> BoardChannel for T {}

/// The decoded body of one raw-REPL reply: `OK <stdout> 0x04 <stderr> 0x04 >`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawReply {
    pub stdout: String,
    pub stderr: String,
}

impl RawReply {
    /// `stdout` with a single trailing `\r\n` removed, as added by a remote
    /// `print()` statement.
    #[must_use]
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.strip_suffix("\r\n").unwrap_or(&self.stdout)
    }
}

/// An open interactive session with a board's interpreter.
pub struct Session<C: BoardChannel> {
    reader: Option<BufReader<ReadHalf<C>>>,
    writer: Option<WriteHalf<C>>,
    raw_mode: bool,
}

impl<C: BoardChannel> Session<C> {
    /// Takes ownership of an already-connected channel. There is no
    /// separate "open the port" step here: opening the physical transport
    /// is the caller's concern (and out of this crate's scope); this
    /// façade's `open`/`close`/`is_open` model the session's logical state
    /// over that already-open channel.
    #[must_use]
    pub fn open(channel: C) -> Self {
        let (read_half, write_half) = tokio::io::split(channel);
        Self { reader: Some(BufReader::new(read_half)), writer: Some(write_half), raw_mode: false }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.reader.is_some()
    }

    /// Drops the channel halves, ending the session. A subsequent call is
    /// a no-op.
    pub async fn close(&mut self) -> Result<(), Error> {
        self.reader = None;
        self.writer = None;
        Ok(())
    }

    /// Reads (and discards) bytes until a `>` prompt byte is seen, or
    /// `timeout` elapses.
    pub async fn wait_for_prompt(&mut self, timeout: Duration) -> Result<(), Error> {
        let reader = self.reader_mut()?;
        tokio::time::timeout(timeout, async move {
            let mut byte = [0u8; 1];
            loop {
                reader.read_exact(&mut byte).await?;
                if byte[0] == b'>' {
                    return Ok::<(), std::io::Error>(());
                }
            }
        })
        .await
        .map_err(|_| Error::PromptTimeout)??;
        Ok(())
    }

    /// Sends Ctrl-A and waits for the `raw REPL; CTRL-B to exit` banner's
    /// trailing prompt.
    pub async fn enter_raw_mode(&mut self) -> Result<(), Error> {
        self.write_all(&[CTRL_A]).await?;
        self.wait_for_prompt(Duration::from_secs(5)).await?;
        self.raw_mode = true;
        Ok(())
    }

    /// Sends Ctrl-B, returning the board to its friendly REPL.
    pub async fn exit_raw_mode(&mut self) -> Result<(), Error> {
        self.write_all(&[CTRL_B]).await?;
        self.raw_mode = false;
        Ok(())
    }

    /// Sends `text` as a script followed by Ctrl-D, and decodes the reply.
    pub async fn exec_statement(&mut self, text: &str) -> Result<RawReply, Error> {
        trace!(statement = %text, "executing statement");
        self.write_all(text.as_bytes()).await?;
        self.write_all(&[CTRL_D]).await?;
        self.read_framed_reply().await
    }

    /// Reads `host_path` and executes its contents as a single statement.
    pub async fn exec_file(&mut self, host_path: &Path) -> Result<RawReply, Error> {
        let contents = tokio::fs::read_to_string(host_path).await?;
        self.exec_statement(&contents).await
    }

    /// Removes `device_path` on the board.
    pub async fn remove_file(&mut self, device_path: &str) -> Result<RawReply, Error> {
        let statement = format!("import os\nos.remove({})", py_repr(device_path));
        self.exec_statement(&statement).await
    }

    /// Writes `host_path`'s full contents to `device_path` in one
    /// statement. Suitable for small files (manifests, single-statement
    /// helper definitions); the CRC-verified chunked transfer used for
    /// whole archives lives in the transfer crate built on top of this
    /// session's primitives.
    pub async fn put_file(
        &mut self,
        host_path: &Path,
        device_path: &str,
        mut on_progress: impl FnMut(u8),
    ) -> Result<RawReply, Error> {
        let contents = tokio::fs::read(host_path).await?;
        let literal = py_repr(&String::from_utf8_lossy(&contents));
        let statement =
            format!("with open({}, 'wb') as f:\n f.write({}.encode())", py_repr(device_path), literal);
        let reply = self.exec_statement(&statement).await?;
        on_progress(100);
        Ok(reply)
    }

    async fn write_all(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let writer = self.writer.as_mut().ok_or_else(|| Error::Protocol("session is closed".into()))?;
        writer.write_all(bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    fn reader_mut(&mut self) -> Result<&mut BufReader<ReadHalf<C>>, Error> {
        self.reader.as_mut().ok_or_else(|| Error::Protocol("session is closed".into()))
    }

    async fn read_framed_reply(&mut self) -> Result<RawReply, Error> {
        let reader = self.reader_mut()?;

        let mut prefix = [0u8; 2];
        reader.read_exact(&mut prefix).await?;
        if &prefix != b"OK" {
            return Err(Error::Protocol(format!(
                "reply did not start with `OK`: {:?}",
                String::from_utf8_lossy(&prefix)
            )));
        }

        let stdout = read_until(reader, CTRL_D).await?;
        let stderr = read_until(reader, CTRL_D).await?;

        let mut closing = [0u8; 1];
        reader.read_exact(&mut closing).await?;
        if closing[0] != b'>' {
            return Err(Error::Protocol(format!("expected closing `>`, got {:#04x}", closing[0])));
        }

        debug!(stdout_len = stdout.len(), stderr_len = stderr.len(), "decoded raw reply");
        Ok(RawReply {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }
}

async fn read_until<R: AsyncRead + Unpin>(reader: &mut R, terminator: u8) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        reader.read_exact(&mut byte).await?;
        if byte[0] == terminator {
            return Ok(buf);
        }
        buf.push(byte[0]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn exec_statement_decodes_a_well_formed_reply() {
        let (client, mut board) = duplex(4096);
        let mut session = Session::open(client);

        tokio::spawn(async move {
            let mut incoming = [0u8; 64];
            let n = board.read(&mut incoming).await.unwrap();
            assert!(incoming[..n].ends_with(&[CTRL_D]));
            board.write_all(b"OKhello\r\n\x04\x04>").await.unwrap();
        });

        let reply = session.exec_statement("print('hello')").await.unwrap();
        assert_eq!(reply.stdout, "hello\r\n");
        assert_eq!(reply.stdout_trimmed(), "hello");
        assert_eq!(reply.stderr, "");
    }

    #[tokio::test]
    async fn reply_not_starting_with_ok_is_a_protocol_error() {
        let (client, mut board) = duplex(4096);
        let mut session = Session::open(client);

        tokio::spawn(async move {
            let mut incoming = [0u8; 64];
            let _ = board.read(&mut incoming).await.unwrap();
            board.write_all(b"ERhuh\x04\x04>").await.unwrap();
        });

        let err = session.exec_statement("bogus").await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn enter_raw_mode_consumes_banner_up_to_prompt() {
        let (client, mut board) = duplex(4096);
        let mut session = Session::open(client);

        tokio::spawn(async move {
            let mut incoming = [0u8; 1];
            board.read_exact(&mut incoming).await.unwrap();
            assert_eq!(incoming[0], CTRL_A);
            board.write_all(b"raw REPL; CTRL-B to exit\r\n>").await.unwrap();
        });

        session.enter_raw_mode().await.unwrap();
        assert!(session.raw_mode);
    }

    #[tokio::test]
    async fn close_then_exec_statement_is_a_protocol_error() {
        let (client, _board) = duplex(4096);
        let mut session = Session::open(client);
        session.close().await.unwrap();
        assert!(!session.is_open());
        let err = session.exec_statement("1").await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }
}
