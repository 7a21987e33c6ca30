//! Board inspection queries (§4.7). Each query brackets a single
//! statement between entering and leaving raw mode.

use crate::session::{BoardChannel, Error, Session};

/// Runs `statement`, which must `print()` exactly one line, and returns
/// that line with its trailing `\r\n` removed.
async fn query_line<C: BoardChannel>(session: &mut Session<C>, statement: &str) -> Result<String, Error> {
    session.enter_raw_mode().await?;
    let reply = session.exec_statement(statement).await?;
    session.exit_raw_mode().await?;
    Ok(reply.stdout_trimmed().to_string())
}

/// The third `-`-separated field of the board's platform string onward,
/// rejoined with `-` (the fourth onward, if the third is the literal
/// `preview`). `None` means the field could not be found.
pub async fn architecture<C: BoardChannel>(session: &mut Session<C>) -> Result<Option<String>, Error> {
    let line = query_line(session, "import os\nprint(os.uname().machine)").await?;
    let fields: Vec<&str> = line.split('-').collect();
    let start = match fields.get(2) {
        Some(&"preview") => 3,
        Some(_) => 2,
        None => return Ok(None),
    };
    if start >= fields.len() {
        return Ok(None);
    }
    Ok(Some(fields[start..].join("-")))
}

/// `getattr(sys.implementation, '_mpy', 0) & 0xFF`.
pub async fn mpy_format<C: BoardChannel>(session: &mut Session<C>) -> Result<u32, Error> {
    let line = query_line(
        session,
        "import sys\nprint(getattr(sys.implementation, '_mpy', 0) & 0xFF)",
    )
    .await?;
    line.trim()
        .parse()
        .map_err(|_| Error::Protocol(format!("non-numeric mpy format: {line:?}")))
}

/// `os.uname().release`, with any suffix after the first `-` removed.
pub async fn interpreter_version<C: BoardChannel>(session: &mut Session<C>) -> Result<String, Error> {
    let line = query_line(session, "import os\nprint(os.uname().release)").await?;
    Ok(line.split('-').next().unwrap_or(&line).to_string())
}

/// The first entry of `sys.path` containing the substring `/lib`, if any.
pub async fn library_path<C: BoardChannel>(session: &mut Session<C>) -> Result<Option<String>, Error> {
    let line = query_line(session, "import sys\nprint(':'.join(sys.path))").await?;
    Ok(line.split(':').find(|segment| segment.contains("/lib")).map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    async fn respond_to_one_raw_statement(mut board: impl AsyncReadExt + AsyncWriteExt + Unpin, reply: &[u8]) {
        // Ctrl-A (enter raw mode)
        let mut byte = [0u8; 1];
        board.read_exact(&mut byte).await.unwrap();
        assert_eq!(byte[0], 0x01);
        board.write_all(b"raw REPL; CTRL-B to exit\r\n>").await.unwrap();

        // statement + Ctrl-D
        let mut buf = [0u8; 256];
        let n = board.read(&mut buf).await.unwrap();
        assert!(buf[..n].ends_with(&[0x04]));
        board.write_all(reply).await.unwrap();

        // Ctrl-B (exit raw mode)
        board.read_exact(&mut byte).await.unwrap();
        assert_eq!(byte[0], 0x02);
    }

    #[tokio::test]
    async fn architecture_parses_third_field() {
        let (client, board) = duplex(4096);
        let mut session = Session::open(client);
        let responder = tokio::spawn(respond_to_one_raw_statement(
            board,
            b"OKESP32-S3 module-WROOM-1\r\n\x04\x04>",
        ));
        let arch = architecture(&mut session).await.unwrap();
        responder.await.unwrap();
        assert_eq!(arch.as_deref(), Some("WROOM-1"));
    }

    #[tokio::test]
    async fn architecture_skips_preview_field() {
        let (client, board) = duplex(4096);
        let mut session = Session::open(client);
        let responder = tokio::spawn(respond_to_one_raw_statement(
            board,
            b"OKESP32-S3 module-preview-WROOM-1\r\n\x04\x04>",
        ));
        let arch = architecture(&mut session).await.unwrap();
        responder.await.unwrap();
        assert_eq!(arch.as_deref(), Some("WROOM-1"));
    }

    #[tokio::test]
    async fn mpy_format_parses_integer() {
        let (client, board) = duplex(4096);
        let mut session = Session::open(client);
        let responder = tokio::spawn(respond_to_one_raw_statement(board, b"OK6\r\n\x04\x04>"));
        let fmt = mpy_format(&mut session).await.unwrap();
        responder.await.unwrap();
        assert_eq!(fmt, 6);
    }

    #[tokio::test]
    async fn interpreter_version_strips_suffix() {
        let (client, board) = duplex(4096);
        let mut session = Session::open(client);
        let responder = tokio::spawn(respond_to_one_raw_statement(board, b"OK1.22.0-dirty\r\n\x04\x04>"));
        let version = interpreter_version(&mut session).await.unwrap();
        responder.await.unwrap();
        assert_eq!(version, "1.22.0");
    }

    #[tokio::test]
    async fn library_path_finds_lib_segment() {
        let (client, board) = duplex(4096);
        let mut session = Session::open(client);
        let responder = tokio::spawn(respond_to_one_raw_statement(
            board,
            b"OK:lib:/sd/lib:/flash\r\n\x04\x04>",
        ));
        let path = library_path(&mut session).await.unwrap();
        responder.await.unwrap();
        assert_eq!(path.as_deref(), Some("/sd/lib"));
    }
}
