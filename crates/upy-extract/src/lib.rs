//! The on-board extractor (§4.10): ships a self-contained tar/gzip reader
//! to the board (the board never needs a preinstalled `tarfile` module)
//! and runs it, parsing the literal sentinels it prints.

use thiserror::Error;
use tracing::debug;
use upy_board::{py_repr, BoardChannel, Session};

#[derive(Debug, Error)]
pub enum Error {
    #[error("package already installed at `{path}`")]
    PackageAlreadyInstalled { path: String },
    #[error("extraction failed: {0}")]
    ExtractFailed(String),
    #[error(transparent)]
    Board(#[from] upy_board::Error),
}

const EXTRACTION_COMPLETE: &str = "Extraction complete";
const CREATING_DIRECTORY_PREFIX: &str = "Creating directory ";

/// A minimal, dependency-free tar+gzip reader shipped to the board once
/// per session. Deliberately self-contained rather than relying on a
/// preinstalled `tarfile`/`utarfile` module, which many builds omit.
const UNTAR_HELPER: &str = "\
def _makedirs(path):
    parts = [p for p in path.split('/') if p]
    current = ''
    import uos
    for part in parts:
        current += '/' + part
        try:
            uos.mkdir(current)
        except OSError:
            pass

def _make_entry_directory(path):
    import uos
    parent = path.rsplit('/', 1)[0]
    if parent:
        _makedirs(parent)
    uos.mkdir(path)

def untar(archive_path, dest_dir):
    import uos
    try:
        uos.mkdir(dest_dir)
    except OSError:
        pass
    import deflate
    with open(archive_path, 'rb') as raw:
        with deflate.DeflateIO(raw, deflate.GZIP) as stream:
            while True:
                header = stream.read(512)
                if not header or header == b'\\x00' * 512:
                    break
                name = header[0:100].rstrip(b'\\x00').decode()
                size_field = header[124:136].rstrip(b'\\x00 ') or b'0'
                size = int(size_field, 8)
                typeflag = header[156:157]
                path = dest_dir + '/' + name
                if typeflag == b'5' or name.endswith('/'):
                    print('Creating directory', path)
                    _make_entry_directory(path)
                else:
                    _makedirs(path.rsplit('/', 1)[0])
                    with open(path, 'wb') as out:
                        remaining = size
                        while remaining > 0:
                            chunk = stream.read(min(512, remaining))
                            out.write(chunk)
                            remaining -= len(chunk)
                padding = (512 - (size % 512)) % 512
                if padding:
                    stream.read(padding)
    print('Extraction complete')
";

/// Ships the extraction helper and runs it, translating its output into a
/// `Result` per §4.10's failure mapping.
pub async fn extract<C: BoardChannel>(
    session: &mut Session<C>,
    archive_path: &str,
    dest_dir: &str,
) -> Result<(), Error> {
    session.enter_raw_mode().await?;
    session.exec_statement(UNTAR_HELPER).await?;
    let statement = format!("untar({}, {})", py_repr(archive_path), py_repr(dest_dir));
    let reply = session.exec_statement(&statement).await?;
    session.exit_raw_mode().await?;

    debug!(stdout = %reply.stdout, stderr = %reply.stderr, "extraction reply");

    if reply.stdout.contains(EXTRACTION_COMPLETE) {
        return Ok(());
    }

    if reply.stderr.contains("EEXIST") || reply.stderr.contains("Errno 17") {
        let path = last_creating_directory(&reply.stdout)
            .unwrap_or_else(|| dest_dir.to_string());
        return Err(Error::PackageAlreadyInstalled { path });
    }

    Err(Error::ExtractFailed(reply.stderr))
}

fn last_creating_directory(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .filter_map(|line| line.strip_prefix(CREATING_DIRECTORY_PREFIX))
        .last()
        .map(str::to_string)
}
