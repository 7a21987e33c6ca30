//! Drives `mpy-cross` as an optional external tool (§4.4).
//!
//! The compiler is never bundled or assumed present: [`Compiler::locate`]
//! returns `None` when no platform-matching binary sits next to the running
//! executable, and callers are expected to fall back to shipping raw source.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to run mpy-cross: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("mpy-cross exited with {status}: {stderr}")]
    CompileFailed { status: String, stderr: String },
    #[error("could not parse mpy-cross version output: {0:?}")]
    UnrecognizedVersionOutput(String),
}

static VERSION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"mpy-cross emitting mpy v(\d+)").expect("valid regex"));

/// A located `mpy-cross` binary, ready to be queried or invoked.
#[derive(Debug, Clone)]
pub struct Compiler {
    binary: PathBuf,
}

impl Compiler {
    /// Looks for a platform-matching `mpy-cross` binary in a `mpy-cross/`
    /// directory next to the currently-running executable.
    ///
    /// Returns `None` (not an error) when nothing is found: the compiler is
    /// an optional capability.
    #[must_use]
    pub fn locate() -> Option<Self> {
        let exe_dir = std::env::current_exe().ok()?.parent()?.to_path_buf();
        let binary = exe_dir.join("mpy-cross").join(platform_binary_name());
        if binary.is_file() {
            debug!(path = %binary.display(), "found mpy-cross binary");
            Some(Self { binary })
        } else {
            debug!(path = %binary.display(), "no mpy-cross binary at this path");
            None
        }
    }

    /// Constructs a compiler bound to an explicit binary path, bypassing
    /// platform auto-detection. Used by tests and by callers embedding a
    /// non-default compiler layout.
    #[must_use]
    pub fn at(binary: impl Into<PathBuf>) -> Self {
        Self { binary: binary.into() }
    }

    /// Runs the compiler with a version flag and extracts its emitted
    /// bytecode format major version.
    pub async fn read_compiler_format(&self) -> Result<u32, Error> {
        let output = Command::new(&self.binary).arg("--version").output().await?;
        let combined = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        let captures = VERSION_PATTERN
            .captures(&combined)
            .ok_or_else(|| Error::UnrecognizedVersionOutput(combined.clone()))?;
        captures[1].parse().map_err(|_| Error::UnrecognizedVersionOutput(combined))
    }

    /// True iff this compiler emits the same bytecode format the board expects.
    pub async fn supports(&self, board_format: u32) -> Result<bool, Error> {
        Ok(self.read_compiler_format().await? == board_format)
    }

    /// Compiles `file_path` to `.mpy`, unless it already is one.
    ///
    /// `base_path`, when given, becomes the subprocess's working directory
    /// so embedded source paths in the compiled output are relative rather
    /// than absolute. `arch`, when given, is passed as `-march=<arch>`.
    pub async fn compile(
        &self,
        file_path: &Path,
        base_path: Option<&Path>,
        arch: Option<&str>,
    ) -> Result<PathBuf, Error> {
        if file_path.extension().is_some_and(|ext| ext == "mpy") {
            return Ok(file_path.to_path_buf());
        }

        let mut cmd = Command::new(&self.binary);
        if let Some(base) = base_path {
            cmd.current_dir(base);
        }
        if let Some(arch) = arch {
            cmd.arg(format!("-march={arch}"));
        }
        cmd.arg(file_path);

        let output = cmd.output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            warn!(path = %file_path.display(), %stderr, "mpy-cross compile failed");
            return Err(Error::CompileFailed { status: output.status.to_string(), stderr });
        }

        Ok(file_path.with_extension("mpy"))
    }
}

fn platform_binary_name() -> &'static str {
    match (std::env::consts::OS, std::env::consts::ARCH) {
        ("windows", _) => "mpy-cross-windows.exe",
        ("macos", "aarch64") => "mpy-cross-macos-arm64",
        ("macos", _) => "mpy-cross-macos-x64",
        ("linux", "aarch64") => "mpy-cross-linux-arm64",
        (_, _) => "mpy-cross-linux-x64",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locate_returns_none_without_a_binary_present() {
        // The test binary's directory never ships an mpy-cross/ subfolder.
        assert!(Compiler::locate().is_none());
    }

    #[test]
    fn version_pattern_extracts_major_version() {
        let captures = VERSION_PATTERN.captures("MicroPython mpy-cross emitting mpy v6.3\n").unwrap();
        assert_eq!(&captures[1], "6");
    }

    #[tokio::test]
    async fn compile_is_a_noop_for_already_compiled_files() {
        let compiler = Compiler::at("/nonexistent/mpy-cross");
        let path = Path::new("already_compiled.mpy");
        let result = compiler.compile(path, None, None).await.unwrap();
        assert_eq!(result, path);
    }

    #[tokio::test]
    async fn compile_fails_loudly_when_binary_is_missing() {
        let dir = tempfile::TempDir::new().unwrap();
        let source = dir.path().join("a.py");
        tokio::fs::write(&source, b"print(1)").await.unwrap();

        let compiler = Compiler::at(dir.path().join("definitely-not-a-binary"));
        let err = compiler.compile(&source, None, None).await.unwrap_err();
        assert!(matches!(err, Error::Spawn(_)));
    }
}
