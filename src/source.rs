//! Input acquisition: plain files are opened directly, URLs are fetched by
//! piping the stdout of an external `curl` process.

use std::fs::File;
use std::os::fd::OwnedFd;
use std::process::{Child, Command, Stdio};

use crate::error::{Error, Result};

/// External fetcher used for URL inputs. The `-g` switch turns off curl's
/// globbing so URLs may contain `[]` (XAPI-style bounding boxes).
pub(crate) const FETCH_COMMAND: &str = "curl";
const FETCH_ARGS: &[&str] = &["-g"];

/// An open input: the descriptor the pipeline reads from, plus the child
/// process to reap when the input came from a URL.
#[derive(Debug)]
pub struct Source {
    pub fd: OwnedFd,
    pub child: Option<Child>,
}

impl Source {
    /// Opens `path` for reading. Paths with an `http`, `https`, `ftp` or
    /// `file` scheme spawn the external fetcher; everything else is treated
    /// as a local file.
    pub fn open(path: &str) -> Result<Source> {
        match scheme_of(path) {
            Some("http") | Some("https") | Some("ftp") | Some("file") => {
                let (fd, child) = spawn_fetcher(FETCH_COMMAND, FETCH_ARGS, path)?;
                Ok(Source {
                    fd,
                    child: Some(child),
                })
            }
            _ => {
                let file =
                    File::open(path).map_err(|e| Error::system("opening input file failed", e))?;
                Ok(Source {
                    fd: file.into(),
                    child: None,
                })
            }
        }
    }
}

/// Returns the scheme prefix of `path`, if any (the part before the first
/// `:`). A Windows-style drive letter or a plain path yields `None`.
fn scheme_of(path: &str) -> Option<&str> {
    let scheme = &path[..path.find(':')?];
    if scheme.is_empty() || !scheme.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    Some(scheme)
}

/// Spawns `program args... target` with stdout piped back to us and stdin
/// and stderr redirected to the null device. The caller owns the read end
/// of the pipe and the child handle; nothing else leaks into this process.
pub(crate) fn spawn_fetcher(
    program: &str,
    args: &[&str],
    target: &str,
) -> Result<(OwnedFd, Child)> {
    let mut child = Command::new(program)
        .args(args)
        .arg(target)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| Error::system("spawning fetcher failed", e))?;
    // stdout is piped, so take() cannot fail
    let stdout = child
        .stdout
        .take()
        .expect("piped stdout missing on spawned child");
    Ok((stdout.into(), child))
}
