//! Best-effort detection of files held open by another process.
//!
//! The probe opens the file read/write without truncating and closes it
//! again. A sharing violation means another process holds it exclusively.
//! On Unix a non-blocking `flock` attempt also catches advisory locks taken
//! with `flock`; `fcntl` record locks and cooperative schemes go unnoticed.
//! Treat the answer as advisory only.

use std::fs::{File, OpenOptions};
use std::future::Future;
use std::io;
use std::path::Path;

pub trait LockProbe: Send + Sync {
    fn is_in_use(&self, path: &Path) -> impl Future<Output = bool> + Send;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FileLockProbe;

impl LockProbe for FileLockProbe {
    async fn is_in_use(&self, path: &Path) -> bool {
        is_file_in_use(path).await
    }
}

/// Returns `false` for missing files.
pub async fn is_file_in_use(path: &Path) -> bool {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || probe_blocking(&path))
        .await
        .unwrap_or(false)
}

fn probe_blocking(path: &Path) -> bool {
    if !path.is_file() {
        return false;
    }

    match OpenOptions::new().read(true).write(true).open(path) {
        Ok(file) => held_by_flock(file),
        Err(e) => is_sharing_violation(&e),
    }
}

fn is_sharing_violation(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::ResourceBusy {
        return true;
    }

    #[cfg(windows)]
    {
        // ERROR_SHARING_VIOLATION, ERROR_LOCK_VIOLATION
        matches!(err.raw_os_error(), Some(32) | Some(33))
    }

    #[cfg(not(windows))]
    {
        // ETXTBSY
        err.raw_os_error() == Some(26)
    }
}

#[cfg(unix)]
fn held_by_flock(file: File) -> bool {
    use nix::errno::Errno;
    use nix::fcntl::{Flock, FlockArg};

    match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
        // Dropping the guard releases the probe's own lock.
        Ok(_guard) => false,
        Err((_, errno)) => errno == Errno::EWOULDBLOCK,
    }
}

#[cfg(not(unix))]
fn held_by_flock(_file: File) -> bool {
    false
}
