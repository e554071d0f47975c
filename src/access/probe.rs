use serde::{Deserialize, Serialize};
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error_codes;
use crate::path_validation::is_network_path;

pub const LOCAL_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
pub const NETWORK_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of a read/write access check. Probes never fail; problems are
/// reported here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PathAccess {
    pub accessible: bool,
    pub error: Option<String>,
    pub code: Option<String>,
    pub is_network_error: bool,
}

impl PathAccess {
    pub fn ok() -> Self {
        Self {
            accessible: true,
            error: None,
            code: None,
            is_network_error: false,
        }
    }

    pub fn timed_out() -> Self {
        Self {
            accessible: false,
            error: Some(error_codes::TIMEOUT.to_string()),
            code: Some("ETIMEDOUT".to_string()),
            is_network_error: true,
        }
    }

    pub fn from_io_error(err: &io::Error) -> Self {
        let code = error_codes::io_error_code(err);
        Self {
            accessible: false,
            error: Some(err.to_string()),
            code: code.map(|c| c.to_string()),
            is_network_error: code.map(error_codes::is_network_error_code).unwrap_or(false),
        }
    }
}

pub trait AccessProbe: Send + Sync + 'static {
    fn check(&self, path: &str) -> impl Future<Output = PathAccess> + Send;
}

#[derive(Debug, Clone)]
pub struct PathAccessProbe {
    local_timeout: Duration,
    network_timeout: Duration,
}

impl Default for PathAccessProbe {
    fn default() -> Self {
        Self {
            local_timeout: LOCAL_PROBE_TIMEOUT,
            network_timeout: NETWORK_PROBE_TIMEOUT,
        }
    }
}

impl PathAccessProbe {
    pub fn with_timeouts(local_timeout: Duration, network_timeout: Duration) -> Self {
        Self {
            local_timeout,
            network_timeout,
        }
    }

    pub fn timeout_for(&self, path: &str) -> Duration {
        if is_network_path(path) {
            self.network_timeout
        } else {
            self.local_timeout
        }
    }

    pub async fn check_path_access(&self, path: &str) -> PathAccess {
        let timeout = self.timeout_for(path);
        let target = PathBuf::from(path);
        let probe = tokio::task::spawn_blocking(move || check_blocking(&target));

        match tokio::time::timeout(timeout, probe).await {
            Ok(Ok(Ok(()))) => PathAccess::ok(),
            Ok(Ok(Err(e))) => {
                log::debug!("Path {} is not accessible: {}", path, e);
                PathAccess::from_io_error(&e)
            }
            Ok(Err(join_err)) => PathAccess {
                accessible: false,
                error: Some(join_err.to_string()),
                code: None,
                is_network_error: false,
            },
            Err(_) => {
                log::warn!("Access check for {} timed out after {:?}", path, timeout);
                PathAccess::timed_out()
            }
        }
    }
}

impl AccessProbe for PathAccessProbe {
    async fn check(&self, path: &str) -> PathAccess {
        self.check_path_access(path).await
    }
}

#[cfg(unix)]
fn check_blocking(path: &Path) -> io::Result<()> {
    use nix::unistd::{access, AccessFlags};

    access(path, AccessFlags::R_OK | AccessFlags::W_OK).map_err(io::Error::from)
}

#[cfg(not(unix))]
fn check_blocking(path: &Path) -> io::Result<()> {
    let meta = std::fs::metadata(path)?;
    if meta.permissions().readonly() {
        return Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            format!("{} is read-only", path.display()),
        ));
    }
    Ok(())
}
