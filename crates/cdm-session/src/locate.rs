//! Debugger executable discovery.
//!
//! Resolution order: explicit override, then the Windows Kits install
//! locations (current architecture first), then a PATH lookup with a bounded
//! probe timeout. PATH probing can touch network drives and must not hang
//! the server startup.

use cdm_core::DebugError;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

const PATH_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

const DEBUGGER_EXE: &str = "cdb";

/// Windows Kits install candidates, most common layouts first.
fn candidate_paths() -> Vec<PathBuf> {
    const ROOTS: &[&str] = &[
        r"C:\Program Files (x86)\Windows Kits\10\Debuggers",
        r"C:\Program Files\Windows Kits\10\Debuggers",
        r"C:\Program Files (x86)\Windows Kits\8.1\Debuggers",
    ];

    // Prefer the architecture this server runs as; crash dumps from the
    // matching architecture are the common case.
    let arches: &[&str] = if cfg!(target_arch = "x86") {
        &["x86", "x64", "arm64"]
    } else if cfg!(target_arch = "aarch64") {
        &["arm64", "x64", "x86"]
    } else {
        &["x64", "x86", "arm64"]
    };

    let mut candidates = Vec::new();
    for root in ROOTS {
        for arch in arches {
            candidates.push(PathBuf::from(root).join(arch).join("cdb.exe"));
        }
    }
    candidates
}

/// Synchronous resolution; see [`locate_debugger`] for the async wrapper
/// that bounds the PATH probe.
pub fn locate_debugger_blocking(override_path: Option<&str>) -> Result<PathBuf, DebugError> {
    if let Some(explicit) = override_path {
        let path = PathBuf::from(explicit);
        if path.is_file() {
            return Ok(path);
        }
        return Err(DebugError::ExecutableNotFound(format!(
            "configured override does not exist: {explicit}"
        )));
    }

    for candidate in candidate_paths() {
        if candidate.is_file() {
            debug!(path = %candidate.display(), "found debugger in Windows Kits");
            return Ok(candidate);
        }
    }

    match which::which(DEBUGGER_EXE) {
        Ok(path) => {
            debug!(path = %path.display(), "found debugger on PATH");
            Ok(path)
        }
        Err(_) => Err(DebugError::ExecutableNotFound(
            "cdb not found in Windows Kits locations or on PATH".into(),
        )),
    }
}

/// Locate the debugger executable, bounding the PATH probe.
pub async fn locate_debugger(override_path: Option<String>) -> Result<PathBuf, DebugError> {
    let probe = tokio::task::spawn_blocking(move || {
        locate_debugger_blocking(override_path.as_deref())
    });
    match tokio::time::timeout(PATH_PROBE_TIMEOUT, probe).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(DebugError::ExecutableNotFound(format!(
            "executable probe failed: {join_err}"
        ))),
        Err(_) => {
            warn!(
                timeout_secs = PATH_PROBE_TIMEOUT.as_secs(),
                "debugger PATH probe timed out"
            );
            Err(DebugError::ExecutableNotFound(
                "PATH probe for cdb timed out".into(),
            ))
        }
    }
}
