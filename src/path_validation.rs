/// Maximum allowed path length for security
const MAX_PATH_LENGTH: usize = 4096;

/// Validate that a target or source path is well-formed before it is stored
pub fn validate_path(path: &str) -> Result<(), String> {
    if path.trim().is_empty() {
        return Err("Path is empty".to_string());
    }

    // Check path length
    if path.len() > MAX_PATH_LENGTH {
        return Err(format!("Path too long (max {MAX_PATH_LENGTH} bytes)"));
    }

    // Check for null bytes
    if path.bytes().any(|b| b == 0) {
        return Err("Path contains null bytes".to_string());
    }

    if path.contains('\n') || path.contains('\r') {
        return Err("Path contains line breaks".to_string());
    }

    Ok(())
}

/// UNC-style share paths (`\\server\share\...` or `//server/share/...`) are
/// treated as network paths and get the longer probe timeout.
pub fn is_network_path(path: &str) -> bool {
    let rest = if let Some(rest) = path.strip_prefix("\\\\") {
        rest
    } else if let Some(rest) = path.strip_prefix("//") {
        rest
    } else {
        return false;
    };

    let mut parts = rest.split(['\\', '/']).filter(|p| !p.is_empty());
    matches!((parts.next(), parts.next()), (Some(server), Some(_share)) if server != "?" && server != ".")
}

/// Key used to compare target paths case-insensitively, ignoring separator
/// style and trailing separators.
pub fn path_key(path: &str) -> String {
    let unified = path.trim().replace('\\', "/");
    let trimmed = unified.trim_end_matches('/');
    let trimmed = if trimmed.is_empty() { "/" } else { trimmed };
    trimmed.to_lowercase()
}

pub fn paths_equal(a: &str, b: &str) -> bool {
    path_key(a) == path_key(b)
}
