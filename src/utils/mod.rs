//! Utility functions shared by the CLI and the pipeline
//!
//! - URI helpers (credential masking for log lines)
//! - File system helpers

/// URI utilities
pub mod uri {
    /// Sanitize a connection URI by hiding credentials
    ///
    /// # Arguments
    /// * `uri` - The URI to sanitize
    ///
    /// # Returns
    /// * `String` - URI with everything between `://` and `@` replaced by `***`
    pub fn sanitize(uri: &str) -> String {
        if let (Some(proto_end), Some(host_start)) = (uri.find("://"), uri.rfind('@')) {
            if host_start > proto_end {
                let proto = &uri[..proto_end + 3];
                let host = &uri[host_start..];
                return format!("{}***{}", proto, host);
            }
        }
        uri.to_string()
    }
}

/// File system utilities
pub mod fs {
    use std::io;
    use std::path::Path;

    /// Create the parent directory of `path` if it does not exist yet
    pub async fn ensure_parent_dir(path: &Path) -> io::Result<()> {
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => {
                tokio::fs::create_dir_all(parent).await
            }
            _ => Ok(()),
        }
    }
}
