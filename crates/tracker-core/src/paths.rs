use directories::ProjectDirs;
use std::path::{Path, PathBuf};

pub const APP_QUALIFIER: &str = "com";
pub const APP_ORG: &str = "filetracker";
pub const APP_NAME: &str = "tracker";

pub const CONFIG_FILE: &str = "config.json";
pub const SECRET_FILE: &str = "ipc.secret";
pub const SOCKET_ENV: &str = "TRACKER_SOCKET";

pub fn data_dir() -> anyhow::Result<PathBuf> {
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| anyhow::anyhow!("cannot determine data directory"))?;
    Ok(dirs.data_dir().to_path_buf())
}

/// Data directory override, or the per-user default.
pub fn resolve_data_dir(override_dir: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    match override_dir {
        Some(dir) => Ok(dir),
        None => data_dir(),
    }
}

pub fn config_path_in(data: &Path) -> PathBuf {
    data.join(CONFIG_FILE)
}

pub fn ipc_secret_path_in(data: &Path) -> PathBuf {
    data.join(SECRET_FILE)
}

/// Control socket for a service whose data lives in `data`.
pub fn ipc_socket_path_in(data: &Path) -> PathBuf {
    if let Ok(override_path) = std::env::var(SOCKET_ENV) {
        return PathBuf::from(override_path);
    }
    data.join("tracker.ipc")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::canonicalize_path;

    #[test]
    fn service_files_share_the_data_dir() {
        let data = Path::new("/var/lib/tracker");
        assert_eq!(config_path_in(data), data.join(CONFIG_FILE));
        assert_eq!(ipc_secret_path_in(data), data.join(SECRET_FILE));
        if std::env::var_os(SOCKET_ENV).is_none() {
            let socket = ipc_socket_path_in(data);
            assert_eq!(socket, data.join("tracker.ipc"));
            // Every location the service uses is a path the tracker can register.
            assert!(canonicalize_path(&socket).is_ok());
        }
    }
}
