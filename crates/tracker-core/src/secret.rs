//! Shared IPC secret stored next to the service's data.

use anyhow::{anyhow, Context, Result};
use rand::RngCore;
use std::path::Path;

pub const SECRET_LEN: usize = 32;

/// Generate a fresh secret and write it hex-encoded to `path`, readable by
/// the owner only.
pub fn create(path: &Path) -> Result<Vec<u8>> {
    let mut secret = vec![0u8; SECRET_LEN];
    rand::rngs::OsRng.fill_bytes(&mut secret);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create {}", parent.display()))?;
    }
    write_private(path, hex::encode(&secret).as_bytes())
        .with_context(|| format!("write secret {}", path.display()))?;
    Ok(secret)
}

pub fn load(path: &Path) -> Result<Vec<u8>> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("read secret {} (is the service running?)", path.display()))?;
    let secret = hex::decode(data.trim()).map_err(|e| anyhow!("corrupt secret file: {e}"))?;
    if secret.len() != SECRET_LEN {
        return Err(anyhow!(
            "secret has {} bytes, expected {SECRET_LEN}",
            secret.len()
        ));
    }
    Ok(secret)
}

fn write_private(path: &Path, data: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // An existing file keeps its old mode through open.
    file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    file.write_all(data)?;
    file.sync_all()
}
