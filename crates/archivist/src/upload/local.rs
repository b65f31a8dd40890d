//! CAR files stored under a local (or mounted) directory.

use super::{RemoteId, UploadBackend, UploadError};
use archivist_car::{CarError, CarReader, Cid, TransferContainer};
use async_trait::async_trait;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info};

/// Stores each container as `<dir>/<target>/<root-cid>.car`.
///
/// The reported identifier is read back from the stored container after
/// every block has been re-hashed, so a corrupted copy never reports the
/// expected CID.
pub struct LocalCarStore {
    dir: PathBuf,
    target_dir: OnceLock<PathBuf>,
}

impl LocalCarStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            target_dir: OnceLock::new(),
        }
    }

    /// Location of a stored container, if a target has been selected.
    pub fn stored_path(&self, cid: &str) -> Option<PathBuf> {
        self.target_dir
            .get()
            .map(|dir| dir.join(format!("{}.car", cid)))
    }
}

#[async_trait]
impl UploadBackend for LocalCarStore {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn select_target(&self, target: &str) -> Result<(), UploadError> {
        if target.is_empty() || target.contains(&['/', '\\'][..]) || target == "." || target == ".." {
            return Err(UploadError::Rejected(format!("invalid target name '{}'", target)));
        }
        let dir = self.dir.join(target);
        if let Some(current) = self.target_dir.get() {
            if current == &dir {
                return Ok(());
            }
            return Err(UploadError::Rejected(format!(
                "target already set to {}",
                current.display()
            )));
        }

        tokio::fs::create_dir_all(&dir).await?;
        let _ = self.target_dir.set(dir.clone());
        info!(dir = %dir.display(), "Selected local CAR store");
        Ok(())
    }

    async fn upload(&self, container: &TransferContainer) -> Result<RemoteId, UploadError> {
        let target_dir = self.target_dir.get().ok_or(UploadError::NoTarget)?.clone();
        let source = container.open()?;
        let name = container.root().to_string();

        let cid = tokio::task::spawn_blocking(move || store(source, &target_dir, &name))
            .await
            .map_err(|e| UploadError::Unavailable(format!("store task failed: {}", e)))??;
        Ok(RemoteId(cid.to_string()))
    }
}

/// Copy `source` into place, then verify the stored copy.
fn store(mut source: File, target_dir: &Path, name: &str) -> Result<Cid, UploadError> {
    let partial = target_dir.join(format!("{}.car.partial", name));

    {
        let mut out = BufWriter::new(File::create(&partial)?);
        io::copy(&mut source, &mut out)?;
        out.flush()?;
        out.get_ref().sync_all()?;
    }

    let root = match verify(&partial) {
        Ok(root) => root,
        Err(e) => {
            let _ = fs::remove_file(&partial);
            return Err(e);
        }
    };

    // The file is named after the root the container claims, not the one
    // that was asked for.
    let stored = target_dir.join(format!("{}.car", root));
    fs::rename(&partial, &stored)?;
    debug!(path = %stored.display(), "Stored container");
    Ok(root)
}

/// Read every section, checking block hashes, and return the single root.
fn verify(path: &Path) -> Result<Cid, UploadError> {
    let mut reader = CarReader::new(BufReader::new(File::open(path)?)).map_err(car_error)?;
    let root = match reader.roots() {
        [root] => *root,
        roots => {
            return Err(UploadError::Rejected(format!(
                "expected one root, found {}",
                roots.len()
            )))
        }
    };

    let mut root_seen = false;
    while let Some((cid, _)) = reader.next_block().map_err(car_error)? {
        root_seen |= cid == root;
    }
    if !root_seen {
        return Err(UploadError::Rejected(format!("root block {} missing", root)));
    }
    Ok(root)
}

fn car_error(err: CarError) -> UploadError {
    match err {
        CarError::Io(e) => UploadError::Io(e),
        other => UploadError::Rejected(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use archivist_car::{read_car_roots, ContentAddresser};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_upload_stores_container_by_root() {
        let tmp = TempDir::new().unwrap();
        let store = LocalCarStore::new(tmp.path());
        store.select_target("archive").await.unwrap();

        let (address, container) = ContentAddresser::default().derive(&b"hello world"[..]).unwrap();
        let remote = store.upload(&container).await.unwrap();
        assert_eq!(remote.as_str(), address.cid.to_string());

        let stored = store.stored_path(remote.as_str()).unwrap();
        assert!(stored.starts_with(tmp.path().join("archive")));
        let roots = read_car_roots(File::open(&stored).unwrap()).unwrap();
        assert_eq!(roots, vec![address.cid]);
        assert!(!tmp.path().join("archive").join(format!("{}.car.partial", remote)).exists());
    }

    #[tokio::test]
    async fn test_upload_without_target_fails() {
        let tmp = TempDir::new().unwrap();
        let store = LocalCarStore::new(tmp.path());
        let (_, container) = ContentAddresser::default().derive(&b"x"[..]).unwrap();
        assert!(matches!(store.upload(&container).await, Err(UploadError::NoTarget)));
    }

    #[tokio::test]
    async fn test_target_is_fixed_once_selected() {
        let tmp = TempDir::new().unwrap();
        let store = LocalCarStore::new(tmp.path());
        store.select_target("a").await.unwrap();
        store.select_target("a").await.unwrap();
        assert!(store.select_target("b").await.is_err());
        assert!(store.select_target("../escape").await.is_err());
    }

    #[test]
    fn test_verify_rejects_corrupt_copy() {
        let tmp = TempDir::new().unwrap();
        let (_, container) = ContentAddresser::default().derive(&b"hello world"[..]).unwrap();
        let mut bytes = container.to_bytes().unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;

        let path = tmp.path().join("bad.car");
        fs::write(&path, &bytes).unwrap();
        assert!(matches!(verify(&path), Err(UploadError::Rejected(_))));
    }
}
