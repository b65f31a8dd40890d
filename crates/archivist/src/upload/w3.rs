//! web3.storage through the `w3` command-line client.

use super::{excerpt, RemoteId, UploadBackend, UploadError};
use archivist_car::{Cid, TransferContainer};
use async_trait::async_trait;
use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::sync::OnceLock;
use tokio::process::Command;
use tracing::{debug, info};

/// Shells out to `w3 space use` and `w3 up --car`.
pub struct W3Backend {
    bin: PathBuf,
    space: OnceLock<String>,
}

impl W3Backend {
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self {
            bin: bin.into(),
            space: OnceLock::new(),
        }
    }

    async fn run(&self, args: &[&OsStr]) -> Result<Output, UploadError> {
        debug!(bin = %self.bin.display(), ?args, "Running w3");
        Command::new(&self.bin)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => {
                    UploadError::Rejected(format!("{} not found", self.bin.display()))
                }
                _ => UploadError::Io(e),
            })
    }
}

#[async_trait]
impl UploadBackend for W3Backend {
    fn name(&self) -> &'static str {
        "w3"
    }

    async fn select_target(&self, target: &str) -> Result<(), UploadError> {
        if let Some(current) = self.space.get() {
            if current == target {
                return Ok(());
            }
            return Err(UploadError::Rejected(format!(
                "space already set to {}, refusing to switch to {}",
                current, target
            )));
        }

        let output = self
            .run(&[OsStr::new("space"), OsStr::new("use"), OsStr::new(target)])
            .await?;
        if !output.status.success() {
            return Err(UploadError::Rejected(format!(
                "w3 space use {} exited with {}: {}",
                target,
                output.status,
                excerpt(&output.stderr)
            )));
        }

        // A concurrent caller may have won; either way the space is `target`
        let _ = self.space.set(target.to_string());
        info!(space = target, "Selected w3 space");
        Ok(())
    }

    async fn upload(&self, container: &TransferContainer) -> Result<RemoteId, UploadError> {
        if self.space.get().is_none() {
            return Err(UploadError::NoTarget);
        }

        let car: &Path = container.path();
        let output = self
            .run(&[
                OsStr::new("up"),
                OsStr::new("--car"),
                car.as_os_str(),
                OsStr::new("--json"),
            ])
            .await?;
        if !output.status.success() {
            return Err(UploadError::Unavailable(format!(
                "w3 up exited with {}: {}",
                output.status,
                excerpt(&output.stderr)
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_root_cid(&stdout).map(RemoteId).ok_or_else(|| {
            UploadError::Protocol(format!("no root CID in w3 output: {}", excerpt(&output.stdout)))
        })
    }
}

/// Pull the root CID out of `w3 up` output.
///
/// `--json` prints `{"root":{"/":"bafy..."}}`. Older clients print a gateway
/// URL instead, so fall back to the first `/ipfs/<cid>` or bare CID token.
fn parse_root_cid(stdout: &str) -> Option<String> {
    for line in stdout.lines() {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(line.trim()) {
            let root = &value["root"];
            if let Some(cid) = root["/"].as_str().or_else(|| root.as_str()) {
                return Some(cid.to_string());
            }
        }
    }

    stdout.split_whitespace().find_map(|token| {
        let candidate = match token.find("/ipfs/") {
            Some(pos) => &token[pos + "/ipfs/".len()..],
            None => token,
        };
        let candidate = candidate.trim_end_matches(|c: char| !c.is_ascii_alphanumeric());
        candidate.parse::<Cid>().ok().map(|_| candidate.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use archivist_car::ContentAddresser;

    const HELLO: &str = "bafkreifzjut3te2nhyekklss27nh3k72ysco7y32koao5eei66wof36n5e";

    #[test]
    fn test_parse_json_output() {
        let out = format!("{{\"root\":{{\"/\":\"{}\"}}}}\n", HELLO);
        assert_eq!(parse_root_cid(&out).as_deref(), Some(HELLO));
    }

    #[test]
    fn test_parse_gateway_url_output() {
        let out = format!("⁂ Stored 1 file\n⁂ https://w3s.link/ipfs/{}\n", HELLO);
        assert_eq!(parse_root_cid(&out).as_deref(), Some(HELLO));
    }

    #[test]
    fn test_parse_rejects_output_without_cid() {
        assert_eq!(parse_root_cid("Error: space not found\n"), None);
        assert_eq!(parse_root_cid(""), None);
    }

    #[tokio::test]
    async fn test_upload_requires_selected_space() {
        let backend = W3Backend::new("w3");
        let (_, container) = ContentAddresser::default().derive(&b"x"[..]).unwrap();
        assert!(matches!(
            backend.upload(&container).await,
            Err(UploadError::NoTarget)
        ));
    }

    #[tokio::test]
    async fn test_missing_binary_is_rejected() {
        let backend = W3Backend::new("/nonexistent/archivist-w3");
        let err = backend.select_target("space").await.unwrap_err();
        assert!(matches!(err, UploadError::Rejected(_)));
        assert!(!err.is_transient());
    }
}
