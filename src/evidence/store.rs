//! Content-addressed storage for finished clips.

use anyhow::{anyhow, Context, Result};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::evidence::http;

pub const PINATA_ENDPOINT: &str = "https://api.pinata.cloud/pinning/pinFileToIPFS";

/// Handles shorter than this are treated as garbage from the store.
const MIN_HANDLE_LEN: usize = 5;

/// Opaque identifier for stored bytes.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ContentHandle(String);

impl ContentHandle {
    pub fn new(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.len() < MIN_HANDLE_LEN {
            return Err(anyhow!("invalid content handle {:?}", trimmed));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// "Durably store a file, return a content handle."
pub trait ContentStore: Send + Sync {
    fn name(&self) -> &'static str;

    /// Store the file at `path` under the display `name`, streaming it from
    /// disk. No partial handle on failure.
    fn put(&self, name: &str, path: &Path) -> Result<ContentHandle>;
}

fn open_clip(path: &Path) -> Result<(File, u64)> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let len = file.metadata()?.len();
    Ok((file, len))
}

/// Directory keyed by SHA-256 of the content.
pub struct LocalContentStore {
    dir: PathBuf,
}

impl LocalContentStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("create content store {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn path_for(&self, handle: &ContentHandle) -> Option<PathBuf> {
        let digest = handle.as_str().strip_prefix("sha256:")?;
        Some(self.dir.join(digest))
    }
}

impl ContentStore for LocalContentStore {
    fn name(&self) -> &'static str {
        "local"
    }

    fn put(&self, name: &str, path: &Path) -> Result<ContentHandle> {
        let (mut file, len) = open_clip(path)?;
        let mut hasher = Sha256::new();
        io::copy(&mut file, &mut hasher).with_context(|| format!("hash {}", path.display()))?;
        let digest = hex::encode(hasher.finalize());
        let target = self.dir.join(&digest);
        if !target.exists() {
            let tmp = self.dir.join(format!("{}.tmp", digest));
            fs::copy(path, &tmp).with_context(|| format!("write {}", tmp.display()))?;
            File::open(&tmp)?.sync_all()?;
            fs::rename(&tmp, &target)
                .with_context(|| format!("publish {}", target.display()))?;
        }
        log::debug!("stored {} ({} bytes) as sha256:{}", name, len, digest);
        ContentHandle::new(&format!("sha256:{}", digest))
    }
}

/// Pinata pinning API (IPFS).
pub struct PinataStore {
    agent: ureq::Agent,
    endpoint: String,
    api_key: String,
    secret_key: String,
}

#[derive(Deserialize)]
struct PinResponse {
    #[serde(rename = "IpfsHash")]
    ipfs_hash: String,
}

impl PinataStore {
    pub fn new(
        endpoint: Option<String>,
        api_key: String,
        secret_key: String,
        timeout: Duration,
    ) -> Result<Self> {
        if api_key.trim().is_empty() || secret_key.trim().is_empty() {
            return Err(anyhow!("pinata store requires api_key and secret_key"));
        }
        let endpoint = endpoint.unwrap_or_else(|| PINATA_ENDPOINT.to_string());
        url::Url::parse(&endpoint).with_context(|| format!("invalid pinata endpoint {}", endpoint))?;
        Ok(Self {
            agent: http::agent(timeout),
            endpoint,
            api_key,
            secret_key,
        })
    }
}

impl ContentStore for PinataStore {
    fn name(&self) -> &'static str {
        "pinata"
    }

    fn put(&self, name: &str, path: &Path) -> Result<ContentHandle> {
        let (file, len) = open_clip(path)?;
        let body = MultipartFile::new(name, file, len);
        let response = self
            .agent
            .post(&self.endpoint)
            .set("Content-Type", &body.content_type())
            .set("Content-Length", &body.len().to_string())
            .set("pinata_api_key", &self.api_key)
            .set("pinata_secret_api_key", &self.secret_key)
            .send(body.into_reader())
            .map_err(|e| http::describe("pinata", e))?;
        let parsed: PinResponse = response
            .into_json()
            .context("pinata response was not the expected JSON")?;
        ContentHandle::new(&parsed.ipfs_hash)
    }
}

/// Single-part `multipart/form-data` body with the file under field `file`.
/// The file is streamed between an in-memory prefix and suffix.
struct MultipartFile<R> {
    boundary: String,
    prefix: Vec<u8>,
    file: R,
    file_len: u64,
    suffix: Vec<u8>,
}

impl<R: Read> MultipartFile<R> {
    fn new(name: &str, file: R, file_len: u64) -> Self {
        let mut nonce = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut nonce);
        let boundary = format!("----incident-witness-{}", hex::encode(nonce));
        let safe_name: String = name
            .chars()
            .filter(|c| *c != '"' && *c != '\r' && *c != '\n')
            .collect();
        let prefix = format!(
            "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
            boundary, safe_name
        )
        .into_bytes();
        let suffix = format!("\r\n--{}--\r\n", boundary).into_bytes();
        Self {
            boundary,
            prefix,
            file,
            file_len,
            suffix,
        }
    }

    fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    fn len(&self) -> u64 {
        self.prefix.len() as u64 + self.file_len + self.suffix.len() as u64
    }

    fn into_reader(self) -> impl Read {
        Cursor::new(self.prefix)
            .chain(self.file.take(self.file_len))
            .chain(Cursor::new(self.suffix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_handles_are_invalid() {
        assert!(ContentHandle::new("Qm1").is_err());
        assert!(ContentHandle::new("   ").is_err());
        assert_eq!(
            ContentHandle::new(" QmXyz123 ").unwrap().as_str(),
            "QmXyz123"
        );
    }

    #[test]
    fn local_store_is_content_addressed() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalContentStore::open(dir.path().join("store")).unwrap();
        let first = dir.path().join("a.avi");
        let second = dir.path().join("b.avi");
        fs::write(&first, b"same bytes").unwrap();
        fs::write(&second, b"same bytes").unwrap();
        let a = store.put("a.avi", &first).unwrap();
        let b = store.put("b.avi", &second).unwrap();
        assert_eq!(a, b);
        assert_eq!(
            a.as_str(),
            format!("sha256:{}", hex::encode(Sha256::digest(b"same bytes")))
        );
        let path = store.path_for(&a).unwrap();
        assert_eq!(fs::read(path).unwrap(), b"same bytes");
        assert_eq!(fs::read_dir(dir.path().join("store")).unwrap().count(), 1);
    }

    #[test]
    fn local_store_streams_large_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalContentStore::open(dir.path().join("store")).unwrap();
        let clip = dir.path().join("big.avi");
        let bytes: Vec<u8> = (0..3_000_000u32).map(|i| (i % 251) as u8).collect();
        fs::write(&clip, &bytes).unwrap();
        let handle = store.put("big.avi", &clip).unwrap();
        assert_eq!(fs::read(store.path_for(&handle).unwrap()).unwrap(), bytes);
    }

    #[test]
    fn missing_file_is_not_stored() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalContentStore::open(dir.path().join("store")).unwrap();
        assert!(store.put("gone.avi", &dir.path().join("gone.avi")).is_err());
    }

    #[test]
    fn multipart_body_wraps_file_bytes() {
        let body = MultipartFile::new("clip\".avi", Cursor::new(b"PAYLOAD".to_vec()), 7);
        let content_type = body.content_type();
        let boundary = content_type
            .strip_prefix("multipart/form-data; boundary=")
            .unwrap()
            .to_string();
        let declared = body.len();
        let mut streamed = Vec::new();
        body.into_reader().read_to_end(&mut streamed).unwrap();
        assert_eq!(streamed.len() as u64, declared);
        let text = String::from_utf8_lossy(&streamed);
        assert!(text.starts_with(&format!("--{}\r\n", boundary)));
        assert!(text.contains("filename=\"clip.avi\""));
        assert!(text.contains("\r\n\r\nPAYLOAD\r\n"));
        assert!(text.ends_with(&format!("--{}--\r\n", boundary)));
    }

    #[test]
    fn pinata_requires_keys() {
        assert!(PinataStore::new(None, "".into(), "s".into(), Duration::from_secs(1)).is_err());
    }
}
