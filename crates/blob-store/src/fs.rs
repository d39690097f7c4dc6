use crate::store::{
    prefixed_key, BlobStore, ListPage, ObjectInfo, ObjectReader, ObjectWriter, StoreError,
    UserMetadata, MAX_LIST_PAGE,
};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWriteExt};

const SIDECAR_SUFFIX: &str = ".meta.json";

/// Object metadata kept alongside the payload, since a plain file can't
/// carry content type or user metadata itself.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Sidecar {
    content_type: Option<String>,
    #[serde(default)]
    metadata: UserMetadata,
}

/// A directory-rooted `BlobStore`. Keys map to files under the root (and
/// the instance prefix, when configured); presigned URLs are `file://`
/// URLs carrying an expiry and an HMAC-SHA1 signature.
pub struct FsStore {
    root: PathBuf,
    prefix: Option<String>,
    sign_key: Vec<u8>,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>, prefix: &str, sign_key: &[u8]) -> FsStore {
        FsStore {
            root: root.into(),
            prefix: crate::store::normalize_prefix(prefix),
            sign_key: sign_key.to_vec(),
        }
    }

    fn path_of(&self, key: &str) -> Result<PathBuf, StoreError> {
        let full = prefixed_key(&self.prefix, key);
        if full.split('/').any(|seg| seg == "..") {
            return Err(StoreError::Permanent(format!(
                "key '{key}' escapes the store root"
            )));
        }
        Ok(self.root.join(full))
    }

    fn sidecar_of(&self, path: &Path) -> PathBuf {
        let mut os = path.as_os_str().to_owned();
        os.push(SIDECAR_SUFFIX);
        PathBuf::from(os)
    }

    async fn read_sidecar(&self, path: &Path) -> Sidecar {
        match tokio::fs::read(self.sidecar_of(path)).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(_) => Sidecar::default(),
        }
    }

    async fn write_sidecar(&self, path: &Path, sidecar: &Sidecar) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(sidecar)
            .map_err(|err| StoreError::Permanent(err.to_string()))?;
        tokio::fs::write(self.sidecar_of(path), bytes)
            .await
            .map_err(StoreError::Io)
    }

    /// Check a previously presigned URL: signature intact and not expired.
    pub fn verify_presigned(&self, url: &url::Url, key: &str) -> bool {
        let mut expires = None;
        let mut signature = None;
        for (name, value) in url.query_pairs() {
            match name.as_ref() {
                "expires" => expires = value.parse::<i64>().ok(),
                "signature" => signature = Some(value.into_owned()),
                _ => {}
            }
        }
        let (Some(expires), Some(signature)) = (expires, signature) else {
            return false;
        };
        expires > Utc::now().timestamp() && self.sign(key, expires) == signature
    }

    fn sign(&self, key: &str, expires: i64) -> String {
        let mut mac = Hmac::<Sha1>::new_from_slice(&self.sign_key).expect("any key length works");
        mac.update(format!("{key}\n{expires}").as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    async fn walk_keys(&self) -> Result<Vec<String>, StoreError> {
        let base = match &self.prefix {
            Some(prefix) => self.root.join(prefix),
            None => self.root.clone(),
        };
        let mut keys = Vec::new();
        let mut pending = vec![base.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(StoreError::Io(err)),
            };
            while let Some(entry) = entries.next_entry().await.map_err(StoreError::Io)? {
                let path = entry.path();
                let kind = entry.file_type().await.map_err(StoreError::Io)?;
                if kind.is_dir() {
                    pending.push(path);
                } else if !path.to_string_lossy().ends_with(SIDECAR_SUFFIX) {
                    if let Ok(rel) = path.strip_prefix(&base) {
                        keys.push(rel.to_string_lossy().replace('\\', "/"));
                    }
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn info_of(&self, key: &str) -> Result<ObjectInfo, StoreError> {
        let path = self.path_of(key)?;
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|err| io_error(key, err))?;
        let last_modified: DateTime<Utc> = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        let sidecar = self.read_sidecar(&path).await;
        Ok(ObjectInfo {
            key: key.to_string(),
            size: meta.len(),
            etag: format!("{:x}-{:x}", meta.len(), last_modified.timestamp()),
            last_modified,
            content_type: sidecar.content_type,
            metadata: sidecar.metadata,
        })
    }
}

fn io_error(key: &str, err: std::io::Error) -> StoreError {
    if err.kind() == std::io::ErrorKind::NotFound {
        StoreError::NotFound(key.to_string())
    } else {
        StoreError::Io(err)
    }
}

#[async_trait::async_trait]
impl BlobStore for FsStore {
    async fn list(
        &self,
        prefix: &str,
        page_size: usize,
        token: Option<&str>,
    ) -> Result<ListPage, StoreError> {
        let page_size = page_size.clamp(1, MAX_LIST_PAGE);
        let wanted = prefix.trim_start_matches('/');

        let keys = self.walk_keys().await?;
        let mut remaining = keys
            .into_iter()
            .filter(|key| key.starts_with(wanted))
            .skip_while(|key| match token {
                Some(token) => key.as_str() <= token,
                None => false,
            })
            .collect::<Vec<_>>();

        let is_truncated = remaining.len() > page_size;
        remaining.truncate(page_size);

        let mut items = Vec::with_capacity(remaining.len());
        for key in &remaining {
            items.push(self.info_of(key).await?);
        }
        Ok(ListPage {
            next_token: is_truncated.then(|| remaining.last().cloned()).flatten(),
            items,
            is_truncated,
        })
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        match tokio::fs::metadata(self.path_of(key)?).await {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(StoreError::Io(err)),
        }
    }

    async fn head(&self, key: &str) -> Result<ObjectInfo, StoreError> {
        self.info_of(key).await
    }

    async fn download(&self, key: &str) -> Result<ObjectReader, StoreError> {
        let file = tokio::fs::File::open(self.path_of(key)?)
            .await
            .map_err(|err| io_error(key, err))?;
        Ok(Box::new(file))
    }

    async fn upload(
        &self,
        key: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        content_type: &str,
        metadata: &UserMetadata,
    ) -> Result<(), StoreError> {
        let mut writer = self.open_write(key, content_type, metadata).await?;
        tokio::io::copy(reader, &mut writer)
            .await
            .map_err(StoreError::Io)?;
        writer.shutdown().await.map_err(StoreError::Io)?;
        Ok(())
    }

    async fn open_write(
        &self,
        key: &str,
        content_type: &str,
        metadata: &UserMetadata,
    ) -> Result<ObjectWriter, StoreError> {
        let path = self.path_of(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(StoreError::Io)?;
        }
        self.write_sidecar(
            &path,
            &Sidecar {
                content_type: Some(content_type.to_string()),
                metadata: metadata.clone(),
            },
        )
        .await?;
        let file = tokio::fs::File::create(&path)
            .await
            .map_err(StoreError::Io)?;
        Ok(Box::new(file))
    }

    async fn set_metadata(&self, key: &str, metadata: &UserMetadata) -> Result<(), StoreError> {
        let path = self.path_of(key)?;
        if !self.exists(key).await? {
            return Err(StoreError::NotFound(key.to_string()));
        }
        let mut sidecar = self.read_sidecar(&path).await;
        sidecar.metadata = metadata.clone();
        self.write_sidecar(&path, &sidecar).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_of(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(StoreError::Io(err)),
        }
        let _ = tokio::fs::remove_file(self.sidecar_of(&path)).await;
        Ok(())
    }

    async fn presign_get(&self, key: &str, ttl: Duration) -> Result<url::Url, StoreError> {
        if !self.exists(key).await? {
            return Err(StoreError::NotFound(key.to_string()));
        }
        let path = self.path_of(key)?;
        let mut url = url::Url::from_file_path(&path)
            .map_err(|()| StoreError::Permanent(format!("key '{key}' has no absolute path")))?;
        let expires = Utc::now().timestamp() + ttl.as_secs() as i64;
        url.query_pairs_mut()
            .append_pair("expires", &expires.to_string())
            .append_pair("signature", &self.sign(key, expires));
        Ok(url)
    }
}
