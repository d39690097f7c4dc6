use crate::store::{
    prefixed_key, BlobStore, ListPage, ObjectInfo, ObjectReader, ObjectWriter, StoreError,
    UserMetadata, MAX_LIST_PAGE,
};
use chrono::Utc;
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncReadExt;

#[derive(Clone, Debug)]
struct Object {
    bytes: Vec<u8>,
    content_type: Option<String>,
    metadata: UserMetadata,
    last_modified: chrono::DateTime<Utc>,
}

/// Map-backed `BlobStore` for tests.
#[derive(Clone, Default)]
pub struct MemoryStore {
    prefix: Option<String>,
    objects: Arc<Mutex<BTreeMap<String, Object>>>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    pub fn with_prefix(prefix: &str) -> MemoryStore {
        MemoryStore {
            prefix: crate::store::normalize_prefix(prefix),
            objects: Default::default(),
        }
    }

    /// Raw object bytes, for test assertions.
    pub fn bytes_of(&self, key: &str) -> Option<Vec<u8>> {
        let full = prefixed_key(&self.prefix, key);
        self.objects.lock().unwrap().get(&full).map(|o| o.bytes.clone())
    }

    fn info(key: &str, object: &Object) -> ObjectInfo {
        ObjectInfo {
            key: key.to_string(),
            size: object.bytes.len() as u64,
            etag: format!("{:x}", md5_of(&object.bytes)),
            last_modified: object.last_modified,
            content_type: object.content_type.clone(),
            metadata: object.metadata.clone(),
        }
    }
}

// The md5 crate is already in the tree for content fingerprints; reusing it
// for etags keeps them behaviorally close to the real store.
fn md5_of(bytes: &[u8]) -> u128 {
    let digest: [u8; 16] = *md5::compute(bytes);
    u128::from_be_bytes(digest)
}

struct MemoryWriter {
    store: MemoryStore,
    key: String,
    content_type: Option<String>,
    metadata: UserMetadata,
    buffer: Vec<u8>,
}

impl tokio::io::AsyncWrite for MemoryWriter {
    fn poll_write(
        mut self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        std::task::Poll::Ready(self.buffer.write(buf))
    }

    fn poll_flush(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn poll_shutdown(
        mut self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        let object = Object {
            bytes: std::mem::take(&mut self.buffer),
            content_type: self.content_type.clone(),
            metadata: self.metadata.clone(),
            last_modified: Utc::now(),
        };
        self.store
            .objects
            .lock()
            .unwrap()
            .insert(self.key.clone(), object);
        std::task::Poll::Ready(Ok(()))
    }
}

#[async_trait::async_trait]
impl BlobStore for MemoryStore {
    async fn list(
        &self,
        prefix: &str,
        page_size: usize,
        token: Option<&str>,
    ) -> Result<ListPage, StoreError> {
        let page_size = page_size.clamp(1, MAX_LIST_PAGE);
        let wanted = prefixed_key(&self.prefix, prefix);
        let strip = match &self.prefix {
            Some(p) => format!("{p}/"),
            None => String::new(),
        };

        let objects = self.objects.lock().unwrap();
        let mut keys: Vec<(String, ObjectInfo)> = objects
            .iter()
            .filter(|(full, _)| full.starts_with(&wanted))
            .map(|(full, object)| {
                let key = full.strip_prefix(&strip).unwrap_or(full).to_string();
                let info = Self::info(&key, object);
                (key, info)
            })
            .skip_while(|(key, _)| match token {
                Some(token) => key.as_str() <= token,
                None => false,
            })
            .collect();

        let is_truncated = keys.len() > page_size;
        keys.truncate(page_size);
        Ok(ListPage {
            next_token: is_truncated.then(|| keys.last().map(|(k, _)| k.clone())).flatten(),
            items: keys.into_iter().map(|(_, info)| info).collect(),
            is_truncated,
        })
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let full = prefixed_key(&self.prefix, key);
        Ok(self.objects.lock().unwrap().contains_key(&full))
    }

    async fn head(&self, key: &str) -> Result<ObjectInfo, StoreError> {
        let full = prefixed_key(&self.prefix, key);
        self.objects
            .lock()
            .unwrap()
            .get(&full)
            .map(|object| Self::info(key, object))
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn download(&self, key: &str) -> Result<ObjectReader, StoreError> {
        let full = prefixed_key(&self.prefix, key);
        let bytes = self
            .objects
            .lock()
            .unwrap()
            .get(&full)
            .map(|o| o.bytes.clone())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        Ok(Box::new(std::io::Cursor::new(bytes)))
    }

    async fn upload(
        &self,
        key: &str,
        reader: &mut (dyn tokio::io::AsyncRead + Send + Unpin),
        content_type: &str,
        metadata: &UserMetadata,
    ) -> Result<(), StoreError> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes).await.map_err(StoreError::Io)?;
        let full = prefixed_key(&self.prefix, key);
        self.objects.lock().unwrap().insert(
            full,
            Object {
                bytes,
                content_type: Some(content_type.to_string()),
                metadata: metadata.clone(),
                last_modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn open_write(
        &self,
        key: &str,
        content_type: &str,
        metadata: &UserMetadata,
    ) -> Result<ObjectWriter, StoreError> {
        Ok(Box::new(MemoryWriter {
            store: self.clone(),
            key: prefixed_key(&self.prefix, key),
            content_type: Some(content_type.to_string()),
            metadata: metadata.clone(),
            buffer: Vec::new(),
        }))
    }

    async fn set_metadata(&self, key: &str, metadata: &UserMetadata) -> Result<(), StoreError> {
        let full = prefixed_key(&self.prefix, key);
        let mut objects = self.objects.lock().unwrap();
        let object = objects
            .get_mut(&full)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        object.metadata = metadata.clone();
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let full = prefixed_key(&self.prefix, key);
        self.objects.lock().unwrap().remove(&full);
        Ok(())
    }

    async fn presign_get(&self, key: &str, ttl: Duration) -> Result<url::Url, StoreError> {
        if !self.exists(key).await? {
            return Err(StoreError::NotFound(key.to_string()));
        }
        let expires = Utc::now().timestamp() + ttl.as_secs() as i64;
        let url = format!(
            "memory:///{}?expires={expires}",
            percent_encoding::utf8_percent_encode(key, percent_encoding::NON_ALPHANUMERIC),
        );
        url::Url::parse(&url).map_err(|err| StoreError::Permanent(err.to_string()))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn prefixed_instances_are_isolated_views() {
        let store = MemoryStore::with_prefix("internal");
        let mut reader = std::io::Cursor::new(b"x".to_vec());
        store
            .upload("a/b.enc", &mut reader, "text/csv", &BTreeMap::new())
            .await
            .unwrap();

        assert!(store.exists("a/b.enc").await.unwrap());
        let page = store.list("a/", 10, None).await.unwrap();
        assert_eq!(page.items[0].key, "a/b.enc");
        assert_eq!(store.bytes_of("a/b.enc").unwrap(), b"x");
    }

    #[tokio::test]
    async fn open_write_finalizes_on_shutdown() {
        let store = MemoryStore::new();
        let mut writer = store
            .open_write("k", "application/zip", &BTreeMap::new())
            .await
            .unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut writer, b"payload")
            .await
            .unwrap();
        assert!(!store.exists("k").await.unwrap());
        tokio::io::AsyncWriteExt::shutdown(&mut writer).await.unwrap();
        assert!(store.exists("k").await.unwrap());
        assert_eq!(store.bytes_of("k").unwrap(), b"payload");
    }
}
