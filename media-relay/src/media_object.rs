use std::{
    fmt::{Debug, Formatter},
    future::Future,
    sync::{Arc, Mutex},
};

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::sync::OnceCell;

pub type DataFuture = BoxFuture<'static, anyhow::Result<Bytes>>;

/// Typed handle to a media artifact. The payload is fetched at most once,
/// the first time somebody asks for it; clones share the fetched bytes.
#[derive(Clone)]
pub struct MediaObject {
    mime_type: Arc<str>,
    data: Arc<LazyData>,
}

struct LazyData {
    cell: OnceCell<Bytes>,
    pending: Mutex<Option<DataFuture>>,
}

impl MediaObject {
    pub fn new(mime_type: &str, data: impl Into<Bytes>) -> Self {
        Self {
            mime_type: Arc::from(mime_type),
            data: Arc::new(LazyData {
                cell: OnceCell::new_with(Some(data.into())),
                pending: Mutex::new(None),
            }),
        }
    }

    pub fn lazy<F>(mime_type: &str, fetch: F) -> Self
    where
        F: Future<Output = anyhow::Result<Bytes>> + Send + 'static,
    {
        Self {
            mime_type: Arc::from(mime_type),
            data: Arc::new(LazyData {
                cell: OnceCell::new(),
                pending: Mutex::new(Some(Box::pin(fetch))),
            }),
        }
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Resolves the payload. A failed fetch is not retried.
    pub async fn data(&self) -> anyhow::Result<Bytes> {
        let data = self
            .data
            .cell
            .get_or_try_init(|| async {
                let pending = self.take_pending();
                match pending {
                    Some(fetch) => fetch.await,
                    None => Err(anyhow::anyhow!(
                        "{} payload failed to resolve earlier",
                        self.mime_type
                    )),
                }
            })
            .await?;
        Ok(data.clone())
    }

    pub async fn data_string(&self) -> anyhow::Result<String> {
        let data = self.data().await?;
        String::from_utf8(data.to_vec()).map_err(|e| anyhow::anyhow!("payload is not utf-8: {}", e))
    }

    pub fn is_resolved(&self) -> bool {
        self.data.cell.initialized()
    }

    fn take_pending(&self) -> Option<DataFuture> {
        self.data
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }
}

impl Debug for MediaObject {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaObject")
            .field("mime_type", &self.mime_type)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

#[cfg(test)]
#[path = "media_object_test.rs"]
mod media_object_test;
