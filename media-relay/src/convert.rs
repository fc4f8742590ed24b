//! Converter graph: typed edges between mime types and a breadth-first
//! resolver over whatever edges are live at the time of the call.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    fmt::{Debug, Formatter},
    future::Future,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;

use crate::{error::MediaError, media_object::MediaObject};

#[async_trait]
pub trait Converter: Send + Sync {
    fn from_mime_type(&self) -> &str;
    fn to_mime_type(&self) -> &str;
    async fn convert(&self, data: Bytes, from_mime_type: &str) -> anyhow::Result<Bytes>;
}

pub type ConverterRef = Arc<dyn Converter>;

/// Supplies the edges a collaborator currently offers. Asked again on every
/// resolution, so providers may change their answer at any time.
pub trait ConverterProvider: Send + Sync {
    fn converters(&self) -> Vec<ConverterRef>;
}

type ConvertFn = dyn Fn(Bytes, String) -> BoxFuture<'static, anyhow::Result<Bytes>> + Send + Sync;

/// Converter backed by a closure.
pub struct FnConverter {
    from: String,
    to: String,
    convert: Box<ConvertFn>,
}

impl FnConverter {
    pub fn new<F, Fut>(from: &str, to: &str, convert: F) -> Self
    where
        F: Fn(Bytes, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Bytes>> + Send + 'static,
    {
        Self {
            from: from.to_string(),
            to: to.to_string(),
            convert: Box::new(
                move |data: Bytes, from: String| -> BoxFuture<'static, anyhow::Result<Bytes>> {
                    Box::pin(convert(data, from))
                },
            ),
        }
    }

    pub fn into_ref(self) -> ConverterRef {
        Arc::new(self)
    }
}

#[async_trait]
impl Converter for FnConverter {
    fn from_mime_type(&self) -> &str {
        &self.from
    }

    fn to_mime_type(&self) -> &str {
        &self.to
    }

    async fn convert(&self, data: Bytes, from_mime_type: &str) -> anyhow::Result<Bytes> {
        (self.convert)(data, from_mime_type.to_string()).await
    }
}

impl Debug for FnConverter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "FnConverter({} -> {})", self.from, self.to)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConverterId(u64);

/// Converters registered by collaborators, kept in registration order.
#[derive(Default)]
pub struct ConverterRegistry {
    next_id: AtomicU64,
    entries: Mutex<Vec<(ConverterId, ConverterRef)>>,
}

impl ConverterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, converter: ConverterRef) -> ConverterId {
        let id = ConverterId(self.next_id.fetch_add(1, Ordering::Relaxed));
        log::debug!(
            "register converter {:?}: {} -> {}",
            id,
            converter.from_mime_type(),
            converter.to_mime_type()
        );
        self.lock().push((id, converter));
        id
    }

    pub fn unregister(&self, id: ConverterId) -> bool {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(ConverterId, ConverterRef)>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ConverterProvider for ConverterRegistry {
    fn converters(&self) -> Vec<ConverterRef> {
        self.lock().iter().map(|(_, c)| Arc::clone(c)).collect()
    }
}

/// Breadth-first search from `from` to `to`. Edges are expanded in slice
/// order, so among equally short chains the earliest registered one wins.
/// `Some(vec![])` when no conversion is needed.
pub fn find_path(edges: &[ConverterRef], from: &str, to: &str) -> Option<Vec<ConverterRef>> {
    if from == to {
        return Some(Vec::new());
    }

    // mime type -> (index of the edge that reached it)
    let mut reached_by: HashMap<&str, usize> = HashMap::new();
    let mut visited: HashSet<&str> = HashSet::from([from]);
    let mut queue: VecDeque<&str> = VecDeque::from([from]);

    while let Some(node) = queue.pop_front() {
        for (index, edge) in edges.iter().enumerate() {
            if edge.from_mime_type() != node {
                continue;
            }
            let next = edge.to_mime_type();
            if !visited.insert(next) {
                continue;
            }
            reached_by.insert(next, index);
            if next == to {
                return Some(unwind(edges, &reached_by, from, to));
            }
            queue.push_back(next);
        }
    }

    None
}

fn unwind(
    edges: &[ConverterRef],
    reached_by: &HashMap<&str, usize>,
    from: &str,
    to: &str,
) -> Vec<ConverterRef> {
    let mut path = Vec::new();
    let mut node = to;
    while node != from {
        let Some(&index) = reached_by.get(node) else {
            break;
        };
        let edge = &edges[index];
        path.push(Arc::clone(edge));
        node = edge.from_mime_type();
    }
    path.reverse();
    path
}

/// Converts `media` along the first chain found in `edges`, materializing a
/// media object after every hop.
pub async fn convert(
    edges: &[ConverterRef],
    media: MediaObject,
    to_mime_type: &str,
) -> anyhow::Result<MediaObject> {
    if media.mime_type() == to_mime_type {
        return Ok(media);
    }

    let path = find_path(edges, media.mime_type(), to_mime_type).ok_or_else(|| {
        MediaError::ConversionUnsupported {
            from: media.mime_type().to_string(),
            to: to_mime_type.to_string(),
        }
    })?;

    log::debug!(
        "convert {} -> {}: {}",
        media.mime_type(),
        to_mime_type,
        path.iter()
            .map(|edge| edge.to_mime_type())
            .collect::<Vec<_>>()
            .join(" -> ")
    );

    let mut current = media;
    for edge in path {
        let data = current.data().await?;
        let converted = edge.convert(data, current.mime_type()).await.map_err(|e| {
            e.context(format!(
                "converter {} -> {} failed",
                edge.from_mime_type(),
                edge.to_mime_type()
            ))
        })?;
        current = MediaObject::new(edge.to_mime_type(), converted);
    }

    Ok(current)
}

#[cfg(test)]
#[path = "convert_test.rs"]
mod convert_test;
