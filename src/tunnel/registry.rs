//! Handle registry - the ownership root for links and streams
//!
//! Every link and stream lives in here under its handle; holders elsewhere
//! keep a handle and re-resolve. Removal from the registry is the only
//! event that permits destruction.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::link::ControlLink;
use super::stream::DataStream;
use super::Handle;

/// Registry of active control links and data streams.
///
/// One mutex covers both maps and the allocator, so lifecycle decisions
/// (first removal wins) are linearized. Nothing under the lock blocks.
pub struct HandleRegistry {
    inner: Mutex<Inner>,
}

struct Inner {
    links: HashMap<Handle, Arc<ControlLink>>,
    streams: HashMap<Handle, Arc<DataStream>>,
    next_handle: Handle,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                links: HashMap::new(),
                streams: HashMap::new(),
                next_handle: 1,
            }),
        }
    }

    /// Allocate a fresh handle, strictly greater than any returned before.
    /// Handles are never recycled; 0 is never returned.
    pub fn allocate(&self) -> Handle {
        let mut inner = self.inner.lock().unwrap();
        let handle = inner.next_handle;
        inner.next_handle += 1;
        handle
    }

    pub fn insert_link(&self, link: Arc<ControlLink>) {
        let mut inner = self.inner.lock().unwrap();
        inner.links.insert(link.handle(), link);
    }

    pub fn insert_stream(&self, stream: Arc<DataStream>) {
        let mut inner = self.inner.lock().unwrap();
        inner.streams.insert(stream.local_handle(), stream);
    }

    pub fn lookup_stream(&self, handle: Handle) -> Option<Arc<DataStream>> {
        self.inner.lock().unwrap().streams.get(&handle).cloned()
    }

    /// Remove and return the stream, if present. The caller that gets
    /// `Some` owns the teardown.
    pub fn take_stream(&self, handle: Handle) -> Option<Arc<DataStream>> {
        self.inner.lock().unwrap().streams.remove(&handle)
    }

    /// Remove and return the link, if present.
    pub fn take_link(&self, handle: Handle) -> Option<Arc<ControlLink>> {
        self.inner.lock().unwrap().links.remove(&handle)
    }

    pub fn link_count(&self) -> usize {
        self.inner.lock().unwrap().links.len()
    }

    pub fn stream_count(&self) -> usize {
        self.inner.lock().unwrap().streams.len()
    }
}

impl Default for HandleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tunnel::LinkRole;

    #[test]
    fn test_allocate_strictly_increasing() {
        let registry = HandleRegistry::new();
        let mut previous = 0;
        for _ in 0..1000 {
            let handle = registry.allocate();
            assert!(handle > previous);
            previous = handle;
        }
    }

    #[test]
    fn test_absent_lookups() {
        let registry = HandleRegistry::new();
        assert!(registry.lookup_stream(1).is_none());
        assert!(registry.take_stream(1).is_none());
        assert!(registry.take_link(1).is_none());
    }

    #[tokio::test]
    async fn test_insert_take_stream() {
        let registry = HandleRegistry::new();

        let (link_io, _keep) = tokio::io::duplex(64);
        let (_, writer) = tokio::io::split(Box::new(link_io) as crate::tunnel::BoxedByteStream);
        let link = Arc::new(ControlLink::new(
            registry.allocate(),
            LinkRole::Listener,
            writer,
        ));
        registry.insert_link(Arc::clone(&link));
        assert_eq!(registry.link_count(), 1);

        let (stream_io, _keep2) = tokio::io::duplex(64);
        let handle = registry.allocate();
        let stream = DataStream::new(handle, link, Box::new(stream_io));
        registry.insert_stream(stream);

        assert_eq!(registry.stream_count(), 1);
        assert!(registry.lookup_stream(handle).is_some());

        let taken = registry.take_stream(handle).unwrap();
        assert_eq!(taken.local_handle(), handle);
        assert!(registry.lookup_stream(handle).is_none());
        assert!(registry.take_stream(handle).is_none());
    }
}
