// ── Catalog subscriptions ──
//
// A UI showing the device tree holds one of these per list. Reading never
// blocks the catalog; writers publish a whole new snapshot per mutation.

use std::sync::Arc;

use futures_util::Stream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

type Snapshot<T> = Arc<Vec<Arc<T>>>;

/// Live view of the device or camera list.
pub struct CatalogSubscription<T: Send + Sync + 'static> {
    seen: Snapshot<T>,
    receiver: watch::Receiver<Snapshot<T>>,
}

impl<T: Send + Sync + 'static> CatalogSubscription<T> {
    pub(crate) fn new(mut receiver: watch::Receiver<Snapshot<T>>) -> Self {
        let seen = receiver.borrow_and_update().clone();
        Self { seen, receiver }
    }

    /// The snapshot this subscriber last observed.
    pub fn current(&self) -> &Snapshot<T> {
        &self.seen
    }

    /// Whether the catalog changed since `current()` was taken.
    pub fn is_stale(&self) -> bool {
        self.receiver.has_changed().unwrap_or(false)
    }

    pub fn find(&self, pred: impl Fn(&T) -> bool) -> Option<Arc<T>> {
        self.seen.iter().find(|item| pred(item)).cloned()
    }

    /// Wait for the next mutation. `None` once the catalog is dropped.
    pub async fn changed(&mut self) -> Option<Snapshot<T>> {
        self.receiver.changed().await.ok()?;
        self.seen = self.receiver.borrow_and_update().clone();
        Some(Arc::clone(&self.seen))
    }

    /// Every snapshot from now on, starting with the latest one.
    pub fn into_stream(self) -> impl Stream<Item = Snapshot<T>> + Send + Unpin {
        WatchStream::new(self.receiver)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn subscriber_sees_each_published_list() {
        let (tx, rx) = watch::channel(Arc::new(vec![Arc::new("gate")]));
        let mut sub = CatalogSubscription::new(rx);
        assert_eq!(sub.current().len(), 1);
        assert!(!sub.is_stale());

        tx.send_replace(Arc::new(vec![Arc::new("gate"), Arc::new("yard")]));
        assert!(sub.is_stale());
        let next = sub.changed().await.unwrap();
        assert_eq!(next.len(), 2);
        assert_eq!(*sub.find(|name| name.starts_with('y')).unwrap(), "yard");

        drop(tx);
        assert!(sub.changed().await.is_none());
    }

    #[tokio::test]
    async fn stream_yields_latest_then_updates() {
        let (tx, rx) = watch::channel(Arc::new(vec![Arc::new(1u32)]));
        let mut stream = CatalogSubscription::new(rx).into_stream();
        assert_eq!(stream.next().await.unwrap().len(), 1);
        tx.send_replace(Arc::new(Vec::new()));
        assert!(stream.next().await.unwrap().is_empty());
    }
}
