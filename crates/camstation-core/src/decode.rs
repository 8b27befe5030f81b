// ── Decode pipeline seam ──
//
// Turning RTSP bytes into pictures is an external capability. The core
// opens one session per stream handle, pulls frames from a dedicated
// worker, and guarantees `close` runs on every exit path through
// `PipelineGuard`.

use async_trait::async_trait;
use url::Url;

use camstation_api::Credentials;

use crate::error::CoreError;
use crate::model::{Frame, StreamProfile};

/// Where and how to open a media stream.
#[derive(Debug, Clone)]
pub struct StreamSource {
    /// `rtsp://host:port/path`. Never carries credentials.
    pub url: Url,
    pub profile: StreamProfile,
    pub credentials: Option<Credentials>,
}

/// One step of a decode session.
#[derive(Debug)]
pub enum DecodeEvent {
    Frame(Frame),
    EndOfStream,
    /// `CoreError::DecodeError` is terminal for the handle; anything else
    /// is treated as a transport failure and retried.
    Error(CoreError),
}

/// Factory for decode sessions.
#[async_trait]
pub trait Decoder: Send + Sync + 'static {
    async fn open(&self, source: &StreamSource) -> Result<Box<dyn DecodeSession>, CoreError>;
}

/// A live decode pipeline.
#[async_trait]
pub trait DecodeSession: Send {
    /// Wait for the next decoded picture.
    async fn next_frame(&mut self) -> DecodeEvent;

    /// Release the pipeline's resources. Called exactly once.
    fn close(&mut self);
}

/// Owns a session and closes it when dropped.
///
/// Cancellation, eviction and error paths all end by dropping the guard,
/// so the pipeline is released exactly once no matter which one wins.
pub struct PipelineGuard {
    session: Option<Box<dyn DecodeSession>>,
}

impl PipelineGuard {
    pub fn new(session: Box<dyn DecodeSession>) -> Self {
        Self {
            session: Some(session),
        }
    }

    pub async fn next_frame(&mut self) -> DecodeEvent {
        match self.session.as_mut() {
            Some(session) => session.next_frame().await,
            None => DecodeEvent::EndOfStream,
        }
    }

    /// Close now instead of at drop.
    pub fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close();
        }
    }
}

impl Drop for PipelineGuard {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl DecodeSession for Counting {
        async fn next_frame(&mut self) -> DecodeEvent {
            std::future::pending().await
        }

        fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn guard_closes_once_on_drop() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut guard = PipelineGuard::new(Box::new(Counting {
            closes: Arc::clone(&closes),
        }));
        guard.close();
        drop(guard);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn guard_closes_when_pending_read_is_cancelled() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut guard = PipelineGuard::new(Box::new(Counting {
            closes: Arc::clone(&closes),
        }));
        let cancel = tokio_util::sync::CancellationToken::new();
        cancel.cancel();
        tokio::select! {
            biased;
            () = cancel.cancelled() => {}
            _ = guard.next_frame() => unreachable!(),
        }
        drop(guard);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }
}
