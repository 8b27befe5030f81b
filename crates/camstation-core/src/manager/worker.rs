// ── Stream worker ──
//
// One task per open stream handle: lease the device, open the decode
// pipeline, pump frames into the delivery channel, and reconnect with
// backoff when the stream stalls. The worker never touches manager
// state; it reports transitions by message.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{HandleId, ManagerCommand, WorkerReport};
use crate::channel::FrameChannel;
use crate::config::StreamConfig;
use crate::decode::{DecodeEvent, Decoder, PipelineGuard, StreamSource};
use crate::error::CoreError;
use crate::model::{DeviceIdentity, StreamKey};
use crate::notifier::CloseReason;
use crate::pool::ConnectionPool;

pub(super) struct StreamWorker {
    pub(super) id: HandleId,
    pub(super) key: StreamKey,
    pub(super) identity: DeviceIdentity,
    /// Source without credentials; they come from the device lease.
    pub(super) source: StreamSource,
    pub(super) pool: ConnectionPool,
    pub(super) decoder: Arc<dyn Decoder>,
    pub(super) channel: FrameChannel,
    pub(super) config: StreamConfig,
    pub(super) reports: mpsc::UnboundedSender<ManagerCommand>,
    pub(super) cancel: CancellationToken,
}

/// How one open-and-pump attempt ended.
enum AttemptEnd {
    /// Retry with backoff.
    Retry(CoreError),
    /// Close the handle.
    Close(CloseReason),
}

impl StreamWorker {
    pub(super) async fn run(self) {
        let outcome = tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            reason = self.stream_loop() => Some(reason),
        };
        // The pipeline guard lives inside `stream_loop`, so by now it has
        // been closed on every path.
        debug!(stream = %self.key, reason = ?outcome, "stream worker stopped");
        self.report(WorkerReport::Exited(outcome));
    }

    fn report(&self, report: WorkerReport) {
        let _ = self.reports.send(ManagerCommand::Report {
            handle: self.id,
            report,
        });
    }

    async fn stream_loop(&self) -> CloseReason {
        let mut failures: u32 = 0;
        loop {
            let error = match self.attempt(&mut failures).await {
                AttemptEnd::Retry(error) => error,
                AttemptEnd::Close(reason) => return reason,
            };
            failures += 1;
            if failures >= self.config.max_consecutive_failures {
                warn!(stream = %self.key, failures, error = %error, "stream giving up");
                return CloseReason::Failed {
                    failures,
                    last_error: error.to_string(),
                };
            }
            let delay = self.config.backoff.delay(failures);
            debug!(
                stream = %self.key,
                attempt = failures,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "stream stalled; reconnecting"
            );
            self.report(WorkerReport::Stalled {
                attempt: failures,
                error: error.to_string(),
            });
            tokio::time::sleep(delay).await;
        }
    }

    /// Lease the device, open the pipeline and pump until it fails.
    async fn attempt(&self, failures: &mut u32) -> AttemptEnd {
        let lease = match self.pool.acquire(&self.identity).await {
            Ok(lease) => lease,
            Err(e) => return self.classify(e, *failures),
        };
        let source = StreamSource {
            credentials: lease.credentials(),
            ..self.source.clone()
        };

        let open_timeout = self.config.open_timeout;
        let session = match tokio::time::timeout(open_timeout, self.decoder.open(&source)).await {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => return self.classify(e, *failures),
            Err(_) => return self.classify(CoreError::timeout(open_timeout), *failures),
        };
        let mut pipeline = PipelineGuard::new(session);
        debug!(stream = %self.key, url = %source.url, "pipeline open");

        let liveness = self.config.liveness_timeout;
        let mut live = false;
        loop {
            let Ok(event) = tokio::time::timeout(liveness, pipeline.next_frame()).await else {
                return AttemptEnd::Retry(CoreError::StreamStalled {
                    timeout_secs: liveness.as_secs(),
                });
            };
            match event {
                DecodeEvent::Frame(frame) => {
                    if !live {
                        live = true;
                        *failures = 0;
                        self.report(WorkerReport::Live);
                    }
                    self.channel.try_send(frame);
                }
                DecodeEvent::EndOfStream => {
                    return AttemptEnd::Retry(CoreError::ConnectFailed {
                        target: self.key.to_string(),
                        reason: "end of stream".into(),
                    });
                }
                DecodeEvent::Error(e) => return self.classify(e, *failures),
            }
        }
    }

    /// Decide whether an error is worth another attempt.
    fn classify(&self, error: CoreError, attempts: u32) -> AttemptEnd {
        match error {
            CoreError::DecodeError { message } => {
                AttemptEnd::Close(CloseReason::DecodeError { message })
            }
            CoreError::AuthFailed { message } => {
                self.pool.mark_unhealthy(
                    &self.identity,
                    &CoreError::AuthFailed {
                        message: message.clone(),
                    },
                );
                AttemptEnd::Close(CloseReason::AuthFailed { message })
            }
            CoreError::DeviceUnreachable {
                failures,
                last_error,
            } => AttemptEnd::Close(CloseReason::DeviceUnreachable {
                failures,
                last_error,
            }),
            CoreError::ShuttingDown => AttemptEnd::Close(CloseReason::Shutdown),
            e if e.is_retryable() => {
                if matches!(e, CoreError::ConnectFailed { .. } | CoreError::Timeout { .. }) {
                    self.pool.mark_unhealthy(&self.identity, &e);
                }
                AttemptEnd::Retry(e)
            }
            e => AttemptEnd::Close(CloseReason::Failed {
                failures: attempts + 1,
                last_error: e.to_string(),
            }),
        }
    }
}
