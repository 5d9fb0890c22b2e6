use punchclock_core::{CapturedSample, FaceMatcher, MatchResult, SampleHandle};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to spawn matcher thread: {0}")]
    Spawn(std::io::Error),
    #[error("matcher thread exited")]
    ChannelClosed,
}

/// Messages sent from the service to the matcher thread.
enum EngineRequest {
    Compare {
        candidate: CapturedSample,
        reference: SampleHandle,
        reply: oneshot::Sender<MatchResult>,
    },
}

/// Clone-safe handle to the matcher thread.
#[derive(Clone)]
pub struct MatchHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl MatchHandle {
    /// Run one comparison on the matcher thread.
    ///
    /// Dropping the returned future abandons the wait; the thread still
    /// finishes the comparison and discards the answer.
    pub async fn compare(
        &self,
        candidate: CapturedSample,
        reference: SampleHandle,
    ) -> Result<MatchResult, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Compare {
                candidate,
                reference,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }
}

/// Spawn the matcher on a dedicated OS thread.
///
/// Matchers may block for seconds, so they never run on the async runtime.
/// The thread exits once every [`MatchHandle`] is dropped.
pub fn spawn_engine(matcher: Arc<dyn FaceMatcher>) -> Result<MatchHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);
    let name = matcher.name().to_string();

    std::thread::Builder::new()
        .name("punchclock-matcher".into())
        .spawn(move || {
            tracing::info!(matcher = %name, "matcher thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Compare {
                        candidate,
                        reference,
                        reply,
                    } => {
                        let started = std::time::Instant::now();
                        let result = matcher.compare(&candidate, &reference);
                        tracing::debug!(
                            is_match = result.is_match,
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "comparison finished"
                        );
                        if reply.send(result).is_err() {
                            tracing::debug!("comparison result abandoned by caller");
                        }
                    }
                }
            }
            tracing::info!("matcher thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(MatchHandle { tx })
}
