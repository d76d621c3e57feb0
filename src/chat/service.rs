use super::ChatResponder;
use crate::{Error, Result};
use std::{sync::Arc, time::Duration};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Runs the blocking responder pipeline from async handlers.
///
/// Generations run on tokio's blocking pool, at most `max_concurrent` at a
/// time, each bounded by an optional deadline.
#[derive(Clone)]
pub struct ChatService {
    responder: Arc<ChatResponder>,
    permits: Arc<Semaphore>,
    timeout: Option<Duration>,
}

impl ChatService {
    pub fn new(responder: ChatResponder) -> Self {
        let generation = responder.generation_config();
        let permits = Arc::new(Semaphore::new(generation.max_concurrent.max(1)));
        let timeout = generation.timeout_secs.map(Duration::from_secs);

        Self {
            responder: Arc::new(responder),
            permits,
            timeout,
        }
    }

    /// Waits for a free generation slot, then runs the responder. The
    /// deadline covers only the generation itself, not the wait in the queue.
    pub async fn respond(&self, message: String) -> Result<String> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|e| Error::internal(format!("generation queue closed: {}", e)))?;
        debug!("Acquired generation permit");

        let responder = Arc::clone(&self.responder);
        // The permit moves into the task so it is released only when the
        // computation ends, even if the caller stopped waiting.
        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            responder.respond(&message)
        });

        let joined = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!("Generation exceeded {}s deadline", limit.as_secs());
                    return Err(Error::Timeout {
                        seconds: limit.as_secs(),
                    });
                }
            },
            None => task.await,
        };

        joined.map_err(|e| Error::generation(format!("generation task failed: {}", e)))?
    }
}
