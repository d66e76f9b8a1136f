use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use super::Callback;
use crate::Message;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs subscriber callbacks off the receive loop.
///
/// Jobs are queued without bound and executed on the blocking pool, at most
/// `max_concurrent` at a time. A slow or panicking callback never stalls
/// frame intake. No ordering is promised between two jobs.
#[derive(Clone, Debug)]
pub(crate) struct Dispatcher {
    queue: mpsc::UnboundedSender<Job>,
}

impl Dispatcher {
    /// Spawns the pump task. Must be called inside a tokio runtime.
    pub(crate) fn start(
        max_concurrent: usize,
        shutdown: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let permits = Arc::new(Semaphore::new(max_concurrent));
        tokio::spawn(pump(rx, permits, shutdown));
        Self { queue: tx }
    }

    pub(crate) fn submit(
        &self,
        job: impl FnOnce() + Send + 'static,
    ) {
        if self.queue.send(Box::new(job)).is_err() {
            trace!("dispatcher stopped, job dropped");
        }
    }

    pub(crate) fn deliver(
        &self,
        callback: &Callback,
        msg: Message,
    ) {
        if callback.is_inline() {
            callback.call(msg);
            return;
        }
        let callback = callback.clone();
        self.submit(move || callback.call(msg));
    }
}

async fn pump(
    mut rx: mpsc::UnboundedReceiver<Job>,
    permits: Arc<Semaphore>,
    shutdown: CancellationToken,
) {
    loop {
        let job = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            job = rx.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        let permit = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            if std::panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                warn!("callback panicked");
            }
        });
    }
    debug!("dispatcher stopped");
}
