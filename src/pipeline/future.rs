//! Completion handle for a pipelined mutation.

use crate::error::{Error, PipelineError, Result};
use crate::metrics::CacheMetrics;
use crate::store::{BatchReply, ReplyReceiver, StoreResult};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tokio::sync::oneshot::error::RecvError;

/// Resolves once the batch holding the mutation has executed.
///
/// Output is the caller's mutation id on success. A conditional mutation
/// the store declined resolves to [`Error::MutationRejected`]; a batch that
/// was dropped without replying resolves to [`PipelineError::BatchAborted`].
#[must_use = "futures do nothing unless awaited"]
#[derive(Debug)]
pub struct MutationFuture {
    mutation_id: Option<String>,
    conditional: bool,
    reply: ReplyReceiver,
    metrics: Option<Arc<CacheMetrics>>,
}

impl MutationFuture {
    pub(crate) fn new(
        mutation_id: Option<String>,
        conditional: bool,
        reply: ReplyReceiver,
        metrics: Option<Arc<CacheMetrics>>,
    ) -> Self {
        Self {
            mutation_id,
            conditional,
            reply,
            metrics,
        }
    }

    /// The id this future resolves with.
    pub fn mutation_id(&self) -> Option<&str> {
        self.mutation_id.as_deref()
    }

    fn resolve(
        &mut self,
        reply: std::result::Result<StoreResult<BatchReply>, RecvError>,
    ) -> Result<Option<String>> {
        match reply {
            Err(_) => Err(PipelineError::BatchAborted.into()),
            Ok(Err(e)) => Err(Error::Store(e)),
            Ok(Ok(BatchReply::Applied(false))) if self.conditional => {
                if let Some(metrics) = &self.metrics {
                    metrics.mutations_rejected.inc();
                }
                Err(Error::MutationRejected {
                    mutation_id: self.mutation_id.take(),
                })
            }
            Ok(Ok(_)) => Ok(self.mutation_id.take()),
        }
    }
}

impl Future for MutationFuture {
    type Output = Result<Option<String>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        let reply = ready!(Pin::new(&mut this.reply).poll(cx));
        Poll::Ready(this.resolve(reply))
    }
}
