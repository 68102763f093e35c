//! Response body that owns the request's admission slot.
//!
//! The engine's answer is relayed chunk by chunk. The slot travels with the
//! body and is released when the stream ends, fails, or is dropped because
//! the client went away. Dropping the stream also drops the engine
//! connection, so an abandoned extraction stops promptly.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use bytes::Bytes;
use futures_util::stream::{BoxStream, Stream, StreamExt};

use crate::admission::AdmissionSlot;
use crate::core_state::CoreState;
use crate::engine::{EngineError, Operation};

/// Bookkeeping reported once the relay is over.
pub struct RelayInfo {
    pub core: Arc<CoreState>,
    pub operation: Operation,
    pub label: String,
    pub engine_status: u16,
    pub started: Instant,
}

pub struct ExtractionStream {
    inner: BoxStream<'static, Result<Bytes, EngineError>>,
    slot: Option<AdmissionSlot>,
    info: RelayInfo,
    bytes_sent: u64,
}

impl ExtractionStream {
    pub fn new(
        inner: BoxStream<'static, Result<Bytes, EngineError>>,
        slot: AdmissionSlot,
        info: RelayInfo,
    ) -> Self {
        Self {
            inner,
            slot: Some(slot),
            info,
            bytes_sent: 0,
        }
    }

    fn finish(&mut self, error: Option<&EngineError>) {
        let Some(slot) = self.slot.take() else {
            return;
        };
        let info = &self.info;
        let latency = info.started.elapsed();
        let endpoint = info.operation.route();
        let core = &info.core;

        match error {
            None => {
                tracing::info!(
                    operation = %info.operation,
                    slot_id = slot.id(),
                    latency_ms = latency.as_millis() as u64,
                    bytes = self.bytes_sent,
                    "Extraction completed"
                );
                if let Err(e) = core.status().record_engine_success() {
                    tracing::warn!(error = %e, "Could not record engine success");
                }
                core.events().extraction_success(
                    &info.label,
                    endpoint,
                    latency,
                    self.bytes_sent,
                    info.engine_status,
                );
            }
            Some(err) => {
                tracing::warn!(
                    operation = %info.operation,
                    slot_id = slot.id(),
                    latency_ms = latency.as_millis() as u64,
                    error = %err,
                    "Extraction failed while streaming"
                );
                let message = err.to_string();
                if let Err(e) = core.status().record_engine_failure(&message) {
                    tracing::warn!(error = %e, "Could not record engine failure");
                }
                core.events()
                    .extraction_failure(&info.label, endpoint, &message, latency);
            }
        }
        slot.release();
    }
}

impl Stream for ExtractionStream {
    type Item = Result<Bytes, EngineError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.slot.is_none() {
            return Poll::Ready(None);
        }

        match this.inner.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.bytes_sent += chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(err))) => {
                this.finish(Some(&err));
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                this.finish(None);
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for ExtractionStream {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            let info = &self.info;
            let latency = info.started.elapsed();
            tracing::info!(
                operation = %info.operation,
                slot_id = slot.id(),
                bytes = self.bytes_sent,
                "Client went away, extraction cancelled"
            );
            info.core.events().extraction_cancelled(
                &info.label,
                info.operation.route(),
                latency,
                self.bytes_sent,
            );
            slot.release();
        }
    }
}
