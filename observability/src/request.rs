use std::{
    future::Future,
    pin::Pin,
    task::{self, Poll},
    time::Instant,
};

use futures::TryFuture;
use opentelemetry::metrics::Histogram;
use opentelemetry::KeyValue;

use crate::Counter;

/// Outbound calls made by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// JSON-RPC call to the node, retries included.
    Rpc,
    /// Upload of one parquet object.
    ArchivePut,
    /// Batched upsert into the transaction table.
    StoreUpsert,
}

impl RequestKind {
    pub fn metric_name(&self) -> &'static str {
        match self {
            RequestKind::Rpc => "rpc.request",
            RequestKind::ArchivePut => "archive.put",
            RequestKind::StoreUpsert => "store.upsert",
        }
    }

    /// Histogram buckets, in seconds.
    ///
    /// RPC calls are capped by the provider timeout. Uploads and upserts of a
    /// large range can take most of a minute.
    fn boundaries(&self) -> Vec<f64> {
        match self {
            RequestKind::Rpc => vec![
                0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0,
            ],
            RequestKind::ArchivePut | RequestKind::StoreUpsert => vec![
                0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 40.0, 60.0,
            ],
        }
    }
}

/// Latency and failure count of one kind of outbound call.
#[derive(Debug, Clone)]
pub struct RequestMetrics {
    kind: RequestKind,
    duration: Histogram<f64>,
    failures: Counter<u64>,
}

impl RequestMetrics {
    pub fn new(meter_name: &'static str, kind: RequestKind) -> Self {
        let meter = crate::meter(meter_name);
        let name = kind.metric_name();

        Self {
            kind,
            duration: meter
                .f64_histogram(format!("{name}.duration"))
                .with_description(format!("{name} latency"))
                .with_unit("s")
                .with_boundaries(kind.boundaries())
                .build(),
            failures: meter
                .u64_counter(format!("{name}.failures"))
                .with_description(format!("{name} failures"))
                .build(),
        }
    }
}

#[pin_project::pin_project]
pub struct RecordedRequest<F> {
    #[pin]
    inner: F,
    started: Instant,
    metrics: RequestMetrics,
    method: Option<&'static str>,
}

/// Times a fallible future and counts it as failed if it resolves to `Err`.
pub trait RecordRequest: TryFuture + Sized {
    fn record_request(self, metrics: RequestMetrics) -> RecordedRequest<Self> {
        RecordedRequest {
            inner: self,
            started: Instant::now(),
            metrics,
            method: None,
        }
    }

    /// Same as [RecordRequest::record_request], labelled with the RPC method.
    fn record_method(
        self,
        metrics: RequestMetrics,
        method: &'static str,
    ) -> RecordedRequest<Self> {
        RecordedRequest {
            inner: self,
            started: Instant::now(),
            metrics,
            method: Some(method),
        }
    }
}

impl<F: TryFuture> RecordRequest for F {}

impl<F: TryFuture> Future for RecordedRequest<F> {
    type Output = Result<F::Ok, F::Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        let output = match this.inner.try_poll(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(output) => output,
        };

        let elapsed = this.started.elapsed();
        let attributes = this.method.map(|method| KeyValue::new("method", method));
        let attributes = attributes.as_slice();

        this.metrics
            .duration
            .record(elapsed.as_secs_f64(), attributes);

        if output.is_err() {
            this.metrics.failures.add(1, attributes);
            tracing::debug!(
                request = this.metrics.kind.metric_name(),
                method = this.method.unwrap_or_default(),
                elapsed_ms = elapsed.as_millis() as u64,
                "request failed"
            );
        }

        Poll::Ready(output)
    }
}
