//! Agent loops: sampling and reporting.
//!
//! ```text
//!  Sampler ──(poll tick)──► bounded mpsc ──(report tick, drain + coalesce)──► Transport
//! ```
//!
//! The sampler blocks when the channel is full, so a stalled reporter slows
//! collection instead of growing memory. Cancelling stops both loops; the
//! sampler drops its sender on exit so the reporter sees end of stream.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::collector::{FileSystem, Sampler, build_batch};
use crate::error::MetricsError;
use crate::model::MetricBatch;
use crate::transport::Transport;

/// Channel capacity holding one report interval worth of batches.
pub fn channel_capacity(poll: Duration, report: Duration) -> usize {
    let polls = report.as_millis() / poll.as_millis().max(1);
    usize::try_from(polls).unwrap_or(usize::MAX).max(1)
}

/// Samples on every `poll` tick and pushes the batch into `tx`.
pub async fn run_sampler<F: FileSystem>(
    mut sampler: Sampler<F>,
    poll: Duration,
    tx: mpsc::Sender<MetricBatch>,
    cancel: CancellationToken,
) {
    let mut tick = tokio::time::interval(poll);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {}
        }

        let sample = match sampler.sample() {
            Ok(sample) => sample,
            Err(e) => {
                warn!(tick = sampler.ticks(), error = %e, "sample skipped");
                continue;
            }
        };

        let batch = build_batch(&sample);
        if batch.is_empty() {
            continue;
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            sent = tx.send(batch) => {
                if sent.is_err() {
                    debug!("reporter gone, stopping sampler");
                    break;
                }
            }
        }
    }

    info!(ticks = sampler.ticks(), "sampler stopped");
}

/// Drains whatever is queued and folds it into one batch. The flag is set
/// once the sender side is gone.
fn drain(rx: &mut mpsc::Receiver<MetricBatch>) -> (MetricBatch, bool) {
    let mut merged = MetricBatch::new();
    loop {
        match rx.try_recv() {
            Ok(batch) => merged.coalesce(batch),
            Err(TryRecvError::Empty) => return (merged, false),
            Err(TryRecvError::Disconnected) => return (merged, true),
        }
    }
}

/// Delivers coalesced batches on every `report` tick.
///
/// A delivery that still fails after the transport's retries is logged and
/// the batch dropped; the next tick starts fresh.
pub async fn run_reporter<T: Transport>(
    transport: T,
    report: Duration,
    mut rx: mpsc::Receiver<MetricBatch>,
    cancel: CancellationToken,
) {
    let mut tick = tokio::time::interval(report);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut delivered: u64 = 0;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {}
        }

        let (batch, closed) = drain(&mut rx);
        if !batch.is_empty() {
            match transport.send(&batch).await {
                Ok(()) => {
                    delivered += 1;
                    debug!(records = batch.len(), protocol = transport.protocol(), "report sent");
                }
                Err(MetricsError::Cancelled) => break,
                Err(e) => error!(
                    records = batch.len(),
                    protocol = transport.protocol(),
                    error = %e,
                    "report dropped"
                ),
            }
        }
        if closed {
            break;
        }
    }

    info!(delivered, "reporter stopped");
}
