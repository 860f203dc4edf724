//! Single-consumer estimator thread.
//!
//! Producers push [`SensorEvent`]s into a bounded channel; the worker owns the
//! [`FusionEstimator`] and handles one event at a time. A full queue blocks the
//! producer while an epoch is being solved.

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

use crate::error::{FusionError, FusionResult};
use crate::estimator::{EpochOutput, FusionEstimator, SensorEvent};

#[derive(Debug)]
pub struct EstimatorWorker {
    events: Sender<SensorEvent>,
    outputs: Receiver<FusionResult<EpochOutput>>,
    handle: JoinHandle<FusionEstimator>,
}

impl EstimatorWorker {
    /// Move `estimator` onto a new thread fed by a queue of `capacity` events.
    pub fn spawn(mut estimator: FusionEstimator, capacity: usize) -> FusionResult<Self> {
        let (event_tx, event_rx) = bounded::<SensorEvent>(capacity.max(1));
        let (output_tx, output_rx) = unbounded();

        let handle = thread::Builder::new()
            .name("fusion-estimator".to_string())
            .spawn(move || {
                for event in event_rx {
                    let result = match estimator.handle(event) {
                        Ok(Some(output)) => Ok(output),
                        Ok(None) => continue,
                        Err(e) => {
                            warn!(error = %e, "event rejected");
                            Err(e)
                        }
                    };
                    if output_tx.send(result).is_err() {
                        debug!("output receiver dropped, stopping worker");
                        break;
                    }
                }
                estimator
            })?;

        Ok(Self {
            events: event_tx,
            outputs: output_rx,
            handle,
        })
    }

    /// Another handle for a producer thread.
    pub fn sender(&self) -> Sender<SensorEvent> {
        self.events.clone()
    }

    /// Queue one event, blocking while the queue is full.
    pub fn submit(&self, event: SensorEvent) -> FusionResult<()> {
        self.events
            .send(event)
            .map_err(|_| FusionError::ThreadError("estimator worker has stopped".to_string()))
    }

    /// Solved epochs and rejected events, in processing order.
    pub fn outputs(&self) -> &Receiver<FusionResult<EpochOutput>> {
        &self.outputs
    }

    /// Close the queue, wait for pending events and return the estimator with
    /// every output that was not yet received.
    ///
    /// Blocks until all producer handles from [`sender`](Self::sender) are dropped.
    pub fn shutdown(self) -> FusionResult<(FusionEstimator, Vec<FusionResult<EpochOutput>>)> {
        let Self {
            events,
            outputs,
            handle,
        } = self;
        drop(events);

        let estimator = handle
            .join()
            .map_err(|_| FusionError::ThreadError("estimator worker panicked".to_string()))?;
        let remaining = outputs.try_iter().collect();
        Ok((estimator, remaining))
    }
}
