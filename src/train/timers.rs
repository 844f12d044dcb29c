use std::time::Instant;

use tracing::{info, warn};

/// Batches that take longer than this to arrive count as slow.
pub const MAX_ITEM_LOAD_TIME_SEC: f64 = 0.5;
/// Slow-batch warnings printed per epoch before going quiet.
pub const MAX_LOAD_TIME_WARNINGS: usize = 3;

/// Measures how long the training loop waits for data.
///
/// The time between the end of one batch (or the start of the epoch) and
/// the start of the next batch is counted as load time.
#[derive(Debug, Clone)]
pub struct LoadTimeMonitor {
    epoch_start_time: Instant,
    item_start_time: Instant,
    pub num_load_time_warnings: usize,
    pub num_load_time_exceeded: usize,
    pub num_batches: usize,
    pub total_extra_load_time: f64,
    pub total_load_time: f64,
}

impl Default for LoadTimeMonitor {
    fn default() -> Self {
        let now = Instant::now();
        LoadTimeMonitor {
            epoch_start_time: now,
            item_start_time: now,
            num_load_time_warnings: 0,
            num_load_time_exceeded: 0,
            num_batches: 0,
            total_extra_load_time: 0.0,
            total_load_time: 0.0,
        }
    }
}

fn status(is_training: bool) -> &'static str {
    if is_training { "training" } else { "validation" }
}

impl LoadTimeMonitor {
    pub fn reset_timers(&mut self) {
        *self = LoadTimeMonitor::default();
    }

    pub fn batch_start(&mut self, batch_idx: usize, is_training: bool) {
        let item_load_time = self.item_start_time.elapsed().as_secs_f64();
        self.record_item_load_time(batch_idx, item_load_time, is_training);
    }

    /// Books the load time of one batch. The first batch of an epoch may be
    /// slow without counting against the threshold.
    pub fn record_item_load_time(&mut self, batch_idx: usize, item_load_time: f64, is_training: bool) {
        self.total_load_time += item_load_time;
        if batch_idx == 0 {
            info!(
                "Loaded the first minibatch of {} data in {item_load_time:0.2} sec.",
                status(is_training)
            );
        } else if item_load_time > MAX_ITEM_LOAD_TIME_SEC {
            self.num_load_time_exceeded += 1;
            self.total_extra_load_time += item_load_time;
            if self.num_load_time_warnings < MAX_LOAD_TIME_WARNINGS {
                warn!(
                    "Loading {} minibatch {batch_idx} took {item_load_time:0.2} sec. This can mean that \
                     data loading is too slow to keep up with training. This warning will be printed at \
                     most {MAX_LOAD_TIME_WARNINGS} times.",
                    status(is_training)
                );
                self.num_load_time_warnings += 1;
            }
        }
    }

    pub fn batch_end(&mut self) {
        self.item_start_time = Instant::now();
        self.num_batches += 1;
    }

    /// Logs the timing of the finished epoch and returns its duration in seconds.
    pub fn epoch_summary(&self, epoch: usize, is_training: bool) -> f64 {
        let epoch_time_seconds = self.epoch_start_time.elapsed().as_secs_f64();
        info!(
            "Epoch {epoch} {} took {epoch_time_seconds:0.2} sec, from which waiting for data took \
             {:0.2} sec total. {} minibatches in total.",
            status(is_training), self.total_load_time, self.num_batches
        );
        if self.num_load_time_exceeded > 0 {
            warn!(
                "The dataloaders were not fast enough to always supply the next batch in less than \
                 {MAX_ITEM_LOAD_TIME_SEC}sec."
            );
            warn!(
                "In this epoch, {} out of {} batches exceeded the load time threshold. Total loading \
                 time for the slow batches was {:0.2}sec.",
                self.num_load_time_exceeded, self.num_batches, self.total_extra_load_time
            );
        }
        epoch_time_seconds
    }
}
