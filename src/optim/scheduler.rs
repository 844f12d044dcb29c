use std::f64::consts::PI;

use serde::{Serialize, Deserialize};

/// Per-epoch learning-rate policy applied after the warm-up phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum LrSchedule {
    #[default]
    Constant,
    /// Multiply by `gamma` every `step_size` epochs.
    Step { step_size: usize, gamma: f64 },
    /// Multiply by `gamma` at each listed epoch.
    MultiStep { milestones: Vec<usize>, gamma: f64 },
    Exponential { gamma: f64 },
    /// Polynomial decay to zero over the remaining epochs.
    Polynomial { power: f64 },
    /// Cosine annealing over the remaining epochs.
    Cosine,
}

/// Learning-rate scheduler with a linear warm-up.
///
/// During the first `warmup_epochs` epochs the rate ramps linearly up to the
/// base rate; afterwards `schedule` runs with its epoch counter starting at
/// zero. The result never drops below `min_lr`.
#[derive(Debug, Clone)]
pub struct SchedulerWithWarmUp {
    base_lr: f64,
    min_lr: f64,
    warmup_epochs: usize,
    num_epochs: usize,
    schedule: LrSchedule,
    epoch: usize,
    last_lr: f64,
}

impl SchedulerWithWarmUp {
    pub fn new(
        base_lr: f64,
        min_lr: f64,
        warmup_epochs: usize,
        num_epochs: usize,
        schedule: LrSchedule,
    ) -> SchedulerWithWarmUp {
        let mut scheduler = SchedulerWithWarmUp {
            base_lr,
            min_lr,
            warmup_epochs,
            num_epochs,
            schedule,
            epoch: 0,
            last_lr: base_lr,
        };
        scheduler.last_lr = scheduler.lr_at(0);
        scheduler
    }

    /// The learning rate in effect for the current epoch.
    pub fn get_last_lr(&self) -> f64 {
        self.last_lr
    }

    /// Advances to the next epoch.
    pub fn step(&mut self) {
        self.epoch += 1;
        self.last_lr = self.lr_at(self.epoch);
    }

    fn lr_at(&self, epoch: usize) -> f64 {
        if epoch < self.warmup_epochs {
            let factor = (epoch + 1) as f64 / (self.warmup_epochs + 1) as f64;
            return (self.base_lr * factor).max(self.min_lr);
        }
        let e = epoch - self.warmup_epochs;
        let remaining = self.num_epochs.saturating_sub(self.warmup_epochs).max(1) as f64;
        let lr = match &self.schedule {
            LrSchedule::Constant => self.base_lr,
            LrSchedule::Step { step_size, gamma } => {
                self.base_lr * gamma.powi((e / (*step_size).max(1)) as i32)
            }
            LrSchedule::MultiStep { milestones, gamma } => {
                let passed = milestones.iter().filter(|&&m| m <= e).count();
                self.base_lr * gamma.powi(passed as i32)
            }
            LrSchedule::Exponential { gamma } => self.base_lr * gamma.powi(e as i32),
            LrSchedule::Polynomial { power } => {
                self.base_lr * (1.0 - (e as f64 / remaining).min(1.0)).powf(*power)
            }
            LrSchedule::Cosine => {
                self.min_lr
                    + (self.base_lr - self.min_lr) * (1.0 + (PI * (e as f64 / remaining).min(1.0)).cos()) / 2.0
            }
        };
        lr.max(self.min_lr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rates(mut s: SchedulerWithWarmUp, n: usize) -> Vec<f64> {
        let mut out = Vec::new();
        for _ in 0..n {
            out.push(s.get_last_lr());
            s.step();
        }
        out
    }

    #[test]
    fn warmup_ramps_then_hands_over_to_schedule() {
        let s = SchedulerWithWarmUp::new(1.0, 0.0, 3, 10, LrSchedule::Step { step_size: 2, gamma: 0.5 });
        let r = rates(s, 7);
        assert_eq!(r, vec![0.25, 0.5, 0.75, 1.0, 1.0, 0.5, 0.5]);
    }

    #[test]
    fn multistep_and_floor() {
        let s = SchedulerWithWarmUp::new(
            1.0, 0.2, 0, 10,
            LrSchedule::MultiStep { milestones: vec![1, 3], gamma: 0.1 },
        );
        assert_eq!(rates(s, 4), vec![1.0, 0.2, 0.2, 0.2]);
    }

    #[test]
    fn cosine_reaches_min_at_end() {
        let s = SchedulerWithWarmUp::new(1.0, 0.1, 0, 4, LrSchedule::Cosine);
        let r = rates(s, 5);
        assert!((r[0] - 1.0).abs() < 1e-12);
        assert!((r[2] - 0.55).abs() < 1e-12);
        assert!((r[4] - 0.1).abs() < 1e-12);
    }

    #[test]
    fn default_schedule_keeps_the_base_rate() {
        assert_eq!(LrSchedule::default(), LrSchedule::Constant);
        let r = rates(SchedulerWithWarmUp::new(0.5, 0.0, 0, 3, LrSchedule::default()), 3);
        assert_eq!(r, vec![0.5; 3]);
    }
}
