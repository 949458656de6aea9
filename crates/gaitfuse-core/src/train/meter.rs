//! Running loss average.

use serde::{Deserialize, Serialize};

/// Tracks the latest value and the sample-weighted running average.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AverageMeter {
    /// Most recent value
    pub val: f64,
    pub avg: f64,
    pub sum: f64,
    /// Samples seen so far
    pub count: usize,
}

impl AverageMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `val` averaged over `n` samples.
    pub fn update(&mut self, val: f64, n: usize) {
        self.val = val;
        self.sum += val * n as f64;
        self.count += n;
        if self.count > 0 {
            self.avg = self.sum / self.count as f64;
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
