/// Exponentially weighted moving average with a running variance.
///
/// The smoothing factor is `2 / (window + 1)`, so a larger window adapts more
/// slowly. Only the mean and variance are kept, regardless of how many samples
/// have been observed.
#[derive(Debug, Clone)]
pub struct MovingAverage {
    alpha: f64,
    initialized: bool,
    value: f64,
    variance: f64,
}

impl MovingAverage {
    pub fn new(window_size: usize) -> Self {
        Self {
            alpha: smoothing_factor(window_size),
            initialized: false,
            value: 0.0,
            variance: 0.0,
        }
    }

    pub fn observe(&mut self, sample: f64) {
        if !self.initialized {
            self.value = sample;
            self.variance = 0.0;
            self.initialized = true;
            return;
        }

        let delta = sample - self.value;
        self.value += self.alpha * delta;
        self.variance = (1.0 - self.alpha) * (self.variance + self.alpha * delta * delta);
    }

    pub fn reset(&mut self, window_size: usize) {
        *self = Self::new(window_size);
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn variance(&self) -> f64 {
        self.variance
    }

    pub fn std_dev(&self) -> f64 {
        self.variance.sqrt()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }
}

fn smoothing_factor(window_size: usize) -> f64 {
    2.0 / (window_size.max(1) as f64 + 1.0)
}
