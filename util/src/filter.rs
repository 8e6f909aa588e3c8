use std::time::Instant;

/// Exponentially weighted moving average with a record of when the last
/// sample arrived, so consumers can ignore values that have gone stale.
#[derive(Debug, Clone)]
pub struct Filter {
    factor: f32,
    value: Option<f32>,
    when_updated: Option<Instant>,
}

impl Filter {
    pub fn new(factor: f32) -> Self {
        Filter {
            factor,
            value: None,
            when_updated: None,
        }
    }

    pub fn update(&mut self, sample: f32) {
        self.value = Some(match self.value {
            Some(value) => value + self.factor * (sample - value),
            None => sample,
        });
        self.when_updated = Some(Instant::now());
    }

    pub fn value(&self) -> Option<f32> {
        self.value
    }

    pub fn when_updated(&self) -> Option<Instant> {
        self.when_updated
    }

    pub fn reset(&mut self) {
        self.value = None;
        self.when_updated = None;
    }
}

#[cfg(test)]
mod filter_test {
    use super::*;

    #[test]
    fn test_first_sample_is_taken_as_is() {
        let mut f = Filter::new(0.2);
        assert_eq!(f.value(), None);
        f.update(50.0);
        assert_eq!(f.value(), Some(50.0));
    }

    #[test]
    fn test_smoothing() {
        let mut f = Filter::new(0.2);
        f.update(100.0);
        f.update(0.0);
        assert_eq!(f.value(), Some(80.0));
        f.update(0.0);
        assert_eq!(f.value(), Some(64.0));
    }

    #[test]
    fn test_update_time_is_recorded() {
        let mut f = Filter::new(0.2);
        assert!(f.when_updated().is_none());
        f.update(1.0);
        assert!(f.when_updated().is_some());
    }
}
