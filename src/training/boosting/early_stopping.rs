//! Patience-based early stopping on a monitored metric

/// Tracks the best value of a metric and signals when it has not improved
/// for more than `patience` consecutive rounds.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    higher_is_better: bool,
    best_value: Option<f64>,
    best_round: usize,
    current_round: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize, higher_is_better: bool) -> Self {
        Self {
            patience,
            higher_is_better,
            best_value: None,
            best_round: 0,
            current_round: 0,
        }
    }

    /// Record the metric for the current round.
    ///
    /// Returns `true` once `patience` rounds have passed without improvement.
    pub fn should_stop(&mut self, value: f64) -> bool {
        let improved = match self.best_value {
            None => !value.is_nan(),
            Some(best) if self.higher_is_better => value > best,
            Some(best) => value < best,
        };

        if improved {
            self.best_value = Some(value);
            self.best_round = self.current_round;
        }
        self.current_round += 1;

        self.current_round - self.best_round > self.patience
    }

    pub fn best_value(&self) -> Option<f64> {
        self.best_value
    }

    /// Zero-based round of the best value
    pub fn best_round(&self) -> usize {
        self.best_round
    }

    pub fn current_round(&self) -> usize {
        self.current_round
    }

    pub fn reset(&mut self) {
        self.best_value = None;
        self.best_round = 0;
        self.current_round = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_stop_while_improving() {
        let mut es = EarlyStopping::new(3, false);
        for v in [1.0, 0.9, 0.8, 0.7, 0.6] {
            assert!(!es.should_stop(v));
        }
        assert_eq!(es.best_round(), 4);
        assert_eq!(es.best_value(), Some(0.6));
    }

    #[test]
    fn test_stops_after_patience() {
        let mut es = EarlyStopping::new(3, false);
        assert!(!es.should_stop(0.5));
        assert!(!es.should_stop(0.6));
        assert!(!es.should_stop(0.7));
        assert!(es.should_stop(0.8));
        assert_eq!(es.best_round(), 0);
    }

    #[test]
    fn test_improvement_resets_window() {
        let mut es = EarlyStopping::new(2, true);
        assert!(!es.should_stop(0.5));
        assert!(!es.should_stop(0.4));
        assert!(!es.should_stop(0.6));
        assert!(!es.should_stop(0.6));
        assert!(es.should_stop(0.55));
        assert_eq!(es.best_round(), 2);
    }

    #[test]
    fn test_reset() {
        let mut es = EarlyStopping::new(1, false);
        es.should_stop(1.0);
        es.should_stop(2.0);
        es.reset();
        assert_eq!(es.current_round(), 0);
        assert_eq!(es.best_value(), None);
    }
}
