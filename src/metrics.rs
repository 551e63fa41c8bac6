//! Response timing collected from completed replies.

use std::collections::VecDeque;
use std::time::Duration;

use crate::models::GenerateResponse;

/// How many samples the log keeps.
pub const HISTORY_LEN: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct ReplyStats {
    pub response_time: Duration,
    pub tokens_per_second: Option<f64>,
}

impl ReplyStats {
    /// Reads the timing fields the server puts on its final record.
    pub fn from_response(response: &GenerateResponse) -> Option<Self> {
        let total = response.total_duration?;
        let tokens_per_second = match (response.eval_count, response.eval_duration) {
            (Some(count), Some(nanos)) if nanos > 0 => {
                Some(count as f64 / Duration::from_nanos(nanos).as_secs_f64())
            }
            _ => None,
        };
        Some(Self {
            response_time: Duration::from_nanos(total),
            tokens_per_second,
        })
    }

    /// Fallback for servers that report no timings.
    pub fn measured(elapsed: Duration) -> Self {
        Self {
            response_time: elapsed,
            tokens_per_second: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub model: String,
    pub stats: ReplyStats,
}

#[derive(Debug, Clone, Default)]
pub struct MetricsLog {
    samples: VecDeque<Sample>,
}

impl MetricsLog {
    pub fn record(&mut self, model: impl ToString, stats: ReplyStats) {
        if self.samples.len() == HISTORY_LEN {
            self.samples.pop_front();
        }
        self.samples.push_back(Sample {
            model: model.to_string(),
            stats,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn average_response_time(&self) -> Option<Duration> {
        if self.samples.is_empty() {
            return None;
        }
        let total: Duration = self.samples.iter().map(|s| s.stats.response_time).sum();
        Some(total / self.samples.len() as u32)
    }

    /// Average response time now minus the average before the latest sample.
    pub fn response_time_delta(&self) -> Option<f64> {
        let current = self.average_response_time()?.as_secs_f64();
        let previous: Vec<f64> = self
            .samples
            .iter()
            .rev()
            .skip(1)
            .map(|s| s.stats.response_time.as_secs_f64())
            .collect();
        if previous.is_empty() {
            return None;
        }
        let previous_avg = previous.iter().sum::<f64>() / previous.len() as f64;
        Some(current - previous_avg)
    }

    pub fn latest_tokens_per_second(&self) -> Option<f64> {
        self.samples.back()?.stats.tokens_per_second
    }

    pub fn tokens_per_second_delta(&self) -> Option<f64> {
        let mut rates = self
            .samples
            .iter()
            .rev()
            .filter_map(|s| s.stats.tokens_per_second);
        let latest = rates.next()?;
        let previous = rates.next()?;
        Some(latest - previous)
    }

    /// Distinct models in the order they first appear.
    pub fn models(&self) -> Vec<&str> {
        let mut models: Vec<&str> = Vec::new();
        for sample in &self.samples {
            if !models.contains(&sample.model.as_str()) {
                models.push(&sample.model);
            }
        }
        models
    }

    /// Response times in seconds for one model, oldest first.
    pub fn history(&self, model: &str) -> Vec<f64> {
        self.samples
            .iter()
            .filter(|s| s.model == model)
            .map(|s| s.stats.response_time.as_secs_f64())
            .collect()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn millis(value: u64) -> ReplyStats {
        ReplyStats::measured(Duration::from_millis(value))
    }

    #[test]
    fn test_stats_from_final_record() {
        let response = GenerateResponse {
            done: true,
            total_duration: Some(1_200_000_000),
            eval_count: Some(90),
            eval_duration: Some(2_000_000_000),
            ..Default::default()
        };
        let stats = ReplyStats::from_response(&response).unwrap();

        assert_eq!(stats.response_time, Duration::from_millis(1200));
        assert_eq!(stats.tokens_per_second, Some(45.0));
    }

    #[test]
    fn test_stats_without_timings() {
        let response = GenerateResponse {
            response: "hi".to_string(),
            done: true,
            ..Default::default()
        };
        assert!(ReplyStats::from_response(&response).is_none());
    }

    #[test]
    fn test_stats_with_zero_eval_duration() {
        let response = GenerateResponse {
            total_duration: Some(10),
            eval_count: Some(3),
            eval_duration: Some(0),
            ..Default::default()
        };
        let stats = ReplyStats::from_response(&response).unwrap();
        assert!(stats.tokens_per_second.is_none());
    }

    #[test]
    fn test_average_and_delta() {
        let mut log = MetricsLog::default();
        assert!(log.average_response_time().is_none());

        log.record("llama3", millis(1000));
        assert!(log.response_time_delta().is_none());

        log.record("llama3", millis(2000));
        log.record("phi3", millis(3000));

        assert_eq!(log.average_response_time(), Some(Duration::from_secs(2)));
        // (1 + 2 + 3) / 3 - (1 + 2) / 2
        let delta = log.response_time_delta().unwrap();
        assert!((delta - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_tokens_per_second_delta_skips_missing_rates() {
        let mut log = MetricsLog::default();
        log.record(
            "llama3",
            ReplyStats {
                response_time: Duration::from_secs(1),
                tokens_per_second: Some(40.0),
            },
        );
        log.record("llama3", millis(1000));
        log.record(
            "llama3",
            ReplyStats {
                response_time: Duration::from_secs(1),
                tokens_per_second: Some(45.0),
            },
        );

        assert_eq!(log.latest_tokens_per_second(), Some(45.0));
        assert_eq!(log.tokens_per_second_delta(), Some(5.0));
    }

    #[test]
    fn test_history_is_capped() {
        let mut log = MetricsLog::default();
        for i in 0..(HISTORY_LEN + 3) {
            log.record("mistral", millis(i as u64 * 1000));
        }

        assert_eq!(log.len(), HISTORY_LEN);
        let history = log.history("mistral");
        assert_eq!(history.len(), HISTORY_LEN);
        assert_eq!(history[0], 3.0);
    }

    #[test]
    fn test_models_and_history_per_model() {
        let mut log = MetricsLog::default();
        log.record("llama3", millis(1500));
        log.record("phi3", millis(500));
        log.record("llama3", millis(2500));

        assert_eq!(log.models(), vec!["llama3", "phi3"]);
        assert_eq!(log.history("llama3"), vec![1.5, 2.5]);
        assert_eq!(log.history("phi3"), vec![0.5]);
        assert!(log.history("mistral").is_empty());

        log.clear();
        assert!(log.is_empty());
    }
}
