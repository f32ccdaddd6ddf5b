//! Cross-frame result aggregation
//!
//! Each video frame yields an independent, noisy reading of a card field.
//! The aggregator counts agreeing readings and emits a final answer once
//! enough frames agree or the caller forces a decision. The lock guards
//! only the increment/compare, never a frame's decode.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

/// Settings for one aggregator instance.
#[derive(Debug, Clone)]
pub struct ResultAggregatorConfig {
    /// Agreeing frames required before an answer is final; `None` waits for
    /// the caller to force one
    pub required_agreement_count: Option<u32>,
    /// Wall-clock budget measured from the first accepted result
    pub max_total_aggregation_time: Duration,
}

impl Default for ResultAggregatorConfig {
    fn default() -> Self {
        Self {
            required_agreement_count: Some(5),
            max_total_aggregation_time: Duration::from_secs(10),
        }
    }
}

/// A value the aggregator settled on, with how many frames agreed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsensusResult<V> {
    pub value: V,
    pub agreement_count: u32,
}

#[derive(Debug)]
struct ValueStats {
    count: u32,
    /// Sequence number of the frame that first reported this value
    first_seen: u64,
}

/// Per-session aggregation state, exclusive to one aggregator and mutated
/// once per processed frame.
#[derive(Debug)]
struct AggregationState<V> {
    counts: HashMap<V, ValueStats>,
    start_time: Option<Instant>,
    next_sequence: u64,
}

impl<V> Default for AggregationState<V> {
    fn default() -> Self {
        Self {
            counts: HashMap::new(),
            start_time: None,
            next_sequence: 0,
        }
    }
}

type Validator<V> = Box<dyn Fn(&V) -> bool + Send + Sync>;

/// Counts per-frame readings of one card field and decides when a final
/// cross-frame answer exists.
pub struct FrameResultAggregator<V> {
    config: ResultAggregatorConfig,
    is_valid: Validator<V>,
    state: Mutex<AggregationState<V>>,
}

impl<V: Eq + Hash + Clone> FrameResultAggregator<V> {
    pub fn new(
        config: ResultAggregatorConfig,
        is_valid: impl Fn(&V) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            config,
            is_valid: Box::new(is_valid),
            state: Mutex::new(AggregationState::default()),
        }
    }

    /// Record one frame's reading.
    ///
    /// Returns the consensus value once the agreement count is met or
    /// `must_return` is set; `None` means no answer yet. Invalid readings
    /// never increment a count but still yield a forced answer when one
    /// exists.
    pub fn aggregate(&self, value: V, must_return: bool) -> Option<ConsensusResult<V>> {
        let mut state = self.state.lock();

        let count = if (self.is_valid)(&value) {
            if state.start_time.is_none() {
                state.start_time = Some(Instant::now());
            }
            let sequence = state.next_sequence;
            let stats = state.counts.entry(value).or_insert(ValueStats {
                count: 0,
                first_seen: sequence,
            });
            stats.count += 1;
            let count = stats.count;
            if count == 1 {
                state.next_sequence += 1;
            }
            count
        } else {
            debug!("discarding invalid frame reading");
            0
        };

        let agreement_met = self
            .config
            .required_agreement_count
            .is_some_and(|required| count >= required);
        if must_return || agreement_met {
            most_likely(&state.counts)
        } else {
            None
        }
    }

    /// Best value so far, without recording a new reading.
    pub fn current_best(&self) -> Option<ConsensusResult<V>> {
        most_likely(&self.state.lock().counts)
    }

    /// True once the time budget has elapsed since the first accepted
    /// result.
    pub fn time_budget_exceeded(&self) -> bool {
        self.state
            .lock()
            .start_time
            .is_some_and(|start| start.elapsed() >= self.config.max_total_aggregation_time)
    }

    /// Clear all counts and un-arm the start timestamp for a fresh session.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.counts.clear();
        state.start_time = None;
        state.next_sequence = 0;
    }
}

/// Highest count wins; equal counts fall back to the earliest first
/// sighting, so the answer does not depend on map iteration order.
fn most_likely<V: Clone>(counts: &HashMap<V, ValueStats>) -> Option<ConsensusResult<V>> {
    counts
        .iter()
        .max_by_key(|(_, stats)| (stats.count, std::cmp::Reverse(stats.first_seen)))
        .map(|(value, stats)| ConsensusResult {
            value: value.clone(),
            agreement_count: stats.count,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregator(required: Option<u32>) -> FrameResultAggregator<String> {
        FrameResultAggregator::new(
            ResultAggregatorConfig {
                required_agreement_count: required,
                max_total_aggregation_time: Duration::from_secs(10),
            },
            |value: &String| !value.is_empty(),
        )
    }

    #[test]
    fn test_third_agreeing_frame_settles() {
        let results = aggregator(Some(3));
        let pan = "4557095462268383".to_string();

        assert_eq!(results.aggregate(pan.clone(), false), None);
        assert_eq!(results.aggregate(pan.clone(), false), None);
        let settled = results.aggregate(pan.clone(), false).unwrap();
        assert_eq!(settled.value, pan);
        assert_eq!(settled.agreement_count, 3);

        // Further frames keep agreeing
        let again = results.aggregate(pan.clone(), false).unwrap();
        assert_eq!(again.agreement_count, 4);
    }

    #[test]
    fn test_invalid_readings_never_count() {
        let results = aggregator(Some(2));
        assert_eq!(results.aggregate(String::new(), false), None);
        assert_eq!(results.aggregate(String::new(), false), None);
        assert_eq!(results.aggregate(String::new(), false), None);
        assert_eq!(results.current_best(), None);
    }

    #[test]
    fn test_forced_return_picks_current_leader() {
        let results = aggregator(None);
        results.aggregate("1111".to_string(), false);
        results.aggregate("2222".to_string(), false);
        results.aggregate("2222".to_string(), false);

        let forced = results.aggregate("1111".to_string(), true).unwrap();
        assert_eq!(forced.value, "2222");
        assert_eq!(forced.agreement_count, 2);
    }

    #[test]
    fn test_forced_return_without_any_valid_reading() {
        let results = aggregator(None);
        assert_eq!(results.aggregate(String::new(), true), None);
    }

    #[test]
    fn test_tie_goes_to_first_seen() {
        let results = aggregator(None);
        results.aggregate("2222".to_string(), false);
        results.aggregate("1111".to_string(), false);
        let forced = results.aggregate("1111".to_string(), true).unwrap();
        // 1111 reaches two sightings, overtaking the earlier 2222
        assert_eq!(forced.value, "1111");

        let results = aggregator(None);
        results.aggregate("2222".to_string(), false);
        results.aggregate("1111".to_string(), false);
        results.aggregate("3333".to_string(), false);
        let forced = results.current_best().unwrap();
        assert_eq!(forced.value, "2222");
        assert_eq!(forced.agreement_count, 1);
    }

    #[test]
    fn test_reset_clears_session() {
        let results = aggregator(Some(2));
        results.aggregate("1111".to_string(), false);
        results.reset();
        assert_eq!(results.current_best(), None);
        assert_eq!(results.aggregate("1111".to_string(), false), None);
    }

    #[test]
    fn test_time_budget_unarmed_until_first_valid_result() {
        let results = FrameResultAggregator::new(
            ResultAggregatorConfig {
                required_agreement_count: None,
                max_total_aggregation_time: Duration::from_millis(0),
            },
            |value: &String| !value.is_empty(),
        );
        assert!(!results.time_budget_exceeded());
        results.aggregate(String::new(), false);
        assert!(!results.time_budget_exceeded());
        results.aggregate("1111".to_string(), false);
        assert!(results.time_budget_exceeded());
    }
}
