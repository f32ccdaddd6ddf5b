//! Scanning session lifecycle
//!
//! A session owns the per-frame analyzer and one aggregator per card field,
//! feeds every frame's readings into them, enforces the aggregation time
//! budget, and produces the final outcome. The card number is the gating
//! field: the session completes when its aggregator settles or the budget
//! forces a decision.

use anyhow::Result;
use tracing::{debug, info};
use uuid::Uuid;

use crate::aggregate::{ConsensusResult, FrameResultAggregator, ResultAggregatorConfig};
use crate::analyzer::{Analyzer, FramePrediction, PaymentCardAnalyzer, ScanState};
use crate::vision::expiry::Expiry;
use crate::vision::{FrameGeometry, ScanBackends};

/// Result of a finished scanning session.
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub pan: Option<ConsensusResult<String>>,
    pub name: Option<ConsensusResult<String>>,
    pub expiry: Option<ConsensusResult<Expiry>>,
    pub frames_processed: u64,
}

/// One scanning session: frames in, consensus out.
pub struct ScanSession {
    id: Uuid,
    analyzer: PaymentCardAnalyzer,
    state: ScanState,
    pan_results: FrameResultAggregator<String>,
    name_results: FrameResultAggregator<String>,
    expiry_results: FrameResultAggregator<Expiry>,
    frames_processed: u64,
}

impl ScanSession {
    /// Create a session. `is_valid_pan` is the external plausibility check
    /// for card numbers (a checksum, a format rule, or an exact match
    /// against an expected number).
    pub fn new(
        analyzer: PaymentCardAnalyzer,
        state: ScanState,
        aggregation: ResultAggregatorConfig,
        is_valid_pan: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) -> Self {
        let id = Uuid::new_v4();
        info!(session = %id, "scan session armed");
        Self {
            id,
            analyzer,
            state,
            pan_results: FrameResultAggregator::new(aggregation.clone(), move |pan: &String| {
                is_valid_pan(pan)
            }),
            name_results: FrameResultAggregator::new(aggregation.clone(), |name: &String| {
                !name.is_empty()
            }),
            expiry_results: FrameResultAggregator::new(aggregation, |_: &Expiry| true),
            frames_processed: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    /// Analyze one frame and fold its readings into the session consensus.
    ///
    /// Returns the final outcome once the card number settles or the time
    /// budget forces a decision; `None` means keep feeding frames.
    pub async fn process_frame(
        &mut self,
        backends: &dyn ScanBackends,
        frame: &FrameGeometry,
    ) -> Result<Option<ScanOutcome>> {
        let must_return = self.pan_results.time_budget_exceeded();
        let prediction = self.analyzer.analyze(backends, frame, &self.state).await?;
        self.frames_processed += 1;
        debug!(
            session = %self.id,
            frame = self.frames_processed,
            pan = prediction.pan.as_deref().unwrap_or(""),
            "frame analyzed"
        );
        Ok(self.fold(prediction, must_return))
    }

    fn fold(&mut self, prediction: FramePrediction, must_return: bool) -> Option<ScanOutcome> {
        if let Some(name) = prediction.name {
            self.name_results.aggregate(name, false);
        }
        if let Some(expiry) = prediction.expiry {
            self.expiry_results.aggregate(expiry, false);
        }

        let pan = match prediction.pan {
            Some(pan) => self.pan_results.aggregate(pan, must_return),
            None if must_return => self.pan_results.current_best(),
            None => None,
        };

        if pan.is_some() || must_return {
            let outcome = ScanOutcome {
                pan,
                name: self.name_results.current_best(),
                expiry: self.expiry_results.current_best(),
                frames_processed: self.frames_processed,
            };
            info!(
                session = %self.id,
                frames = self.frames_processed,
                "scan session complete"
            );
            Some(outcome)
        } else {
            None
        }
    }

    /// Force a final outcome from whatever has accumulated so far, for a
    /// session ending without a settled card number.
    pub fn finish(&self) -> Option<ScanOutcome> {
        let pan = self.pan_results.current_best();
        let name = self.name_results.current_best();
        let expiry = self.expiry_results.current_best();
        if pan.is_none() && name.is_none() && expiry.is_none() {
            return None;
        }
        Some(ScanOutcome {
            pan,
            name,
            expiry,
            frames_processed: self.frames_processed,
        })
    }

    /// Drop all accumulated counts and re-arm for a new scan.
    pub fn reset(&mut self) {
        self.pan_results.reset();
        self.name_results.reset();
        self.expiry_results.reset();
        self.frames_processed = 0;
        info!(session = %self.id, "scan session reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::Availability;
    use std::time::Duration;

    fn session(required: Option<u32>) -> ScanSession {
        ScanSession::new(
            PaymentCardAnalyzer::new(Availability::Unavailable),
            ScanState::default(),
            ResultAggregatorConfig {
                required_agreement_count: required,
                max_total_aggregation_time: Duration::from_secs(10),
            },
            |pan: &str| pan.len() == 16 && pan.bytes().all(|b| b.is_ascii_digit()),
        )
    }

    fn reading(pan: &str) -> FramePrediction {
        FramePrediction {
            pan: Some(pan.to_string()),
            ..FramePrediction::default()
        }
    }

    #[test]
    fn test_session_settles_on_agreement() {
        let mut session = session(Some(2));
        assert!(session.fold(reading("4557095462268383"), false).is_none());
        let outcome = session.fold(reading("4557095462268383"), false).unwrap();
        let pan = outcome.pan.unwrap();
        assert_eq!(pan.value, "4557095462268383");
        assert_eq!(pan.agreement_count, 2);
    }

    #[test]
    fn test_invalid_readings_do_not_settle() {
        let mut session = session(Some(1));
        assert!(session.fold(reading("not-a-number"), false).is_none());
        assert!(session.finish().is_none());
    }

    #[test]
    fn test_forced_fold_returns_leader() {
        let mut session = session(None);
        session.fold(reading("4557095462268383"), false);
        let outcome = session.fold(reading("4557095462268383"), true).unwrap();
        assert_eq!(outcome.pan.unwrap().agreement_count, 2);
    }

    #[test]
    fn test_reset_rearms() {
        let mut session = session(Some(1));
        session.fold(reading("4557095462268383"), false);
        session.reset();
        assert_eq!(session.frames_processed(), 0);
        assert!(session.finish().is_none());
    }
}
