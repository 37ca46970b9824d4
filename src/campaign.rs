//! Statistical sampling at one locked location.
//!
//! A campaign takes `target` non-empty scans at a frozen anchor, stores every
//! raw reading as it goes, then writes one extra observation per access point
//! carrying the truncated integer mean of everything collected for it.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::Serialize;
use strum::Display;
use tracing::{debug, info, warn};

use crate::{
    db::RecordStore,
    error::{Result, ScanError},
    model::AccessPoint,
    scheduler::record_scan,
    source::{check_preconditions, PositionSource, RadioSource},
    tracker::{Anchor, LabelRequest, LocationTracker},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AbortReason {
    Stopped,
    RadioDisabled,
    LocationDisabled,
    PositionUnavailable,
    PermissionDenied,
    ScanFailed,
}

impl From<&ScanError> for AbortReason {
    fn from(value: &ScanError) -> Self {
        match value {
            ScanError::RadioDisabled => AbortReason::RadioDisabled,
            ScanError::LocationDisabled => AbortReason::LocationDisabled,
            ScanError::PositionUnavailable => AbortReason::PositionUnavailable,
            ScanError::PermissionDenied => AbortReason::PermissionDenied,
            _ => AbortReason::ScanFailed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Stage {
    Init,
    LocationLock,
    Sampling,
    Aggregate,
    Cooldown,
    Done,
    Aborted(AbortReason),
}

impl Stage {
    pub fn can_advance(self, next: Stage) -> bool {
        use Stage::*;
        matches!(
            (self, next),
            (Init, LocationLock)
                | (LocationLock, Sampling)
                | (Sampling, Aggregate)
                | (Aggregate, Cooldown)
                | (Cooldown, Done)
                | (Init | LocationLock | Sampling, Aborted(_))
        )
    }
}

/// Readings collected so far, per access point, plus the completed rounds.
#[derive(Debug, Default)]
pub struct Accumulator {
    readings: BTreeMap<String, Vec<i32>>,
    rounds: u32,
}

impl Accumulator {
    pub fn record(&mut self, visible: &[AccessPoint]) {
        for ap in visible {
            self.readings
                .entry(ap.id.clone())
                .or_default()
                .push(ap.signal_strength);
        }
        self.rounds += 1;
    }

    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    pub fn readings(&self, access_point_id: &str) -> Option<&[i32]> {
        self.readings.get(access_point_id).map(Vec::as_slice)
    }
}

/// Mean of `readings`, truncated toward zero.
pub fn truncated_mean(readings: &[i32]) -> Option<i32> {
    if readings.is_empty() {
        return None;
    }
    let sum: i64 = readings.iter().map(|&x| i64::from(x)).sum();
    Some((sum / readings.len() as i64) as i32)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundOutcome {
    pub visible: Vec<AccessPoint>,
    /// False for an empty scan, which does not count toward the target.
    pub counted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateReport {
    pub rounds: u32,
    pub saved: usize,
    pub failed: usize,
}

#[derive(Debug)]
pub struct Campaign {
    target: u32,
    stage: Stage,
    accumulator: Accumulator,
}

impl Campaign {
    pub fn new(target: u32) -> Self {
        Self {
            target: target.max(1),
            stage: Stage::Init,
            accumulator: Accumulator::default(),
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn target(&self) -> u32 {
        self.target
    }

    pub fn rounds(&self) -> u32 {
        self.accumulator.rounds
    }

    pub fn accumulator(&self) -> &Accumulator {
        &self.accumulator
    }

    pub fn advance(&mut self, next: Stage) -> Result<()> {
        if !self.stage.can_advance(next) {
            return Err(ScanError::InvalidTransition {
                from: self.stage,
                to: next,
            });
        }
        debug!(from = %self.stage, to = %next, "campaign stage");
        self.stage = next;
        Ok(())
    }

    /// Drops everything collected so far. Raw observations already written stay.
    pub fn abort(&mut self, reason: AbortReason) -> Result<()> {
        self.advance(Stage::Aborted(reason))?;
        let discarded = std::mem::take(&mut self.accumulator);
        info!(%reason, rounds = discarded.rounds, "campaign aborted");
        Ok(())
    }

    /// Checks preconditions and locks the tracker at a fresh fix. On failure
    /// the campaign is aborted with the specific reason.
    pub async fn begin(
        &mut self,
        radio: &dyn RadioSource,
        position: &dyn PositionSource,
        tracker: &mut LocationTracker,
        store: &dyn RecordStore,
    ) -> Result<Option<LabelRequest>> {
        if let Err(e) = check_preconditions(radio, position) {
            self.abort((&e).into())?;
            return Err(e);
        }

        self.advance(Stage::LocationLock)?;
        let request = match tracker.lock(position, store).await {
            Ok(x) => x,
            Err(e) => {
                self.abort((&e).into())?;
                return Err(e);
            }
        };

        self.advance(Stage::Sampling)?;
        info!(samples = self.target, "campaign sampling");
        Ok(request)
    }

    /// Runs one sampling round. Moves to [`Stage::Aggregate`] once the target
    /// is reached; aborts if the radio or location became unavailable.
    pub async fn round(
        &mut self,
        radio: &dyn RadioSource,
        position: &dyn PositionSource,
        anchor: &Anchor,
        store: &dyn RecordStore,
    ) -> Result<RoundOutcome> {
        if self.stage != Stage::Sampling {
            return Err(ScanError::InvalidTransition {
                from: self.stage,
                to: Stage::Sampling,
            });
        }

        let scan = match check_preconditions(radio, position) {
            Ok(()) => radio.scan().await,
            Err(e) => Err(e),
        };
        let visible = match scan {
            Ok(x) => x,
            Err(e) => {
                self.abort((&e).into())?;
                return Err(e);
            }
        };

        if visible.is_empty() {
            warn!(round = self.rounds(), "empty scan, not counted");
            return Ok(RoundOutcome {
                visible,
                counted: false,
            });
        }

        record_scan(store, &visible, anchor).await;
        self.accumulator.record(&visible);
        debug!(round = self.rounds(), of = self.target, visible = visible.len(), "sampled");

        if self.rounds() >= self.target {
            self.advance(Stage::Aggregate)?;
        }
        Ok(RoundOutcome {
            visible,
            counted: true,
        })
    }

    /// Writes one averaged observation per access point. A failed write is
    /// logged and counted without stopping the others.
    pub async fn aggregate(&mut self, anchor: &Anchor, store: &dyn RecordStore) -> Result<AggregateReport> {
        if self.stage != Stage::Aggregate {
            return Err(ScanError::InvalidTransition {
                from: self.stage,
                to: Stage::Cooldown,
            });
        }

        let now = Utc::now();
        let accumulator = std::mem::take(&mut self.accumulator);
        let mut report = AggregateReport {
            rounds: accumulator.rounds,
            ..AggregateReport::default()
        };

        for (bssid, readings) in &accumulator.readings {
            let Some(mean) = truncated_mean(readings) else {
                continue;
            };
            let observation = anchor.observe(bssid, None, mean, now);
            match store.insert(&observation).await {
                Ok(()) => {
                    report.saved += 1;
                    debug!(%bssid, rssi = mean, samples = readings.len(), "saved average");
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(%bssid, "failed to save average: {e}");
                }
            }
        }

        self.advance(Stage::Cooldown)?;
        info!(
            rounds = report.rounds,
            saved = report.saved,
            failed = report.failed,
            location = anchor.location_key().as_deref().unwrap_or("unknown"),
            "campaign complete"
        );
        Ok(report)
    }

    pub fn finish(&mut self) -> Result<()> {
        self.advance(Stage::Done)
    }
}
