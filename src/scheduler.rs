use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use crate::{
    db::RecordStore,
    error::Result,
    model::AccessPoint,
    source::{check_preconditions, PositionSource, RadioSource},
    tracker::Anchor,
};

/// Passive access point detection between campaigns.
///
/// Every successful tick logs what is visible at the current anchor. A failed
/// precondition never stops the scheduler; it just slows down until the radio
/// or location service comes back.
#[derive(Debug)]
pub struct ScanScheduler {
    period: Duration,
    degraded_period: Duration,
    degraded: bool,
}

impl ScanScheduler {
    pub fn new(period: Duration, degraded_period: Duration) -> Self {
        Self {
            period,
            degraded_period,
            degraded: false,
        }
    }

    /// Delay until the next tick.
    pub fn period(&self) -> Duration {
        if self.degraded {
            self.degraded_period
        } else {
            self.period
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub async fn tick(
        &mut self,
        radio: &dyn RadioSource,
        position: &dyn PositionSource,
        anchor: &Anchor,
        store: &dyn RecordStore,
    ) -> Result<Vec<AccessPoint>> {
        if let Err(e) = check_preconditions(radio, position) {
            self.degraded = true;
            debug!("detection unavailable: {e}");
            return Err(e);
        }

        let visible = match radio.scan().await {
            Ok(x) => x,
            Err(e) => {
                self.degraded = e.is_unavailable();
                return Err(e);
            }
        };
        self.degraded = false;

        if visible.is_empty() {
            warn!("No APs detected");
        } else {
            let written = record_scan(store, &visible, anchor).await;
            debug!(visible = visible.len(), written, "APs detected");
        }

        Ok(visible)
    }
}

/// Stores one observation per visible access point, skipping writes that
/// fail. Returns how many were written.
pub async fn record_scan(
    store: &dyn RecordStore,
    visible: &[AccessPoint],
    anchor: &Anchor,
) -> usize {
    let now = Utc::now();
    let mut written = 0;
    for ap in visible {
        let observation = anchor.observe(&ap.id, Some(&ap.name), ap.signal_strength, now);
        match store.insert(&observation).await {
            Ok(()) => written += 1,
            Err(e) => warn!(bssid = %ap.id, "failed to store observation: {e}"),
        }
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::MemoryStore,
        error::ScanError,
        testing::{ap, FakePosition, FakeRadio},
        tracker::LocationTracker,
    };

    const FAST: Duration = Duration::from_millis(500);
    const SLOW: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn persists_visible_set_with_anchor() {
        let radio = FakeRadio::steady(vec![ap("AA:BB", -40), ap("CC:DD", -70)]);
        let position = FakePosition::at(40.7128, -74.0060);
        let store = MemoryStore::new();
        let mut tracker = LocationTracker::new();
        tracker.refresh(&position, &store).await.unwrap();
        tracker.resolve_label("lat=40.713,lon=-74.006", Some("Lobby"));

        let mut scheduler = ScanScheduler::new(FAST, SLOW);
        let visible = scheduler
            .tick(&radio, &position, tracker.anchor(), &store)
            .await
            .unwrap();
        assert_eq!(visible.len(), 2);

        let stored = store.all().await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].access_point_id, "AA:BB");
        assert_eq!(stored[0].display_name.as_deref(), Some("net-AA:BB"));
        assert_eq!(stored[1].signal_strength, -70);
        for x in &stored {
            assert_eq!(x.location_key.as_deref(), Some("lat=40.713,lon=-74.006"));
            assert_eq!(x.location_label.as_deref(), Some("Lobby"));
        }
    }

    #[tokio::test]
    async fn unknown_anchor_stores_without_location() {
        let radio = FakeRadio::steady(vec![ap("AA:BB", -40)]);
        let position = FakePosition::at(1.0, 1.0);
        let store = MemoryStore::new();
        let anchor = Anchor::default();

        let mut scheduler = ScanScheduler::new(FAST, SLOW);
        scheduler.tick(&radio, &position, &anchor, &store).await.unwrap();
        let stored = store.all().await.unwrap();
        assert_eq!(stored[0].location_key, None);
        assert!(store.distinct_locations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn degrades_and_recovers() {
        let radio = FakeRadio::steady(vec![ap("AA:BB", -40)]);
        let position = FakePosition::at(1.0, 1.0);
        let store = MemoryStore::new();
        let anchor = Anchor::default();
        let mut scheduler = ScanScheduler::new(FAST, SLOW);

        radio.set_enabled(false);
        position.set_enabled(false);
        let result = scheduler.tick(&radio, &position, &anchor, &store).await;
        assert!(matches!(result, Err(ScanError::RadioDisabled)));
        assert_eq!(scheduler.period(), SLOW);
        assert_eq!(radio.scans.load(std::sync::atomic::Ordering::SeqCst), 0);

        radio.set_enabled(true);
        let result = scheduler.tick(&radio, &position, &anchor, &store).await;
        assert!(matches!(result, Err(ScanError::LocationDisabled)));
        assert!(scheduler.is_degraded());

        position.set_enabled(true);
        scheduler.tick(&radio, &position, &anchor, &store).await.unwrap();
        assert_eq!(scheduler.period(), FAST);
        assert_eq!(store.all().await.unwrap().len(), 1);
    }
}
