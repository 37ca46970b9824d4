use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    db::RecordStore,
    error::{Result, ScanError},
    model::{normalize_label, Coordinate, Locality, Observation},
    source::PositionSource,
};

/// The rounded location every observation is currently tagged with.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Anchor {
    locality: Locality,
    known: bool,
    label: Option<String>,
    label_requested: bool,
    locked: bool,
}

impl Anchor {
    pub fn locality(&self) -> Locality {
        self.locality
    }

    pub fn is_known(&self) -> bool {
        self.known
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// `None` while the position is unknown.
    pub fn location_key(&self) -> Option<String> {
        self.known.then(|| self.locality.key())
    }

    /// Whether a label has been asked for but not answered yet.
    pub fn awaiting_label(&self) -> bool {
        self.known && self.label_requested && self.label.is_none()
    }

    /// Tags a reading with this location. Raw readings keep whatever name the
    /// radio reported, empty for hidden networks; only averages carry `None`.
    pub fn observe(
        &self,
        access_point_id: &str,
        display_name: Option<&str>,
        signal_strength: i32,
        captured_at: DateTime<Utc>,
    ) -> Observation {
        Observation {
            access_point_id: access_point_id.to_owned(),
            display_name: display_name.map(str::to_owned),
            signal_strength,
            captured_at,
            location_key: self.location_key(),
            location_label: self.label.clone(),
        }
    }
}

/// Asks the user to name the location identified by `location_key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelRequest {
    pub location_key: String,
}

#[derive(Debug, Default)]
pub struct LocationTracker {
    anchor: Anchor,
}

impl LocationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn anchor(&self) -> &Anchor {
        &self.anchor
    }

    /// Polls the position source once and moves the anchor if the rounded
    /// coordinate changed. Does nothing while locked.
    pub async fn refresh(
        &mut self,
        position: &dyn PositionSource,
        store: &dyn RecordStore,
    ) -> Result<Option<LabelRequest>> {
        if self.anchor.locked {
            return Ok(None);
        }

        let locality = self.fix(position).await?;
        if self.anchor.known && self.anchor.locality == locality {
            return Ok(None);
        }

        Ok(self.settle(locality, store).await)
    }

    /// Takes a fresh fix and freezes the anchor there until [`Self::release`].
    pub async fn lock(
        &mut self,
        position: &dyn PositionSource,
        store: &dyn RecordStore,
    ) -> Result<Option<LabelRequest>> {
        let locality = self.fix(position).await?;
        let request = if self.anchor.known && self.anchor.locality == locality {
            self.request_label()
        } else {
            self.settle(locality, store).await
        };
        self.anchor.locked = true;
        info!(location = %locality.key(), "location locked");
        Ok(request)
    }

    pub fn release(&mut self) {
        self.anchor.locked = false;
    }

    pub fn reset(&mut self) {
        self.anchor = Anchor::default();
    }

    /// Applies an answer to a label request. Answers for a location the
    /// tracker has since moved away from are dropped.
    pub fn resolve_label(&mut self, location_key: &str, input: Option<&str>) -> bool {
        if self.anchor.location_key().as_deref() != Some(location_key) {
            debug!(location_key, "ignoring label for stale location");
            return false;
        }
        let label = normalize_label(input);
        info!(location_key, label = %label, "location labelled");
        self.anchor.label = Some(label);
        self.anchor.label_requested = true;
        true
    }

    async fn fix(&mut self, position: &dyn PositionSource) -> Result<Locality> {
        let fix = if !position.is_enabled() {
            Err(ScanError::LocationDisabled)
        } else if !position.permission_granted() {
            Err(ScanError::PermissionDenied)
        } else {
            position
                .last_known()
                .await
                .and_then(|x| x.ok_or(ScanError::PositionUnavailable))
        };

        match fix {
            Ok(coordinate) => Ok(Locality::from(coordinate)),
            Err(e) => {
                self.reset();
                Err(e)
            }
        }
    }

    async fn settle(&mut self, locality: Locality, store: &dyn RecordStore) -> Option<LabelRequest> {
        self.anchor = Anchor {
            locality,
            known: true,
            ..Anchor::default()
        };

        let key = locality.key();
        let existing = match store.by_location(&key).await {
            Ok(x) => x,
            Err(e) => {
                warn!(location = %key, "label lookup failed: {e}");
                Vec::new()
            }
        };

        if let Some(label) = existing.into_iter().find_map(|x| x.location_label) {
            debug!(location = %key, label = %label, "reusing stored label");
            self.anchor.label = Some(label);
            self.anchor.label_requested = true;
            return None;
        }

        self.request_label()
    }

    fn request_label(&mut self) -> Option<LabelRequest> {
        if self.anchor.label_requested || self.anchor.label.is_some() {
            return None;
        }
        self.anchor.label_requested = true;
        Some(LabelRequest {
            location_key: self.anchor.locality.key(),
        })
    }
}
