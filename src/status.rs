use std::fmt;

use serde::Serialize;

use crate::{
    campaign::{AbortReason, AggregateReport},
    error::ScanError,
    model::{AccessPoint, UNKNOWN_LOCATION},
    tracker::Anchor,
};

/// What the coordinator is doing, as far as the status surface cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Idle,
    Sampling { round: u32, target: u32 },
    Complete(AggregateReport),
    Aborted(AbortReason),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationView {
    pub key: Option<String>,
    pub label: String,
    pub latitude: f64,
    pub longitude: f64,
    pub locked: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum Activity {
    Detecting { count: usize },
    Sampling { round: u32, target: u32 },
    Complete { report: AggregateReport },
    Aborted { reason: AbortReason, message: String },
    Unavailable { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub location: LocationView,
    pub activity: Activity,
    pub visible: Vec<AccessPoint>,
    pub awaiting_label: bool,
}

impl Default for Status {
    fn default() -> Self {
        project(&Anchor::default(), &[], Progress::Idle, [])
    }
}

// lower is more specific
fn specificity(e: &ScanError) -> u8 {
    match e {
        ScanError::RadioDisabled => 0,
        ScanError::LocationDisabled => 1,
        ScanError::PermissionDenied => 2,
        ScanError::PositionUnavailable => 3,
        _ => 4,
    }
}

/// Builds the status shown to the user. Pure, so callers can compare the
/// result with the previous one before notifying anybody.
pub fn project<'a>(
    anchor: &Anchor,
    visible: &[AccessPoint],
    progress: Progress,
    problems: impl IntoIterator<Item = &'a ScanError>,
) -> Status {
    let problem = problems.into_iter().min_by_key(|e| specificity(e));

    let activity = match progress {
        Progress::Sampling { round, target } => Activity::Sampling { round, target },
        Progress::Complete(report) => Activity::Complete { report },
        Progress::Aborted(reason) => Activity::Aborted {
            reason,
            message: match problem {
                Some(e) => e.to_string(),
                None => "Scanning stopped.".to_owned(),
            },
        },
        Progress::Idle => match problem {
            Some(e) => Activity::Unavailable {
                message: e.to_string(),
            },
            None => Activity::Detecting {
                count: visible.len(),
            },
        },
    };

    let visible = match activity {
        Activity::Detecting { .. } | Activity::Sampling { .. } => visible.to_vec(),
        _ => Vec::new(),
    };

    let locality = anchor.locality();
    Status {
        location: LocationView {
            key: anchor.location_key(),
            label: anchor.label().unwrap_or(UNKNOWN_LOCATION).to_owned(),
            latitude: locality.latitude(),
            longitude: locality.longitude(),
            locked: anchor.is_locked(),
        },
        activity,
        visible,
        awaiting_label: anchor.awaiting_label(),
    }
}

impl Status {
    pub fn can_start(&self) -> bool {
        matches!(
            self.activity,
            Activity::Detecting { count } if count > 0
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let location = &self.location;
        writeln!(f, "You are at: {}", location.label)?;
        write!(
            f,
            "Lat: {:.3}, Lon: {:.3}",
            location.latitude, location.longitude
        )?;
        if location.locked {
            write!(f, " (Locked)")?;
        }
        writeln!(f)?;
        writeln!(f)?;

        match &self.activity {
            Activity::Detecting { count } => write!(f, "Detected {count} APs"),
            Activity::Sampling { round, target } => write!(
                f,
                "Detected {} APs\nSampling: {round}/{target}",
                self.visible.len()
            ),
            Activity::Complete { report } => write!(
                f,
                "Scan completed. {} samples saved.",
                report.rounds
            ),
            Activity::Aborted { message, .. } => write!(f, "{message} Scanning stopped."),
            Activity::Unavailable { message } => write!(f, "{message}"),
        }
    }
}
