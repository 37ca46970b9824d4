//! Radio and position collaborators.
//!
//! The platform scan API and location provider live behind [`RadioSource`] and
//! [`PositionSource`]. The replay implementations read recorded scans and
//! fixes from CSV so the scanner can run anywhere.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
};

use anyhow::Context;
use async_trait::async_trait;
use mac_address::MacAddress;
use serde::Deserialize;

use crate::{
    error::{Result, ScanError},
    model::{AccessPoint, Coordinate},
};

#[async_trait]
pub trait RadioSource: Send + Sync {
    fn is_enabled(&self) -> bool;

    fn permission_granted(&self) -> bool {
        true
    }

    /// Triggers a scan and returns every access point currently visible.
    async fn scan(&self) -> Result<Vec<AccessPoint>>;
}

#[async_trait]
pub trait PositionSource: Send + Sync {
    fn is_enabled(&self) -> bool;

    fn permission_granted(&self) -> bool {
        true
    }

    /// The most recent fix, or `None` when the provider has nothing.
    async fn last_known(&self) -> Result<Option<Coordinate>>;
}

/// Checks everything a scan needs, most specific reason first.
pub fn check_preconditions(radio: &dyn RadioSource, position: &dyn PositionSource) -> Result<()> {
    if !radio.is_enabled() {
        return Err(ScanError::RadioDisabled);
    }
    if !position.is_enabled() {
        return Err(ScanError::LocationDisabled);
    }
    if !radio.permission_granted() || !position.permission_granted() {
        return Err(ScanError::PermissionDenied);
    }
    Ok(())
}

fn yes() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct RadioConfig {
    /// CSV with `scan,bssid,ssid,rssi` rows; rows sharing a scan number form one scan.
    pub scans: PathBuf,
    #[serde(default = "yes")]
    pub enabled: bool,
    #[serde(default = "yes")]
    pub permission: bool,
}

#[derive(Debug, Deserialize)]
pub struct PositionConfig {
    /// CSV with `lat,lon` rows; a row with empty columns replays a missing fix.
    pub fixes: PathBuf,
    #[serde(default = "yes")]
    pub enabled: bool,
    #[serde(default = "yes")]
    pub permission: bool,
}

#[derive(Debug, Deserialize)]
struct ScanRecord {
    scan: u32,
    bssid: MacAddress,
    #[serde(default)]
    ssid: Option<String>,
    rssi: i32,
}

#[derive(Debug, Deserialize)]
struct FixRecord {
    lat: Option<f64>,
    lon: Option<f64>,
}

/// Plays back recorded scans in order, wrapping around at the end.
pub struct ReplayRadio {
    scans: Vec<Vec<AccessPoint>>,
    next: AtomicUsize,
    enabled: bool,
    permission: bool,
}

impl ReplayRadio {
    pub fn new(scans: Vec<Vec<AccessPoint>>) -> Self {
        Self {
            scans,
            next: AtomicUsize::new(0),
            enabled: true,
            permission: true,
        }
    }

    pub fn load(config: &RadioConfig) -> anyhow::Result<Self> {
        let scans = load_scans(&config.scans)
            .with_context(|| format!("Failed to load scans from {}", config.scans.display()))?;
        Ok(Self {
            enabled: config.enabled,
            permission: config.permission,
            ..Self::new(scans)
        })
    }
}

fn load_scans(path: &Path) -> anyhow::Result<Vec<Vec<AccessPoint>>> {
    let mut grouped: BTreeMap<u32, Vec<AccessPoint>> = BTreeMap::new();
    let mut reader = csv::Reader::from_path(path)?;
    for result in reader.deserialize() {
        let record: ScanRecord = result?;
        // hidden networks may report a nul-padded name
        let ssid = record
            .ssid
            .map(|x| x.replace('\0', ""))
            .unwrap_or_default();
        grouped.entry(record.scan).or_default().push(AccessPoint::new(
            record.bssid.to_string(),
            ssid,
            record.rssi,
        ));
    }
    Ok(grouped.into_values().collect())
}

#[async_trait]
impl RadioSource for ReplayRadio {
    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn permission_granted(&self) -> bool {
        self.permission
    }

    async fn scan(&self) -> Result<Vec<AccessPoint>> {
        if !self.enabled {
            return Err(ScanError::RadioDisabled);
        }
        if self.scans.is_empty() {
            return Ok(Vec::new());
        }
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.scans.len();
        Ok(self.scans[i].clone())
    }
}

/// Plays back recorded fixes in order, wrapping around at the end.
pub struct ReplayPosition {
    fixes: Vec<Option<Coordinate>>,
    next: AtomicUsize,
    enabled: bool,
    permission: bool,
}

impl ReplayPosition {
    pub fn new(fixes: Vec<Option<Coordinate>>) -> Self {
        Self {
            fixes,
            next: AtomicUsize::new(0),
            enabled: true,
            permission: true,
        }
    }

    pub fn load(config: &PositionConfig) -> anyhow::Result<Self> {
        let fixes = load_fixes(&config.fixes)
            .with_context(|| format!("Failed to load fixes from {}", config.fixes.display()))?;
        Ok(Self {
            enabled: config.enabled,
            permission: config.permission,
            ..Self::new(fixes)
        })
    }
}

fn load_fixes(path: &Path) -> anyhow::Result<Vec<Option<Coordinate>>> {
    let mut output = Vec::new();
    let mut reader = csv::Reader::from_path(path)?;
    for result in reader.deserialize() {
        let record: FixRecord = result?;
        output.push(match (record.lat, record.lon) {
            (Some(lat), Some(lon)) => Some(Coordinate::new(lat, lon)),
            _ => None,
        });
    }
    Ok(output)
}

#[async_trait]
impl PositionSource for ReplayPosition {
    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn permission_granted(&self) -> bool {
        self.permission
    }

    async fn last_known(&self) -> Result<Option<Coordinate>> {
        if !self.enabled {
            return Err(ScanError::LocationDisabled);
        }
        if self.fixes.is_empty() {
            return Ok(None);
        }
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.fixes.len();
        Ok(self.fixes[i])
    }
}

#[cfg(test)]
mod tests {
    use std::{env, fs};

    use super::*;

    #[tokio::test]
    async fn replays_scans_grouped_and_wrapping() {
        let path = env::temp_dir().join(format!("signalmap-scans-{}.csv", std::process::id()));
        fs::write(
            &path,
            "scan,bssid,ssid,rssi\n\
             1,aa:bb:cc:dd:ee:01,home,-40\n\
             1,aa:bb:cc:dd:ee:02,,-70\n\
             2,aa:bb:cc:dd:ee:01,home,-44\n",
        )
        .unwrap();
        let radio = ReplayRadio::load(&RadioConfig {
            scans: path.clone(),
            enabled: true,
            permission: true,
        })
        .unwrap();
        fs::remove_file(&path).unwrap();

        let first = radio.scan().await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0], AccessPoint::new("AA:BB:CC:DD:EE:01", "home", -40));
        assert_eq!(first[1].display(), "AA:BB:CC:DD:EE:02");
        assert_eq!(radio.scan().await.unwrap()[0].signal_strength, -44);
        assert_eq!(radio.scan().await.unwrap(), first);
    }

    #[tokio::test]
    async fn replays_missing_fixes() {
        let path = env::temp_dir().join(format!("signalmap-fixes-{}.csv", std::process::id()));
        fs::write(&path, "lat,lon\n40.7128,-74.0060\n,\n").unwrap();
        let position = ReplayPosition::load(&PositionConfig {
            fixes: path.clone(),
            enabled: true,
            permission: true,
        })
        .unwrap();
        fs::remove_file(&path).unwrap();

        assert_eq!(
            position.last_known().await.unwrap(),
            Some(Coordinate::new(40.7128, -74.0060))
        );
        assert_eq!(position.last_known().await.unwrap(), None);
    }

    #[test]
    fn radio_reason_wins_over_location() {
        let mut radio = ReplayRadio::new(Vec::new());
        let mut position = ReplayPosition::new(Vec::new());
        radio.enabled = false;
        position.enabled = false;
        assert!(matches!(
            check_preconditions(&radio, &position),
            Err(ScanError::RadioDisabled)
        ));

        radio.enabled = true;
        assert!(matches!(
            check_preconditions(&radio, &position),
            Err(ScanError::LocationDisabled)
        ));

        position.enabled = true;
        position.permission = false;
        assert!(matches!(
            check_preconditions(&radio, &position),
            Err(ScanError::PermissionDenied)
        ));

        position.permission = true;
        assert!(check_preconditions(&radio, &position).is_ok());
    }
}
