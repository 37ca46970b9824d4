//! Scriptable collaborators shared by the unit tests.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;

use crate::{
    db::{MemoryStore, RecordStore},
    error::{Result, ScanError},
    model::{AccessPoint, Coordinate, Observation},
    source::{PositionSource, RadioSource},
};

pub struct FakeRadio {
    scripted: Mutex<VecDeque<Vec<AccessPoint>>>,
    fallback: Vec<AccessPoint>,
    enabled: AtomicBool,
    pub scans: AtomicUsize,
}

impl FakeRadio {
    /// Returns `scripted` scans in order, then `fallback` forever.
    pub fn new(scripted: Vec<Vec<AccessPoint>>, fallback: Vec<AccessPoint>) -> Self {
        Self {
            scripted: Mutex::new(scripted.into()),
            fallback,
            enabled: AtomicBool::new(true),
            scans: AtomicUsize::new(0),
        }
    }

    pub fn steady(fallback: Vec<AccessPoint>) -> Self {
        Self::new(Vec::new(), fallback)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }
}

#[async_trait]
impl RadioSource for FakeRadio {
    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    async fn scan(&self) -> Result<Vec<AccessPoint>> {
        if !self.is_enabled() {
            return Err(ScanError::RadioDisabled);
        }
        self.scans.fetch_add(1, Ordering::SeqCst);
        let next = self.scripted.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| self.fallback.clone()))
    }
}

pub struct FakePosition {
    fix: Mutex<Option<Coordinate>>,
    enabled: AtomicBool,
}

impl FakePosition {
    pub fn at(latitude: f64, longitude: f64) -> Self {
        Self {
            fix: Mutex::new(Some(Coordinate::new(latitude, longitude))),
            enabled: AtomicBool::new(true),
        }
    }

    pub fn set(&self, fix: Option<Coordinate>) {
        *self.fix.lock().unwrap() = fix;
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }
}

#[async_trait]
impl PositionSource for FakePosition {
    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    async fn last_known(&self) -> Result<Option<Coordinate>> {
        Ok(*self.fix.lock().unwrap())
    }
}

/// Refuses averaged records (no display name) for one access point.
pub struct FlakyStore {
    pub inner: MemoryStore,
    pub reject: String,
}

#[async_trait]
impl RecordStore for FlakyStore {
    async fn insert(&self, observation: &Observation) -> Result<()> {
        if observation.access_point_id == self.reject && observation.display_name.is_none() {
            return Err(sqlx::Error::PoolClosed.into());
        }
        self.inner.insert(observation).await
    }

    async fn distinct_locations(&self) -> Result<Vec<String>> {
        self.inner.distinct_locations().await
    }

    async fn by_location(&self, location_key: &str) -> Result<Vec<Observation>> {
        self.inner.by_location(location_key).await
    }

    async fn clear_all(&self) -> Result<u64> {
        self.inner.clear_all().await
    }

    async fn all(&self) -> Result<Vec<Observation>> {
        self.inner.all().await
    }
}

pub fn ap(id: &str, signal_strength: i32) -> AccessPoint {
    AccessPoint::new(id, format!("net-{id}"), signal_strength)
}
