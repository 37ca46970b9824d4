//! Per-location, per-access-point statistics over everything stored.

use std::{collections::HashMap, fmt};

use serde::Serialize;

use crate::{
    db::RecordStore,
    error::Result,
    model::{Locality, Observation},
};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessPointSummary {
    pub access_point_id: String,
    /// First stored network name, or the identifier when none was recorded.
    pub display_name: String,
    pub samples: usize,
    pub mean: f64,
    pub min: i32,
    pub max: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationSummary {
    pub location_key: String,
    pub label: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub access_points: Vec<AccessPointSummary>,
}

/// Reads every stored location and summarises it. Locations come back in the
/// store's order, access points in the order they were first seen there.
pub async fn summarize(store: &dyn RecordStore) -> Result<Vec<LocationSummary>> {
    let mut output = Vec::new();
    for key in store.distinct_locations().await? {
        let records = store.by_location(&key).await?;
        output.push(summarize_location(key, &records));
    }
    Ok(output)
}

struct Group<'a> {
    id: &'a str,
    name: Option<&'a str>,
    values: Vec<i32>,
}

pub fn summarize_location(location_key: String, records: &[Observation]) -> LocationSummary {
    let mut groups: Vec<Group> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();
    for record in records {
        let i = *index
            .entry(record.access_point_id.as_str())
            .or_insert_with(|| {
                groups.push(Group {
                    id: &record.access_point_id,
                    name: None,
                    values: Vec::new(),
                });
                groups.len() - 1
            });
        let group = &mut groups[i];
        if group.name.is_none() {
            group.name = record.display_name.as_deref().filter(|x| !x.is_empty());
        }
        group.values.push(record.signal_strength);
    }

    let access_points = groups
        .into_iter()
        .filter_map(|group| {
            let min = *group.values.iter().min()?;
            let max = *group.values.iter().max()?;
            let sum: i64 = group.values.iter().map(|&x| i64::from(x)).sum();
            Some(AccessPointSummary {
                access_point_id: group.id.to_owned(),
                display_name: group.name.unwrap_or(group.id).to_owned(),
                samples: group.values.len(),
                mean: sum as f64 / group.values.len() as f64,
                min,
                max,
            })
        })
        .collect();

    let locality = Locality::from_key(&location_key);
    LocationSummary {
        label: records.iter().find_map(|x| x.location_label.clone()),
        latitude: locality.map(|x| x.latitude()),
        longitude: locality.map(|x| x.longitude()),
        location_key,
        access_points,
    }
}

/// Text rendering of a whole summary.
pub struct Report<'a>(pub &'a [LocationSummary]);

impl fmt::Display for Report<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return writeln!(f, "No data available");
        }
        for location in self.0 {
            write!(f, "{location}")?;
        }
        Ok(())
    }
}

impl fmt::Display for LocationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Location: ")?;
        if let Some(label) = &self.label {
            write!(f, "{label} ")?;
        }
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => writeln!(f, "(Lat: {lat:.3}, Lon: {lon:.3})")?,
            _ => writeln!(f, "({})", self.location_key)?,
        }
        if self.access_points.is_empty() {
            writeln!(f, "  (no records)")?;
        }
        for ap in &self.access_points {
            writeln!(f, "  AP: {} ({}):", ap.display_name, ap.access_point_id)?;
            writeln!(f, "    Samples: {}", ap.samples)?;
            writeln!(f, "    Average RSSI: {:.1} dBm", ap.mean)?;
            writeln!(f, "    Range: {} to {} dBm", ap.min, ap.max)?;
        }
        Ok(())
    }
}
