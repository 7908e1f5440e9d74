use crate::models::{BoundingBox, Season};
use chrono::{Datelike, NaiveDate};
use geo::{point, HaversineDistance};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum RegionError {
    #[error("Unknown region: {0}")]
    UnknownRegion(String),

    #[error("Invalid date: {0}")]
    InvalidDate(String),

    #[error("metres per polygon must be positive")]
    InvalidPatchSize,
}

/// Regions the crop-mask models are trained for
const NAMED_REGIONS: &[(&str, BoundingBox)] = &[
    ("Kenya", BoundingBox { min_lat: -5.202, max_lat: 6.002, min_lon: 33.501, max_lon: 42.283 }),
    (
        "Busia",
        BoundingBox {
            min_lat: -0.04119872691853491,
            max_lat: 0.7779454563313616,
            min_lon: 33.88389587402344,
            max_lon: 34.44007873535156,
        },
    ),
    ("NorthMalawi", BoundingBox { min_lat: -14.636, max_lat: -9.231, min_lon: 32.688, max_lon: 35.772 }),
    ("SouthMalawi", BoundingBox { min_lat: -17.07, max_lat: -14.636, min_lon: 34.211, max_lon: 35.772 }),
    ("Rwanda", BoundingBox { min_lat: -2.854, max_lat: -1.034, min_lon: 28.841, max_lon: 30.909 }),
    ("Togo", BoundingBox { min_lat: 6.08940429687, max_lat: 11.115625, min_lon: -0.1501, max_lon: 1.7779296875 }),
];

/// Look up a named region, case-insensitively
pub fn named_region(name: &str) -> Result<BoundingBox, RegionError> {
    NAMED_REGIONS
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, bbox)| *bbox)
        .ok_or_else(|| RegionError::UnknownRegion(name.to_string()))
}

pub fn region_names() -> Vec<&'static str> {
    NAMED_REGIONS.iter().map(|(n, _)| *n).collect()
}

/// Haversine distance between two points in metres
#[inline]
pub fn distance_metres(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    point!(x: lon1, y: lat1).haversine_distance(&point!(x: lon2, y: lat2))
}

/// Split a region into a grid of patches no larger than `metres_per_patch` per side
///
/// Side lengths are measured along the southern and western edges; each axis
/// gets `floor(length / metres_per_patch)` cells, and at least one.
pub fn split_into_patches(bbox: &BoundingBox, metres_per_patch: u32) -> Result<Vec<BoundingBox>, RegionError> {
    if metres_per_patch == 0 {
        return Err(RegionError::InvalidPatchSize);
    }

    let width = distance_metres(bbox.min_lat, bbox.min_lon, bbox.min_lat, bbox.max_lon);
    let height = distance_metres(bbox.min_lat, bbox.min_lon, bbox.max_lat, bbox.min_lon);

    let cols = ((width / metres_per_patch as f64).floor() as usize).max(1);
    let rows = ((height / metres_per_patch as f64).floor() as usize).max(1);

    let lat_step = (bbox.max_lat - bbox.min_lat) / rows as f64;
    let lon_step = (bbox.max_lon - bbox.min_lon) / cols as f64;

    // the last row and column snap to the region edge to avoid float drift
    let edge = |min: f64, max: f64, step: f64, i: usize, n: usize| {
        if i + 1 == n {
            max
        } else {
            min + step * (i + 1) as f64
        }
    };

    let mut patches = Vec::with_capacity(rows * cols);
    for row in 0..rows {
        for col in 0..cols {
            patches.push(BoundingBox {
                min_lat: bbox.min_lat + lat_step * row as f64,
                max_lat: edge(bbox.min_lat, bbox.max_lat, lat_step, row, rows),
                min_lon: bbox.min_lon + lon_step * col as f64,
                max_lon: edge(bbox.min_lon, bbox.max_lon, lon_step, col, cols),
            });
        }
    }

    Ok(patches)
}

fn april_first(year: i32) -> Result<NaiveDate, RegionError> {
    NaiveDate::from_ymd_opt(year, 4, 1).ok_or_else(|| RegionError::InvalidDate(format!("{}-04-01", year)))
}

/// Start and end dates of the export window for a season, as seen from `today`
///
/// Seasons start on 1 April; 1 April itself still belongs to the previous season.
pub fn season_dates(season: Season, today: NaiveDate) -> Result<(NaiveDate, NaiveDate), RegionError> {
    let this_year_start = april_first(today.year())?;
    let season_year = if today > this_year_start {
        today.year()
    } else {
        today.year() - 1
    };

    match season {
        Season::InSeason => Ok((april_first(season_year)?, today)),
        Season::PostSeason => Ok((april_first(season_year - 1)?, april_first(season_year)?)),
    }
}

/// Identifiers of the export tasks for a region, one per patch
pub fn export_identifiers(
    region_name: &str,
    start: NaiveDate,
    end: NaiveDate,
    patch_count: Option<usize>,
) -> Vec<String> {
    let general = format!("{}_{}_{}", region_name, start, end);
    match patch_count {
        Some(count) => (0..count).map(|i| format!("{}_{}", i, general)).collect(),
        None => vec![general],
    }
}
