//! Converts route data into GPX 1.1 waypoint files.
//!
//! Three readers produce [`Waypoint`] lists: [`pointlog`] for JSON point logs,
//! [`kml`] for KML documents and [`kmz`] for zipped KML archives. All of them
//! feed the single GPX writer in [`gpxxml`].

pub mod gpxxml;
pub mod kml;
pub mod kmz;
pub mod pointlog;

use std::borrow::Cow;

use rand::Rng;
use thiserror::Error;
use time::macros::{datetime, format_description};
use time::{Duration, OffsetDateTime};
use tracing::{debug, warn};

/// Zero time of the timestamps written by the logging app.
pub const APPLE_EPOCH: OffsetDateTime = datetime!(2001-01-01 0:00 UTC);

/// Slowest and fastest travel speed, in m/s, assumed when inventing times.
pub const SYNTHETIC_SPEED_RANGE: (f64, f64) = (1.0, 4.0);

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed XML at position {position}: {source}")]
    XmlSyntax {
        position: u64,
        source: quick_xml::Error,
    },
    #[error("XML failed: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("reading JSON failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("reading KMZ archive failed: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("record #{index} is malformed: {reason}")]
    MalformedRecord { index: usize, reason: String },
    #[error("no .kml document found in archive")]
    KmlNotFound,
    #[error("archive holds several .kml documents and none is doc.kml: {}", .0.join(", "))]
    AmbiguousKml(Vec<String>),
    #[error("archive entry {0:?} would be extracted outside the output directory")]
    UnsafeArchivePath(String),
    #[error("time cannot be represented: {0}")]
    TimeOutOfRange(String),
}

/// What to do with a single record that cannot be turned into a waypoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordPolicy {
    /// Drop the record, count it and keep going.
    Skip,
    /// Abort the whole conversion.
    FailFast,
}

/// Time of a waypoint.
#[derive(Debug, Clone, PartialEq)]
pub enum Timestamp {
    At(OffsetDateTime),
    /// Text taken from the source document and written back untouched.
    Verbatim(String),
}

impl Timestamp {
    pub fn render(&self) -> Result<Cow<'_, str>, Error> {
        match self {
            Timestamp::At(time) => format_time(*time).map(Cow::Owned),
            Timestamp::Verbatim(text) => Ok(Cow::Borrowed(text)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Waypoint {
    pub lat: f64,
    pub lon: f64,
    pub ele: f64,
    pub time: Option<Timestamp>,
    pub name: Option<String>,
    /// Meters per second.
    pub speed: Option<f64>,
    /// Degrees.
    pub heading: Option<f64>,
}

impl Waypoint {
    pub fn new(lat: f64, lon: f64, ele: f64) -> Self {
        Waypoint {
            lat,
            lon,
            ele,
            ..Default::default()
        }
    }
}

/// Route level fields some inputs carry next to their points.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RouteInfo {
    pub name: Option<String>,
    pub description: Option<String>,
}

impl RouteInfo {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.description.is_none()
    }
}

/// Result of reading one input document.
#[derive(Debug, Clone, Default)]
pub struct Conversion {
    pub waypoints: Vec<Waypoint>,
    /// Records dropped under [`RecordPolicy::Skip`].
    pub skipped: usize,
    pub route: RouteInfo,
}

impl Conversion {
    pub(crate) fn reject(
        &mut self,
        policy: RecordPolicy,
        index: usize,
        reason: impl Into<String>,
    ) -> Result<(), Error> {
        let reason = reason.into();
        match policy {
            RecordPolicy::Skip => {
                warn!(index, %reason, "skipping malformed record");
                self.skipped += 1;
                Ok(())
            }
            RecordPolicy::FailFast => Err(Error::MalformedRecord { index, reason }),
        }
    }
}

/// Converts seconds since [`APPLE_EPOCH`] into an absolute time.
pub fn from_apple_seconds(seconds: f64) -> Result<OffsetDateTime, Error> {
    Duration::checked_seconds_f64(seconds)
        .and_then(|offset| APPLE_EPOCH.checked_add(offset))
        .ok_or_else(|| Error::TimeOutOfRange(format!("{seconds} seconds after 2001-01-01")))
}

/// Formats a time as `YYYY-MM-DDTHH:MM:SSZ`. Sub-second digits are dropped.
pub fn format_time(time: OffsetDateTime) -> Result<String, Error> {
    time.format(format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second]Z"
    ))
    .map_err(|e| Error::TimeOutOfRange(e.to_string()))
}

/// Shortest text that reads back as the same `f64`, always with a fraction
/// or exponent (`10.0`, `-122.1`).
pub fn format_number(value: f64) -> String {
    format!("{value:?}")
}

/// Parses a coordinate field. `inf`, `NaN` and friends are refused along with
/// anything else that is not a finite number.
pub fn parse_coordinate(field: &str) -> Result<f64, String> {
    match field.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        Ok(value) => Err(format!("{field:?} is not a finite number ({value})")),
        Err(e) => Err(format!("{field:?}: {e}")),
    }
}

/// Calculates the great circle distance in meters between two GPS coordinates
/// using the haversine formula.
///
/// References:
/// - R.W. Sinnott, "Virtues of the Haversine", Sky and Telescope, vol. 68, no. 2, 1984, p. 159
/// - https://en.wikipedia.org/wiki/Haversine_formula
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const EARTH_RADIUS: f64 = 6371000.0; // Mean Earth radius in meters

    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    // a = sin²(Δφ/2) + cos φ1 ⋅ cos φ2 ⋅ sin²(Δλ/2)
    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);

    // c = 2 ⋅ atan2(√a, √(1−a))
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS * c
}

/// How [`synthesize_times`] treats the first point of a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FirstPoint {
    /// Leave the first point without a time.
    #[default]
    Untimed,
    /// Give the first point the start time.
    StartTime,
}

/// Invents times for a route that has none.
///
/// Walking the points in order, every leg is assumed to be travelled at a
/// speed drawn uniformly from [`SYNTHETIC_SPEED_RANGE`]. Each point after the
/// first gets the previous point's time plus the leg's travel time; the first
/// leg starts at `start`. Existing times are overwritten.
///
/// The running time keeps sub-second precision between legs; only the
/// written `<time>` text is truncated to whole seconds.
pub fn synthesize_times<R: Rng + ?Sized>(
    points: &mut [Waypoint],
    start: OffsetDateTime,
    rng: &mut R,
    first: FirstPoint,
) -> Result<(), Error> {
    let Some(head) = points.first_mut() else {
        return Ok(());
    };
    if first == FirstPoint::StartTime {
        head.time = Some(Timestamp::At(start));
    }

    let (slowest, fastest) = SYNTHETIC_SPEED_RANGE;
    let mut reference = start;
    for i in 1..points.len() {
        let (prev, next) = (&points[i - 1], &points[i]);
        let distance = haversine_distance(prev.lat, prev.lon, next.lat, next.lon);
        let speed = rng.gen_range(slowest..=fastest);
        let elapsed = Duration::checked_seconds_f64(distance / speed).ok_or_else(|| {
            Error::TimeOutOfRange(format!("{distance} m at {speed} m/s"))
        })?;
        reference = reference
            .checked_add(elapsed)
            .ok_or_else(|| Error::TimeOutOfRange(format!("{reference} + {elapsed}")))?;
        debug!(index = i, distance, speed, "synthesized leg");
        points[i].time = Some(Timestamp::At(reference));
    }

    Ok(())
}
