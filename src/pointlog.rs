//! Reader for the JSON route logs written by the bike computer app.
//!
//! A log holds a `points` array. Each point carries `latitude`, `longitude`,
//! `altitude`, `speed`, `heading` and a `timestamp` counted in seconds from
//! 2001-01-01T00:00:00Z. The route's `name` and `description` are kept when
//! present; any other field is ignored.
//!
//! [`write_route`] produces the same format, so tracks recorded elsewhere can
//! be loaded into the app.

use crate::{
    APPLE_EPOCH, Conversion, Error, RecordPolicy, RouteInfo, Timestamp, Waypoint,
    from_apple_seconds,
};
use serde::{Deserialize, Serialize};
use std::io::Write;
use time::OffsetDateTime;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct RouteLog {
    name: Option<String>,
    description: Option<String>,
    points: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize, Serialize)]
struct LoggedPoint {
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    altitude: f64,
    timestamp: f64,
    speed: Option<f64>,
    heading: Option<f64>,
}

impl LoggedPoint {
    fn is_finite(&self) -> bool {
        [self.latitude, self.longitude, self.altitude, self.timestamp]
            .into_iter()
            .chain(self.speed)
            .chain(self.heading)
            .all(f64::is_finite)
    }
}

/// Reads a route log and returns its points sorted by timestamp.
///
/// Points are checked one by one; a point that lacks `latitude`, `longitude`
/// or `timestamp`, or has a non-numeric value in any field, is handled per
/// `policy`. The `index` of a rejected point is its position in the file.
pub fn parse_route(input: &[u8], policy: RecordPolicy) -> Result<Conversion, Error> {
    let log: RouteLog = serde_json::from_slice(input)?;
    let mut conversion = Conversion {
        route: RouteInfo {
            name: log.name,
            description: log.description,
        },
        ..Default::default()
    };

    let mut logged = Vec::with_capacity(log.points.len());
    for (index, value) in log.points.into_iter().enumerate() {
        match serde_json::from_value::<LoggedPoint>(value) {
            Ok(point) if point.is_finite() => logged.push((index, point)),
            Ok(_) => conversion.reject(policy, index, "non-finite number")?,
            Err(e) => conversion.reject(policy, index, e.to_string())?,
        }
    }

    // Stable, so equal timestamps keep file order.
    logged.sort_by(|(_, a), (_, b)| a.timestamp.total_cmp(&b.timestamp));

    for (index, point) in logged {
        let time = match from_apple_seconds(point.timestamp) {
            Ok(time) => time,
            Err(e) => {
                conversion.reject(policy, index, e.to_string())?;
                continue;
            }
        };
        conversion.waypoints.push(Waypoint {
            lat: point.latitude,
            lon: point.longitude,
            ele: point.altitude,
            time: Some(Timestamp::At(time)),
            name: None,
            speed: point.speed,
            heading: point.heading,
        });
    }

    debug!(
        points = conversion.waypoints.len(),
        skipped = conversion.skipped,
        "read route log"
    );
    Ok(conversion)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RouteRecord<'a> {
    name: Option<&'a str>,
    description: Option<&'a str>,
    start_date: f64,
    points: Vec<LoggedPoint>,
}

fn apple_seconds(time: OffsetDateTime) -> f64 {
    (time - APPLE_EPOCH).as_seconds_f64()
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

/// Writes `points` as a pretty-printed route log.
///
/// Coordinates are rounded to 5 decimals and altitude to 1, the precision
/// the app records with. Speed and heading are written as 0. A point without
/// a time gets `start`, which is also the route's `startDate`. Only
/// [`Timestamp::At`] times are kept; verbatim text is replaced by `start`.
pub fn write_route<W: Write>(
    route: &RouteInfo,
    points: &[Waypoint],
    start: OffsetDateTime,
    output: W,
) -> Result<(), Error> {
    let start_date = apple_seconds(start);
    let record = RouteRecord {
        name: route.name.as_deref(),
        description: route.description.as_deref(),
        start_date,
        points: points
            .iter()
            .map(|point| LoggedPoint {
                latitude: round_to(point.lat, 5),
                longitude: round_to(point.lon, 5),
                altitude: round_to(point.ele, 1),
                timestamp: match point.time {
                    Some(Timestamp::At(time)) => apple_seconds(time),
                    _ => start_date,
                },
                speed: Some(0.0),
                heading: Some(0.0),
            })
            .collect(),
    };

    serde_json::to_writer_pretty(output, &record)?;
    Ok(())
}
