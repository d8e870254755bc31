use crate::{
    Conversion, Error, RecordPolicy, RouteInfo, Timestamp, Waypoint, format_number,
    parse_coordinate,
};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::io::Write;
use time::OffsetDateTime;
use time::format_description::well_known::Iso8601;
use tracing::debug;

pub const CREATOR: &str = "Xcode";

/// Where a waypoint's `<name>` comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameRule {
    /// `Point 1`, `Point 2`, ... in output order.
    Sequential,
    /// The waypoint's own name, when it has one.
    FromPoint,
    Omit,
}

/// Whether a waypoint without a time still gets a `<time>` element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeRule {
    /// Always write `<time>`, empty when the waypoint has no time.
    Always,
    WhenPresent,
}

/// Field presence rules for [`write_gpx`].
#[derive(Debug, Clone, PartialEq)]
pub struct GpxLayout {
    pub names: NameRule,
    /// Write `<desc>` with speed and heading.
    pub description: bool,
    pub time: TimeRule,
    pub metadata: Option<RouteInfo>,
}

impl GpxLayout {
    /// JSON point logs: numbered names, speed/heading description.
    pub fn point_log() -> Self {
        GpxLayout {
            names: NameRule::Sequential,
            description: true,
            time: TimeRule::Always,
            metadata: None,
        }
    }

    /// Bare KML coordinates with synthesized times.
    pub fn coordinates() -> Self {
        GpxLayout {
            names: NameRule::Omit,
            description: false,
            time: TimeRule::WhenPresent,
            metadata: None,
        }
    }

    /// KML placemarks: their names, their times when they have one.
    pub fn placemarks() -> Self {
        GpxLayout {
            names: NameRule::FromPoint,
            description: false,
            time: TimeRule::WhenPresent,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, route: RouteInfo) -> Self {
        self.metadata = (!route.is_empty()).then_some(route);
        self
    }
}

fn describe(point: &Waypoint) -> Option<String> {
    let (speed, heading) = (point.speed?, point.heading?);
    Some(format!(
        "Speed: {} m/s, Heading: {} degrees",
        format_number(speed),
        format_number(heading)
    ))
}

fn write_text_element<W: Write>(
    writer: &mut Writer<W>,
    tag: &str,
    text: &str,
) -> Result<(), Error> {
    writer.write_event(Event::Start(BytesStart::new(tag)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(tag)))?;
    Ok(())
}

/// Writes a complete GPX 1.1 document with one `<wpt>` per point.
///
/// The body is a single line after the XML declaration.
pub fn write_gpx<W: Write>(points: &[Waypoint], layout: &GpxLayout, output: W) -> Result<(), Error> {
    let mut writer = Writer::new(output);

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    writer.get_mut().write_all(b"\n")?;
    writer.write_event(Event::Start(
        BytesStart::new("gpx").with_attributes([("version", "1.1"), ("creator", CREATOR)]),
    ))?;

    if let Some(route) = &layout.metadata {
        writer.write_event(Event::Start(BytesStart::new("metadata")))?;
        if let Some(name) = &route.name {
            write_text_element(&mut writer, "name", name)?;
        }
        if let Some(description) = &route.description {
            write_text_element(&mut writer, "desc", description)?;
        }
        writer.write_event(Event::End(BytesEnd::new("metadata")))?;
    }

    for (idx, point) in points.iter().enumerate() {
        let lat = format_number(point.lat);
        let lon = format_number(point.lon);
        writer.write_event(Event::Start(
            BytesStart::new("wpt").with_attributes([("lat", lat.as_str()), ("lon", lon.as_str())]),
        ))?;

        write_text_element(&mut writer, "ele", &format_number(point.ele))?;

        match (&point.time, layout.time) {
            (Some(time), _) => write_text_element(&mut writer, "time", &time.render()?)?,
            (None, TimeRule::Always) => {
                writer.write_event(Event::Empty(BytesStart::new("time")))?;
            }
            (None, TimeRule::WhenPresent) => {}
        }

        match layout.names {
            NameRule::Sequential => {
                write_text_element(&mut writer, "name", &format!("Point {}", idx + 1))?;
            }
            NameRule::FromPoint => {
                if let Some(name) = &point.name {
                    write_text_element(&mut writer, "name", name)?;
                }
            }
            NameRule::Omit => {}
        }

        if layout.description {
            if let Some(desc) = describe(point) {
                write_text_element(&mut writer, "desc", &desc)?;
            }
        }

        writer.write_event(Event::End(BytesEnd::new("wpt")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("gpx")))?;
    Ok(())
}

pub fn to_gpx_string(points: &[Waypoint], layout: &GpxLayout) -> Result<String, Error> {
    let mut output = Vec::new();
    write_gpx(points, layout, &mut output)?;
    // Every piece written above came from a &str.
    Ok(String::from_utf8_lossy(&output).into_owned())
}

/// Builds a waypoint from the `lat`/`lon` attributes of a `<trkpt>`.
fn track_point(e: &BytesStart) -> Result<Waypoint, String> {
    let mut lat = None;
    let mut lon = None;
    for attr in e.attributes().flatten() {
        let slot = match attr.key.as_ref() {
            b"lat" => &mut lat,
            b"lon" => &mut lon,
            _ => continue,
        };
        let text = std::str::from_utf8(&attr.value).map_err(|e| e.to_string())?;
        *slot = Some(parse_coordinate(text.trim())?);
    }
    match (lat, lon) {
        (Some(lat), Some(lon)) => Ok(Waypoint::new(lat, lon, 0.0)),
        _ => Err("trkpt needs both lat and lon".to_string()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrackField {
    Ele,
    Time,
}

/// Reads every `<trkpt>` of a GPX document, in document order.
///
/// `lat`/`lon` are required; a track point without them, or with a value
/// that is not a finite number, is handled per `policy`. `<ele>` and `<time>`
/// are taken when they parse and ignored otherwise.
pub fn read_track_points(input: &[u8], policy: RecordPolicy) -> Result<Conversion, Error> {
    let mut reader = Reader::from_reader(input);
    let mut buf = Vec::new();
    let mut conversion = Conversion::default();

    let mut current: Option<Result<Waypoint, String>> = None;
    let mut capture: Option<TrackField> = None;
    let mut text = String::new();
    let mut index = 0;

    loop {
        let event = match reader.read_event_into(&mut buf) {
            Err(source) => {
                return Err(Error::XmlSyntax {
                    position: reader.buffer_position() as u64,
                    source,
                });
            }
            Ok(event) => event,
        };

        match event {
            Event::Eof => break,

            Event::Start(ref e) if e.local_name().as_ref() == b"trkpt" => {
                current = Some(track_point(e));
            }

            Event::Empty(ref e) if e.local_name().as_ref() == b"trkpt" => {
                match track_point(e) {
                    Ok(point) => conversion.waypoints.push(point),
                    Err(reason) => conversion.reject(policy, index, reason)?,
                }
                index += 1;
            }

            Event::Start(ref e) if current.is_some() => {
                capture = match e.local_name().as_ref() {
                    b"ele" => Some(TrackField::Ele),
                    b"time" => Some(TrackField::Time),
                    _ => None,
                };
                text.clear();
            }

            Event::Text(ref e) if capture.is_some() => {
                text.push_str(&e.unescape()?);
            }

            Event::End(ref e) if e.local_name().as_ref() == b"trkpt" => {
                match current.take() {
                    Some(Ok(point)) => conversion.waypoints.push(point),
                    Some(Err(reason)) => conversion.reject(policy, index, reason)?,
                    None => {}
                }
                index += 1;
            }

            Event::End(_) => {
                if let (Some(field), Some(Ok(point))) = (capture.take(), current.as_mut()) {
                    let value = text.trim();
                    match field {
                        TrackField::Ele => {
                            if let Ok(ele) = parse_coordinate(value) {
                                point.ele = ele;
                            }
                        }
                        TrackField::Time => {
                            if let Ok(time) = OffsetDateTime::parse(value, &Iso8601::DEFAULT) {
                                point.time = Some(Timestamp::At(time));
                            }
                        }
                    }
                }
            }

            _ => {}
        }

        buf.clear();
    }

    debug!(
        points = conversion.waypoints.len(),
        skipped = conversion.skipped,
        "read GPX track points"
    );
    Ok(conversion)
}
