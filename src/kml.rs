//! Readers for KML 2.2 documents.
//!
//! Only elements in the KML namespace are looked at; anything else in the
//! document (extensions, foreign markup) is ignored.

use crate::{Conversion, Error, RecordPolicy, Timestamp, Waypoint, parse_coordinate};
use quick_xml::NsReader;
use quick_xml::events::Event;
use quick_xml::name::{Namespace, ResolveResult};
use tracing::debug;

pub const KML_NAMESPACE: &[u8] = b"http://www.opengis.net/kml/2.2";

fn is_kml(ns: &ResolveResult) -> bool {
    matches!(ns, ResolveResult::Bound(Namespace(uri)) if *uri == KML_NAMESPACE)
}

/// Reads the next event and whether its element is in the KML namespace.
fn next_event<'b>(
    reader: &mut NsReader<&[u8]>,
    buf: &'b mut Vec<u8>,
) -> Result<(bool, Event<'b>), Error> {
    let position = reader.buffer_position();
    match reader.read_resolved_event_into(buf) {
        Ok((ns, event)) => Ok((is_kml(&ns), event)),
        Err(source) => Err(Error::XmlSyntax {
            position: position as u64,
            source,
        }),
    }
}

/// Parses one `lon,lat[,alt]` tuple. Every field must be a finite number.
fn parse_tuple(tuple: &str) -> Result<Waypoint, String> {
    let fields = tuple
        .split(',')
        .map(parse_coordinate)
        .collect::<Result<Vec<f64>, _>>()
        .map_err(|e| format!("{tuple:?}: {e}"))?;

    match fields.as_slice() {
        [lon, lat] => Ok(Waypoint::new(*lat, *lon, 0.0)),
        [lon, lat, ele, ..] => Ok(Waypoint::new(*lat, *lon, *ele)),
        _ => Err(format!("{tuple:?}: expected lon,lat[,alt]")),
    }
}

/// Reads every tuple of every `<coordinates>` element, in document order,
/// regardless of which placemark or geometry holds it.
pub fn read_coordinates(input: &[u8], policy: RecordPolicy) -> Result<Conversion, Error> {
    let mut reader = NsReader::from_reader(input);
    let mut buf = Vec::new();
    let mut conversion = Conversion::default();

    let mut in_coordinates = false;
    let mut coordinates_text = String::new();
    let mut tuple_index = 0;

    loop {
        let (ns, event) = next_event(&mut reader, &mut buf)?;

        match event {
            Event::Eof => break,

            Event::Start(ref e) if ns && e.local_name().as_ref() == b"coordinates" => {
                in_coordinates = true;
                coordinates_text.clear();
            }

            Event::End(ref e) if ns && e.local_name().as_ref() == b"coordinates" => {
                in_coordinates = false;
                for tuple in coordinates_text.split_whitespace() {
                    match parse_tuple(tuple) {
                        Ok(point) => conversion.waypoints.push(point),
                        Err(reason) => conversion.reject(policy, tuple_index, reason)?,
                    }
                    tuple_index += 1;
                }
            }

            Event::Text(ref e) if in_coordinates => {
                coordinates_text.push_str(&e.unescape()?);
            }

            Event::CData(ref e) if in_coordinates => {
                coordinates_text.push_str(&String::from_utf8_lossy(e));
            }

            _ => {}
        }

        buf.clear();
    }

    debug!(
        points = conversion.waypoints.len(),
        skipped = conversion.skipped,
        "read KML coordinates"
    );
    Ok(conversion)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Name,
    Coordinates,
    When,
}

/// Collected state of the `<Placemark>` being read.
#[derive(Debug, Default)]
struct PlacemarkScan {
    depth: usize,
    name: Option<String>,
    coordinates: Option<String>,
    when: Option<String>,
    capture: Option<(Field, usize)>,
}

impl PlacemarkScan {
    fn slot(&mut self, field: Field) -> &mut Option<String> {
        match field {
            Field::Name => &mut self.name,
            Field::Coordinates => &mut self.coordinates,
            Field::When => &mut self.when,
        }
    }

    /// Which field an element at `depth` fills, if it is the first of its kind.
    /// `<name>` counts only as a direct child; the others anywhere below.
    fn field_for(&mut self, local_name: &[u8], depth: usize) -> Option<Field> {
        let field = match local_name {
            b"name" if depth == self.depth + 1 => Field::Name,
            b"coordinates" => Field::Coordinates,
            b"when" => Field::When,
            _ => return None,
        };
        self.slot(field).is_none().then_some(field)
    }

    fn finish(self) -> Result<Waypoint, String> {
        let name = self.name.ok_or("placemark has no <name>")?;
        let coordinates = self.coordinates.ok_or("placemark has no <coordinates>")?;

        let compact: String = coordinates.chars().filter(|c| !c.is_whitespace()).collect();
        let fields: Vec<&str> = compact.split(',').collect();
        let number =
            |i: usize| parse_coordinate(fields[i]).map_err(|e| format!("{name:?}: coordinate {e}"));
        if fields.len() < 2 {
            return Err(format!("{name:?}: expected lon,lat[,alt], got {compact:?}"));
        }
        let lon = number(0)?;
        let lat = number(1)?;
        let ele = if fields.len() > 2 { number(2)? } else { 0.0 };

        let mut point = Waypoint::new(lat, lon, ele);
        point.time = self
            .when
            .map(|when| when.trim().to_string())
            .filter(|when| !when.is_empty())
            .map(Timestamp::Verbatim);
        point.name = Some(name);
        Ok(point)
    }
}

/// Reads one waypoint per `<Placemark>` that has both a `<name>` and a
/// `<coordinates>` element. A `<when>` anywhere inside the placemark is
/// copied verbatim as the waypoint's time.
///
/// The coordinate text has all whitespace removed before it is split on
/// commas, so only the first `lon,lat[,alt]` tuple of a geometry is used.
pub fn read_placemarks(input: &[u8], policy: RecordPolicy) -> Result<Conversion, Error> {
    let mut reader = NsReader::from_reader(input);
    let mut buf = Vec::new();
    let mut conversion = Conversion::default();

    let mut depth = 0;
    let mut placemark: Option<PlacemarkScan> = None;
    let mut placemark_index = 0;

    loop {
        let (ns, event) = next_event(&mut reader, &mut buf)?;

        match event {
            Event::Eof => break,

            Event::Start(ref e) => {
                depth += 1;
                let local_name = e.local_name();
                if let Some(scan) = placemark.as_mut() {
                    if ns && scan.capture.is_none() {
                        if let Some(field) = scan.field_for(local_name.as_ref(), depth) {
                            *scan.slot(field) = Some(String::new());
                            scan.capture = Some((field, depth));
                        }
                    }
                } else if ns && local_name.as_ref() == b"Placemark" {
                    placemark = Some(PlacemarkScan {
                        depth,
                        ..Default::default()
                    });
                }
            }

            Event::Empty(ref e) => {
                if let Some(scan) = placemark.as_mut() {
                    if ns && scan.capture.is_none() {
                        if let Some(field) = scan.field_for(e.local_name().as_ref(), depth + 1) {
                            *scan.slot(field) = Some(String::new());
                        }
                    }
                }
            }

            Event::End(_) => {
                let closes_placemark = match placemark.as_mut() {
                    Some(scan) if scan.capture.is_some_and(|(_, at)| at == depth) => {
                        scan.capture = None;
                        false
                    }
                    Some(scan) => scan.depth == depth,
                    None => false,
                };
                if let Some(scan) = placemark.take_if(|_| closes_placemark) {
                    match scan.finish() {
                        Ok(point) => conversion.waypoints.push(point),
                        Err(reason) => conversion.reject(policy, placemark_index, reason)?,
                    }
                    placemark_index += 1;
                }
                depth -= 1;
            }

            Event::Text(ref e) => {
                if let Some(scan) = placemark.as_mut() {
                    if let Some((field, _)) = scan.capture {
                        let text = e.unescape()?;
                        if let Some(slot) = scan.slot(field).as_mut() {
                            slot.push_str(&text);
                        }
                    }
                }
            }

            Event::CData(ref e) => {
                if let Some(scan) = placemark.as_mut() {
                    if let Some((field, _)) = scan.capture {
                        if let Some(slot) = scan.slot(field).as_mut() {
                            slot.push_str(&String::from_utf8_lossy(e));
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
        "read KML placemarks"
    );
    Ok(conversion)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kml(body: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<kml xmlns="http://www.opengis.net/kml/2.2" xmlns:gx="http://www.google.com/kml/ext/2.2">
  <Document>
{body}
  </Document>
</kml>"#
        )
    }

    #[test]
    fn test_read_coordinates_two_tuples() {
        let doc = kml(
            "<Placemark><LineString><coordinates>-122.1,37.4,10 -122.2,37.5,12</coordinates></LineString></Placemark>",
        );

        let conversion = read_coordinates(doc.as_bytes(), RecordPolicy::Skip).unwrap();
        assert_eq!(conversion.waypoints.len(), 2);
        assert_eq!(conversion.waypoints[0], Waypoint::new(37.4, -122.1, 10.0));
        assert_eq!(conversion.waypoints[1], Waypoint::new(37.5, -122.2, 12.0));
        assert_eq!(conversion.skipped, 0);
    }

    #[test]
    fn test_read_coordinates_across_elements_and_lines() {
        let doc = kml(
            r#"<Placemark><Point><coordinates>
                1.5,2.5
            </coordinates></Point></Placemark>
            <Folder><Placemark><LineString><coordinates>
                3,4,5
                6,7,8
            </coordinates></LineString></Placemark></Folder>"#,
        );

        let conversion = read_coordinates(doc.as_bytes(), RecordPolicy::Skip).unwrap();
        let lons: Vec<f64> = conversion.waypoints.iter().map(|p| p.lon).collect();
        assert_eq!(lons, vec![1.5, 3.0, 6.0]);
        assert_eq!(conversion.waypoints[0].ele, 0.0);
    }

    #[test]
    fn test_read_coordinates_skips_malformed_tuples() {
        let doc = kml(
            "<Placemark><LineString><coordinates>1,2,3 abc,2,3 1,xyz 5 1,2,high 7,8</coordinates></LineString></Placemark>",
        );

        let conversion = read_coordinates(doc.as_bytes(), RecordPolicy::Skip).unwrap();
        assert_eq!(conversion.waypoints.len(), 2);
        assert_eq!(conversion.waypoints[1], Waypoint::new(8.0, 7.0, 0.0));
        assert_eq!(conversion.skipped, 4);
    }

    #[test]
    fn test_read_coordinates_skips_non_finite_tuples() {
        let doc = kml(
            "<Placemark><LineString><coordinates>1,2 inf,2 NaN,2 3,infinity 3,4</coordinates></LineString></Placemark>",
        );

        let conversion = read_coordinates(doc.as_bytes(), RecordPolicy::Skip).unwrap();
        assert_eq!(
            conversion.waypoints,
            vec![Waypoint::new(2.0, 1.0, 0.0), Waypoint::new(4.0, 3.0, 0.0)]
        );
        assert_eq!(conversion.skipped, 3);
    }

    #[test]
    fn test_read_coordinates_fail_fast() {
        let doc = kml(
            "<Placemark><LineString><coordinates>1,2 abc,2</coordinates></LineString></Placemark>",
        );

        let err = read_coordinates(doc.as_bytes(), RecordPolicy::FailFast).unwrap_err();
        assert!(matches!(err, Error::MalformedRecord { index: 1, .. }));
    }

    #[test]
    fn test_read_coordinates_ignores_other_namespaces() {
        let doc = r#"<kml xmlns="http://earth.google.com/kml/2.0"><coordinates>1,2</coordinates></kml>"#;

        let conversion = read_coordinates(doc.as_bytes(), RecordPolicy::Skip).unwrap();
        assert!(conversion.waypoints.is_empty());
    }

    #[test]
    fn test_read_coordinates_prefixed_namespace_and_cdata() {
        let doc = r#"<k:kml xmlns:k="http://www.opengis.net/kml/2.2"><k:coordinates><![CDATA[1,2,3]]></k:coordinates></k:kml>"#;

        let conversion = read_coordinates(doc.as_bytes(), RecordPolicy::Skip).unwrap();
        assert_eq!(conversion.waypoints, vec![Waypoint::new(2.0, 1.0, 3.0)]);
    }

    #[test]
    fn test_read_coordinates_rejects_broken_xml() {
        let doc = "<kml xmlns=\"http://www.opengis.net/kml/2.2\"><coordinates>1,2</kml>";
        let err = read_coordinates(doc.as_bytes(), RecordPolicy::Skip).unwrap_err();
        assert!(matches!(err, Error::XmlSyntax { .. }));
    }

    #[test]
    fn test_read_placemarks_with_and_without_when() {
        let doc = kml(
            r#"<Placemark>
      <name>Checkpoint 1</name>
      <TimeStamp><when>2023-06-01T08:00:00Z</when></TimeStamp>
      <Point><coordinates>
        24.94, 60.17, 12
      </coordinates></Point>
    </Placemark>
    <Placemark>
      <name>Checkpoint 2</name>
      <Point><coordinates>24.95,60.18</coordinates></Point>
    </Placemark>"#,
        );

        let conversion = read_placemarks(doc.as_bytes(), RecordPolicy::Skip).unwrap();
        assert_eq!(conversion.waypoints.len(), 2);

        let first = &conversion.waypoints[0];
        assert_eq!(first.name.as_deref(), Some("Checkpoint 1"));
        assert_eq!((first.lon, first.lat, first.ele), (24.94, 60.17, 12.0));
        assert_eq!(
            first.time,
            Some(Timestamp::Verbatim("2023-06-01T08:00:00Z".to_string()))
        );

        let second = &conversion.waypoints[1];
        assert!(second.time.is_none());
        assert_eq!(second.ele, 0.0);
    }

    #[test]
    fn test_read_placemarks_skips_incomplete() {
        let doc = kml(
            r#"<Placemark><Point><coordinates>1,2</coordinates></Point></Placemark>
    <Placemark><name>No geometry</name></Placemark>
    <Placemark><name>Bad</name><Point><coordinates>east,2</coordinates></Point></Placemark>
    <Placemark><name>Short</name><Point><coordinates>5</coordinates></Point></Placemark>
    <Placemark><name>Good</name><Point><coordinates>3,4,5</coordinates></Point></Placemark>"#,
        );

        let conversion = read_placemarks(doc.as_bytes(), RecordPolicy::Skip).unwrap();
        assert_eq!(conversion.waypoints.len(), 1);
        assert_eq!(conversion.waypoints[0].name.as_deref(), Some("Good"));
        assert_eq!(conversion.skipped, 4);
    }

    #[test]
    fn test_read_placemarks_skips_non_finite_coordinates() {
        let doc = kml(
            r#"<Placemark><name>A</name><Point><coordinates>inf,2</coordinates></Point></Placemark>
    <Placemark><name>B</name><Point><coordinates>NaN,2</coordinates></Point></Placemark>
    <Placemark><name>C</name><Point><coordinates>1,2,-inf</coordinates></Point></Placemark>
    <Placemark><name>D</name><Point><coordinates>1,2</coordinates></Point></Placemark>"#,
        );

        let conversion = read_placemarks(doc.as_bytes(), RecordPolicy::Skip).unwrap();
        assert_eq!(conversion.waypoints.len(), 1);
        assert_eq!(conversion.waypoints[0].name.as_deref(), Some("D"));
        assert_eq!(conversion.skipped, 3);
    }

    #[test]
    fn test_read_placemarks_fail_fast_on_missing_name() {
        let doc = kml(
            r#"<Placemark><name>Ok</name><Point><coordinates>1,2</coordinates></Point></Placemark>
    <Placemark><Point><coordinates>1,2</coordinates></Point></Placemark>"#,
        );

        let err = read_placemarks(doc.as_bytes(), RecordPolicy::FailFast).unwrap_err();
        assert!(matches!(err, Error::MalformedRecord { index: 1, .. }));
        assert!(err.to_string().contains("<name>"));
    }

    #[test]
    fn test_read_placemarks_name_must_be_direct_child() {
        let doc = kml(
            r#"<Placemark><ExtendedData><Data name="x"><name>nested</name></Data></ExtendedData>
      <Point><coordinates>1,2</coordinates></Point></Placemark>"#,
        );

        let conversion = read_placemarks(doc.as_bytes(), RecordPolicy::Skip).unwrap();
        assert!(conversion.waypoints.is_empty());
        assert_eq!(conversion.skipped, 1);
    }

    #[test]
    fn test_read_placemarks_track_when_and_escaped_name() {
        let doc = kml(
            r#"<Placemark>
      <name><![CDATA[Café]]> &amp; bar</name>
      <gx:Track>
        <when>2023-06-01T08:00:00Z</when>
        <when>2023-06-01T08:05:00Z</when>
        <gx:coord>1 2 3</gx:coord>
      </gx:Track>
      <Point><coordinates>1,2,3</coordinates></Point>
    </Placemark>"#,
        );

        let conversion = read_placemarks(doc.as_bytes(), RecordPolicy::Skip).unwrap();
        let point = &conversion.waypoints[0];
        assert_eq!(point.name.as_deref(), Some("Café & bar"));
        assert_eq!(
            point.time,
            Some(Timestamp::Verbatim("2023-06-01T08:00:00Z".to_string()))
        );
    }

    #[test]
    fn test_read_placemarks_empty_elements() {
        let doc = kml(
            r#"<Placemark><name/><TimeStamp><when/></TimeStamp><Point><coordinates>1,2</coordinates></Point></Placemark>
    <Placemark><name>Empty</name><Point><coordinates/></Point></Placemark>"#,
        );

        let conversion = read_placemarks(doc.as_bytes(), RecordPolicy::Skip).unwrap();
        assert_eq!(conversion.waypoints.len(), 1);
        assert_eq!(conversion.waypoints[0].name.as_deref(), Some(""));
        assert!(conversion.waypoints[0].time.is_none());
        assert_eq!(conversion.skipped, 1);
    }
}
