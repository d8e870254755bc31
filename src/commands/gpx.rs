use crate::ConvertArgs;
use crate::commands::{report, write_output};
use routegpx::{RecordPolicy, RouteInfo, gpxxml, pointlog};
use std::error::Error;
use std::fs;
use std::path::Path;
use time::OffsetDateTime;

pub const JSON_FILE_NAME: &str = "route.json";
pub const DESCRIPTION: &str = "Converted from GPX";

pub fn gpx_command(
    args: &ConvertArgs,
    name: Option<String>,
    start_time: Option<OffsetDateTime>,
) -> Result<(), Box<dyn Error>> {
    let input = fs::read(&args.input)?;
    let mut conversion = gpxxml::read_track_points(&input, args.policy(RecordPolicy::Skip))?;

    let file_name = args.output_file(JSON_FILE_NAME);
    let name = name.unwrap_or_else(|| {
        Path::new(file_name)
            .file_stem()
            .map_or_else(String::new, |stem| stem.to_string_lossy().into_owned())
    });
    conversion.route = RouteInfo {
        name: Some(name),
        description: Some(DESCRIPTION.to_string()),
    };

    let start = start_time.unwrap_or_else(OffsetDateTime::now_utc);
    let mut json = Vec::new();
    pointlog::write_route(&conversion.route, &conversion.waypoints, start, &mut json)?;

    let path = write_output(&args.output_dir, file_name, &json)?;
    report(&conversion, &path);
    Ok(())
}
