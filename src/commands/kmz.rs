use crate::ConvertArgs;
use crate::commands::{GPX_FILE_NAME, report, write_output};
use routegpx::gpxxml::{GpxLayout, write_gpx};
use routegpx::{RecordPolicy, kml, kmz};
use std::error::Error;
use std::fs::File;
use tracing::info;

pub fn kmz_command(args: &ConvertArgs, extract: bool) -> Result<(), Box<dyn Error>> {
    let entry = kmz::read_kml(File::open(&args.input)?)?;
    info!(entry = %entry.name, "found KML document");

    let conversion = kml::read_placemarks(&entry.contents, args.policy(RecordPolicy::Skip))?;

    let mut gpx = Vec::new();
    write_gpx(&conversion.waypoints, &GpxLayout::placemarks(), &mut gpx)?;

    if extract {
        kmz::extract_to(File::open(&args.input)?, &args.output_dir)?;
    }

    let path = write_output(&args.output_dir, args.output_file(GPX_FILE_NAME), &gpx)?;
    report(&conversion, &path);
    Ok(())
}
