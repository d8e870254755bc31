use crate::ConvertArgs;
use crate::commands::{GPX_FILE_NAME, report, write_output};
use routegpx::gpxxml::{GpxLayout, write_gpx};
use routegpx::{RecordPolicy, pointlog};
use std::error::Error;
use std::fs;

pub fn json_command(args: &ConvertArgs, metadata: bool) -> Result<(), Box<dyn Error>> {
    let input = fs::read(&args.input)?;
    let conversion = pointlog::parse_route(&input, args.policy(RecordPolicy::FailFast))?;

    let mut layout = GpxLayout::point_log();
    if metadata {
        layout = layout.with_metadata(conversion.route.clone());
    }

    let mut gpx = Vec::new();
    write_gpx(&conversion.waypoints, &layout, &mut gpx)?;

    let path = write_output(&args.output_dir, args.output_file(GPX_FILE_NAME), &gpx)?;
    report(&conversion, &path);
    Ok(())
}
