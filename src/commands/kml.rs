use crate::ConvertArgs;
use crate::commands::{GPX_FILE_NAME, report, write_output};
use rand::SeedableRng;
use rand::rngs::StdRng;
use routegpx::gpxxml::{GpxLayout, write_gpx};
use routegpx::{FirstPoint, RecordPolicy, kml, synthesize_times};
use std::error::Error;
use std::fs;
use time::OffsetDateTime;
use tracing::info;

pub fn kml_command(
    args: &ConvertArgs,
    start_time: Option<OffsetDateTime>,
    seed: Option<u64>,
    stamp_first_point: bool,
) -> Result<(), Box<dyn Error>> {
    let input = fs::read(&args.input)?;
    let mut conversion = kml::read_coordinates(&input, args.policy(RecordPolicy::Skip))?;

    let start = start_time.unwrap_or_else(OffsetDateTime::now_utc);
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let first = if stamp_first_point {
        FirstPoint::StartTime
    } else {
        FirstPoint::Untimed
    };
    info!(%start, ?seed, "synthesizing times");
    synthesize_times(&mut conversion.waypoints, start, &mut rng, first)?;

    let mut gpx = Vec::new();
    write_gpx(&conversion.waypoints, &GpxLayout::coordinates(), &mut gpx)?;

    let path = write_output(&args.output_dir, args.output_file(GPX_FILE_NAME), &gpx)?;
    report(&conversion, &path);
    Ok(())
}
