pub mod gpx;
pub mod json;
pub mod kml;
pub mod kmz;

use routegpx::Conversion;
use std::error::Error;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

pub const GPX_FILE_NAME: &str = "route.gpx";

/// Writes `contents` to `dir/file_name` through a temporary file in `dir`, so
/// the target either holds the whole document or is left untouched.
pub fn write_output(
    dir: &Path,
    file_name: &str,
    contents: &[u8],
) -> Result<PathBuf, Box<dyn Error>> {
    fs::create_dir_all(dir)?;
    let path = dir.join(file_name);

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(&path)?;

    debug!(path = %path.display(), bytes = contents.len(), "wrote output");
    Ok(path)
}

pub fn report(conversion: &Conversion, path: &Path) {
    println!(
        "Wrote {} waypoints to {}",
        conversion.waypoints.len(),
        path.display()
    );
    if conversion.skipped > 0 {
        println!("Skipped {} malformed records", conversion.skipped);
    }
}
