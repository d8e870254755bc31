//! KMZ archives: zip files carrying a KML document and its resources.

use crate::Error;
use std::fs::{self, File};
use std::io::{self, Read, Seek};
use std::path::Path;
use tracing::{debug, info};
use zip::ZipArchive;

/// Conventional name of the main document at the root of a KMZ archive.
pub const MAIN_DOCUMENT: &str = "doc.kml";

/// A KML document read out of an archive.
#[derive(Debug, Clone)]
pub struct KmlEntry {
    pub name: String,
    pub contents: Vec<u8>,
}

fn is_kml(name: &str) -> bool {
    !name.ends_with('/')
        && Path::new(name)
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("kml"))
}

/// Picks the KML document among archive entry names.
///
/// A root-level `doc.kml` wins. Otherwise exactly one `.kml` entry must
/// exist: none is [`Error::KmlNotFound`], several is [`Error::AmbiguousKml`].
pub fn find_kml_entry<'a, I>(names: I) -> Result<String, Error>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut candidates: Vec<&str> = names.into_iter().filter(|name| is_kml(name)).collect();

    if candidates.contains(&MAIN_DOCUMENT) {
        return Ok(MAIN_DOCUMENT.to_string());
    }
    match candidates.len() {
        0 => Err(Error::KmlNotFound),
        1 => Ok(candidates[0].to_string()),
        _ => {
            candidates.sort_unstable();
            Err(Error::AmbiguousKml(
                candidates.into_iter().map(str::to_string).collect(),
            ))
        }
    }
}

/// Reads the KML document of a KMZ archive without touching the filesystem.
pub fn read_kml<R: Read + Seek>(reader: R) -> Result<KmlEntry, Error> {
    let mut archive = ZipArchive::new(reader)?;
    let name = find_kml_entry(archive.file_names())?;

    let mut file = archive.by_name(&name)?;
    let mut contents = Vec::with_capacity(file.size() as usize);
    file.read_to_end(&mut contents)?;

    debug!(entry = %name, bytes = contents.len(), "read KML from archive");
    Ok(KmlEntry { name, contents })
}

/// Unpacks every entry of a KMZ archive below `dir`, creating it if needed.
/// Returns the number of files written.
///
/// Every entry path is checked first: if any is absolute or has a `..`
/// component, the archive is refused and nothing is written.
pub fn extract_to<R: Read + Seek>(reader: R, dir: &Path) -> Result<usize, Error> {
    let mut archive = ZipArchive::new(reader)?;

    let mut targets = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let entry = archive.by_index(i)?;
        let Some(relative) = entry.enclosed_name().map(|path| path.to_path_buf()) else {
            return Err(Error::UnsafeArchivePath(entry.name().to_string()));
        };
        targets.push(dir.join(relative));
    }

    fs::create_dir_all(dir)?;
    let mut written = 0;
    for (i, target) in targets.into_iter().enumerate() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        io::copy(&mut entry, &mut out)?;
        written += 1;
    }

    info!(files = written, dir = %dir.display(), "extracted archive");
    Ok(written)
}
