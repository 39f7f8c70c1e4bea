//! Unpacking of the extraction result archive into an output directory.

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use zip::ZipArchive;

use crate::error::ExtractionError;

use super::transcript;

pub const STRUCTURED_DATA_FILE: &str = "structuredData.json";
pub const TRANSCRIPT_FILE: &str = "text.txt";
pub const FIGURES_DIR: &str = "figures";
pub const TABLES_DIR: &str = "tables";

const IMAGE_EXTENSIONS: &[&str] = &[".png", ".jpg", ".jpeg"];
const TABLE_EXTENSIONS: &[&str] = &[".png", ".csv", ".jpg", ".jpeg"];

/// Files written into an output directory, grouped by category
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedFiles {
    pub structured_data: Option<PathBuf>,
    pub transcript: Option<PathBuf>,
    pub figures: Vec<PathBuf>,
    pub tables: Vec<PathBuf>,
}

impl ExtractedFiles {
    pub fn len(&self) -> usize {
        usize::from(self.structured_data.is_some())
            + usize::from(self.transcript.is_some())
            + self.figures.len()
            + self.tables.len()
    }
}

/// What an archive entry becomes in the output directory
#[derive(Debug, PartialEq, Eq)]
enum EntryKind<'a> {
    StructuredData,
    Figure(&'a str),
    Table(&'a str),
}

fn classify(name: &str) -> Option<EntryKind<'_>> {
    if name == STRUCTURED_DATA_FILE {
        return Some(EntryKind::StructuredData);
    }

    let lower = name.to_lowercase();
    if lower.contains("figure") && has_suffix(name, IMAGE_EXTENSIONS) {
        return Some(EntryKind::Figure(base_name(name)));
    }
    if lower.contains("table") && has_suffix(name, TABLE_EXTENSIONS) {
        return Some(EntryKind::Table(base_name(name)));
    }
    None
}

fn has_suffix(name: &str, suffixes: &[&str]) -> bool {
    suffixes.iter().any(|suffix| name.ends_with(suffix))
}

/// Last path component of an archive entry name.
///
/// Entries are only ever written by base name, so nothing can escape the
/// output directory.
fn base_name(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or_default()
}

/// Spool `archive` to a scratch file in `scratch_dir` and unpack it into `output_dir`.
///
/// `output_dir` must already contain the figures and tables subdirectories.
/// The scratch file is removed whether or not unpacking succeeds.
pub fn unpack(
    archive: &[u8],
    output_dir: &Path,
    scratch_dir: &Path,
) -> Result<ExtractedFiles, ExtractionError> {
    let scratch_io = |source: std::io::Error| ExtractionError::Io {
        path: scratch_dir.to_path_buf(),
        source,
    };

    let mut scratch = tempfile::Builder::new()
        .prefix("extract-")
        .suffix(".zip")
        .tempfile_in(scratch_dir)
        .map_err(scratch_io)?;
    scratch.write_all(archive).map_err(scratch_io)?;
    scratch.flush().map_err(scratch_io)?;
    scratch.seek(SeekFrom::Start(0)).map_err(scratch_io)?;

    let result = unpack_from(scratch.as_file_mut(), output_dir);

    if let Err(e) = scratch.close() {
        debug!(error = %e, "Failed to remove scratch archive");
    }

    result
}

fn unpack_from<R: Read + Seek>(
    reader: R,
    output_dir: &Path,
) -> Result<ExtractedFiles, ExtractionError> {
    let mut zip = ZipArchive::new(reader).map_err(|e| ExtractionError::ArchiveParse {
        message: format!("Failed to read zip archive: {}", e),
    })?;

    let mut files = ExtractedFiles::default();

    for index in 0..zip.len() {
        let mut entry = zip
            .by_index(index)
            .map_err(|e| ExtractionError::ArchiveParse {
                message: format!("Failed to read archive entry {}: {}", index, e),
            })?;
        if entry.is_dir() {
            continue;
        }

        let name = entry.name().to_string();
        let Some(kind) = classify(&name) else {
            debug!(entry = %name, "Skipping archive entry");
            continue;
        };

        // The declared size comes from the archive and is not trusted for allocation
        let mut content = Vec::new();
        entry
            .read_to_end(&mut content)
            .map_err(|e| ExtractionError::ArchiveParse {
                message: format!("Failed to read {}: {}", name, e),
            })?;

        match kind {
            EntryKind::StructuredData => {
                let (data_path, transcript_path) = write_structured_data(&content, output_dir)?;
                files.structured_data = Some(data_path);
                files.transcript = Some(transcript_path);
            }
            EntryKind::Figure(file_name) if !file_name.is_empty() => {
                let path = output_dir.join(FIGURES_DIR).join(file_name);
                write_file(&path, &content)?;
                debug!(entry = %name, "Extracted figure");
                push_unique(&mut files.figures, path);
            }
            EntryKind::Table(file_name) if !file_name.is_empty() => {
                let path = output_dir.join(TABLES_DIR).join(file_name);
                write_file(&path, &content)?;
                debug!(entry = %name, "Extracted table");
                push_unique(&mut files.tables, path);
            }
            _ => {}
        }
    }

    Ok(files)
}

/// Save the pretty-printed structured data and the transcript derived from it
fn write_structured_data(
    content: &[u8],
    output_dir: &Path,
) -> Result<(PathBuf, PathBuf), ExtractionError> {
    let data: serde_json::Value =
        serde_json::from_slice(content).map_err(|e| ExtractionError::ArchiveParse {
            message: format!("Invalid {}: {}", STRUCTURED_DATA_FILE, e),
        })?;

    let pretty =
        serde_json::to_string_pretty(&data).map_err(|e| ExtractionError::ArchiveParse {
            message: format!("Failed to serialize {}: {}", STRUCTURED_DATA_FILE, e),
        })?;
    let data_path = output_dir.join(STRUCTURED_DATA_FILE);
    write_file(&data_path, pretty.as_bytes())?;

    let lines = transcript::collect_text(&data);
    let transcript_path = output_dir.join(TRANSCRIPT_FILE);
    write_file(&transcript_path, transcript::render(&lines).as_bytes())?;

    Ok((data_path, transcript_path))
}

/// Entries sharing a base name overwrite one file, so record it once
fn push_unique(paths: &mut Vec<PathBuf>, path: PathBuf) {
    if !paths.contains(&path) {
        paths.push(path);
    }
}

fn write_file(path: &Path, content: &[u8]) -> Result<(), ExtractionError> {
    std::fs::write(path, content).map_err(|source| ExtractionError::Io {
        path: path.to_path_buf(),
        source,
    })
}
