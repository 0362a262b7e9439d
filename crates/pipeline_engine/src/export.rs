use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use pipeline_core::{Job, JobStatus};
use pipeline_logging::pipeline_info;
use thiserror::Error;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::filename::{archive_filename, chapter_dir};
use crate::persist::{ensure_output_dir, is_partial_file, AtomicFileWriter, PersistError};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("chapter is {0}, only completed chapters can be exported")]
    NotCompleted(JobStatus),
    #[error("no job for {0}")]
    UnknownJob(String),
    #[error("no pages found in {0}")]
    MissingChapter(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub archive: PathBuf,
    pub pages: usize,
}

/// Package a completed job's page directory as `{export_dir}/{title} - {chapter}.cbz`.
pub fn export_job(job: &Job, download_root: &Path, export_dir: &Path) -> Result<ExportSummary, ExportError> {
    if job.status != JobStatus::Completed {
        return Err(ExportError::NotCompleted(job.status));
    }
    export_chapter_cbz(
        &chapter_dir(download_root, job),
        export_dir,
        &archive_filename(job),
    )
}

/// Zip every finished page file in `chapter_dir`, in file-name order, into
/// `export_dir/archive_name`. The archive appears under its final name only when complete.
pub fn export_chapter_cbz(
    chapter_dir: &Path,
    export_dir: &Path,
    archive_name: &str,
) -> Result<ExportSummary, ExportError> {
    if !chapter_dir.is_dir() {
        return Err(ExportError::MissingChapter(chapter_dir.to_path_buf()));
    }
    let mut pages: Vec<PathBuf> = fs::read_dir(chapter_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && !is_partial_file(path))
        .collect();
    if pages.is_empty() {
        return Err(ExportError::MissingChapter(chapter_dir.to_path_buf()));
    }
    pages.sort();

    ensure_output_dir(export_dir)?;
    let writer = AtomicFileWriter::new(export_dir.to_path_buf());
    let mut tmp = writer.partial_file(archive_name)?;
    {
        let mut zip = ZipWriter::new(tmp.as_file_mut());
        // Images are already compressed.
        let options = FileOptions::default().compression_method(CompressionMethod::Stored);
        for page in &pages {
            let name = page
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            zip.start_file(name, options)?;
            io::copy(&mut File::open(page)?, &mut zip)?;
        }
        zip.finish()?;
    }
    tmp.as_file_mut().sync_all()?;

    let archive = export_dir.join(archive_name);
    tmp.persist(&archive)
        .map_err(|err| PersistError::Io(err.error))?;
    pipeline_info!("Exported {} pages to {}", pages.len(), archive.display());
    Ok(ExportSummary {
        archive,
        pages: pages.len(),
    })
}
