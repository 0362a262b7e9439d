use std::fs;

use pipeline_core::{ChapterRef, Job, JobStatus, MangaRef};
use pipeline_engine::{chapter_dir, export_chapter_cbz, export_job, ExportError};
use pretty_assertions::assert_eq;

fn job(status: JobStatus) -> Job {
    let mut job = Job::new(
        MangaRef {
            source_id: 2,
            url: "/manga/blue".to_string(),
            title: "Blue: Period".to_string(),
        },
        ChapterRef {
            url: "/chapter/3".to_string(),
            name: "Chapter 3".to_string(),
        },
    );
    job.status = status;
    job
}

#[test]
fn pages_are_archived_in_name_order_without_partials() {
    let root = tempfile::tempdir().unwrap();
    let chapter = root.path().join("chapter");
    fs::create_dir_all(&chapter).unwrap();
    fs::write(chapter.join("001.jpg"), b"second").unwrap();
    fs::write(chapter.join("000.jpg"), b"first").unwrap();
    fs::write(chapter.join("002.jpg.abc123.part"), b"partial").unwrap();
    let exports = root.path().join("exports");

    let summary = export_chapter_cbz(&chapter, &exports, "Blue - 3.cbz").unwrap();

    assert_eq!(summary.pages, 2);
    assert_eq!(summary.archive, exports.join("Blue - 3.cbz"));
    let mut archive = zip::ZipArchive::new(fs::File::open(&summary.archive).unwrap()).unwrap();
    let names: Vec<String> = (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect();
    assert_eq!(names, vec!["000.jpg", "001.jpg"]);
}

#[test]
fn only_completed_jobs_can_be_exported() {
    let root = tempfile::tempdir().unwrap();
    let err = export_job(&job(JobStatus::Error), root.path(), root.path()).unwrap_err();
    assert!(matches!(err, ExportError::NotCompleted(JobStatus::Error)));
}

#[test]
fn completed_job_archive_is_named_after_manga_and_chapter() {
    let root = tempfile::tempdir().unwrap();
    let downloads = root.path().join("downloads");
    let job = job(JobStatus::Completed);
    let dir = chapter_dir(&downloads, &job);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("000.png"), b"page").unwrap();

    let summary = export_job(&job, &downloads, &root.path().join("exports")).unwrap();
    assert_eq!(
        summary.archive.file_name().unwrap().to_string_lossy(),
        "Blue_ Period - Chapter 3.cbz"
    );
}

#[test]
fn missing_chapter_directory_is_reported() {
    let root = tempfile::tempdir().unwrap();
    let err = export_chapter_cbz(&root.path().join("nope"), root.path(), "x.cbz").unwrap_err();
    assert!(matches!(err, ExportError::MissingChapter(_)));
}
