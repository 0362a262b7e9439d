use std::path::{Path, PathBuf};

use pipeline_core::Job;

/// Extension used when a page URL has none.
pub const DEFAULT_PAGE_EXTENSION: &str = ".jpg";

/// Windows-safe directory or file name component.
pub fn safe_path_component(input: &str) -> String {
    let mut cleaned: String = input
        .chars()
        .map(|c| if is_forbidden(c) { '_' } else { c })
        .collect();
    cleaned = cleaned.trim_matches(&['_', ' ', '.'][..]).to_string();
    if cleaned.is_empty() {
        cleaned = "untitled".to_string();
    }
    // Collapse multiple underscores
    let mut compacted = String::with_capacity(cleaned.len());
    let mut prev_underscore = false;
    for c in cleaned.chars() {
        if c == '_' {
            if !prev_underscore {
                compacted.push(c);
            }
            prev_underscore = true;
        } else {
            compacted.push(c);
            prev_underscore = false;
        }
    }
    let mut final_name = compacted;
    if final_name.chars().count() > 120 {
        final_name = final_name.chars().take(120).collect();
    }
    if is_reserved_windows_name(&final_name) {
        final_name.push('_');
    }
    final_name
}

/// `{root}/{source_id}/{manga title}/{chapter name}`, each component sanitized.
pub fn chapter_dir(root: &Path, job: &Job) -> PathBuf {
    root.join(job.manga.source_id.to_string())
        .join(safe_path_component(&job.manga.title))
        .join(safe_path_component(&job.chapter.name))
}

/// `{manga title} - {chapter name}.cbz`
pub fn archive_filename(job: &Job) -> String {
    format!(
        "{} - {}.cbz",
        safe_path_component(&job.manga.title),
        safe_path_component(&job.chapter.name)
    )
}

/// `{index:03}{ext}`; the extension comes from the URL path, query excluded.
pub fn page_filename(index: usize, url: &str) -> String {
    format!("{index:03}{}", page_extension(url))
}

fn page_extension(url: &str) -> String {
    let path = url
        .split(['?', '#'])
        .next()
        .unwrap_or(url)
        .rsplit('/')
        .next()
        .unwrap_or_default();
    match path.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty()
                && !ext.is_empty()
                && ext.len() <= 5
                && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            format!(".{}", ext.to_ascii_lowercase())
        }
        _ => DEFAULT_PAGE_EXTENSION.to_string(),
    }
}

fn is_forbidden(c: char) -> bool {
    matches!(c,
        '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\0'..='\u{1F}'
    )
}

fn is_reserved_windows_name(name: &str) -> bool {
    const RESERVED: &[&str] = &[
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
        "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];
    RESERVED.iter().any(|r| r.eq_ignore_ascii_case(name))
}
