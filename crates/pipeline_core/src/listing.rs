use serde::{Deserialize, Serialize};

use crate::{ChapterRef, MangaRef};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Manga {
    pub source_id: i64,
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl Manga {
    pub fn reference(&self) -> MangaRef {
        MangaRef {
            source_id: self.source_id,
            url: self.url.clone(),
            title: self.title.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Chapter {
    pub url: String,
    pub name: String,
    #[serde(default)]
    pub number: Option<f32>,
    /// Upload time, seconds since the Unix epoch.
    #[serde(default)]
    pub date_upload: Option<i64>,
    #[serde(default)]
    pub scanlator: Option<String>,
}

impl Chapter {
    pub fn reference(&self) -> ChapterRef {
        ChapterRef {
            url: self.url.clone(),
            name: self.name.clone(),
        }
    }
}

/// One page of a source listing (popular, search).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MangaListing {
    pub items: Vec<Manga>,
    pub total_pages: u32,
}
