//! Posts CSV loading for the offline export.

use std::path::Path;

use chrono::{DateTime, Utc};
use csv::StringRecord;
use thiserror::Error;
use tracing::info;

use crate::bars::{parse_timestamp, BarStoreConfig};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub post_id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub is_reply: bool,
    pub is_retweet: bool,
    pub is_quote: bool,
}

impl Post {
    pub fn created_ts(&self) -> i64 {
        self.created_at.timestamp()
    }
}

#[derive(Debug, Error)]
pub enum PostLoadError {
    #[error("posts file not found: {0}")]
    MissingFile(String),
    #[error("posts file has no createdAt column")]
    MissingCreatedAt,
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Loads posts newest first. Rows whose `createdAt` does not parse are
/// dropped.
pub fn load_posts(path: &Path) -> Result<Vec<Post>, PostLoadError> {
    if !path.is_file() {
        return Err(PostLoadError::MissingFile(path.display().to_string()));
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;
    let headers = reader.headers()?.clone();

    let created_idx = column(&headers, "createdAt").ok_or(PostLoadError::MissingCreatedAt)?;
    let id_idx = column(&headers, "id");
    let text_idx = column(&headers, "fullText").or_else(|| column(&headers, "text"));
    let reply_idx = column(&headers, "isReply");
    let retweet_idx = column(&headers, "isRetweet");
    let quote_idx = column(&headers, "isQuote");

    let mut posts = Vec::new();
    let mut dropped = 0u64;
    for (row_number, record) in reader.records().enumerate() {
        let record = record?;
        let Some(created_at) = record.get(created_idx).and_then(parse_created_at) else {
            dropped += 1;
            continue;
        };

        let post_id = id_idx
            .and_then(|idx| record.get(idx))
            .map(str::trim)
            .filter(|raw| !raw.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| (row_number + 1).to_string());

        posts.push(Post {
            post_id,
            text: text_idx
                .and_then(|idx| record.get(idx))
                .unwrap_or_default()
                .to_string(),
            created_at,
            is_reply: flag(&record, reply_idx),
            is_retweet: flag(&record, retweet_idx),
            is_quote: flag(&record, quote_idx),
        });
    }

    posts.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    info!(
        component = "posts",
        event = "posts.load.finish",
        path = %path.display(),
        posts = posts.len(),
        dropped_rows = dropped
    );

    Ok(posts)
}

fn column(headers: &StringRecord, name: &str) -> Option<usize> {
    headers.iter().position(|header| header.trim() == name)
}

fn flag(record: &StringRecord, idx: Option<usize>) -> bool {
    idx.and_then(|idx| record.get(idx))
        .map(|raw| {
            matches!(
                raw.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes"
            )
        })
        .unwrap_or(false)
}

fn parse_created_at(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    // Platform export format, e.g. "Thu Dec 05 18:31:07 +0000 2024".
    if let Ok(dt) = DateTime::parse_from_str(trimmed, "%a %b %d %H:%M:%S %z %Y") {
        return Some(dt.with_timezone(&Utc));
    }
    parse_timestamp(trimmed, &BarStoreConfig::default())
        .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_csv(body: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_posts_newest_first_and_drops_bad_dates() {
        let file = write_csv(
            "id,fullText,createdAt,isReply,isRetweet,isQuote\n\
             11,first,2025-01-02T14:30:12Z,false,false,true\n\
             12,\"second, with comma\",Thu Jan 02 15:00:00 +0000 2025,True,false,false\n\
             13,broken,yesterday,false,false,false\n",
        );

        let posts = load_posts(file.path()).unwrap();
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].post_id, "12");
        assert_eq!(posts[0].text, "second, with comma");
        assert!(posts[0].is_reply);
        assert_eq!(posts[1].post_id, "11");
        assert!(posts[1].is_quote);
        assert_eq!(posts[1].created_ts(), 1_735_828_212);
    }

    #[test]
    fn missing_optional_columns_get_defaults() {
        let file = write_csv("createdAt\n2025-01-02 14:30:00\n");
        let posts = load_posts(file.path()).unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].post_id, "1");
        assert_eq!(posts[0].text, "");
        assert!(!posts[0].is_reply && !posts[0].is_retweet && !posts[0].is_quote);
    }

    #[test]
    fn missing_created_at_column_is_an_error() {
        let file = write_csv("id,fullText\n1,hello\n");
        assert!(matches!(
            load_posts(file.path()).unwrap_err(),
            PostLoadError::MissingCreatedAt
        ));
    }
}
