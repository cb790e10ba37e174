use crate::{
    config::AppConfig,
    error::CatalogError,
    models::{ExternalBook, ExternalBookDetail},
};
use reqwest::StatusCode;
use serde::{Deserialize, de::DeserializeOwned};
use std::time::Duration;

const SEARCH_FIELDS: &str = "key,title,author_name,first_publish_year,cover_i,first_sentence,subject";
const SEARCH_LIMIT: &str = "9";
const COVERS_URL: &str = "https://covers.openlibrary.org/b/id";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const UNKNOWN_AUTHOR: &str = "Unknown Author";

// --- Open Library wire format ---

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    docs: Vec<SearchDoc>,
}

#[derive(Debug, Deserialize)]
struct SearchDoc {
    key: String,
    #[serde(default)]
    title: String,
    author_name: Option<Vec<String>>,
    first_publish_year: Option<i32>,
    cover_i: Option<i64>,
    first_sentence: Option<Vec<String>>,
    subject: Option<Vec<String>>,
}

/// Text fields that Open Library serves either bare or as `{ "type": ..., "value": ... }`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TextValue {
    Plain(String),
    Typed { value: String },
}

impl TextValue {
    fn into_string(self) -> String {
        match self {
            TextValue::Plain(s) | TextValue::Typed { value: s } => s,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Work {
    #[serde(default)]
    title: String,
    subtitle: Option<String>,
    description: Option<TextValue>,
    #[serde(default)]
    covers: Vec<i64>,
    #[serde(default)]
    subjects: Vec<String>,
    #[serde(default)]
    authors: Vec<WorkAuthor>,
}

#[derive(Debug, Deserialize)]
struct WorkAuthor {
    author: Option<KeyRef>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct KeyRef {
    key: String,
}

#[derive(Debug, Deserialize)]
struct Editions {
    #[serde(default)]
    entries: Vec<Edition>,
}

#[derive(Debug, Deserialize)]
struct Edition {
    publish_date: Option<String>,
    #[serde(default)]
    publishers: Vec<String>,
    #[serde(default)]
    isbn_13: Vec<String>,
    #[serde(default)]
    isbn_10: Vec<String>,
    #[serde(default)]
    ia: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Author {
    name: Option<String>,
    bio: Option<TextValue>,
}

fn cover_url(cover_id: i64) -> String {
    format!("{}/{}-L.jpg", COVERS_URL, cover_id)
}

impl From<SearchDoc> for ExternalBook {
    fn from(doc: SearchDoc) -> Self {
        Self {
            id: doc
                .key
                .rsplit('/')
                .next()
                .unwrap_or_default()
                .to_string(),
            title: doc.title,
            author: doc
                .author_name
                .and_then(|names| names.into_iter().next())
                .unwrap_or_else(|| UNKNOWN_AUTHOR.to_string()),
            publish_year: doc.first_publish_year,
            cover_url: doc.cover_i.map(cover_url),
            first_sentence: doc.first_sentence.and_then(|s| s.into_iter().next()),
            subjects: doc
                .subject
                .unwrap_or_default()
                .into_iter()
                .take(3)
                .collect(),
        }
    }
}

/// OpenLibraryClient
///
/// Read-only client for the Open Library search and works APIs backing the explore
/// pages. Cheap to clone.
#[derive(Clone)]
pub struct OpenLibraryClient {
    http: reqwest::Client,
    base_url: String,
}

impl OpenLibraryClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            base_url: config.open_library_url.trim_end_matches('/').to_string(),
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, CatalogError> {
        let response = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .query(query)
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(CatalogError::NotFound),
            status if !status.is_success() => Err(CatalogError::Unexpected(format!(
                "{} returned {}",
                path, status
            ))),
            _ => Ok(response.json::<T>().await?),
        }
    }

    /// search
    ///
    /// Free-text search over title, author and subject. At most nine hits.
    pub async fn search(&self, query: &str) -> Result<Vec<ExternalBook>, CatalogError> {
        let results: SearchResponse = self
            .get_json(
                "/search.json",
                &[("q", query), ("fields", SEARCH_FIELDS), ("limit", SEARCH_LIMIT)],
            )
            .await?;

        Ok(results.docs.into_iter().map(ExternalBook::from).collect())
    }

    /// work
    ///
    /// The detail view of one work: the work record and its first edition are fetched
    /// together, then the first listed author. A missing or failing author lookup only
    /// degrades the author fields.
    pub async fn work(&self, id: &str) -> Result<ExternalBookDetail, CatalogError> {
        // Ids are interpolated into the path; anything but a plain work id cannot exist.
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(CatalogError::NotFound);
        }

        let work_path = format!("/works/{}.json", id);
        let editions_path = format!("/works/{}/editions.json", id);
        let (work, editions) = tokio::try_join!(
            self.get_json::<Work>(&work_path, &[]),
            self.get_json::<Editions>(&editions_path, &[("limit", "1")]),
        )?;

        let first_author = work.authors.into_iter().next();
        let author = match first_author.as_ref().and_then(|a| a.author.as_ref()) {
            Some(KeyRef { key }) if key.starts_with("/authors/") => {
                match self.get_json::<Author>(&format!("{}.json", key), &[]).await {
                    Ok(author) => Some(author),
                    Err(e) => {
                        tracing::warn!(work_id = %id, "Author lookup failed: {}", e);
                        None
                    }
                }
            }
            _ => None,
        };

        let edition = editions.entries.into_iter().next();
        let (author_name, author_bio) = match author {
            Some(a) => (a.name, a.bio.map(TextValue::into_string)),
            None => (None, None),
        };

        Ok(ExternalBookDetail {
            id: id.to_string(),
            title: work.title,
            subtitle: work.subtitle,
            author: author_name
                .or_else(|| first_author.and_then(|a| a.name))
                .unwrap_or_else(|| UNKNOWN_AUTHOR.to_string()),
            author_bio,
            description: work
                .description
                .map(TextValue::into_string)
                .unwrap_or_else(|| "No description available".to_string()),
            cover_url: work.covers.first().copied().map(cover_url),
            publish_date: edition.as_ref().and_then(|e| e.publish_date.clone()),
            publisher: edition.as_ref().and_then(|e| e.publishers.first().cloned()),
            isbn: edition.as_ref().and_then(|e| {
                e.isbn_13.first().or_else(|| e.isbn_10.first()).cloned()
            }),
            subjects: work.subjects,
            read_link: edition.and_then(|e| e.ia.into_iter().next()),
        })
    }
}
