use crate::google::auth::{GoogleAuthError, ServiceAccountAuth};
use crate::google::config::DRIVE_ROOT;
use reqwest::Client;
use serde::Deserialize;
use std::{path::Path, sync::Arc};
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt};
use tracing::{debug, warn};

const PAGE_SIZE: &str = "50";

#[derive(Debug, Error)]
pub enum DriveError {
    #[error(transparent)]
    Auth(#[from] GoogleAuthError),
    #[error("drive request failed: {0}")]
    Request(String),
    #[error("invalid drive response: {0}")]
    Deserialize(String),
    #[error("cannot write `{path}`: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub mime_type: String,
}

/// Folder of listing photos addressed by a folder id.
#[allow(async_fn_in_trait)]
pub trait PhotoSource {
    /// Image entries directly inside the folder, sorted case-insensitively by name.
    async fn list_images(&self, folder_id: &str) -> Result<Vec<DriveFile>, DriveError>;

    async fn download(&self, file: &DriveFile, dst: &Path) -> Result<(), DriveError>;
}

impl<T: PhotoSource> PhotoSource for &T {
    async fn list_images(&self, folder_id: &str) -> Result<Vec<DriveFile>, DriveError> {
        (**self).list_images(folder_id).await
    }

    async fn download(&self, file: &DriveFile, dst: &Path) -> Result<(), DriveError> {
        (**self).download(file, dst).await
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Clone)]
pub struct GoogleDrive {
    http: Client,
    auth: Arc<ServiceAccountAuth>,
}

impl GoogleDrive {
    pub fn new(http: Client, auth: Arc<ServiceAccountAuth>) -> Self {
        Self { http, auth }
    }
}

impl PhotoSource for GoogleDrive {
    async fn list_images(&self, folder_id: &str) -> Result<Vec<DriveFile>, DriveError> {
        debug!(target = "lbc.drive", folder_id, "listing images");
        let query = format!(
            "'{}' in parents and trashed=false and (mimeType contains 'image/')",
            folder_id.replace('\'', "\\'")
        );
        let url = format!("{}/files", *DRIVE_ROOT);

        let mut files = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let token = self.auth.access_token().await?;
            let mut params = vec![
                ("q", query.clone()),
                ("fields", "nextPageToken,files(id,name,mimeType)".to_string()),
                ("pageSize", PAGE_SIZE.to_string()),
            ];
            if let Some(next) = &page_token {
                params.push(("pageToken", next.clone()));
            }

            let response = self
                .http
                .get(&url)
                .bearer_auth(token)
                .query(&params)
                .send()
                .await
                .map_err(|err| DriveError::Request(err.to_string()))?;
            if !response.status().is_success() {
                return Err(DriveError::Request(format!(
                    "HTTP {}",
                    response.status()
                )));
            }
            let page: FileList = response
                .json()
                .await
                .map_err(|err| DriveError::Deserialize(err.to_string()))?;
            files.extend(page.files);

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        sort_by_name(&mut files);
        debug!(target = "lbc.drive", folder_id, count = files.len(), "images listed");
        Ok(files)
    }

    async fn download(&self, file: &DriveFile, dst: &Path) -> Result<(), DriveError> {
        let write_err = |source: std::io::Error| DriveError::Write {
            path: dst.display().to_string(),
            source,
        };
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).await.map_err(write_err)?;
        }

        let token = self.auth.access_token().await?;
        let url = format!(
            "{}/files/{}",
            *DRIVE_ROOT,
            urlencoding::encode(&file.id)
        );
        let mut response = self
            .http
            .get(url)
            .bearer_auth(token)
            .query(&[("alt", "media")])
            .send()
            .await
            .map_err(|err| DriveError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(DriveError::Request(format!(
                "HTTP {} for file {}",
                response.status(),
                file.id
            )));
        }

        let mut out = fs::File::create(dst).await.map_err(write_err)?;
        let mut written = 0usize;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|err| DriveError::Request(err.to_string()))?
        {
            out.write_all(&chunk).await.map_err(write_err)?;
            written += chunk.len();
        }
        out.flush().await.map_err(write_err)?;
        debug!(target = "lbc.drive", file = %file.name, bytes = written, "file downloaded");
        Ok(())
    }
}

/// Extracts a Drive folder id from `/folders/<id>` or `?id=<id>` / `&id=<id>` URLs.
pub fn extract_folder_id(url: &str) -> Option<String> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        debug!(target = "lbc.drive", "empty folder url");
        return None;
    }

    let from_path = trimmed
        .match_indices("/folders/")
        .find_map(|(pos, marker)| id_prefix(&trimmed[pos + marker.len()..]));
    let found = from_path.or_else(|| {
        trimmed.match_indices("id=").find_map(|(pos, marker)| {
            let preceded = trimmed[..pos].ends_with(['?', '&']);
            if preceded {
                id_prefix(&trimmed[pos + marker.len()..])
            } else {
                None
            }
        })
    });

    if found.is_none() {
        warn!(target = "lbc.drive", url = trimmed, "could not extract folder id");
    }
    found
}

fn id_prefix(rest: &str) -> Option<String> {
    let id: String = rest
        .chars()
        .take_while(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-'))
        .collect();
    (!id.is_empty()).then_some(id)
}

fn sort_by_name(files: &mut [DriveFile]) {
    files.sort_by_key(|file| file.name.to_lowercase());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folder_path_urls() {
        assert_eq!(
            extract_folder_id("https://drive.google.com/drive/folders/ABC123"),
            Some("ABC123".to_string())
        );
        assert_eq!(
            extract_folder_id("https://drive.google.com/drive/u/0/folders/a_B-9?usp=sharing"),
            Some("a_B-9".to_string())
        );
    }

    #[test]
    fn query_parameter_urls() {
        assert_eq!(
            extract_folder_id("https://drive.google.com/open?id=XYZ"),
            Some("XYZ".to_string())
        );
        assert_eq!(
            extract_folder_id("https://drive.google.com/open?usp=x&id=Q_1"),
            Some("Q_1".to_string())
        );
    }

    #[test]
    fn unmatched_urls() {
        assert_eq!(extract_folder_id(""), None);
        assert_eq!(extract_folder_id("   "), None);
        assert_eq!(extract_folder_id("photos du salon"), None);
        assert_eq!(extract_folder_id("https://example.com/?uid=abc"), None);
        assert_eq!(extract_folder_id("https://drive.google.com/drive/folders/"), None);
    }

    #[test]
    fn sorting_ignores_case() {
        let mut files = vec![
            DriveFile {
                id: "1".into(),
                name: "b.jpg".into(),
                mime_type: "image/jpeg".into(),
            },
            DriveFile {
                id: "2".into(),
                name: "A.jpg".into(),
                mime_type: "image/jpeg".into(),
            },
            DriveFile {
                id: "3".into(),
                name: "c.png".into(),
                mime_type: "image/png".into(),
            },
        ];
        sort_by_name(&mut files);
        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["A.jpg", "b.jpg", "c.png"]);
    }

    #[test]
    fn file_list_deserializes() {
        let page: FileList = serde_json::from_str(
            r#"{"nextPageToken":"t2","files":[{"id":"f1","name":"1.jpg","mimeType":"image/jpeg"}]}"#,
        )
        .expect("file list");
        assert_eq!(page.next_page_token.as_deref(), Some("t2"));
        assert_eq!(page.files[0].mime_type, "image/jpeg");
    }
}
