use super::Index;
use crate::errors::Result;
use crate::errors::error::IndexError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use url::Url;

/// Stores every resource as a plain file under a root directory.
///
/// Layout: `<root>/<host>/<path segments>/<escaped query>/<unix seconds>`,
/// with a `.1`, `.2`, ... suffix when that second already holds a capture.
/// The file holds the response headers as sorted `Key: Value` lines, a blank
/// line, then the body.
pub struct LocalIndex {
    root: PathBuf,
}

fn persist_error(err: std::io::Error) -> IndexError {
    IndexError::Persist(Box::new(err))
}

impl LocalIndex {
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(persist_error)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory receiving the captures of `url`.
    pub fn resource_dir(&self, url: &str) -> Result<PathBuf> {
        let parsed = Url::parse(url).map_err(|_| IndexError::InvalidUrl(url.to_string()))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| IndexError::InvalidUrl(url.to_string()))?;

        let mut dir = self.root.join(host.to_ascii_lowercase());
        if let Some(segments) = parsed.path_segments() {
            for segment in segments.filter(|s| !s.is_empty() && *s != "." && *s != "..") {
                dir.push(segment);
            }
        }
        if let Some(query) = parsed.query().filter(|q| !q.is_empty()) {
            let escaped: String = url::form_urlencoded::byte_serialize(query.as_bytes()).collect();
            dir.push(escaped);
        }
        Ok(dir)
    }
}

fn render(body: &str, headers: &HashMap<String, String>) -> String {
    let mut keys: Vec<&String> = headers.keys().collect();
    keys.sort();

    let mut content = String::with_capacity(body.len() + 64 * keys.len() + 1);
    for key in keys {
        content.push_str(key);
        content.push_str(": ");
        content.push_str(&headers[key]);
        content.push('\n');
    }
    content.push('\n');
    content.push_str(body);
    content
}

#[async_trait]
impl Index for LocalIndex {
    async fn index_resource(
        &self,
        url: &str,
        time: DateTime<Utc>,
        body: &str,
        headers: &HashMap<String, String>,
    ) -> Result<()> {
        let dir = self.resource_dir(url)?;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(persist_error)?;

        let stem = time.timestamp().to_string();
        let content = render(body, headers);
        let mut suffix = 0u32;
        loop {
            let path = if suffix == 0 {
                dir.join(&stem)
            } else {
                dir.join(format!("{stem}.{suffix}"))
            };
            let opened = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;
            match opened {
                Ok(mut file) => {
                    file.write_all(content.as_bytes())
                        .await
                        .map_err(persist_error)?;
                    file.flush().await.map_err(persist_error)?;
                    log::debug!("Stored {} at {}", url, path.display());
                    return Ok(());
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => suffix += 1,
                Err(e) => return Err(persist_error(e).into()),
            }
        }
    }
}
