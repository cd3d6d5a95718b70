use super::Index;
use crate::errors::Result;
use crate::errors::error::IndexError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::info;
use reqwest::StatusCode;
use scraper::{Html, Selector};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;

const INDEX_NAME: &str = "resources";


#[derive(Debug, Serialize)]
struct ResourceDocument<'a> {
    url: &'a str,
    body: &'a str,
    time: DateTime<Utc>,
    title: String,
    description: String,
    headers: &'a HashMap<String, String>,
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn select_title(document: &Html) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    let title = document.select(&selector).next()?;
    Some(collapse_whitespace(&title.text().collect::<String>()))
}

fn select_description(document: &Html) -> Option<String> {
    let selector = Selector::parse(r#"meta[name="description" i]"#).ok()?;
    document
        .select(&selector)
        .find_map(|meta| meta.value().attr("content"))
        .map(collapse_whitespace)
}

/// Text of the page `<title>`, empty when there is none.
pub fn extract_title(body: &str) -> String {
    select_title(&Html::parse_document(body)).unwrap_or_default()
}

/// `content` of the description `<meta>` tag, empty when there is none.
pub fn extract_description(body: &str) -> String {
    select_description(&Html::parse_document(body)).unwrap_or_default()
}

/// Indexes resources as documents of an Elasticsearch index.
pub struct ElasticIndex {
    http: reqwest::Client,
    base_url: String,
}

async fn backend_error(resp: reqwest::Response) -> IndexError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    IndexError::Backend { status, body }
}

impl ElasticIndex {
    /// Connects to the cluster at `base_url` and creates the resource index
    /// when it does not exist yet.
    pub async fn new(base_url: &str) -> Result<Self> {
        let index = Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        };
        index.ensure_index().await?;
        Ok(index)
    }

    fn index_url(&self) -> String {
        format!("{}/{}", self.base_url, INDEX_NAME)
    }

    async fn ensure_index(&self) -> Result<()> {
        let resp = self
            .http
            .head(self.index_url())
            .send()
            .await
            .map_err(|e| IndexError::Persist(Box::new(e)))?;

        match resp.status() {
            status if status.is_success() => return Ok(()),
            StatusCode::NOT_FOUND => {}
            _ => return Err(backend_error(resp).await.into()),
        }

        let mapping = json!({
            "mappings": {
                "properties": {
                    "url": { "type": "keyword" },
                    "body": { "type": "text" },
                    "time": { "type": "date" },
                    "title": { "type": "text" },
                    "description": { "type": "text" },
                    "headers": { "type": "object", "enabled": false }
                }
            }
        });
        let resp = self
            .http
            .put(self.index_url())
            .json(&mapping)
            .send()
            .await
            .map_err(|e| IndexError::Persist(Box::new(e)))?;
        if !resp.status().is_success() {
            return Err(backend_error(resp).await.into());
        }
        info!("Created index {}", INDEX_NAME);
        Ok(())
    }
}

#[async_trait]
impl Index for ElasticIndex {
    async fn index_resource(
        &self,
        url: &str,
        time: DateTime<Utc>,
        body: &str,
        headers: &HashMap<String, String>,
    ) -> Result<()> {
        let document = ResourceDocument {
            url,
            body,
            time,
            title: extract_title(body),
            description: extract_description(body),
            headers,
        };

        let resp = self
            .http
            .post(format!("{}/_doc", self.index_url()))
            .json(&document)
            .send()
            .await
            .map_err(|e| IndexError::Persist(Box::new(e)))?;
        if !resp.status().is_success() {
            return Err(backend_error(resp).await.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn existing_index(server: &MockServer) {
        Mock::given(method("HEAD"))
            .and(path("/resources"))
            .respond_with(ResponseTemplate::new(200))
            .mount(server)
            .await;
    }

    #[test]
    fn extracts_title_and_description() {
        let body = r#"<html><head>
            <TITLE>  Hidden
              Wiki </TITLE>
            <meta name="description" content="Links to onion services">
        </head></html>"#;
        assert_eq!(extract_title(body), "Hidden Wiki");
        assert_eq!(extract_description(body), "Links to onion services");
        assert_eq!(extract_title("no markup"), "");
    }

    #[test]
    fn extraction_follows_html_rules() {
        let body = r#"<html><head>
            <title>Tom &amp; Jerry</title>
            <meta content="It's fine" name="Description">
        </head></html>"#;
        assert_eq!(extract_title(body), "Tom & Jerry");
        assert_eq!(extract_description(body), "It's fine");

        let reordered = r#"<meta content="Great site" name="description"><p>body</p>"#;
        assert_eq!(extract_description(reordered), "Great site");
        assert_eq!(extract_description("<p>none</p>"), "");
    }

    #[tokio::test]
    async fn creates_missing_index() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/resources"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/resources"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        ElasticIndex::new(&server.uri()).await.unwrap();
    }

    #[tokio::test]
    async fn posts_resource_document() {
        let server = MockServer::start().await;
        existing_index(&server).await;
        Mock::given(method("POST"))
            .and(path("/resources/_doc"))
            .and(body_partial_json(serde_json::json!({
                "url": "http://ok.example/page",
                "title": "Ok",
                "time": "2024-03-01T10:00:00Z",
                "headers": { "Server": "nginx" }
            })))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let index = ElasticIndex::new(&format!("{}/", server.uri())).await.unwrap();
        let mut headers = HashMap::new();
        headers.insert("Server".to_string(), "nginx".to_string());
        index
            .index_resource(
                "http://ok.example/page",
                Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap(),
                "<title>Ok</title>",
                &headers,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn rejected_document_is_a_backend_error() {
        let server = MockServer::start().await;
        existing_index(&server).await;
        Mock::given(method("POST"))
            .and(path("/resources/_doc"))
            .respond_with(ResponseTemplate::new(400).set_body_string("mapper_parsing_exception"))
            .mount(&server)
            .await;

        let index = ElasticIndex::new(&server.uri()).await.unwrap();
        let err = index
            .index_resource("http://ok.example/", Utc::now(), "", &HashMap::new())
            .await
            .unwrap_err();
        assert!(err.is_index());
        assert!(err.to_string().contains("400"));
        assert!(err.to_string().contains("mapper_parsing_exception"));
    }
}
