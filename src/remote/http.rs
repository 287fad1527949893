use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::error::{AppError, Result};

use super::blob::BlobStore;
use super::document::{Document, DocumentStore, Fields};

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    documents: Vec<Document>,
}

#[derive(Debug, Serialize)]
struct FieldsBody<'a> {
    fields: &'a Fields,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(rename = "downloadUrl")]
    download_url: Option<String>,
}

/// Percent-encodes one path segment. Dot segments would be resolved away
/// by `Url::join` and escape the caller's namespace, so they are refused.
fn encode_segment(segment: &str) -> Result<String> {
    if segment == "." || segment == ".." {
        return Err(AppError::Remote(format!("Invalid path segment: {:?}", segment)));
    }
    Ok(urlencoding::encode(segment).into_owned())
}

/// Shared plumbing for the JSON-over-HTTP backends.
#[derive(Clone)]
struct Endpoint {
    client: Client,
    base_url: Url,
    access_token: Option<String>,
}

impl Endpoint {
    fn new(base_url: &str, access_token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent("gym-sync/1.0")
            .build()?;

        // Url::join drops the last segment unless the base ends with '/'
        let base_url = if base_url.ends_with('/') {
            Url::parse(base_url)?
        } else {
            Url::parse(&format!("{}/", base_url))?
        };

        Ok(Self {
            client,
            base_url,
            access_token,
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        let encoded = path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(encode_segment)
            .collect::<Result<Vec<_>>>()?
            .join("/");
        Ok(self.base_url.join(&encoded)?)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let request = self.client.request(method, url);
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

async fn ensure_success(response: Response, what: &str) -> Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let error_text = response.text().await.unwrap_or_default();
    Err(AppError::Remote(format!(
        "{} failed: HTTP {}: {}",
        what, status, error_text
    )))
}

/// Document store reached over HTTP. There is no server push, so `watch`
/// polls the collection and only emits when it changed.
#[derive(Clone)]
pub struct HttpDocumentStore {
    endpoint: Endpoint,
    poll_interval: Duration,
}

impl HttpDocumentStore {
    pub fn new(
        base_url: &str,
        access_token: Option<String>,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Self> {
        Ok(Self {
            endpoint: Endpoint::new(base_url, access_token, timeout)?,
            poll_interval,
        })
    }

    fn document_url(&self, collection: &str, id: &str) -> Result<Url> {
        // id may contain '/', keep it a single segment
        let collection_url = self.endpoint.url(collection)?;
        Ok(Url::parse(&format!(
            "{}/{}",
            collection_url,
            encode_segment(id)?
        ))?)
    }
}

#[async_trait]
impl DocumentStore for HttpDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let url = self.document_url(collection, id)?;
        let response = self.endpoint.request(Method::GET, url).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = ensure_success(response, "Fetching document").await?;
        Ok(Some(response.json().await?))
    }

    async fn set(&self, collection: &str, id: &str, fields: Fields) -> Result<()> {
        let url = self.document_url(collection, id)?;
        let response = self
            .endpoint
            .request(Method::PUT, url)
            .json(&FieldsBody { fields: &fields })
            .send()
            .await?;
        ensure_success(response, "Writing document").await?;
        Ok(())
    }

    async fn update_field(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        value: Value,
    ) -> Result<()> {
        let url = self.document_url(collection, id)?;
        let mut fields = Fields::new();
        fields.insert(field.to_string(), value);
        let response = self
            .endpoint
            .request(Method::PATCH, url)
            .json(&FieldsBody { fields: &fields })
            .send()
            .await?;
        ensure_success(response, "Updating document").await?;
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        let url = self.document_url(collection, id)?;
        let response = self.endpoint.request(Method::DELETE, url).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        ensure_success(response, "Deleting document").await?;
        Ok(())
    }

    async fn list(&self, collection: &str) -> Result<Vec<Document>> {
        let url = self.endpoint.url(collection)?;
        let response = self.endpoint.request(Method::GET, url).send().await?;
        let response = ensure_success(response, "Listing collection").await?;
        let list: ListResponse = response.json().await?;
        Ok(list.documents)
    }

    fn watch(&self, collection: &str) -> BoxStream<'static, Result<Vec<Document>>> {
        let store = self.clone();
        let collection = collection.to_string();

        stream::unfold(
            (store, collection, None::<Vec<Document>>, true),
            |(store, collection, mut last, mut first)| async move {
                loop {
                    if !first {
                        tokio::time::sleep(store.poll_interval).await;
                    }
                    first = false;

                    match store.list(&collection).await {
                        Ok(docs) if last.as_ref() == Some(&docs) => continue,
                        Ok(docs) => {
                            last = Some(docs.clone());
                            return Some((Ok(docs), (store, collection, last, first)));
                        }
                        Err(e) => {
                            tracing::debug!("Polling {} failed: {}", collection, e);
                            return Some((Err(e), (store, collection, last, first)));
                        }
                    }
                }
            },
        )
        .boxed()
    }
}

#[derive(Clone)]
pub struct HttpBlobStore {
    endpoint: Endpoint,
}

impl HttpBlobStore {
    pub fn new(base_url: &str, access_token: Option<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            endpoint: Endpoint::new(base_url, access_token, timeout)?,
        })
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn put(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<String> {
        let url = self.endpoint.url(path)?;
        let response = self
            .endpoint
            .request(Method::PUT, url.clone())
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await?;
        let response = ensure_success(response, "Uploading object").await?;

        // Servers may hand back a signed URL; the object URL is the fallback
        let body = response.text().await?;
        let download_url = serde_json::from_str::<UploadResponse>(&body)
            .ok()
            .and_then(|r| r.download_url)
            .unwrap_or_else(|| url.to_string());
        Ok(download_url)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let url = self.endpoint.url(path)?;
        let response = self.endpoint.request(Method::DELETE, url).send().await?;
        ensure_success(response, "Deleting object").await?;
        Ok(())
    }
}
