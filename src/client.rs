use crate::config::ARPANSA_URL;
use crate::error::{ArpansaError, Result};
use crate::feed::{FeedDocument, LocationRecord};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

/// Capability to perform one HTTP GET and hand back the body.
///
/// The session behind it is owned by the caller; implementations must fold
/// transport errors and non-success statuses into a single
/// [`ArpansaError::Fetch`].
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn get(&self, url: &str) -> Result<Vec<u8>>;
}

#[async_trait]
impl<T: Fetcher + ?Sized> Fetcher for Arc<T> {
    async fn get(&self, url: &str) -> Result<Vec<u8>> {
        (**self).get(url).await
    }
}

/// [`Fetcher`] backed by a shared `reqwest` client.
#[derive(Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Wrap a client owned by the caller.
    ///
    /// # Arguments
    ///
    /// * `client` - Session used for every request; timeouts configured on it apply
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn get(&self, url: &str) -> Result<Vec<u8>> {
        debug!("Requesting UV feed: {url}");
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ArpansaError::Fetch(format!(
                "{url} responded with status {status}"
            )));
        }
        let body = response.bytes().await?;
        Ok(body.to_vec())
    }
}

/// Parse and check a feed location.
///
/// # Arguments
///
/// * `url` - Absolute URL of the XML feed
///
/// # Returns
///
/// The parsed URL.
///
/// # Errors
///
/// Returns an error if `url` does not parse or uses a scheme other than
/// http or https.
pub fn parse_feed_url(url: &str) -> Result<Url> {
    let parsed = Url::parse(url).map_err(|e| format!("Invalid feed URL {url}: {e}"))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ArpansaError::from(format!(
            "Feed URL must use http or https: {url}"
        )));
    }
    Ok(parsed)
}

/// Client for the ARPANSA UV feed.
///
/// Holds the most recent successfully parsed [`FeedDocument`]. A fetch only
/// replaces the document once the new one has parsed, so a failed fetch
/// leaves earlier query results intact.
pub struct FeedClient<F> {
    fetcher: F,
    url: String,
    document: Option<Arc<FeedDocument>>,
}

impl<F: Fetcher> FeedClient<F> {
    /// Create a client for the public ARPANSA feed.
    pub fn new(fetcher: F) -> Self {
        Self {
            fetcher,
            url: ARPANSA_URL.to_string(),
            document: None,
        }
    }

    /// Create a client for an alternative feed location, e.g. a mirror.
    ///
    /// # Errors
    ///
    /// Returns an error if `url` is not an absolute http(s) URL.
    pub fn with_url(fetcher: F, url: &str) -> Result<Self> {
        Ok(Self {
            fetcher,
            url: parse_feed_url(url)?.into(),
            document: None,
        })
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetch and parse the feed, replacing the current document on success.
    ///
    /// # Errors
    ///
    /// Returns [`ArpansaError::Fetch`] if the request fails or the body is
    /// not UTF-8, and [`ArpansaError::Parse`] if the body is not valid XML.
    pub async fn fetch(&mut self) -> Result<Arc<FeedDocument>> {
        let body = self.fetcher.get(&self.url).await?;
        let text = String::from_utf8(body)
            .map_err(|e| ArpansaError::Fetch(format!("Feed body is not valid UTF-8: {e}")))?;
        let document = Arc::new(FeedDocument::parse(&text)?);

        info!("Fetched UV feed with {} locations", document.len());
        self.document = Some(document.clone());
        Ok(document)
    }

    /// The current document.
    ///
    /// # Errors
    ///
    /// Returns [`ArpansaError::NotReady`] before the first successful fetch.
    pub fn snapshot(&self) -> Result<Arc<FeedDocument>> {
        self.document.clone().ok_or(ArpansaError::NotReady)
    }

    /// All location ids in document order.
    ///
    /// # Errors
    ///
    /// Returns [`ArpansaError::NotReady`] before the first successful fetch.
    pub fn list_location_ids(&self) -> Result<Vec<String>> {
        Ok(self.document()?.location_ids())
    }

    /// Every location record in document order.
    ///
    /// # Errors
    ///
    /// Returns [`ArpansaError::NotReady`] before the first successful fetch.
    pub fn get_all(&self) -> Result<Vec<LocationRecord>> {
        Ok(self.document()?.records().to_vec())
    }

    /// The record for one location.
    ///
    /// # Errors
    ///
    /// Returns [`ArpansaError::NotReady`] before the first successful fetch and
    /// [`ArpansaError::UnknownLocation`] if no location has this id.
    pub fn get_one(&self, id: &str) -> Result<LocationRecord> {
        self.document()?
            .get(id)
            .cloned()
            .ok_or_else(|| ArpansaError::UnknownLocation(id.to_string()))
    }

    fn document(&self) -> Result<&FeedDocument> {
        self.document.as_deref().ok_or(ArpansaError::NotReady)
    }
}
