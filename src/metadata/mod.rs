//! Metadata API calls.
//!
//! Thin callers built on [`RequestService::make_request`]. Failures and
//! unexpected response shapes are logged and turned into empty results;
//! nothing here returns an error.

use std::collections::HashMap;
use std::sync::Arc;

use reqwest::Method;
use serde_json::{json, Value};
use tracing::warn;

use crate::history::Media;
use crate::requests::{get_options, OperationKind, RequestConfig, RequestService};
use crate::store::{get_or, KeyValueStore};

/// Store key holding the user's OAuth access token.
pub const ACCESS_TOKEN_KEY: &str = "access_token";

/// Results per page for list queries.
const PER_PAGE: u32 = 20;

const MEDIA_FIELDS: &str = r#"
    id
    title { romaji english native }
    coverImage { large extraLarge }
    episodes
    nextAiringEpisode { episode airingAt timeUntilAiring }
    mediaListEntry { id progress status }
"#;

/// Metadata API client.
pub struct MetadataClient {
    service: Arc<RequestService>,
    store: Arc<dyn KeyValueStore>,
}

impl MetadataClient {
    pub fn new(service: Arc<RequestService>, store: Arc<dyn KeyValueStore>) -> Self {
        Self { service, store }
    }

    fn access_token(&self) -> Option<String> {
        get_or::<Option<String>>(self.store.as_ref(), ACCESS_TOKEN_KEY, None)
            .filter(|t| !t.is_empty())
    }

    fn headers(&self, authenticated: bool) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        headers.insert("accept".to_string(), "application/json".to_string());
        if authenticated {
            if let Some(token) = self.access_token() {
                headers.insert("authorization".to_string(), format!("Bearer {}", token));
            }
        }
        headers
    }

    /// Run a query; `None` on transport failure.
    pub async fn query(
        &self,
        operation: OperationKind,
        query: &str,
        variables: Value,
    ) -> Option<Value> {
        let endpoint = self.service.settings().metadata_endpoint.clone();
        let result = self
            .service
            .make_request(
                Method::POST,
                &endpoint,
                self.headers(true),
                get_options(query, variables),
                RequestConfig::new().operation(operation),
            )
            .await;

        match result {
            Ok(body) => Some(body),
            Err(e) => {
                warn!("Metadata {} request failed: {}", operation, e);
                None
            }
        }
    }

    /// Id of the logged-in user.
    pub async fn viewer_id(&self) -> Option<i64> {
        let body = self
            .query(OperationKind::Viewer, "query { Viewer { id } }", json!({}))
            .await?;
        let id = body.pointer("/data/Viewer/id").and_then(Value::as_i64);
        if id.is_none() {
            warn!("Viewer response is missing data.Viewer.id");
        }
        id
    }

    /// Full media record for one title.
    pub async fn anime_info(&self, media_id: i64) -> Option<Media> {
        let query = format!(
            "query($id: Int) {{ Media(id: $id, type: ANIME) {{ {} }} }}",
            MEDIA_FIELDS
        );
        let body = self
            .query(OperationKind::Other, &query, json!({ "id": media_id }))
            .await?;
        match body.pointer("/data/Media") {
            Some(media) => parse_media(media.clone()),
            None => {
                warn!("Media response is missing data.Media");
                None
            }
        }
    }

    /// Currently trending titles.
    pub async fn trending(&self) -> Vec<Media> {
        let query = format!(
            "query($perPage: Int) {{ Page(page: 1, perPage: $perPage) {{ media(sort: TRENDING_DESC, type: ANIME) {{ {} }} }} }}",
            MEDIA_FIELDS
        );
        self.page_media(OperationKind::Trending, &query, json!({ "perPage": PER_PAGE }))
            .await
    }

    /// Title search.
    pub async fn search(&self, input: &str) -> Vec<Media> {
        let query = format!(
            "query($search: String, $perPage: Int) {{ Page(page: 1, perPage: $perPage) {{ media(search: $search, type: ANIME, sort: SEARCH_MATCH) {{ {} }} }} }}",
            MEDIA_FIELDS
        );
        self.page_media(
            OperationKind::Other,
            &query,
            json!({ "search": input, "perPage": PER_PAGE }),
        )
        .await
    }

    async fn page_media(&self, operation: OperationKind, query: &str, variables: Value) -> Vec<Media> {
        let Some(body) = self.query(operation, query, variables).await else {
            return Vec::new();
        };
        match body.pointer("/data/Page/media").and_then(Value::as_array) {
            Some(items) => items.iter().cloned().filter_map(parse_media).collect(),
            None => {
                warn!("{} response is missing data.Page.media", operation);
                Vec::new()
            }
        }
    }
}

fn parse_media(value: Value) -> Option<Media> {
    match serde_json::from_value(value) {
        Ok(media) => Some(media),
        Err(e) => {
            warn!("Skipping malformed media record: {}", e);
            None
        }
    }
}
