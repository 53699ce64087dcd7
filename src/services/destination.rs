// src/services/destination.rs

//! WordPress-style REST destination client.
//!
//! Reads `GET <endpoint>?per_page=N&page=P` with basic auth. HTTP 400 marks
//! a page past the end. Source URLs live in the `acf` block, or in post meta
//! for older records.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde::de::{self, DeserializeOwned, Deserializer};
use serde_json::{Value, json};

use super::{DestinationClient, FetchError, ListingPayload, Page, check_status};
use crate::error::{AppError, Result};
use crate::models::{CareType, Config, SnapshotEntry};
use crate::utils::http::create_async_client;

/// Listing record as returned by the destination API.
///
/// Empty ACF fields arrive as `false`, `null` or `""` depending on the field
/// type, and an empty `acf` or `meta` block may be `[]`; all read as empty.
#[derive(Debug, Deserialize)]
struct RemoteListing {
    id: u64,

    /// Naive timestamp, UTC by contract
    #[serde(default, deserialize_with = "loose_text")]
    modified_gmt: Option<String>,

    #[serde(default, deserialize_with = "loose_object")]
    acf: RemoteFields,

    #[serde(default, deserialize_with = "loose_object")]
    meta: RemoteMeta,
}

#[derive(Debug, Default, Deserialize)]
struct RemoteFields {
    #[serde(default, alias = "url", deserialize_with = "loose_text")]
    senior_place_url: Option<String>,

    #[serde(default)]
    price: Option<Value>,

    #[serde(default, deserialize_with = "loose_list")]
    care_types: Vec<String>,

    #[serde(default, deserialize_with = "loose_text")]
    description: Option<String>,
}

/// Post meta; older records keep the source URL only here.
#[derive(Debug, Default, Deserialize)]
struct RemoteMeta {
    #[serde(default, rename = "_senior_place_url", deserialize_with = "loose_text")]
    senior_place_url: Option<String>,
}

/// Non-empty string, or the first one of a list; anything else is `None`.
fn loose_text<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(text_of(Value::deserialize(deserializer)?))
}

fn text_of(value: Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => items.into_iter().find_map(text_of),
        _ => None,
    }
}

/// Strings of a list, or a lone string as a one-item list.
fn loose_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items.into_iter().filter_map(text_of).collect(),
        other => text_of(other).into_iter().collect(),
    })
}

/// An object decodes as `T`; `false`, `null` or `[]` give `T::default()`.
fn loose_object<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    match Value::deserialize(deserializer)? {
        object @ Value::Object(_) => serde_json::from_value(object).map_err(de::Error::custom),
        _ => Ok(T::default()),
    }
}

impl RemoteListing {
    /// `None` when the record carries no source URL.
    fn into_entry(self) -> Option<SnapshotEntry> {
        let source_url = self.acf.senior_place_url.or(self.meta.senior_place_url)?;

        let current_price = self.acf.price.and_then(|v| match v {
            Value::String(s) if !s.trim().is_empty() => Some(s),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        });

        let current_canonical_types: BTreeSet<CareType> = self
            .acf
            .care_types
            .iter()
            .filter_map(|t| t.parse().ok())
            .collect();

        Some(SnapshotEntry {
            destination_id: self.id,
            source_url,
            destination_modified_at: self.modified_gmt.as_deref().and_then(parse_gmt),
            current_price,
            current_canonical_types,
            current_description: self.acf.description,
        })
    }
}

fn parse_gmt(text: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(text.trim(), "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

#[derive(Debug, Deserialize)]
struct Created {
    id: u64,
}

/// Destination client over the REST listing endpoint.
pub struct HttpDestinationClient {
    client: Client,
    endpoint: String,
    username: String,
    password: String,
}

impl HttpDestinationClient {
    /// Build a client; credentials come from the configured env vars.
    pub fn new(config: &Config) -> Result<Self> {
        let dest = &config.destination;
        let username = std::env::var(&dest.username_env)
            .map_err(|_| AppError::config(format!("{} is not set", dest.username_env)))?;
        let password = std::env::var(&dest.password_env)
            .map_err(|_| AppError::config(format!("{} is not set", dest.password_env)))?;
        Self::with_credentials(config, username, password)
    }

    pub fn with_credentials(
        config: &Config,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            client: create_async_client(&config.crawler)?,
            endpoint: config.destination.endpoint(),
            username: username.into(),
            password: password.into(),
        })
    }
}

#[async_trait]
impl DestinationClient for HttpDestinationClient {
    fn endpoint_id(&self) -> String {
        self.endpoint.clone()
    }

    async fn list_page(
        &self,
        page: usize,
        page_size: usize,
    ) -> std::result::Result<Page, FetchError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("per_page", page_size.to_string()),
                ("page", page.to_string()),
                ("context", "edit".to_string()),
            ])
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;

        if response.status() == StatusCode::BAD_REQUEST {
            return Ok(Page::OutOfRange);
        }
        let items: Vec<Value> = check_status(response)?
            .json()
            .await
            .map_err(|e| FetchError::Malformed(e.to_string()))?;

        let received = items.len();
        let mut entries = Vec::with_capacity(received);
        for item in items {
            let id = item.get("id").cloned().unwrap_or(Value::Null);
            match serde_json::from_value::<RemoteListing>(item) {
                Ok(listing) => entries.extend(listing.into_entry()),
                Err(e) => log::warn!("Page {page}: skipping undecodable listing {id}: {e}"),
            }
        }
        if entries.len() < received {
            log::debug!(
                "Page {page}: {} of {received} listings without a usable source URL",
                received - entries.len()
            );
        }
        Ok(Page::Items { entries, received })
    }

    async fn create_or_update(
        &self,
        listing: &ListingPayload,
    ) -> std::result::Result<u64, FetchError> {
        let url = match listing.destination_id {
            Some(id) => format!("{}/{}", self.endpoint, id),
            None => self.endpoint.clone(),
        };

        let mut body = json!({
            "title": listing.title,
            "acf": {
                "senior_place_url": listing.source_url,
                "address": listing.address,
                "city": listing.city,
                "state": listing.region,
                "zip": listing.postal,
                "price": listing.price,
                "care_types": listing.care_types.iter().map(CareType::as_str).collect::<Vec<_>>(),
                "description": listing.description,
                "photos": listing.image_url,
            },
        });
        if listing.destination_id.is_none() {
            body["status"] = json!("draft");
        }

        let response = self
            .client
            .post(&url)
            .json(&body)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;

        let created: Created = check_status(response)?
            .json()
            .await
            .map_err(|e| FetchError::Malformed(e.to_string()))?;
        Ok(created.id)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::TimeZone;
    use wiremock::matchers::{basic_auth, body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[test]
    fn remote_listing_maps_to_entry() {
        let remote: RemoteListing = serde_json::from_value(json!({
            "id": 42,
            "modified_gmt": "2024-08-01T12:30:00",
            "acf": {
                "url": "https://src/x",
                "price": 4000,
                "care_types": ["Memory Care", "Bogus"],
                "description": ""
            }
        }))
        .unwrap();

        let entry = remote.into_entry().unwrap();
        assert_eq!(entry.destination_id, 42);
        assert_eq!(entry.source_url, "https://src/x");
        assert_eq!(entry.current_price.as_deref(), Some("4000"));
        assert_eq!(
            entry.current_canonical_types.into_iter().collect::<Vec<_>>(),
            vec![CareType::MemoryCare]
        );
        assert_eq!(
            entry.destination_modified_at,
            Some(Utc.with_ymd_and_hms(2024, 8, 1, 12, 30, 0).unwrap())
        );
        assert!(entry.current_description.is_none());
    }

    #[test]
    fn listing_without_source_url_is_skipped() {
        let remote: RemoteListing =
            serde_json::from_value(json!({ "id": 7, "acf": { "price": "100" } })).unwrap();
        assert!(remote.into_entry().is_none());
    }

    #[test]
    fn false_and_null_acf_fields_read_as_empty() {
        for empty in [json!(false), json!(null), json!("")] {
            let remote: RemoteListing = serde_json::from_value(json!({
                "id": 5,
                "acf": {
                    "senior_place_url": "https://src/y",
                    "care_types": empty.clone(),
                    "description": empty.clone(),
                    "price": empty
                }
            }))
            .unwrap();

            let entry = remote.into_entry().unwrap();
            assert!(entry.current_canonical_types.is_empty());
            assert!(entry.current_description.is_none());
            assert!(entry.current_price.is_none());
        }
    }

    #[test]
    fn lone_care_type_string_is_a_list() {
        let remote: RemoteListing = serde_json::from_value(json!({
            "id": 6,
            "acf": { "url": "https://src/z", "care_types": "Home Care" }
        }))
        .unwrap();
        assert_eq!(
            remote.into_entry().unwrap().current_canonical_types,
            BTreeSet::from([CareType::HomeCare])
        );
    }

    #[test]
    fn source_url_falls_back_to_post_meta() {
        let remote: RemoteListing = serde_json::from_value(json!({
            "id": 8,
            "acf": [],
            "meta": { "_senior_place_url": ["https://src/meta"] }
        }))
        .unwrap();
        assert_eq!(remote.into_entry().unwrap().source_url, "https://src/meta");

        let remote: RemoteListing = serde_json::from_value(json!({
            "id": 9,
            "acf": { "senior_place_url": false },
            "meta": { "_senior_place_url": "https://src/meta2" }
        }))
        .unwrap();
        assert_eq!(remote.into_entry().unwrap().source_url, "https://src/meta2");
    }

    #[test]
    fn acf_url_wins_over_post_meta() {
        let remote: RemoteListing = serde_json::from_value(json!({
            "id": 10,
            "acf": { "senior_place_url": "https://src/acf" },
            "meta": { "_senior_place_url": "https://src/meta" }
        }))
        .unwrap();
        assert_eq!(remote.into_entry().unwrap().source_url, "https://src/acf");
    }

    const LISTING_PATH: &str = "/wp-json/wp/v2/listing";

    fn client_for(server: &MockServer) -> HttpDestinationClient {
        let mut config = Config::default();
        config.destination.base_url = server.uri();
        HttpDestinationClient::with_credentials(&config, "editor", "secret").unwrap()
    }

    async fn page_responds(server: &MockServer, page: &str, response: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path(LISTING_PATH))
            .and(query_param("page", page))
            .respond_with(response)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn list_page_skips_undecodable_listings() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(LISTING_PATH))
            .and(query_param("page", "1"))
            .and(query_param("per_page", "50"))
            .and(query_param("context", "edit"))
            .and(basic_auth("editor", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": 1, "acf": { "senior_place_url": "https://src/a", "care_types": false, "description": false } },
                { "id": "not-a-number", "acf": { "senior_place_url": "https://src/b" } },
                { "id": 3, "acf": [], "meta": { "_senior_place_url": "https://src/c" } },
                { "id": 4, "acf": {} }
            ])))
            .mount(&server)
            .await;

        let page = client_for(&server).list_page(1, 50).await.unwrap();
        let Page::Items { entries, received } = page else {
            panic!("expected a page of items");
        };
        assert_eq!(received, 4);
        let urls: Vec<&str> = entries.iter().map(|e| e.source_url.as_str()).collect();
        assert_eq!(urls, vec!["https://src/a", "https://src/c"]);
    }

    #[tokio::test]
    async fn list_page_maps_http_statuses() {
        let server = MockServer::start().await;
        page_responds(&server, "2", ResponseTemplate::new(400)).await;
        page_responds(&server, "3", ResponseTemplate::new(503)).await;
        page_responds(&server, "4", ResponseTemplate::new(404)).await;
        page_responds(
            &server,
            "5",
            ResponseTemplate::new(429).insert_header("Retry-After", "7"),
        )
        .await;
        page_responds(&server, "6", ResponseTemplate::new(401)).await;
        page_responds(
            &server,
            "7",
            ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"),
        )
        .await;

        let client = client_for(&server);
        assert_eq!(client.list_page(2, 10).await, Ok(Page::OutOfRange));
        assert!(matches!(
            client.list_page(3, 10).await,
            Err(FetchError::Transient(_))
        ));
        assert_eq!(client.list_page(4, 10).await, Err(FetchError::NotFound));
        assert_eq!(
            client.list_page(5, 10).await,
            Err(FetchError::RateLimited {
                retry_after: Some(Duration::from_secs(7))
            })
        );
        assert!(matches!(
            client.list_page(6, 10).await,
            Err(FetchError::Malformed(_))
        ));
        assert!(matches!(
            client.list_page(7, 10).await,
            Err(FetchError::Malformed(_))
        ));
    }

    fn listing(destination_id: Option<u64>) -> ListingPayload {
        ListingPayload {
            destination_id,
            source_url: "https://src/a".into(),
            title: "Casa Alpha".into(),
            address: "1 Main St, Mesa, AZ".into(),
            city: "Mesa".into(),
            region: "AZ".into(),
            postal: "85201".into(),
            price: "4500".into(),
            care_types: BTreeSet::from([CareType::MemoryCare]),
            description: "Quiet home.".into(),
            image_url: String::new(),
        }
    }

    #[tokio::test]
    async fn create_posts_a_draft_and_update_targets_the_record() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(LISTING_PATH))
            .and(body_partial_json(json!({
                "status": "draft",
                "acf": { "senior_place_url": "https://src/a", "care_types": ["Memory Care"] }
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": 77 })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("{LISTING_PATH}/12")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 12 })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert_eq!(client.create_or_update(&listing(None)).await, Ok(77));
        assert_eq!(client.create_or_update(&listing(Some(12))).await, Ok(12));
    }

    #[tokio::test]
    async fn rejected_write_is_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;
        let err = client_for(&server)
            .create_or_update(&listing(None))
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
