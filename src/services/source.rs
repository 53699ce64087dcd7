// src/services/source.rs

//! HTML source connector.
//!
//! Partition pages are walked `page=1..` until a page without listing cards;
//! detail pages are read from `<source_url><detail_suffix>`.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Month, NaiveDate, Utc};
use regex::Regex;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use super::{FetchError, SourceConnector, check_status};
use crate::error::{AppError, Result};
use crate::models::{Config, DetailFields, Partition, RawRecord, SourceSelectors};
use crate::utils::http::create_async_client;
use crate::utils::{RateGate, resolve_url};

const PRICE_PRIMARY: &[&str] = &["monthly base", "base monthly"];
const PRICE_SECONDARY: &[&str] = &["high end", "high-end"];
const SECOND_OCCUPANT: &[&str] = &["second person", "couple", "shared"];

/// Descriptions shorter than this are form noise, not prose.
const MIN_DESCRIPTION_LEN: usize = 50;

struct CompiledSelectors {
    card: Selector,
    title: Selector,
    image: Selector,
    address: Selector,
    attribute_label: Selector,
    attribute_text: Selector,
    attribute_checked: Selector,
    field_label: Selector,
    field_input: Selector,
    description: Selector,
}

impl CompiledSelectors {
    fn compile(s: &SourceSelectors) -> Result<Self> {
        Ok(Self {
            card: parse_selector(&s.card)?,
            title: parse_selector(&s.title)?,
            image: parse_selector(&s.image)?,
            address: parse_selector(&s.address)?,
            attribute_label: parse_selector(&s.attribute_label)?,
            attribute_text: parse_selector(&s.attribute_text)?,
            attribute_checked: parse_selector(&s.attribute_checked)?,
            field_label: parse_selector(&s.field_label)?,
            field_input: parse_selector("input")?,
            description: parse_selector(&s.description)?,
        })
    }
}

fn parse_selector(s: &str) -> Result<Selector> {
    Selector::parse(s).map_err(|e| AppError::selector(s, format!("{e:?}")))
}

/// Scrapes partitions and detail pages over one shared HTTP session.
///
/// The session (client plus login cookies) is established once in
/// [`HttpSourceConnector::connect`] and released when the connector drops.
pub struct HttpSourceConnector {
    client: Client,
    base_url: Url,
    listing_path: String,
    detail_suffix: String,
    page_limit: usize,
    selectors: CompiledSelectors,
    last_updated: Regex,
}

impl HttpSourceConnector {
    /// Build a connector without logging in.
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            client: create_async_client(&config.crawler)?,
            base_url: Url::parse(&config.source.base_url)?,
            listing_path: config.source.listing_path.clone(),
            detail_suffix: config.source.selectors.detail_suffix.clone(),
            page_limit: config.crawler.page_limit(),
            selectors: CompiledSelectors::compile(&config.source.selectors)?,
            last_updated: Regex::new(r"Last updated on ([A-Za-z]+ \d{1,2}, \d{4})")?,
        })
    }

    /// Build a connector and log in when a login path is configured.
    pub async fn connect(config: &Config) -> Result<Self> {
        let connector = Self::new(config)?;
        let Some(login_path) = &config.source.login_path else {
            return Ok(connector);
        };

        let username = std::env::var(&config.source.username_env).map_err(|_| {
            AppError::config(format!("{} is not set", config.source.username_env))
        })?;
        let password = std::env::var(&config.source.password_env).map_err(|_| {
            AppError::config(format!("{} is not set", config.source.password_env))
        })?;
        connector.login(login_path, &username, &password).await?;
        Ok(connector)
    }

    /// Post the login form; the session cookie stays in the client.
    async fn login(&self, login_path: &str, username: &str, password: &str) -> Result<()> {
        let login_url = self.base_url.join(login_path)?;
        let response = self
            .client
            .post(login_url.clone())
            .form(&[("email", username), ("password", password)])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AppError::source(
                "login",
                format!("{} returned HTTP {}", login_url, response.status()),
            ));
        }
        log::info!("Logged in to {}", self.base_url);
        Ok(())
    }

    fn listing_url(&self, partition: &Partition, page: usize) -> std::result::Result<Url, FetchError> {
        let path = self
            .listing_path
            .replace("{partition}", &partition.key)
            .replace("{page}", &page.to_string());
        self.base_url
            .join(&path)
            .map_err(|e| FetchError::Malformed(format!("bad listing url: {e}")))
    }

    /// Detail page for a record URL, ignoring query and known tab suffixes.
    fn detail_url(&self, source_url: &str) -> String {
        let base = source_url.split(['?', '#']).next().unwrap_or(source_url);
        let base = base.trim_end_matches('/');
        let base = ["/details", "/attributes"]
            .iter()
            .find_map(|suffix| base.strip_suffix(suffix))
            .unwrap_or(base);
        format!("{}{}", base.trim_end_matches('/'), self.detail_suffix)
    }

    async fn get_text(&self, url: &str) -> std::result::Result<String, FetchError> {
        let response = self.client.get(url).send().await?;
        let response = check_status(response)?;
        Ok(response.text().await?)
    }

    /// Parse listing cards from one partition page.
    pub fn parse_listing_page(
        &self,
        html: &str,
        page_url: &Url,
        partition: &Partition,
    ) -> Vec<RawRecord> {
        let document = Html::parse_document(html);
        let sel = &self.selectors;
        let mut records = Vec::new();

        for card in document.select(&sel.card) {
            let Some(title_elem) = card.select(&sel.title).next() else {
                continue;
            };
            let title = collapse_whitespace(&title_elem.text().collect::<String>());
            let href = title_elem.value().attr("href").unwrap_or("").trim();
            if href.is_empty() {
                log::debug!("Skipping card without link: {title}");
                continue;
            }

            let image_url = card
                .select(&sel.image)
                .next()
                .and_then(|img| img.value().attr("src"))
                .map(|src| resolve_url(page_url, src))
                .unwrap_or_default();

            let street_address = card
                .select(&sel.address)
                .next()
                .map(|el| element_lines(&el))
                .unwrap_or_default();

            records.push(RawRecord {
                source_url: resolve_url(page_url, href),
                title,
                street_address,
                city: String::new(),
                region_code: partition.key.clone(),
                postal_code: String::new(),
                image_url,
                raw_attribute_labels: self.checked_labels(&card),
            });
        }
        records
    }

    /// Parse the secondary fields of a detail page.
    pub fn parse_detail_page(&self, html: &str) -> DetailFields {
        let document = Html::parse_document(html);
        let root = document.root_element();

        let description = document
            .select(&self.selectors.description)
            .map(|el| el.text().collect::<String>().trim().to_string())
            .find(|text| text.len() > MIN_DESCRIPTION_LEN)
            .unwrap_or_default();

        let page_text = root.text().collect::<Vec<_>>().join(" ");
        let source_last_modified = self
            .last_updated
            .captures(&page_text)
            .and_then(|caps| parse_marker_date(&caps[1]));

        DetailFields {
            price_primary: self.field_value(&root, PRICE_PRIMARY),
            price_secondary: self.field_value(&root, PRICE_SECONDARY),
            second_occupant_fee: self.field_value(&root, SECOND_OCCUPANT),
            description,
            raw_attribute_labels: self.checked_labels(&root),
            source_last_modified,
        }
    }

    /// Text of every checked attribute checkbox under `scope`.
    fn checked_labels(&self, scope: &ElementRef) -> Vec<String> {
        let sel = &self.selectors;
        scope
            .select(&sel.attribute_label)
            .filter(|label| label.select(&sel.attribute_checked).next().is_some())
            .filter_map(|label| label.select(&sel.attribute_text).next())
            .map(|text| collapse_whitespace(&text.text().collect::<String>()))
            .filter(|text| !text.is_empty())
            .collect()
    }

    /// Value of the first input whose label contains one of `needles`.
    fn field_value(&self, scope: &ElementRef, needles: &[&str]) -> String {
        scope
            .select(&self.selectors.field_label)
            .find(|label| {
                let text = label.text().collect::<String>().to_lowercase();
                needles.iter().any(|n| text.contains(n))
            })
            .and_then(|label| label.select(&self.selectors.field_input).next())
            .and_then(|input| input.value().attr("value"))
            .map(|v| v.trim().to_string())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SourceConnector for HttpSourceConnector {
    async fn fetch_partition(
        &self,
        partition: &Partition,
        gate: &RateGate,
    ) -> std::result::Result<Vec<RawRecord>, FetchError> {
        let mut seen = HashSet::new();
        let mut records = Vec::new();

        for page in 1..=self.page_limit {
            let url = self.listing_url(partition, page)?;
            gate.acquire().await;
            let html = self.get_text(url.as_str()).await?;
            let batch = self.parse_listing_page(&html, &url, partition);
            if batch.is_empty() {
                return Ok(records);
            }
            log::debug!("{} page {}: {} listings", partition.key, page, batch.len());
            records.extend(
                batch
                    .into_iter()
                    .filter(|r| seen.insert(r.source_url.clone())),
            );
        }

        log::warn!(
            "{}: stopped at the {}-page limit; later pages were not harvested",
            partition.key,
            self.page_limit
        );
        Ok(records)
    }

    async fn fetch_details(&self, source_url: &str) -> std::result::Result<DetailFields, FetchError> {
        let html = self.get_text(&self.detail_url(source_url)).await?;
        let details = self.parse_detail_page(&html);
        if details == DetailFields::default() {
            return Err(FetchError::Malformed(format!(
                "no detail fields found for {source_url}"
            )));
        }
        Ok(details)
    }
}

/// Text nodes of an element, one trimmed line each.
fn element_lines(el: &ElementRef) -> String {
    el.text()
        .flat_map(str::lines)
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// "Jul 27, 2024" or "July 4, 2023" as midnight UTC.
fn parse_marker_date(text: &str) -> Option<DateTime<Utc>> {
    let mut parts = text.split_whitespace();
    let month: Month = parts.next()?.parse().ok()?;
    let day: u32 = parts.next()?.trim_end_matches(',').parse().ok()?;
    let year: i32 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    let date = NaiveDate::from_ymd_opt(year, month.number_from_month(), day)?;
    Some(date.and_hms_opt(0, 0, 0)?.and_utc())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::TimeZone;
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    const LISTING_PAGE: &str = r#"
        <html><body>
          <div class="flex space-x-6">
            <img src="/img/1.jpg">
            <h3><a href="/show/abc-123">  Desert   Rose Home </a></h3>
            <div class="text-sm text-gray-500">
              <span>123 Main St</span>
              <span>Phoenix</span>
              <span>AZ 85001</span>
            </div>
            <label class="inline-flex"><input type="checkbox" checked><div class="ml-2">Directed Care</div></label>
            <label class="inline-flex"><input type="checkbox"><div class="ml-2">Memory Care</div></label>
          </div>
          <div class="flex space-x-6">
            <h3><a>No link here</a></h3>
          </div>
        </body></html>
    "#;

    const DETAIL_PAGE: &str = r#"
        <html><body>
          <label>Monthly Base Price <input value=" $4,500 "></label>
          <label>High End Price <input value="6,000"></label>
          <label>Second Person Fee <input value="800"></label>
          <textarea>short</textarea>
          <textarea>A warm, family-run home in central Phoenix with round-the-clock caregivers.</textarea>
          <div>Last updated on Jul 27, 2024</div>
          <label class="inline-flex"><input type="checkbox" checked><div class="ml-2">Assisted Living Home</div></label>
          <label class="inline-flex"><input type="checkbox" checked><div class="ml-2">Hospice</div></label>
        </body></html>
    "#;

    fn connector() -> HttpSourceConnector {
        HttpSourceConnector::new(&Config::default()).unwrap()
    }

    #[test]
    fn parses_listing_cards() {
        let conn = connector();
        let page_url = Url::parse("https://app.example.com/communities?page=1").unwrap();
        let records =
            conn.parse_listing_page(LISTING_PAGE, &page_url, &Partition::new("AZ", "Arizona"));

        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.source_url, "https://app.example.com/show/abc-123");
        assert_eq!(r.title, "Desert Rose Home");
        assert_eq!(r.image_url, "https://app.example.com/img/1.jpg");
        assert_eq!(r.street_address, "123 Main St\nPhoenix\nAZ 85001");
        assert_eq!(r.region_code, "AZ");
        assert_eq!(r.raw_attribute_labels, vec!["Directed Care"]);
    }

    #[test]
    fn parses_detail_fields() {
        let details = connector().parse_detail_page(DETAIL_PAGE);
        assert_eq!(details.price_primary, "$4,500");
        assert_eq!(details.price_secondary, "6,000");
        assert_eq!(details.second_occupant_fee, "800");
        assert!(details.description.starts_with("A warm, family-run home"));
        assert_eq!(
            details.raw_attribute_labels,
            vec!["Assisted Living Home", "Hospice"]
        );
        assert_eq!(
            details.source_last_modified,
            Some(Utc.with_ymd_and_hms(2024, 7, 27, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn detail_url_strips_tabs_and_query() {
        let conn = connector();
        assert_eq!(
            conn.detail_url("https://app.example.com/show/abc/details?x=1"),
            "https://app.example.com/show/abc/attributes"
        );
        assert_eq!(
            conn.detail_url("https://app.example.com/show/abc/"),
            "https://app.example.com/show/abc/attributes"
        );
    }

    #[test]
    fn marker_dates_accept_full_month_names() {
        assert_eq!(
            parse_marker_date("July 4, 2023"),
            Some(Utc.with_ymd_and_hms(2023, 7, 4, 0, 0, 0).unwrap())
        );
        assert_eq!(
            parse_marker_date("Sep 30, 2024"),
            Some(Utc.with_ymd_and_hms(2024, 9, 30, 0, 0, 0).unwrap())
        );
        assert!(parse_marker_date("Smarch 4, 2023").is_none());
        assert!(parse_marker_date("Feb 30, 2023").is_none());
    }

    #[test]
    fn invalid_selector_is_reported() {
        let mut config = Config::default();
        config.source.selectors.card = "[[nope".into();
        assert!(matches!(
            HttpSourceConnector::new(&config),
            Err(AppError::Selector { .. })
        ));
    }

    const SECOND_PAGE: &str = r#"
        <html><body>
          <div class="flex space-x-6">
            <h3><a href="/show/def-456">Juniper House</a></h3>
          </div>
          <div class="flex space-x-6">
            <h3><a href="/show/abc-123">Desert Rose Home</a></h3>
          </div>
        </body></html>
    "#;

    fn connector_for(server: &MockServer) -> HttpSourceConnector {
        let mut config = Config::default();
        config.source.base_url = server.uri();
        HttpSourceConnector::new(&config).unwrap()
    }

    async fn listing_page(server: &MockServer, page: &str, body: &str) {
        Mock::given(method("GET"))
            .and(path("/communities"))
            .and(query_param("state", "AZ"))
            .and(query_param("page", page))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn partition_pages_are_walked_until_empty_and_paced() {
        let server = MockServer::start().await;
        listing_page(&server, "1", LISTING_PAGE).await;
        listing_page(&server, "2", SECOND_PAGE).await;
        listing_page(&server, "3", "<html><body></body></html>").await;

        let gate = RateGate::new(Duration::from_millis(150));
        let started = std::time::Instant::now();
        let records = connector_for(&server)
            .fetch_partition(&Partition::new("AZ", "Arizona"), &gate)
            .await
            .unwrap();

        let urls: Vec<String> = records.into_iter().map(|r| r.source_url).collect();
        assert_eq!(
            urls,
            vec![
                format!("{}/show/abc-123", server.uri()),
                format!("{}/show/def-456", server.uri()),
            ]
        );
        // three page requests, each behind the gate
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn partition_paging_stops_at_the_page_limit() {
        let server = MockServer::start().await;
        listing_page(&server, "1", LISTING_PAGE).await;
        Mock::given(method("GET"))
            .and(path("/communities"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(SECOND_PAGE))
            .expect(0)
            .mount(&server)
            .await;

        let mut config = Config::default();
        config.source.base_url = server.uri();
        config.crawler.max_pages_per_partition = 1;
        let records = HttpSourceConnector::new(&config)
            .unwrap()
            .fetch_partition(&Partition::new("AZ", "Arizona"), &RateGate::unpaced())
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn detail_fetch_maps_http_statuses() {
        let server = MockServer::start().await;
        let detail = |id: &str, response: ResponseTemplate| {
            Mock::given(method("GET"))
                .and(path(format!("/show/{id}/attributes")))
                .respond_with(response)
        };
        detail("ok", ResponseTemplate::new(200).set_body_string(DETAIL_PAGE))
            .mount(&server)
            .await;
        detail("gone", ResponseTemplate::new(404)).mount(&server).await;
        detail("busy", ResponseTemplate::new(503)).mount(&server).await;
        detail(
            "slow-down",
            ResponseTemplate::new(429).insert_header("Retry-After", "3"),
        )
        .mount(&server)
        .await;
        detail("blank", ResponseTemplate::new(200).set_body_string("<html></html>"))
            .mount(&server)
            .await;

        let conn = connector_for(&server);
        let url = |id: &str| format!("{}/show/{id}/details", server.uri());

        let details = conn.fetch_details(&url("ok")).await.unwrap();
        assert_eq!(details.price_primary, "$4,500");
        assert_eq!(conn.fetch_details(&url("gone")).await, Err(FetchError::NotFound));
        assert!(matches!(
            conn.fetch_details(&url("busy")).await,
            Err(FetchError::Transient(_))
        ));
        assert_eq!(
            conn.fetch_details(&url("slow-down")).await,
            Err(FetchError::RateLimited {
                retry_after: Some(Duration::from_secs(3))
            })
        );
        assert!(matches!(
            conn.fetch_details(&url("blank")).await,
            Err(FetchError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn login_posts_credentials_as_a_form() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .and(body_string_contains("email=ops%40example.com"))
            .and(body_string_contains("password=hunter2"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        connector_for(&server)
            .login("/login", "ops@example.com", "hunter2")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn rejected_login_is_a_source_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = connector_for(&server)
            .login("/login", "ops@example.com", "wrong")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Source { .. }));
    }
}
