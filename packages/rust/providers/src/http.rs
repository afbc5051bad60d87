//! HTTP adapters for the company and people provider contracts.
//!
//! Endpoints, relative to the configured base URL:
//! - `GET companies/resolve?name=&domain=`
//! - `GET companies/{id}/employees?active=true&cursor=&limit=`
//! - `GET profiles/{id}`

use std::time::Duration;

use async_trait::async_trait;
use buyergroup_shared::{BuyerGroupError, ProviderConfig, Result, provider_api_key};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::contract::{
    CollectedProfile, CompanyCandidate, CompanyDataProvider, PeopleDataProvider, SearchPage,
};

/// User-Agent string for provider requests.
const USER_AGENT: &str = concat!("buyergroup/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// ApiClient
// ---------------------------------------------------------------------------

/// Authenticated JSON client bound to one provider's base URL.
#[derive(Debug, Clone)]
struct ApiClient {
    label: String,
    base: Url,
    api_key: String,
    client: Client,
}

/// What a non-success status means for one endpoint.
enum Fallback<T> {
    /// Map the status through the shared status table.
    Error,
    /// Treat 404 as this value.
    NotFoundAs(T),
}

impl ApiClient {
    fn new(label: &str, base_url: &str, api_key: String, timeout: Duration) -> Result<Self> {
        let base = Url::parse(base_url).map_err(|e| {
            BuyerGroupError::config(format!("invalid {label} provider base_url {base_url:?}: {e}"))
        })?;
        if base.cannot_be_a_base() {
            return Err(BuyerGroupError::config(format!(
                "{label} provider base_url {base_url:?} cannot be a base URL"
            )));
        }

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| BuyerGroupError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            label: label.to_string(),
            base,
            api_key,
            client,
        })
    }

    /// Build an endpoint URL from raw path segments; segments are percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| BuyerGroupError::config(format!("{} base URL is opaque", self.label)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url, fallback: Fallback<T>) -> Result<T> {
        debug!(provider = %self.label, %url, "GET");
        let response = self
            .client
            .get(url.clone())
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| self.transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            return match fallback {
                Fallback::NotFoundAs(value) if status == StatusCode::NOT_FOUND => Ok(value),
                _ => Err(self.status_error(status, &response)),
            };
        }

        let body = response.text().await.map_err(|e| self.transport_error(&e))?;
        serde_json::from_str(&body).map_err(|e| {
            BuyerGroupError::validation(format!(
                "{} provider returned a malformed payload for {url}: {e}",
                self.label
            ))
        })
    }

    fn transport_error(&self, err: &reqwest::Error) -> BuyerGroupError {
        let kind = if err.is_timeout() {
            "timeout"
        } else if err.is_connect() {
            "connection failed"
        } else {
            "request failed"
        };
        BuyerGroupError::unavailable(&self.label, format!("{kind}: {err}"))
    }

    fn status_error(&self, status: StatusCode, response: &Response) -> BuyerGroupError {
        status_to_error(&self.label, status, retry_after(response))
    }
}

/// Shared status table for every endpoint.
fn status_to_error(
    provider: &str,
    status: StatusCode,
    retry_after: Option<Duration>,
) -> BuyerGroupError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        BuyerGroupError::rate_limited(provider, retry_after)
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        BuyerGroupError::unavailable(provider, format!("HTTP {status}"))
    } else {
        BuyerGroupError::ProviderRejected {
            provider: provider.to_string(),
            status: status.as_u16(),
        }
    }
}

/// `Retry-After` in delta-seconds form. HTTP-date values are ignored.
fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn client_for(label: &str, config: &ProviderConfig, api_key: String) -> Result<ApiClient> {
    let base_url = config.base_url.as_deref().ok_or_else(|| {
        BuyerGroupError::config(format!(
            "providers.{label}.base_url is not set (use --snapshot for offline runs)"
        ))
    })?;
    ApiClient::new(
        label,
        base_url,
        api_key,
        Duration::from_secs(config.timeout_secs),
    )
}

// ---------------------------------------------------------------------------
// HttpCompanyProvider
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ResolveResponse {
    #[serde(default)]
    candidates: Vec<CompanyCandidate>,
}

/// Company data provider over HTTP.
#[derive(Debug, Clone)]
pub struct HttpCompanyProvider {
    api: ApiClient,
}

impl HttpCompanyProvider {
    pub fn new(base_url: &str, api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            api: ApiClient::new("company", base_url, api_key.into(), timeout)?,
        })
    }

    /// Build from `[providers.company]`, reading the key from its env var.
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        let key = provider_api_key("company", config)?;
        Ok(Self {
            api: client_for("company", config, key)?,
        })
    }
}

#[async_trait]
impl CompanyDataProvider for HttpCompanyProvider {
    fn name(&self) -> &str {
        &self.api.label
    }

    async fn resolve(
        &self,
        name: Option<&str>,
        domain: Option<&str>,
    ) -> Result<Vec<CompanyCandidate>> {
        let mut url = self.api.endpoint(&["companies", "resolve"])?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(name) = name {
                query.append_pair("name", name);
            }
            if let Some(domain) = domain {
                query.append_pair("domain", domain);
            }
        }
        let response: ResolveResponse = self
            .api
            .get_json(url, Fallback::NotFoundAs(ResolveResponse { candidates: vec![] }))
            .await?;
        Ok(response.candidates)
    }
}

// ---------------------------------------------------------------------------
// HttpPeopleProvider
// ---------------------------------------------------------------------------

/// People data provider over HTTP.
#[derive(Debug, Clone)]
pub struct HttpPeopleProvider {
    api: ApiClient,
    page_size: u32,
}

impl HttpPeopleProvider {
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        timeout: Duration,
        page_size: u32,
    ) -> Result<Self> {
        Ok(Self {
            api: ApiClient::new("people", base_url, api_key.into(), timeout)?,
            page_size: page_size.max(1),
        })
    }

    /// Build from `[providers.people]`, reading the key from its env var.
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        let key = provider_api_key("people", config)?;
        Ok(Self {
            api: client_for("people", config, key)?,
            page_size: config.page_size.max(1),
        })
    }
}

#[async_trait]
impl PeopleDataProvider for HttpPeopleProvider {
    fn name(&self) -> &str {
        &self.api.label
    }

    async fn search_active_employees(
        &self,
        company_id: &str,
        cursor: Option<&str>,
    ) -> Result<SearchPage> {
        let mut url = self.api.endpoint(&["companies", company_id, "employees"])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("active", "true");
            query.append_pair("limit", &self.page_size.to_string());
            if let Some(cursor) = cursor {
                query.append_pair("cursor", cursor);
            }
        }
        self.api.get_json(url, Fallback::Error).await
    }

    async fn collect_profile(&self, profile_id: &str) -> Result<CollectedProfile> {
        let url = self.api.endpoint(&["profiles", profile_id])?;
        match self.api.get_json(url, Fallback::Error).await {
            Err(BuyerGroupError::ProviderRejected { status: 404, .. }) => {
                Err(BuyerGroupError::malformed(profile_id, "profile not found"))
            }
            Err(BuyerGroupError::Validation { message }) => {
                Err(BuyerGroupError::malformed(profile_id, message))
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn company(server: &MockServer) -> HttpCompanyProvider {
        HttpCompanyProvider::new(&server.uri(), "test-key", Duration::from_secs(5))
            .expect("build company provider")
    }

    fn people(server: &MockServer) -> HttpPeopleProvider {
        HttpPeopleProvider::new(&server.uri(), "test-key", Duration::from_secs(5), 2)
            .expect("build people provider")
    }

    #[tokio::test]
    async fn resolve_sends_query_and_bearer() {
        let server = MockServer::start().await;
        let body = std::fs::read_to_string("../../../fixtures/http/resolve-acme.json")
            .expect("read resolve fixture");

        Mock::given(method("GET"))
            .and(path("/companies/resolve"))
            .and(query_param("domain", "acme.io"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let candidates = company(&server)
            .resolve(None, Some("acme.io"))
            .await
            .expect("resolve");
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].id, "co-acme");
        assert!(candidates[0].relevance > candidates[1].relevance);
    }

    #[tokio::test]
    async fn resolve_404_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/companies/resolve"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let candidates = company(&server)
            .resolve(Some("Nobody Inc"), None)
            .await
            .expect("404 maps to empty list");
        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn rate_limit_carries_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/companies/co-acme/employees"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
            .mount(&server)
            .await;

        let err = people(&server)
            .search_active_employees("co-acme", None)
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
    }

    #[tokio::test]
    async fn server_errors_are_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/companies/resolve"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = company(&server).resolve(Some("Acme"), None).await.unwrap_err();
        assert!(matches!(err, BuyerGroupError::ProviderUnavailable { .. }));
    }

    #[tokio::test]
    async fn auth_failures_are_rejections() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/profiles/p-1"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = people(&server).collect_profile("p-1").await.unwrap_err();
        assert!(matches!(
            err,
            BuyerGroupError::ProviderRejected { status: 401, .. }
        ));
        assert!(!err.is_transient());
        assert!(!err.is_permanent());
    }

    #[tokio::test]
    async fn search_pages_with_cursor() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/companies/co-acme/employees"))
            .and(query_param("active", "true"))
            .and(query_param("limit", "2"))
            .and(query_param("cursor", "page-2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"profile_ids": ["p-3"], "next_cursor": null}"#,
            ))
            .mount(&server)
            .await;

        let page = people(&server)
            .search_active_employees("co-acme", Some("page-2"))
            .await
            .expect("search");
        assert_eq!(page.profile_ids, vec!["p-3".to_string()]);
        assert!(page.next_cursor.is_none());
    }

    #[tokio::test]
    async fn collect_profile_decodes_fixture() {
        let server = MockServer::start().await;
        let body = std::fs::read_to_string("../../../fixtures/http/profile-jane.json")
            .expect("read profile fixture");
        Mock::given(method("GET"))
            .and(path("/profiles/p-jane"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let profile = people(&server).collect_profile("p-jane").await.expect("collect");
        assert_eq!(profile.full_name, "Jane Rivera");
        assert_eq!(profile.experience.len(), 2);
        assert_eq!(
            profile.emails.professional.as_deref(),
            Some("jane.rivera@acme.io")
        );
    }

    #[tokio::test]
    async fn missing_or_garbled_profiles_are_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/profiles/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/profiles/garbled"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{not json"))
            .mount(&server)
            .await;

        let provider = people(&server);
        let err = provider.collect_profile("gone").await.unwrap_err();
        assert!(matches!(err, BuyerGroupError::MalformedProfile { .. }));
        let err = provider.collect_profile("garbled").await.unwrap_err();
        assert!(matches!(err, BuyerGroupError::MalformedProfile { .. }));
    }

    #[test]
    fn base_url_with_path_keeps_prefix() {
        let api = ApiClient::new(
            "people",
            "https://api.example.com/v2",
            "k".into(),
            Duration::from_secs(1),
        )
        .expect("client");
        let url = api.endpoint(&["profiles", "a/b"]).expect("endpoint");
        assert_eq!(url.as_str(), "https://api.example.com/v2/profiles/a%2Fb");
    }

    #[test]
    fn missing_base_url_is_config_error() {
        let config = ProviderConfig::default();
        let err = client_for("people", &config, "k".into()).unwrap_err();
        assert!(matches!(err, BuyerGroupError::Config { .. }));
    }
}
