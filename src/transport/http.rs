//! HTTP transport for the MultiFlexi REST API.
//!
//! Records live at `{api_url}/{singular}/{id}.json`, collections at
//! `{api_url}/{plural}.json`. Records are created by POSTing to
//! `{api_url}/{singular}/` and updated by POSTing to their record URL.

use async_trait::async_trait;
use reqwest::{header, Client, Method, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::error::{BackendError, MultiflexiError, Result};
use crate::resource::{render_scalar, values_match, IdentityKey, Record, ResourceKind};

use super::{
    interpret_list, interpret_lookup, parse_body, Invocation, Lookup, MutationRequest, Transport,
    Verb, Verbosity,
};

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Maximum number of attempts for read requests.
const MAX_RETRIES: u32 = 3;

/// Delay between retries in milliseconds.
const RETRY_DELAY_MS: u64 = 1000;

/// Wait after a 429 that carries no usable `Retry-After` header.
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// MultiFlexi REST API client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    /// HTTP client.
    client: Client,
    /// API base URL without trailing slash.
    base_url: String,
    /// Basic auth user.
    username: String,
    /// Basic auth password.
    password: String,
    /// Diagnostics level.
    verbosity: Verbosity,
    /// Base delay between read retries.
    retry_delay: Duration,
}

impl HttpTransport {
    /// Creates a new API client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(
        base_url: &str,
        username: &str,
        password: &str,
        verbosity: Verbosity,
    ) -> Result<Self> {
        Ok(Self {
            client: build_client(DEFAULT_TIMEOUT_SECS)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: password.to_string(),
            verbosity,
            retry_delay: Duration::from_millis(RETRY_DELAY_MS),
        })
    }

    /// Replaces the client with one using a custom timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_timeout(mut self, timeout_secs: u64) -> Result<Self> {
        self.client = build_client(timeout_secs)?;
        Ok(self)
    }

    /// Sets the base delay between read retries.
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    fn record_url(&self, kind: ResourceKind, id: &Value) -> String {
        format!(
            "{}/{}/{}.json",
            self.base_url,
            kind.profile().singular,
            render_scalar(id)
        )
    }

    fn collection_url(&self, kind: ResourceKind) -> String {
        format!("{}/{}.json", self.base_url, kind.profile().plural)
    }

    fn create_url(&self, kind: ResourceKind) -> String {
        format!("{}/{}/", self.base_url, kind.profile().singular)
    }

    /// Performs a GET, retrying transient failures. `None` means 404.
    async fn get(&self, url: &str) -> Result<Option<Value>> {
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let delay = match &last_error {
                    Some(MultiflexiError::Backend(BackendError::RateLimited {
                        retry_after_secs,
                    })) => Duration::from_secs(*retry_after_secs),
                    _ => self.retry_delay * attempt,
                };
                debug!("Retry attempt {attempt} of {MAX_RETRIES} for {url}");
                tokio::time::sleep(delay).await;
            }

            match self.send(Method::GET, url, None).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => {
                    warn!("Transient failure reading {url}: {e}");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| BackendError::network("Max retries exceeded").into()))
    }

    /// Sends a single request. `None` means the backend answered 404.
    async fn send(&self, method: Method, url: &str, body: Option<&Record>) -> Result<Option<Value>> {
        if self.verbosity.logs_requests() {
            debug!("{method} {url}");
        }
        if let (Some(body), true) = (body, self.verbosity.logs_payloads()) {
            let payload = Value::Object(body.clone());
            trace!("Request body: {payload}");
        }

        let mut request = self
            .client
            .request(method, url)
            .header(header::ACCEPT, "application/json")
            .basic_auth(&self.username, Some(&self.password));
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| BackendError::network(format!("Request failed: {e}")))?;

        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            return Err(BackendError::RateLimited {
                retry_after_secs: retry_after,
            }
            .into());
        }

        let text = response
            .text()
            .await
            .map_err(|e| BackendError::network(format!("Failed to read response: {e}")))?;

        if self.verbosity.logs_payloads() {
            trace!("Response {status}: {text}");
        }

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let message = if text.trim().is_empty() {
                String::from("Invalid API credentials")
            } else {
                text.trim().to_string()
            };
            return Err(BackendError::AuthenticationFailed { message }.into());
        }

        if !status.is_success() {
            return Err(BackendError::api_error(status.as_u16(), text.trim()).into());
        }

        parse_body(&text).map(Some)
    }
}

fn build_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| BackendError::network(format!("Failed to create HTTP client: {e}")).into())
}

#[async_trait]
impl Transport for HttpTransport {
    async fn lookup(&self, kind: ResourceKind, key: &IdentityKey) -> Result<Lookup> {
        if key.is_id() {
            let url = self.record_url(kind, &key.value);
            return match self.get(&url).await? {
                Some(value) => interpret_lookup(value),
                None => Ok(Lookup::NotFound),
            };
        }

        // The API only addresses records by id; other keys are matched client-side.
        let profile = kind.profile();
        let found = self.list(kind).await?.into_iter().find(|record| {
            record
                .get(&key.name)
                .is_some_and(|v| values_match(profile, &key.name, &key.value, v))
        });

        Ok(found.map_or(Lookup::NotFound, Lookup::Found))
    }

    async fn list(&self, kind: ResourceKind) -> Result<Vec<Record>> {
        let url = self.collection_url(kind);
        match self.get(&url).await? {
            Some(value) => interpret_list(value),
            None => Ok(Vec::new()),
        }
    }

    async fn mutate(&self, request: &MutationRequest) -> Result<Value> {
        let kind = request.kind;
        let (method, url) = match (request.verb, &request.target) {
            (Verb::Create, _) => (Method::POST, self.create_url(kind)),
            (Verb::Update, Some(id)) => (Method::POST, self.record_url(kind, id)),
            (Verb::Remove, Some(id)) => (Method::DELETE, self.record_url(kind, id)),
            (verb, None) => {
                return Err(MultiflexiError::internal(format!(
                    "{verb} of {kind} requires a record identifier"
                )));
            }
        };

        let body = (request.verb != Verb::Remove).then_some(&request.fields);
        match self.send(method, &url, body).await? {
            Some(value) => Ok(value),
            None => Err(BackendError::api_error(404, format!("{kind} not found at {url}")).into()),
        }
    }

    async fn invoke(&self, invocation: &Invocation) -> Result<Value> {
        Err(BackendError::Unsupported {
            transport: String::from("http"),
            operation: format!("'{invocation}'"),
        }
        .into())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport(server: &MockServer) -> HttpTransport {
        HttpTransport::new(&server.uri(), "admin", "secret", Verbosity::Normal)
            .expect("client")
            .with_retry_delay(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_lookup_by_id_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/company/5.json"))
            .and(header_exists("authorization"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "id": 5, "name": "Acme" })),
            )
            .mount(&server)
            .await;

        let lookup = transport(&server)
            .lookup(ResourceKind::Company, &IdentityKey::new("id", 5))
            .await
            .expect("lookup");

        let record = lookup.into_record().expect("found");
        assert_eq!(record.get("name"), Some(&json!("Acme")));
    }

    #[tokio::test]
    async fn test_lookup_404_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/app/9.json"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let lookup = transport(&server)
            .lookup(ResourceKind::Application, &IdentityKey::new("id", 9))
            .await
            .expect("lookup");
        assert_eq!(lookup, Lookup::NotFound);
    }

    #[tokio::test]
    async fn test_lookup_by_name_filters_collection() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": 1, "login": "admin" },
                { "id": 2, "login": "jdoe" }
            ])))
            .mount(&server)
            .await;

        let transport = transport(&server);
        let found = transport
            .lookup(ResourceKind::User, &IdentityKey::new("login", "jdoe"))
            .await
            .expect("lookup")
            .into_record()
            .expect("found");
        assert_eq!(found.get("id"), Some(&json!(2)));

        let missing = transport
            .lookup(ResourceKind::User, &IdentityKey::new("login", "nobody"))
            .await
            .expect("lookup");
        assert_eq!(missing, Lookup::NotFound);
    }

    #[tokio::test]
    async fn test_server_error_surfaces_body_verbatim() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/topic/1.json"))
            .respond_with(ResponseTemplate::new(500).set_body_string("SQLSTATE[HY000] gone away"))
            .mount(&server)
            .await;

        let err = transport(&server)
            .lookup(ResourceKind::Topic, &IdentityKey::new("id", 1))
            .await
            .expect_err("should fail");
        assert!(err.to_string().contains("SQLSTATE[HY000] gone away"));
        assert_eq!(err.return_code(), Some(500));
    }

    #[tokio::test]
    async fn test_unauthorized_maps_to_authentication_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jobs.json"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = transport(&server)
            .list(ResourceKind::Job)
            .await
            .expect_err("should fail");
        assert!(matches!(
            err,
            MultiflexiError::Backend(BackendError::AuthenticationFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_rate_limited_reads_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/topics.json"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/topics.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": 1 }])))
            .mount(&server)
            .await;

        let records = transport(&server)
            .list(ResourceKind::Topic)
            .await
            .expect("list");
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn test_retry_waits_for_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/apps.json"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "1"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/apps.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let started = std::time::Instant::now();
        transport(&server)
            .list(ResourceKind::Application)
            .await
            .expect("list");
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_trace_verbosity_logs_request_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/topic/2.json"))
            .and(body_json(json!({ "name": "Payroll" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 2 })))
            .expect(1)
            .mount(&server)
            .await;

        let transport = HttpTransport::new(&server.uri(), "admin", "secret", Verbosity::Trace)
            .expect("client");
        let mut fields = Record::new();
        fields.insert(String::from("name"), json!("Payroll"));
        let response = transport
            .mutate(&MutationRequest::update(ResourceKind::Topic, json!(2), fields))
            .await
            .expect("update");
        assert_eq!(response, json!({ "id": 2 }));
    }

    #[tokio::test]
    async fn test_create_posts_fields() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/company/"))
            .and(body_json(json!({ "name": "Acme", "code": "ACME" })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": 7 })))
            .expect(1)
            .mount(&server)
            .await;

        let mut fields = Record::new();
        fields.insert(String::from("name"), json!("Acme"));
        fields.insert(String::from("code"), json!("ACME"));

        let response = transport(&server)
            .mutate(&MutationRequest::create(ResourceKind::Company, fields))
            .await
            .expect("create");
        assert_eq!(response, json!({ "id": 7 }));
    }

    #[tokio::test]
    async fn test_writes_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/user/3.json"))
            .respond_with(ResponseTemplate::new(429))
            .expect(1)
            .mount(&server)
            .await;

        let mut fields = Record::new();
        fields.insert(String::from("email"), json!("x@y.z"));
        let result = transport(&server)
            .mutate(&MutationRequest::update(ResourceKind::User, json!(3), fields))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_remove_issues_delete() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/company/4.json"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let response = transport(&server)
            .mutate(&MutationRequest::remove(ResourceKind::Company, json!(4)))
            .await
            .expect("remove");
        assert_eq!(response, Value::Null);
    }

    #[tokio::test]
    async fn test_invoke_is_unsupported() {
        let server = MockServer::start().await;
        let err = transport(&server)
            .invoke(&Invocation::new(["queue", "truncate"]))
            .await
            .expect_err("unsupported");
        assert!(err.to_string().contains("not supported by the http transport"));
    }
}
