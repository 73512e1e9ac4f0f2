//! Remote request plumbing for the repository API.
//!
//! Actions and monitors talk to the repository through the [`RemoteClient`]
//! trait. [`HttpClient`] is the production implementation on top of reqwest;
//! tests substitute scripted clients.

use super::RuntimeConfig;
use super::error::{TransportError, TransportResult};
use super::target::{Target, TargetId, VersionToken};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

/// Placeholder substituted with the target id in path templates.
pub const ID_PLACEHOLDER: &str = "{idPath}";

/// HTTP method of a remote request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// DELETE
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// One outbound request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRequest {
    /// HTTP method
    pub method: Method,
    /// Absolute path below the configured base URL
    pub path: String,
    /// Optional JSON body
    pub body: Option<Value>,
}

impl RemoteRequest {
    /// Create a request without a body
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
        }
    }

    /// Attach a JSON body
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

impl fmt::Display for RemoteRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// Successful response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteResponse {
    /// HTTP status code
    pub status: u16,
    /// Decoded JSON body (`null` when empty)
    pub body: Value,
}

impl RemoteResponse {
    /// A 200 response with the given body
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    /// Server timestamp carried by work responses, in milliseconds
    pub fn timestamp(&self) -> Option<i64> {
        self.body.get("timestamp").and_then(Value::as_i64)
    }
}

/// Client for the repository API.
pub trait RemoteClient: Send + Sync {
    /// Issue one request and decode its JSON response.
    fn send(&self, request: RemoteRequest) -> BoxFuture<'_, TransportResult<RemoteResponse>>;
}

/// Substitute the target id into a path template.
pub fn expand_path(template: &str, id: &TargetId) -> String {
    template.replace(ID_PLACEHOLDER, id.as_str())
}

/// Path layout of the repository API below its root prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiPaths {
    root: String,
}

impl ApiPaths {
    /// Build from a root prefix such as `api`
    pub fn new(root: impl AsRef<str>) -> Self {
        let root = root.as_ref().trim_matches('/');
        Self {
            root: if root.is_empty() {
                String::new()
            } else {
                format!("/{root}")
            },
        }
    }

    /// Prefix a relative template and substitute the id
    pub fn resolve(&self, template: &str, id: &TargetId) -> String {
        expand_path(&self.join(template), id)
    }

    /// Prefix a relative path
    pub fn join(&self, relative: &str) -> String {
        format!("{}/{}", self.root, relative.trim_start_matches('/'))
    }

    /// Object record endpoint
    pub fn object(&self, id: &TargetId) -> String {
        self.resolve("object/{idPath}", id)
    }

    /// Version token endpoint polled after single-target work
    pub fn version(&self, id: &TargetId) -> String {
        self.resolve("object/{idPath}/version", id)
    }

    /// Batch operation endpoint
    pub fn batch(&self, verb: &str) -> String {
        self.join(&format!("batch/{verb}"))
    }

    /// Batch pending-status endpoint
    pub fn pending(&self) -> String {
        self.join("batch/pending")
    }
}

impl From<&RuntimeConfig> for ApiPaths {
    fn from(config: &RuntimeConfig) -> Self {
        Self::new(&config.api_root)
    }
}

/// Authoritative object record returned by the object endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRecord {
    /// Object identifier
    pub id: TargetId,
    /// Current version token
    pub version: VersionToken,
    /// Status flags
    #[serde(default)]
    pub status: BTreeSet<String>,
    /// Permissions of the current user
    #[serde(default)]
    pub permissions: BTreeSet<String>,
    /// Whether the object is a collection
    #[serde(default)]
    pub collection: bool,
}

impl From<ObjectRecord> for Target {
    fn from(record: ObjectRecord) -> Self {
        let mut target = Target::new(record.id.0, record.version.0);
        target.status = record.status;
        target.permissions = record.permissions;
        target.collection = record.collection;
        target
    }
}

/// Fetch the authoritative record for one object.
pub async fn fetch_record(
    client: &dyn RemoteClient,
    paths: &ApiPaths,
    id: &TargetId,
) -> TransportResult<ObjectRecord> {
    let response = client
        .send(RemoteRequest::new(Method::Get, paths.object(id)))
        .await?;
    serde_json::from_value(response.body)
        .map_err(|err| TransportError::Malformed(format!("object record for {id}: {err}")))
}

/// Decode a success body; empty bodies decode to `null`.
pub fn decode_body(bytes: &[u8]) -> TransportResult<Value> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(bytes).map_err(|err| TransportError::Malformed(err.to_string()))
}

/// Extract the `errorStack` diagnostic from an error body, if any.
pub fn error_stack(bytes: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(bytes).ok()?;
    value
        .get("errorStack")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// reqwest-backed [`RemoteClient`].
pub struct HttpClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpClient {
    /// Build a client for the configured repository
    pub fn new(config: &RuntimeConfig) -> TransportResult<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder
            .build()
            .map_err(|err| TransportError::Network(format!("failed to build HTTP client: {err}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn execute(&self, request: RemoteRequest) -> TransportResult<RemoteResponse> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = self.client.request(request.method.into(), &url);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|err| TransportError::Network(err.to_string()))?;
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|err| TransportError::Network(err.to_string()))?;

        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                error_stack: error_stack(&bytes),
            });
        }

        Ok(RemoteResponse {
            status: status.as_u16(),
            body: decode_body(&bytes)?,
        })
    }
}

impl RemoteClient for HttpClient {
    fn send(&self, request: RemoteRequest) -> BoxFuture<'_, TransportResult<RemoteResponse>> {
        tracing::debug!(request = %request, "sending request");
        Box::pin(self.execute(request))
    }
}
