//! HTTP request node - make HTTP requests.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::types::{Credentials, Node, NodeDefinition, NodeGroup, NodeOutput, PropertyDefinition};
use crate::error::{Error, Result};

const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_API_KEY_HEADER: &str = "X-API-Key";

/// Whether internal addresses are reachable (WEFT_ALLOW_INTERNAL_URLS=true).
fn internal_urls_allowed_by_env() -> bool {
    std::env::var("WEFT_ALLOW_INTERNAL_URLS")
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Validate URL to prevent SSRF attacks.
/// Blocks access to localhost, private IP ranges, and non-http(s) schemes.
fn validate_url(url: &str, allow_internal: bool) -> Result<reqwest::Url> {
    let parsed =
        reqwest::Url::parse(url).map_err(|e| Error::node(format!("Invalid URL '{}': {}", url, e)))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(Error::node(format!(
                "Unsupported URL scheme '{}'. Only http and https are allowed.",
                scheme
            )));
        }
    }

    if allow_internal {
        return Ok(parsed);
    }

    if let Some(host) = parsed.host_str() {
        let host_lower = host.to_lowercase();
        if matches!(
            host_lower.as_str(),
            "localhost" | "127.0.0.1" | "::1" | "[::1]" | "0.0.0.0"
        ) {
            warn!(url, "Blocked request to localhost");
            return Err(Error::node(
                "Access to localhost is not allowed for security reasons.",
            ));
        }

        let bare = host_lower.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = bare.parse::<IpAddr>() {
            if is_private_or_special_ip(&ip) {
                warn!(url, "Blocked request to private IP");
                return Err(Error::node(
                    "Access to private or internal IP addresses is not allowed for security reasons.",
                ));
            }
        }

        if host_lower.ends_with(".local")
            || host_lower.ends_with(".internal")
            || host_lower.ends_with(".localhost")
        {
            warn!(url, "Blocked request to internal host");
            return Err(Error::node(
                "Access to internal hostnames is not allowed for security reasons.",
            ));
        }
    }

    Ok(parsed)
}

/// Check if an IP address is private, loopback, or otherwise special.
fn is_private_or_special_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => {
            ipv4.is_loopback()
                || ipv4.is_private()
                || ipv4.is_link_local() // includes 169.254.169.254
                || ipv4.is_broadcast()
                || ipv4.is_unspecified()
                || ipv4.octets()[0] == 100 && (ipv4.octets()[1] & 0xc0) == 64 // CGNAT
        }
        IpAddr::V6(ipv6) => {
            ipv6.is_loopback()
                || ipv6.is_unspecified()
                || ipv6
                    .to_ipv4_mapped()
                    .map(|v4| is_private_or_special_ip(&IpAddr::V4(v4)))
                    .unwrap_or(false)
        }
    }
}

/// HTTP request node.
pub struct HttpRequestNode {
    client: Client,
    allow_internal_urls: bool,
}

impl HttpRequestNode {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(DEFAULT_HTTP_CONNECT_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|e| {
                warn!("Failed to build HTTP client with timeout defaults: {}", e);
                Client::new()
            });
        Self {
            client,
            allow_internal_urls: internal_urls_allowed_by_env(),
        }
    }

    /// Override the SSRF guard (see `http.allow_internal_urls`).
    pub fn allow_internal_urls(mut self, allow: bool) -> Self {
        self.allow_internal_urls = allow;
        self
    }
}

impl Default for HttpRequestNode {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct HttpConfig {
    url: String,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    headers: Option<Value>,
    #[serde(default, alias = "query_parameters")]
    query: Option<Value>,
    #[serde(default)]
    body: Option<Value>,
    #[serde(default)]
    timeout: Option<Value>,
    #[serde(default = "default_authentication")]
    authentication: String,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_authentication() -> String {
    "none".to_string()
}

/// Flatten headers or query parameters given as a `{name, value}` list or a map.
fn name_value_pairs(value: Option<&Value>) -> Vec<(String, String)> {
    let as_text = |v: &Value| match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };

    match value {
        Some(Value::Object(map)) => map.iter().map(|(k, v)| (k.clone(), as_text(v))).collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| {
                let name = item.get("name")?.as_str()?;
                if name.is_empty() {
                    return None;
                }
                let value = item.get("value").map(as_text).unwrap_or_default();
                Some((name.to_string(), value))
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn credential_field<'a>(credentials: &'a Credentials, field: &str) -> Result<&'a str> {
    credentials
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::node(format!("Credential field '{}' is missing", field)))
}

/// Apply the selected auth strategy using the node's credentials.
fn apply_authentication(
    request: RequestBuilder,
    authentication: &str,
    credentials: &Credentials,
) -> Result<RequestBuilder> {
    if authentication != "none" && credentials.is_empty() {
        warn!(authentication, "Authentication selected without credentials");
        return Ok(request);
    }

    match authentication {
        "none" => Ok(request),
        "basic_auth" => {
            let username = credential_field(credentials, "username")?;
            let password = credentials.get("password").and_then(Value::as_str);
            Ok(request.basic_auth(username, password))
        }
        "bearer_token" => Ok(request.bearer_auth(credential_field(credentials, "token")?)),
        "api_key" => {
            let header = credentials
                .get("header_name")
                .and_then(Value::as_str)
                .unwrap_or(DEFAULT_API_KEY_HEADER);
            Ok(request.header(header, credential_field(credentials, "api_key")?))
        }
        other => Err(Error::node(format!(
            "Unknown authentication '{}'. Use: none, basic_auth, bearer_token, or api_key",
            other
        ))),
    }
}

impl HttpRequestNode {
    fn build_request(&self, config: &HttpConfig, credentials: &Credentials) -> Result<RequestBuilder> {
        let url = validate_url(&config.url, self.allow_internal_urls)?;

        let method = match config.method.to_uppercase().as_str() {
            "GET" => Method::GET,
            "POST" => Method::POST,
            "PUT" => Method::PUT,
            "PATCH" => Method::PATCH,
            "DELETE" => Method::DELETE,
            _ => {
                return Err(Error::node(format!(
                    "Unsupported HTTP method: {}",
                    config.method
                )))
            }
        };

        let mut request = self.client.request(method.clone(), url);

        for (name, value) in name_value_pairs(config.headers.as_ref()) {
            request = request.header(name, value);
        }

        let query = name_value_pairs(config.query.as_ref());
        if !query.is_empty() {
            request = request.query(&query);
        }

        request = apply_authentication(request, &config.authentication, credentials)?;

        if method != Method::GET {
            if let Some(body) = config.body.as_ref().filter(|b| !b.is_null()) {
                request = request.json(body);
            }
        }

        let timeout = config
            .timeout
            .as_ref()
            .and_then(|t| t.as_f64().or_else(|| t.as_str()?.trim().parse().ok()))
            .filter(|secs| *secs > 0.0)
            .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS as f64);
        let timeout = Duration::try_from_secs_f64(timeout)
            .map_err(|_| Error::node(format!("Invalid timeout of {} seconds", timeout)))?;
        Ok(request.timeout(timeout))
    }
}

#[async_trait]
impl Node for HttpRequestNode {
    fn node_type(&self) -> &str {
        "http_request"
    }

    fn definition(&self) -> NodeDefinition {
        NodeDefinition::new(
            "HTTP Request",
            self.node_type(),
            NodeGroup::Action,
            "Make HTTP requests to any URL",
        )
        .with_property(
            PropertyDefinition::new("method", "Method", "options")
                .with_options(&[
                    ("GET", "GET"),
                    ("POST", "POST"),
                    ("PUT", "PUT"),
                    ("PATCH", "PATCH"),
                    ("DELETE", "DELETE"),
                ])
                .with_default(json!("GET")),
        )
        .with_property(PropertyDefinition::new("url", "URL", "string").required())
        .with_property(
            PropertyDefinition::new("authentication", "Authentication", "options")
                .with_options(&[
                    ("None", "none"),
                    ("Basic Auth", "basic_auth"),
                    ("Bearer Token", "bearer_token"),
                    ("API Key", "api_key"),
                ])
                .with_default(json!("none")),
        )
        .with_property(
            PropertyDefinition::new("headers", "Headers", "collection").with_default(json!([])),
        )
        .with_property(
            PropertyDefinition::new("query", "Query Parameters", "collection")
                .with_default(json!([])),
        )
        .with_property(PropertyDefinition::new("body", "Body", "json"))
        .with_property(
            PropertyDefinition::new("timeout", "Timeout", "number")
                .with_default(json!(DEFAULT_HTTP_TIMEOUT_SECS)),
        )
        .with_credential("httpAuth", false)
    }

    async fn execute(&self, _: &Value, params: &Value, credentials: &Credentials) -> Result<NodeOutput> {
        let config: HttpConfig = serde_json::from_value(params.clone())
            .map_err(|e| Error::node(format!("Invalid HTTP config: {}", e)))?;

        let request = self.build_request(&config, credentials)?;
        debug!(method = %config.method, url = %config.url, "Sending HTTP request");

        let start = std::time::Instant::now();
        let response = request
            .send()
            .await
            .map_err(|e| Error::node(format!("HTTP Request failed: {}", e)))?;

        let status = response.status().as_u16();
        let headers: serde_json::Map<String, Value> = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.to_string(),
                    Value::String(v.to_str().unwrap_or("").to_string()),
                )
            })
            .collect();

        let body_text = response
            .text()
            .await
            .map_err(|e| Error::node(format!("HTTP Request failed: {}", e)))?;
        let body = serde_json::from_str::<Value>(&body_text).unwrap_or(Value::String(body_text));

        info!(
            "HTTP {} {} -> {} ({}ms)",
            config.method,
            config.url,
            status,
            start.elapsed().as_millis()
        );

        Ok(NodeOutput::Data(json!({
            "status": status,
            "headers": headers,
            "body": body,
        })))
    }
}
