use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationType {
    #[default]
    NoAuth,
    ApiKey(ApiKeyType),
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApiKeyType {
    Basic,
    Bearer,
    Custom,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, strum::AsRefStr)]
pub enum HttpRequestMethod {
    #[default]
    GET,
    POST,
    PUT,
    PATCH,
    DELETE,
    HEAD,
    OPTIONS,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContentType {
    #[default]
    None,
    Text,
    Html,
    Json,
    #[serde(rename = "urlencoded")]
    UrlEncoded,
    FormData,
    Binary,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthorizationConfig {
    #[serde(default)]
    pub auth_type: AuthorizationType,
    pub api_key: Option<String>,
    pub header: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpBody {
    #[serde(default)]
    pub content_type: ContentType,
    pub data: Option<JsonValue>,
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_fail_on_status() -> bool {
    true
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct HttpRequestConfig {
    pub url: String,
    #[serde(default)]
    pub method: HttpRequestMethod,
    #[serde(default)]
    pub auth: AuthorizationConfig,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub params: HashMap<String, String>,
    #[serde(default)]
    pub body: HttpBody,
    /// Request timeout in milliseconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Treat non-2xx responses as node failures.
    #[serde(default = "default_fail_on_status")]
    pub fail_on_status: bool,
}
