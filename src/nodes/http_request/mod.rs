mod models;

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::{Value, json};

use crate::{
    catalog::{NodeContext, NodeDescriptor, NodeKind, NodeOutput},
    error::NodeError,
};

use models::*;

const STATUS_CODE_KEY: &str = "status_code";
const BODY_KEY: &str = "body";
const HEADERS_KEY: &str = "headers";

/// Calls an HTTP endpoint. Expressions in the url, headers, params and body are resolved before the node runs.
pub struct HttpRequestNode;

impl HttpRequestNode {
    /// Apply authorization headers based on auth config
    fn apply_auth_headers(
        auth: &AuthorizationConfig,
        headers: &mut HeaderMap,
    ) -> Result<(), NodeError> {
        match &auth.auth_type {
            AuthorizationType::NoAuth => {}
            AuthorizationType::ApiKey(api_key_type) => {
                let api_key = auth.api_key.as_ref().ok_or_else(|| NodeError::validation("api_key is required for api-key authorization"))?;

                // Default header name is "Authorization"
                let header_name = auth.header.as_deref().unwrap_or("Authorization");
                let header_key: HeaderName = header_name.parse().map_err(|err: reqwest::header::InvalidHeaderName| NodeError::validation(err.to_string()))?;

                let header_value = match api_key_type {
                    ApiKeyType::Bearer => format!("Bearer {}", api_key),
                    ApiKeyType::Basic => {
                        let encoded = if api_key.contains(':') {
                            STANDARD.encode(api_key.as_bytes())
                        } else {
                            api_key.clone()
                        };
                        format!("Basic {}", encoded)
                    }
                    ApiKeyType::Custom => api_key.clone(),
                };

                headers.insert(header_key, header_value.parse().map_err(|err: reqwest::header::InvalidHeaderValue| NodeError::validation(err.to_string()))?);
            }
        }
        Ok(())
    }

    fn build_request(
        client: &reqwest::Client,
        config: &HttpRequestConfig,
    ) -> Result<reqwest::RequestBuilder, NodeError> {
        let mut headers = HeaderMap::new();
        headers.insert(HeaderName::from_static("accept"), HeaderValue::from_static("*/*"));

        Self::apply_auth_headers(&config.auth, &mut headers)?;

        for (key, value) in &config.headers {
            headers.insert(
                key.parse::<HeaderName>().map_err(|err| NodeError::validation(err.to_string()))?,
                value.parse().map_err(|err: reqwest::header::InvalidHeaderValue| NodeError::validation(err.to_string()))?,
            );
        }

        let method: reqwest::Method = config.method.as_ref().parse().map_err(|_| NodeError::validation(format!("invalid method '{:?}'", config.method)))?;
        let mut request = client.request(method, &config.url).headers(headers).query(&config.params);

        let mismatch = || NodeError::validation("content-type did not match the body content");
        match config.body.content_type {
            ContentType::Text | ContentType::Html => {
                if let Some(text) = &config.body.data {
                    let data = text.as_str().ok_or_else(mismatch)?;
                    request = request.body(data.to_string());
                }
            }
            ContentType::Json => {
                if let Some(json) = &config.body.data {
                    request = request.json(json);
                }
            }
            ContentType::FormData | ContentType::UrlEncoded => {
                if let Some(form) = &config.body.data {
                    let data = form.as_object().ok_or_else(mismatch)?;
                    let data: HashMap<&String, String> = data.iter().map(|(k, v)| (k, crate::expression::render(v))).collect();
                    request = request.form(&data);
                }
            }
            ContentType::Binary => {
                if let Some(value) = &config.body.data {
                    let data = value.as_str().ok_or_else(mismatch)?;
                    let data = STANDARD.decode(data).map_err(|err| NodeError::validation(err.to_string()))?;
                    request = request.body(data);
                }
            }
            ContentType::None => {}
        }

        Ok(request.timeout(Duration::from_millis(config.timeout)))
    }
}

#[async_trait]
impl NodeKind for HttpRequestNode {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::task("http_request")
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["url"],
            "properties": {
                "url": { "type": "string", "description": "Request URL" },
                "method": {
                    "type": "string",
                    "enum": ["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"]
                },
                "auth": {
                    "type": "object",
                    "properties": {
                        "auth_type": {
                            "oneOf": [
                                { "const": "no_auth" },
                                {
                                    "type": "object",
                                    "properties": {
                                        "api_key": { "type": "string", "enum": ["basic", "bearer", "custom"] }
                                    }
                                }
                            ]
                        },
                        "api_key": { "type": ["string", "null"] },
                        "header": { "type": ["string", "null"] }
                    }
                },
                "headers": { "type": "object", "additionalProperties": { "type": "string" } },
                "params": { "type": "object", "additionalProperties": { "type": "string" } },
                "body": {
                    "type": "object",
                    "properties": {
                        "content_type": {
                            "type": "string",
                            "enum": ["none", "text", "html", "json", "urlencoded", "form-data", "binary"]
                        },
                        "data": {}
                    }
                },
                "timeout": { "type": "integer", "minimum": 0, "description": "Request timeout in milliseconds" },
                "fail_on_status": { "type": "boolean" }
            }
        })
    }

    async fn execute(
        &self,
        config: Value,
        ctx: NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        let config: HttpRequestConfig = serde_json::from_value(config)?;
        let client = reqwest::Client::new();
        let request = Self::build_request(&client, &config)?;

        tracing::debug!(eid = %ctx.execution_id, nid = %ctx.node_id, url = %config.url, method = config.method.as_ref(), "http request");
        let res = request.send().await?;
        let status = res.status();

        // Convert HeaderMap to a serializable HashMap
        let headers_map: HashMap<String, String> = res.headers().iter().map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string())).collect();
        let text = res.text().await?;

        if config.fail_on_status && !status.is_success() {
            let mut err = NodeError::from_status(status.as_u16(), format!("{} returned {}: {}", config.url, status, text));
            if let Some(ms) = headers_map.get("retry-after").and_then(|v| v.trim().parse::<u64>().ok()) {
                err.retry_after_ms = Some(ms * 1000);
            }
            return Err(err);
        }

        let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));
        Ok(NodeOutput::new(json!({
            STATUS_CODE_KEY: status.as_u16(),
            HEADERS_KEY: headers_map,
            BODY_KEY: body,
        })))
    }
}
