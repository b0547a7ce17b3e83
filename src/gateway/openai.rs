use async_trait::async_trait;
use serde_json::{Value, json};

use super::{GatewayRequest, Provider, ProviderResponse, Usage};
use crate::error::NodeError;

/// Provider speaking the OpenAI-compatible chat completions API.
///
/// Works against hosted services and local inference servers alike; only the
/// base url and the key differ. No `Debug` impl so the key never ends up in logs.
pub struct OpenAiProvider {
    id: String,
    base_url: String,
    api_key: Option<String>,
    model: String,
    client: reqwest::Client,
}

impl OpenAiProvider {
    pub fn new(
        id: &str,
        base_url: &str,
        model: &str,
    ) -> Self {
        Self {
            id: id.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: None,
            model: model.to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_api_key(
        mut self,
        api_key: impl Into<String>,
    ) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    fn build_body(
        &self,
        request: &GatewayRequest,
    ) -> Value {
        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(json!({ "role": "system", "content": system }));
        }
        let user = match &request.content {
            Some(Value::String(text)) => format!("{}\n\n{}", request.prompt, text),
            Some(content) => format!("{}\n\n{}", request.prompt, content),
            None => request.prompt.clone(),
        };
        messages.push(json!({ "role": "user", "content": user }));

        let mut body = json!({
            "model": request.params.model.clone().unwrap_or_else(|| self.model.clone()),
            "messages": messages,
        });
        if let Some(max_tokens) = request.params.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(temperature) = request.params.temperature {
            body["temperature"] = json!(temperature);
        }
        body
    }
}

fn parse_response(body: &Value) -> Result<ProviderResponse, NodeError> {
    let text = body
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .ok_or_else(|| NodeError::server("response has no choices[0].message.content"))?;
    let usage = body.get("usage").map_or(Usage::default(), |u| Usage {
        input_tokens: u.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0),
        output_tokens: u.get("completion_tokens").and_then(Value::as_u64).unwrap_or(0),
    });

    Ok(ProviderResponse {
        text: text.to_string(),
        data: serde_json::from_str::<Value>(text).ok().filter(|v| v.is_object() || v.is_array()),
        model: body.get("model").and_then(Value::as_str).map(str::to_string),
        usage,
    })
}

fn retry_after_ms(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(|secs| secs * 1000)
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn complete(
        &self,
        request: &GatewayRequest,
    ) -> Result<ProviderResponse, NodeError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut builder = self.client.post(&url).json(&self.build_body(request));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_ms(response.headers());
            let text = response.text().await.unwrap_or_default();
            let mut err = NodeError::from_status(status.as_u16(), format!("{} returned {}: {}", self.id, status, text));
            err.retry_after_ms = retry_after;
            return Err(err);
        }

        let body = response.json::<Value>().await?;
        parse_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NodeErrorKind;

    #[test]
    fn test_build_body_uses_request_params() {
        let provider = OpenAiProvider::new("local", "http://localhost:11434/v1/", "llama3");
        assert_eq!(provider.base_url, "http://localhost:11434/v1");

        let mut request = GatewayRequest::new("summarize", "Summarize this");
        request.system = Some("be brief".to_string());
        request.content = Some(json!("long text"));
        request.params.max_tokens = Some(64);

        let body = provider.build_body(&request);
        assert_eq!(body["model"], "llama3");
        assert_eq!(body["max_tokens"], 64);
        assert!(body.get("temperature").is_none());
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "Summarize this\n\nlong text");

        request.params.model = Some("qwen".to_string());
        assert_eq!(provider.build_body(&request)["model"], "qwen");
    }

    #[test]
    fn test_parse_response() {
        let body = json!({
            "model": "llama3",
            "choices": [{ "message": { "role": "assistant", "content": "{\"label\": \"spam\"}" } }],
            "usage": { "prompt_tokens": 12, "completion_tokens": 4 }
        });
        let res = parse_response(&body).unwrap();
        assert_eq!(res.model.as_deref(), Some("llama3"));
        assert_eq!(res.usage.input_tokens, 12);
        assert_eq!(res.usage.output_tokens, 4);
        assert_eq!(res.data, Some(json!({ "label": "spam" })));

        let err = parse_response(&json!({ "choices": [] })).unwrap_err();
        assert_eq!(err.kind, NodeErrorKind::ServerError);
    }

    #[test]
    fn test_retry_after_header() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::RETRY_AFTER, "3".parse().unwrap());
        assert_eq!(retry_after_ms(&headers), Some(3000));
    }
}
