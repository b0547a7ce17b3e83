//! Inference gateway: ordered provider fallback for AI-capable nodes.
//!
//! The router tries the providers named in a request strictly in order. A failed
//! attempt (timeout, auth, rate limit, server error) moves straight on to the next
//! provider; retrying is left to the calling node's error policy.

mod openai;

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{GatewayError, GatewayErrorKind, NodeError, NodeErrorKind, ProviderAttempt};

pub use openai::OpenAiProvider;

/// Generation parameters forwarded to the provider.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct GenerationParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

/// A provider-agnostic inference request.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct GatewayRequest {
    /// Task type, e.g. `completion`, `summarize`, `classify`.
    #[serde(default = "default_task")]
    pub task: String,
    pub prompt: String,
    /// Structured content attached to the prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default)]
    pub params: GenerationParams,
    /// Ordered provider chain; empty means the router's default chain.
    #[serde(default)]
    pub providers: Vec<String>,
}

fn default_task() -> String {
    "completion".to_string()
}

impl GatewayRequest {
    pub fn new(
        task: &str,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            task: task.to_string(),
            prompt: prompt.into(),
            ..Default::default()
        }
    }
}

/// Token usage as reported by the provider.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// What a single provider returns on success.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderResponse {
    pub text: String,
    pub data: Option<Value>,
    pub model: Option<String>,
    pub usage: Usage,
}

/// The router's answer: the winning provider's response plus the failed attempts before it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GatewayResponse {
    pub provider: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub usage: Usage,
    pub attempts: Vec<ProviderAttempt>,
}

/// An inference backend reachable by the gateway.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Identifier used in provider chains.
    fn id(&self) -> &str;

    async fn complete(
        &self,
        request: &GatewayRequest,
    ) -> Result<ProviderResponse, NodeError>;
}

/// Routes requests through an ordered provider chain.
pub struct GatewayRouter {
    providers: HashMap<String, Arc<dyn Provider>>,
    attempt_timeout: Duration,
    default_chain: Vec<String>,
}

impl GatewayRouter {
    pub fn new(attempt_timeout: Duration) -> Self {
        Self {
            providers: HashMap::new(),
            attempt_timeout,
            default_chain: Vec::new(),
        }
    }

    pub fn with_provider(
        mut self,
        provider: Arc<dyn Provider>,
    ) -> Self {
        self.register(provider);
        self
    }

    pub fn with_default_chain(
        mut self,
        chain: Vec<String>,
    ) -> Self {
        self.default_chain = chain;
        self
    }

    pub fn register(
        &mut self,
        provider: Arc<dyn Provider>,
    ) {
        self.providers.insert(provider.id().to_string(), provider);
    }

    pub fn default_chain(&self) -> &[String] {
        &self.default_chain
    }

    /// Send a request through its provider chain.
    ///
    /// Returns the first successful response; every failed attempt before it is
    /// listed on the response. When every provider fails, the error carries one
    /// diagnostic entry per attempt.
    pub async fn complete(
        &self,
        request: &GatewayRequest,
    ) -> Result<GatewayResponse, GatewayError> {
        let chain = if request.providers.is_empty() {
            &self.default_chain
        } else {
            &request.providers
        };

        if chain.is_empty() {
            return Err(GatewayError {
                kind: GatewayErrorKind::NoProviders,
                attempts: Vec::new(),
            });
        }

        let mut attempts = Vec::new();
        for provider_id in chain {
            let start = Instant::now();
            let result = match self.providers.get(provider_id) {
                Some(provider) => match tokio::time::timeout(self.attempt_timeout, provider.complete(request)).await {
                    Ok(result) => result,
                    Err(_) => Err(NodeError::timeout(self.attempt_timeout.as_millis())),
                },
                None => Err(NodeError::validation(format!("unknown provider '{}'", provider_id))),
            };
            let duration_ms = start.elapsed().as_millis() as u64;

            match result {
                Ok(response) => {
                    if !attempts.is_empty() {
                        tracing::info!(provider = %provider_id, failed = attempts.len(), "gateway fell back to provider");
                    }
                    return Ok(GatewayResponse {
                        provider: provider_id.clone(),
                        text: response.text,
                        data: response.data,
                        model: response.model,
                        usage: response.usage,
                        attempts,
                    });
                }
                Err(err) => {
                    tracing::warn!(provider = %provider_id, kind = %err.kind, error = %err.message, "provider attempt failed, trying next in chain");
                    attempts.push(ProviderAttempt {
                        provider: provider_id.clone(),
                        kind: err.kind,
                        message: err.message,
                        duration_ms,
                    });
                }
            }
        }

        Err(GatewayError {
            kind: GatewayErrorKind::AllProvidersFailed,
            attempts,
        })
    }
}

/// Pick the node error kind that best represents a failed gateway call.
///
/// Gateway failures surface as server errors unless every attempt failed the same way.
pub fn classify(err: &GatewayError) -> NodeErrorKind {
    match err.attempts.split_first() {
        Some((first, rest)) if rest.iter().all(|a| a.kind == first.kind) && first.kind != NodeErrorKind::ValidationError => first.kind,
        _ => NodeErrorKind::ServerError,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Scripted provider for tests.
    pub(crate) struct MockProvider {
        id: String,
        reply: Result<String, NodeError>,
        delay: Duration,
        pub calls: AtomicUsize,
    }

    impl MockProvider {
        pub(crate) fn ok(
            id: &str,
            text: &str,
        ) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                reply: Ok(text.to_string()),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            })
        }

        pub(crate) fn failing(
            id: &str,
            err: NodeError,
        ) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                reply: Err(err),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            })
        }

        pub(crate) fn slow(
            id: &str,
            delay: Duration,
        ) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                reply: Ok("late".to_string()),
                delay,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Provider for MockProvider {
        fn id(&self) -> &str {
            &self.id
        }

        async fn complete(
            &self,
            request: &GatewayRequest,
        ) -> Result<ProviderResponse, NodeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.reply.clone().map(|text| ProviderResponse {
                text: format!("{}: {}", text, request.prompt),
                data: None,
                model: Some(format!("{}-model", self.id)),
                usage: Usage {
                    input_tokens: 5,
                    output_tokens: 7,
                },
            })
        }
    }

    fn request(chain: &[&str]) -> GatewayRequest {
        let mut req = GatewayRequest::new("completion", "ping");
        req.providers = chain.iter().map(|s| s.to_string()).collect();
        req
    }

    #[tokio::test]
    async fn test_first_provider_wins() {
        let router = GatewayRouter::new(Duration::from_secs(1)).with_provider(MockProvider::ok("a", "from a")).with_provider(MockProvider::ok("b", "from b"));
        let res = router.complete(&request(&["a", "b"])).await.unwrap();
        assert_eq!(res.provider, "a");
        assert_eq!(res.text, "from a: ping");
        assert!(res.attempts.is_empty());
    }

    #[tokio::test]
    async fn test_falls_back_once_to_second_provider() {
        let a = MockProvider::failing("a", NodeError::server("500 from a"));
        let b = MockProvider::ok("b", "from b");
        let router = GatewayRouter::new(Duration::from_secs(1)).with_provider(a.clone()).with_provider(b.clone());

        let res = router.complete(&request(&["a", "b"])).await.unwrap();
        assert_eq!(res.provider, "b");
        assert_eq!(res.attempts.len(), 1);
        assert_eq!(res.attempts[0].provider, "a");
        assert_eq!(res.attempts[0].kind, NodeErrorKind::ServerError);
        // no retry at the router layer
        assert_eq!(a.calls.load(Ordering::SeqCst), 1);
        assert_eq!(b.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_auth_failure_still_advances() {
        let router = GatewayRouter::new(Duration::from_secs(1))
            .with_provider(MockProvider::failing("a", NodeError::auth("bad key")))
            .with_provider(MockProvider::ok("b", "ok"));
        let res = router.complete(&request(&["a", "b"])).await.unwrap();
        assert_eq!(res.provider, "b");
        assert_eq!(res.attempts[0].kind, NodeErrorKind::AuthError);
    }

    #[tokio::test]
    async fn test_all_providers_failed() {
        let router = GatewayRouter::new(Duration::from_secs(1))
            .with_provider(MockProvider::failing("a", NodeError::rate_limited("slow down", Some(100))))
            .with_provider(MockProvider::failing("b", NodeError::connection("refused")));
        let err = router.complete(&request(&["a", "b", "ghost"])).await.unwrap_err();
        assert_eq!(err.kind, GatewayErrorKind::AllProvidersFailed);
        let providers: Vec<_> = err.attempts.iter().map(|a| a.provider.as_str()).collect();
        assert_eq!(providers, vec!["a", "b", "ghost"]);
        assert_eq!(err.attempts[2].kind, NodeErrorKind::ValidationError);
        assert_eq!(classify(&err), NodeErrorKind::ServerError);
    }

    #[tokio::test]
    async fn test_attempt_timeout_is_connection_error() {
        let router = GatewayRouter::new(Duration::from_millis(20))
            .with_provider(MockProvider::slow("slow", Duration::from_secs(5)))
            .with_provider(MockProvider::ok("fast", "ok"));
        let res = router.complete(&request(&["slow", "fast"])).await.unwrap();
        assert_eq!(res.provider, "fast");
        assert_eq!(res.attempts[0].kind, NodeErrorKind::ConnectionError);
    }

    #[tokio::test]
    async fn test_default_chain_and_empty_chain() {
        let router = GatewayRouter::new(Duration::from_secs(1)).with_provider(MockProvider::ok("local", "ok")).with_default_chain(vec!["local".to_string()]);
        assert_eq!(router.complete(&request(&[])).await.unwrap().provider, "local");

        let bare = GatewayRouter::new(Duration::from_secs(1));
        let err = bare.complete(&request(&[])).await.unwrap_err();
        assert_eq!(err.kind, GatewayErrorKind::NoProviders);
    }

    #[test]
    fn test_classify_uniform_failures() {
        let err = GatewayError {
            kind: GatewayErrorKind::AllProvidersFailed,
            attempts: vec![
                ProviderAttempt {
                    provider: "a".to_string(),
                    kind: NodeErrorKind::RateLimited,
                    message: "429".to_string(),
                    duration_ms: 1,
                },
                ProviderAttempt {
                    provider: "b".to_string(),
                    kind: NodeErrorKind::RateLimited,
                    message: "429".to_string(),
                    duration_ms: 1,
                },
            ],
        };
        assert_eq!(classify(&err), NodeErrorKind::RateLimited);
    }
}
