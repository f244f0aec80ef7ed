//! Provider routing with per-provider circuit breakers and failover.
//!
//! Selection order: an explicit `preferred_provider` on the request wins if
//! it supports the model and its breaker is closed; otherwise providers are
//! tried in `provider_priority` order (falling back to any remaining
//! capable provider), with `is_fallback`/`attempted_providers` threaded
//! through so callers can see how the response was obtained.

use relaycore_core::breaker::CircuitBreaker;
use relaycore_core::providers::{CompletionRequest, CompletionResponse, LlmProvider, ProviderError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
pub struct RoutedCompletion {
    pub response: CompletionResponse,
    pub provider: String,
    pub is_fallback: bool,
    pub attempted_providers: Vec<String>,
}

struct RoutedProvider {
    provider: Arc<dyn LlmProvider>,
    breaker: CircuitBreaker,
}

pub struct ProviderRouter {
    providers: Vec<RoutedProvider>,
    priority: Vec<String>,
    breakers_enabled: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("no configured provider supports model '{0}'")]
    ModelNotSupported(String),
    #[error("all providers failed for model '{model}'. attempted: {}", attempted.join(", "))]
    AllProvidersFailed {
        model: String,
        attempted: Vec<String>,
    },
    #[error("provider '{provider}' rate limited the request")]
    RateLimited { provider: String },
}

impl ProviderRouter {
    pub fn new(
        providers: Vec<Arc<dyn LlmProvider>>,
        priority: Vec<String>,
        breakers_enabled: bool,
        fail_max: u32,
        breaker_timeout: Duration,
    ) -> Self {
        let providers = providers
            .into_iter()
            .map(|provider| RoutedProvider {
                provider,
                breaker: CircuitBreaker::new(fail_max, breaker_timeout),
            })
            .collect();

        Self {
            providers,
            priority,
            breakers_enabled,
        }
    }

    pub async fn route(
        &self,
        request: CompletionRequest,
        preferred_provider: Option<&str>,
    ) -> Result<RoutedCompletion, RouteError> {
        if let Some(name) = preferred_provider {
            if let Some(routed) = self.find(name) {
                if routed.provider.supports_model(&request.model) {
                    match self.try_provider(routed, &request).await {
                        Ok(response) => {
                            return Ok(RoutedCompletion {
                                response,
                                provider: routed.provider.name().to_string(),
                                is_fallback: false,
                                attempted_providers: vec![routed.provider.name().to_string()],
                            });
                        }
                        Err(ProviderError::RateLimitExceeded) => {
                            tracing::warn!(provider = name, "preferred provider rate limited, not falling back");
                            return Err(RouteError::RateLimited {
                                provider: routed.provider.name().to_string(),
                            });
                        }
                        Err(_) => {
                            tracing::warn!(provider = name, "preferred provider failed, falling back");
                        }
                    }
                } else {
                    tracing::warn!(provider = name, "preferred provider unavailable, falling back");
                }
            }
        }

        let capable = self.capable_providers(&request.model);
        if capable.is_empty() {
            return Err(RouteError::ModelNotSupported(request.model));
        }

        let mut attempted = Vec::new();
        for routed in &capable {
            let name = routed.provider.name().to_string();
            attempted.push(name.clone());

            match self.try_provider(routed, &request).await {
                Ok(response) => {
                    return Ok(RoutedCompletion {
                        response,
                        provider: name,
                        is_fallback: attempted.len() > 1,
                        attempted_providers: attempted,
                    });
                }
                Err(ProviderError::RateLimitExceeded) => {
                    tracing::warn!(provider = %name, "provider rate limited, not falling back");
                    return Err(RouteError::RateLimited { provider: name });
                }
                Err(e) => {
                    tracing::warn!(provider = %name, error = %e, "provider failed, trying next");
                }
            }
        }

        Err(RouteError::AllProvidersFailed {
            model: request.model,
            attempted,
        })
    }

    async fn try_provider(
        &self,
        routed: &RoutedProvider,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        if self.breakers_enabled && !routed.breaker.allow_request() {
            return Err(ProviderError::Unknown(format!(
                "circuit breaker open for provider '{}'",
                routed.provider.name()
            )));
        }

        match routed.provider.complete(request).await {
            Ok(response) => {
                if self.breakers_enabled {
                    routed.breaker.record_success();
                }
                Ok(response)
            }
            Err(e) => {
                if self.breakers_enabled {
                    routed.breaker.record_failure();
                }
                Err(e)
            }
        }
    }

    fn find(&self, name: &str) -> Option<&RoutedProvider> {
        self.providers
            .iter()
            .find(|r| r.provider.name().eq_ignore_ascii_case(name))
    }

    fn capable_providers(&self, model: &str) -> Vec<&RoutedProvider> {
        let mut ordered = Vec::new();
        let mut seen: HashMap<&str, ()> = HashMap::new();

        for name in &self.priority {
            if let Some(routed) = self.find(name) {
                if routed.provider.supports_model(model) {
                    seen.insert(routed.provider.name(), ());
                    ordered.push(routed);
                }
            }
        }
        for routed in &self.providers {
            if !seen.contains_key(routed.provider.name()) && routed.provider.supports_model(model) {
                ordered.push(routed);
            }
        }
        ordered
    }

    pub fn calculate_cost(
        &self,
        provider_name: &str,
        model: &str,
        usage: relaycore_core::providers::TokenUsage,
    ) -> f64 {
        self.find(provider_name)
            .map(|r| r.provider.calculate_cost(model, usage))
            .unwrap_or(0.0)
    }

    pub fn health(&self) -> HashMap<String, &'static str> {
        self.providers
            .iter()
            .map(|r| {
                let state = match r.breaker.state() {
                    relaycore_core::breaker::BreakerState::Closed => "closed",
                    relaycore_core::breaker::BreakerState::Open => "open",
                    relaycore_core::breaker::BreakerState::HalfOpen => "half_open",
                };
                (r.provider.name().to_string(), state)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyProvider {
        name: &'static str,
        fail_times: AtomicU32,
    }

    #[async_trait]
    impl LlmProvider for FlakyProvider {
        fn name(&self) -> &str {
            self.name
        }

        fn supports_model(&self, model: &str) -> bool {
            model == "gpt-4"
        }

        fn map_model_name(&self, _model: &str) -> Option<String> {
            None
        }

        fn calculate_cost(&self, _model: &str, _usage: relaycore_core::providers::TokenUsage) -> f64 {
            0.0
        }

        async fn complete(
            &self,
            _request: &CompletionRequest,
        ) -> Result<CompletionResponse, ProviderError> {
            if self.fail_times.fetch_sub(1, Ordering::SeqCst) > 0 {
                Err(ProviderError::HttpError("boom".into()))
            } else {
                Ok(CompletionResponse {
                    content: format!("hi from {}", self.name),
                    finish_reason: "stop".into(),
                    usage: relaycore_core::providers::TokenUsage {
                        prompt_tokens: 1,
                        completion_tokens: 1,
                    },
                })
            }
        }
    }

    struct RateLimitedProvider {
        name: &'static str,
    }

    #[async_trait]
    impl LlmProvider for RateLimitedProvider {
        fn name(&self) -> &str {
            self.name
        }

        fn supports_model(&self, model: &str) -> bool {
            model == "gpt-4"
        }

        fn map_model_name(&self, _model: &str) -> Option<String> {
            None
        }

        fn calculate_cost(&self, _model: &str, _usage: relaycore_core::providers::TokenUsage) -> f64 {
            0.0
        }

        async fn complete(
            &self,
            _request: &CompletionRequest,
        ) -> Result<CompletionResponse, ProviderError> {
            Err(ProviderError::RateLimitExceeded)
        }
    }

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "gpt-4".into(),
            messages: vec![],
            max_tokens: None,
            temperature: 0.7,
            top_p: 1.0,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            stop: None,
        }
    }

    #[tokio::test]
    async fn falls_over_to_next_provider_on_failure() {
        let a: Arc<dyn LlmProvider> = Arc::new(FlakyProvider {
            name: "a",
            fail_times: AtomicU32::new(1),
        });
        let b: Arc<dyn LlmProvider> = Arc::new(FlakyProvider {
            name: "b",
            fail_times: AtomicU32::new(0),
        });
        let router = ProviderRouter::new(
            vec![a, b],
            vec!["a".into(), "b".into()],
            true,
            3,
            Duration::from_secs(30),
        );

        let routed = router.route(request(), None).await.unwrap();
        assert_eq!(routed.provider, "b");
        assert!(routed.is_fallback);
        assert_eq!(routed.attempted_providers, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn unsupported_model_rejected_before_trying_providers() {
        let a: Arc<dyn LlmProvider> = Arc::new(FlakyProvider {
            name: "a",
            fail_times: AtomicU32::new(0),
        });
        let router = ProviderRouter::new(vec![a], vec!["a".into()], true, 3, Duration::from_secs(30));

        let mut req = request();
        req.model = "unknown-model".into();
        let err = router.route(req, None).await.unwrap_err();
        assert!(matches!(err, RouteError::ModelNotSupported(_)));
    }

    #[tokio::test]
    async fn open_breaker_skips_provider() {
        let a: Arc<dyn LlmProvider> = Arc::new(FlakyProvider {
            name: "a",
            fail_times: AtomicU32::new(u32::MAX),
        });
        let b: Arc<dyn LlmProvider> = Arc::new(FlakyProvider {
            name: "b",
            fail_times: AtomicU32::new(0),
        });
        let router = ProviderRouter::new(
            vec![a, b],
            vec!["a".into(), "b".into()],
            true,
            1,
            Duration::from_secs(30),
        );

        // First call trips the breaker for "a".
        let _ = router.route(request(), None).await;
        // Second call should skip "a" immediately since its breaker is open.
        let routed = router.route(request(), None).await.unwrap();
        assert_eq!(routed.provider, "b");
    }

    #[tokio::test]
    async fn rate_limited_provider_does_not_fall_back() {
        let a: Arc<dyn LlmProvider> = Arc::new(RateLimitedProvider { name: "a" });
        let b: Arc<dyn LlmProvider> = Arc::new(FlakyProvider {
            name: "b",
            fail_times: AtomicU32::new(0),
        });
        let router = ProviderRouter::new(
            vec![a, b],
            vec!["a".into(), "b".into()],
            true,
            3,
            Duration::from_secs(30),
        );

        let err = router.route(request(), None).await.unwrap_err();
        assert!(matches!(err, RouteError::RateLimited { provider } if provider == "a"));
    }

    #[tokio::test]
    async fn rate_limited_preferred_provider_does_not_fall_back() {
        let a: Arc<dyn LlmProvider> = Arc::new(RateLimitedProvider { name: "a" });
        let b: Arc<dyn LlmProvider> = Arc::new(FlakyProvider {
            name: "b",
            fail_times: AtomicU32::new(0),
        });
        let router = ProviderRouter::new(
            vec![a, b],
            vec!["a".into(), "b".into()],
            true,
            3,
            Duration::from_secs(30),
        );

        let err = router.route(request(), Some("a")).await.unwrap_err();
        assert!(matches!(err, RouteError::RateLimited { provider } if provider == "a"));
    }
}
