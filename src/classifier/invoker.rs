use crate::classifier::keys::{ApiKey, KeyPool};
use crate::classifier::prompt::classification_request;
use crate::classifier::result::ClassificationResult;
use crate::classifier::transport::{
    ChatTransport, CompletionRequest, HttpChatTransport, TransportConfig, TransportResponse,
    completion_text,
};
use async_trait::async_trait;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Upper bound for `CLASSIFIER_MAX_RETRIES`; past this the backoff alone
/// runs for hours.
const MAX_RETRIES_CAP: u32 = 10;

/// Longest error body kept in an error message.
const BODY_EXCERPT_CHARS: usize = 300;

#[derive(Debug, Error)]
pub enum ClassifierError {
    /// Retry budget spent on rate limits, or the exchange itself failed.
    #[error("classification unavailable after {attempts} attempt(s): {cause}")]
    Unavailable { attempts: u32, cause: String },
    /// Non-rate-limit HTTP status; rotating keys would not help.
    #[error("classification service returned HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("malformed classification: {0}")]
    Malformed(String),
}

impl ClassifierError {
    pub fn kind(&self) -> &'static str {
        match self {
            ClassifierError::Unavailable { .. } | ClassifierError::Rejected { .. } => {
                "classification_unavailable"
            }
            ClassifierError::Malformed(_) => "malformed_classification",
        }
    }
}

/// Oracle seam used by the orchestrator.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        provider_name: &str,
        raw_title: &str,
    ) -> Result<ClassificationResult, ClassifierError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let max_retries = std::env::var("CLASSIFIER_MAX_RETRIES")
            .ok()
            .and_then(|v| v.trim().parse::<u32>().ok())
            .map(|v| v.min(MAX_RETRIES_CAP))
            .unwrap_or(defaults.max_retries);
        let base_delay = std::env::var("CLASSIFIER_BASE_DELAY_MS")
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.base_delay);
        Self {
            max_retries,
            base_delay,
        }
    }

    /// First attempt plus retries.
    pub fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Wait after the zero-based `attempt` failed: `base * 2^attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor)
    }
}

/// Wraps the classification call with random key rotation and exponential
/// backoff on rate limits. Each attempt draws a fresh key.
pub struct ResilientInvoker {
    transport: Arc<dyn ChatTransport>,
    keys: KeyPool,
    policy: RetryPolicy,
}

impl ResilientInvoker {
    pub fn new(transport: Arc<dyn ChatTransport>, keys: KeyPool, policy: RetryPolicy) -> Self {
        Self {
            transport,
            keys,
            policy,
        }
    }

    pub fn from_env() -> Self {
        let transport = HttpChatTransport::new(TransportConfig::from_env());
        Self::new(Arc::new(transport), KeyPool::from_env(), RetryPolicy::from_env())
    }

    fn pick_key(&self) -> Option<ApiKey> {
        let mut rng = rand::rng();
        self.keys.pick(&mut rng).cloned()
    }

    async fn send_with_rotation(
        &self,
        request: &CompletionRequest,
    ) -> Result<TransportResponse, ClassifierError> {
        let total_attempts = self.policy.total_attempts();
        let mut last_cause = String::from("no attempt completed");

        for attempt in 0..total_attempts {
            let Some(key) = self.pick_key() else {
                return Err(ClassifierError::Unavailable {
                    attempts: attempt,
                    cause: "no classifier credentials configured".into(),
                });
            };

            let response = self.transport.send(&key, request).await.map_err(|err| {
                crate::metrics::classification_attempt("transport_error");
                ClassifierError::Unavailable {
                    attempts: attempt + 1,
                    cause: err.to_string(),
                }
            })?;

            if !response.is_rate_limited() {
                crate::metrics::classification_attempt("completed");
                return Ok(response);
            }

            crate::metrics::classification_attempt("rate_limited");
            last_cause = format!("rate limited on key ...{}", key.suffix());
            if attempt + 1 == total_attempts {
                break;
            }

            let delay = self.policy.delay_for(attempt);
            warn!(
                target = "normalizer.classifier",
                attempt = attempt + 1,
                max_attempts = total_attempts,
                delay_ms = delay.as_millis() as u64,
                cause = %last_cause,
                "rate limited; rotating key and backing off"
            );
            sleep(delay).await;
        }

        Err(ClassifierError::Unavailable {
            attempts: total_attempts,
            cause: last_cause,
        })
    }
}

#[async_trait]
impl Classifier for ResilientInvoker {
    async fn classify(
        &self,
        provider_name: &str,
        raw_title: &str,
    ) -> Result<ClassificationResult, ClassifierError> {
        let request = classification_request(provider_name, raw_title);
        let response = self.send_with_rotation(&request).await?;

        if !response.is_success() {
            return Err(ClassifierError::Rejected {
                status: response.status,
                body: excerpt(&response.body),
            });
        }

        let text = completion_text(&response.body)
            .ok_or_else(|| ClassifierError::Malformed("missing completion content".into()))?;
        debug!(target = "normalizer.classifier", provider = %provider_name, "completion received");
        ClassificationResult::parse(&text).map_err(|err| ClassifierError::Malformed(err.to_string()))
    }
}

fn excerpt(body: &str) -> String {
    body.trim().chars().take(BODY_EXCERPT_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::transport::TransportError;
    use serde_json::json;
    use std::{collections::VecDeque, sync::Mutex};
    use tokio::time::Instant;

    enum Step {
        Status(u16, String),
        Fail,
    }

    struct ScriptedTransport {
        steps: Mutex<VecDeque<Step>>,
        fallback: u16,
        keys_used: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn new(steps: Vec<Step>, fallback: u16) -> Self {
            Self {
                steps: Mutex::new(steps.into()),
                fallback,
                keys_used: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.keys_used.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ChatTransport for ScriptedTransport {
        async fn send(
            &self,
            key: &ApiKey,
            _request: &CompletionRequest,
        ) -> Result<TransportResponse, TransportError> {
            self.keys_used
                .lock()
                .unwrap()
                .push(key.expose().to_string());
            let step = self.steps.lock().unwrap().pop_front();
            match step {
                Some(Step::Status(status, body)) => Ok(TransportResponse { status, body }),
                Some(Step::Fail) => Err(TransportError::Http("connection reset".into())),
                None => Ok(TransportResponse {
                    status: self.fallback,
                    body: String::new(),
                }),
            }
        }
    }

    fn envelope(content: &str) -> String {
        json!({"choices": [{"message": {"role": "assistant", "content": content}}]}).to_string()
    }

    fn product_body() -> String {
        envelope(
            r#"{"is_valid_hvac": true, "standardized_name": "Minisplit Mirage X 1T 220V",
                "sku_qrclima": "EQP-MIN-MIRA-X-1T220-SF", "brand_code": "MIRA",
                "category_code": "EQP-MIN", "specs": {"cap": "1T"}}"#,
        )
    }

    fn invoker(transport: Arc<ScriptedTransport>) -> ResilientInvoker {
        ResilientInvoker::new(
            transport,
            KeyPool::new(["key-a", "key-b", "key-c"]),
            RetryPolicy::default(),
        )
    }

    #[test]
    fn backoff_doubles_from_base() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(2));
        assert_eq!(policy.delay_for(1), Duration::from_secs(4));
        assert_eq!(policy.delay_for(2), Duration::from_secs(8));
    }

    #[test]
    fn attempt_budget_saturates_at_u32_max() {
        let policy = RetryPolicy {
            max_retries: u32::MAX,
            base_delay: Duration::from_secs(2),
        };
        assert_eq!(policy.total_attempts(), u32::MAX);
        assert_eq!(RetryPolicy::default().total_attempts(), 4);
        assert_eq!(
            policy.delay_for(u32::MAX),
            Duration::from_secs(2 * u64::from(u32::MAX))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn retries_rate_limits_then_succeeds() {
        let transport = Arc::new(ScriptedTransport::new(
            vec![
                Step::Status(429, String::new()),
                Step::Status(429, String::new()),
                Step::Status(200, product_body()),
            ],
            500,
        ));
        let started = Instant::now();
        let result = invoker(transport.clone())
            .classify("Mirage Store", "Minisplit Mirage X 1T 220V")
            .await
            .expect("classified");

        assert!(result.is_valid_product());
        assert_eq!(transport.calls(), 3);
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(2 + 4) && waited < Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_budget_on_persistent_rate_limit() {
        let transport = Arc::new(ScriptedTransport::new(Vec::new(), 429));
        let started = Instant::now();
        let err = invoker(transport.clone())
            .classify("Vendor", "Title")
            .await
            .unwrap_err();

        assert_eq!(transport.calls(), 4);
        assert!(matches!(
            err,
            ClassifierError::Unavailable { attempts: 4, ref cause } if cause.contains("rate limited")
        ));
        assert_eq!(err.kind(), "classification_unavailable");
        // no wait after the final attempt
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(2 + 4 + 8) && waited < Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn other_statuses_are_not_retried() {
        let transport = Arc::new(ScriptedTransport::new(
            vec![Step::Status(400, "{\"error\":\"bad prompt\"}".into())],
            200,
        ));
        let err = invoker(transport.clone())
            .classify("Vendor", "Title")
            .await
            .unwrap_err();
        assert_eq!(transport.calls(), 1);
        assert!(matches!(err, ClassifierError::Rejected { status: 400, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failure_is_not_retried() {
        let transport = Arc::new(ScriptedTransport::new(vec![Step::Fail], 200));
        let err = invoker(transport.clone())
            .classify("Vendor", "Title")
            .await
            .unwrap_err();
        assert_eq!(transport.calls(), 1);
        assert!(matches!(err, ClassifierError::Unavailable { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn unparseable_completion_is_malformed() {
        let transport = Arc::new(ScriptedTransport::new(
            vec![Step::Status(200, envelope("I cannot help with that."))],
            500,
        ));
        let err = invoker(transport.clone())
            .classify("Vendor", "Title")
            .await
            .unwrap_err();
        assert_eq!(transport.calls(), 1);
        assert_eq!(err.kind(), "malformed_classification");
    }

    #[tokio::test]
    async fn every_attempt_uses_a_pool_key() {
        let transport = Arc::new(ScriptedTransport::new(
            vec![
                Step::Status(429, String::new()),
                Step::Status(200, product_body()),
            ],
            500,
        ));
        let invoker = ResilientInvoker::new(
            transport.clone(),
            KeyPool::new(["key-a", "key-b"]),
            RetryPolicy {
                max_retries: 3,
                base_delay: Duration::from_millis(1),
            },
        );
        invoker.classify("Vendor", "Title").await.expect("classified");
        let used = transport.keys_used.lock().unwrap().clone();
        assert_eq!(used.len(), 2);
        assert!(used.iter().all(|key| key == "key-a" || key == "key-b"));
    }

    #[tokio::test]
    async fn empty_pool_fails_without_calling_out() {
        let transport = Arc::new(ScriptedTransport::new(Vec::new(), 200));
        let invoker = ResilientInvoker::new(
            transport.clone(),
            KeyPool::default(),
            RetryPolicy::default(),
        );
        let err = invoker.classify("Vendor", "Title").await.unwrap_err();
        assert_eq!(transport.calls(), 0);
        assert!(matches!(err, ClassifierError::Unavailable { attempts: 0, .. }));
    }
}
