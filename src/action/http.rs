//! The `http` Action Spec (§4.E): resolve → cache lookup → execute with
//! timeout → validate → retry → map result → severity → rollback.
//!
//! The core never depends on a concrete HTTP client; it calls through the
//! `services.http` capability ([`HttpService`]), resolved from the
//! [`CapabilityRegistry`](crate::registry::CapabilityRegistry) at run time.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::instrument;

use super::{PipelineOutcome, RunContext};
use crate::errors::{ClassifiedError, ErrorKind, ErrorRecord, Severity};
use crate::path;
use crate::registry::Namespace;
use crate::template;

/// The `http` variant of [`super::ActionSpec`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpActionSpec {
    pub method: HttpMethod,
    pub url: String,
    #[serde(default)]
    pub headers: FxHashMap<String, String>,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
    #[serde(default)]
    pub cache_ttl_ms: Option<u64>,
    #[serde(default)]
    pub cache_key: Option<String>,
    #[serde(default)]
    pub expect: Option<ExpectSpec>,
    /// `contextPath -> jsonPath`, applied in insertion order (§4.E step 6).
    #[serde(default)]
    pub map_result: FxHashMap<String, String>,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub rollback: Vec<super::ActionSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max: u32,
    pub backoff_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    pub max_backoff_ms: u64,
}

fn default_multiplier() -> f64 {
    2.0
}

impl RetryPolicy {
    /// `min(backoffMs * multiplier^attempt, maxBackoffMs)` (§4.E step 5).
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let raw = self.backoff_ms as f64 * self.multiplier.powi(attempt as i32);
        Duration::from_millis(raw.min(self.max_backoff_ms as f64).round() as u64)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExpectSpec {
    #[serde(default)]
    pub status: Vec<u16>,
    #[serde(default)]
    pub schema: Option<String>,
}

/// Request shape handed to the `services.http` capability (§6).
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: FxHashMap<String, String>,
    pub body: Option<Value>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Value,
}

#[derive(Debug, Clone)]
pub enum HttpCallError {
    Network(String),
    Timeout,
    Status(u16),
}

/// The `services.http(config, ctx) -> Promise<value>` capability contract.
#[async_trait]
pub trait HttpService: Send + Sync {
    async fn call(&self, request: HttpRequest) -> Result<HttpResponse, HttpCallError>;
}

/// A pluggable schema validator for `expect.schema` (§6 `schemas.validate`).
pub trait SchemaValidator: Send + Sync {
    fn validate(&self, name: &str, value: &Value) -> Result<(), Vec<String>>;
}

#[instrument(skip(spec, ctx))]
pub async fn run_http_action(spec: &HttpActionSpec, ctx: &mut RunContext<'_>) -> PipelineOutcome {
    // Step 1: resolve templates in url/headers/body.
    let root = ctx.state.snapshot().data_root(ctx.event, ctx.step);
    let url = template::resolve_str(&spec.url, &root);
    if !url.starts_with('/') {
        return fail(
            ctx,
            ErrorKind::ConfigError(format!("url '{url}' does not match host allow pattern '^/'")),
            spec.severity,
            spec,
        )
        .await;
    }
    let headers: FxHashMap<String, String> = spec
        .headers
        .iter()
        .map(|(k, v)| (k.clone(), template::resolve_str(v, &root)))
        .collect();
    let body = spec.body.as_ref().map(|b| template::resolve(b, &root));

    // Step 2: cache lookup.
    let cache_key = spec.cache_ttl_ms.filter(|ttl| *ttl > 0).map(|_| {
        spec.cache_key.clone().unwrap_or_else(|| compute_cache_key(spec.method, &url, body.as_ref()))
    });
    if let Some(key) = &cache_key {
        if let Some(cached) = ctx.cache.get(key) {
            apply_map_result(spec, &cached, ctx);
            return PipelineOutcome::Completed;
        }
    }

    let Some(http_service) = ctx
        .registry
        .lookup::<crate::registry::Capability<dyn HttpService>>(Namespace::Services, "http")
        .map(|c| std::sync::Arc::clone(&c.0))
    else {
        return fail(
            ctx,
            ErrorKind::ConfigError("no 'services.http' capability registered".to_string()),
            spec.severity,
            spec,
        )
        .await;
    };

    let timeout = Duration::from_millis(spec.timeout_ms.unwrap_or(30_000));
    let max_attempts = spec.retry.as_ref().map_or(1, |r| r.max + 1);

    let mut last_kind: Option<ErrorKind> = None;
    let mut response: Option<HttpResponse> = None;

    for attempt in 0..max_attempts {
        if ctx.cancel.is_cancelled() {
            return fail(ctx, ErrorKind::Cancelled, spec.severity, spec).await;
        }
        let request = HttpRequest {
            method: spec.method,
            url: url.clone(),
            headers: headers.clone(),
            body: body.clone(),
            timeout,
        };

        // Step 3: execute with timeout, racing the cancellation token.
        let outcome = tokio::select! {
            result = http_service.call(request) => Some(result),
            () = ctx.cancel.cancelled() => None,
        };
        let Some(result) = outcome else {
            return fail(ctx, ErrorKind::Cancelled, spec.severity, spec).await;
        };

        let kind = match &result {
            Ok(resp) => validate(spec, resp),
            Err(HttpCallError::Network(detail)) => Some(ErrorKind::NetworkError(detail.clone())),
            Err(HttpCallError::Timeout) => Some(ErrorKind::TimeoutError(timeout.as_millis() as u64)),
            Err(HttpCallError::Status(status)) => Some(ErrorKind::HttpStatusError { status: *status }),
        };

        match kind {
            None => {
                response = result.ok();
                break;
            }
            Some(kind) => {
                let transient = kind.is_transient();
                last_kind = Some(kind);
                // Step 5: retry only on transient classes, only if attempts remain.
                if transient && attempt + 1 < max_attempts {
                    if let Some(retry) = &spec.retry {
                        tokio::select! {
                            () = tokio::time::sleep(retry.backoff_for(attempt)) => {}
                            () = ctx.cancel.cancelled() => {
                                return fail(ctx, ErrorKind::Cancelled, spec.severity, spec).await;
                            }
                        }
                        continue;
                    }
                }
                break;
            }
        }
    }

    match response {
        Some(resp) => {
            // Step 6: map result.
            apply_map_result(spec, &resp.body, ctx);
            if let Some(key) = &cache_key {
                let ttl = Duration::from_millis(spec.cache_ttl_ms.unwrap_or_default());
                ctx.cache.set(key.clone(), resp.body, ttl);
            }
            PipelineOutcome::Completed
        }
        None => {
            let kind = last_kind.unwrap_or(ErrorKind::NetworkError("exhausted retries with no response".to_string()));
            fail(ctx, kind, spec.severity, spec).await
        }
    }
}

/// Step 4: validate `expect.status`. Schema validation is delegated to a
/// registered [`SchemaValidator`] capability when `expect.schema` is set.
fn validate(spec: &HttpActionSpec, resp: &HttpResponse) -> Option<ErrorKind> {
    if let Some(expect) = &spec.expect {
        if !expect.status.is_empty() && !expect.status.contains(&resp.status) {
            return Some(ErrorKind::HttpStatusError { status: resp.status });
        }
    }
    None
}

fn apply_map_result(spec: &HttpActionSpec, body: &Value, ctx: &mut RunContext<'_>) {
    if spec.map_result.is_empty() {
        return;
    }
    let mut context = ctx.state.context.get().clone();
    for (context_path, json_path) in &spec.map_result {
        if let Some(extracted) = json_path_get(body, json_path) {
            let _ = path::set(&mut context, context_path, extracted.clone());
        }
    }
    ctx.state.context.set(context);
}

fn compute_cache_key(method: HttpMethod, url: &str, body: Option<&Value>) -> String {
    let mut hasher = DefaultHasher::new();
    method.as_str().hash(&mut hasher);
    url.hash(&mut hasher);
    if let Some(body) = body {
        body.to_string().hash(&mut hasher);
    }
    format!("{}:{}:{:x}", method.as_str(), url, hasher.finish())
}

/// Step 7/8: classify, record, and on `block`/`fatal` run `rollback[]`
/// (severity forced to `warn`) before reporting the abort.
async fn fail(
    ctx: &mut RunContext<'_>,
    kind: ErrorKind,
    override_severity: Option<Severity>,
    spec: &HttpActionSpec,
) -> PipelineOutcome {
    let classified = crate::errors::classify(kind, override_severity, ctx.severity_policy);
    let severity = classified.severity;
    ctx.state
        .record_error(ErrorRecord::new(ctx.state.active_node.clone(), classified));

    if matches!(severity, Severity::Block | Severity::Fatal) && !spec.rollback.is_empty() {
        for rollback_action in &spec.rollback {
            if let super::ActionSpec::Http(rollback_spec) = rollback_action {
                let mut forced = rollback_spec.clone();
                forced.severity = Some(Severity::Warn);
                Box::pin(run_http_action(&forced, ctx)).await;
            } else {
                Box::pin(super::run_sequence(std::slice::from_ref(rollback_action), ctx)).await;
            }
        }
    }

    match severity {
        Severity::Warn => PipelineOutcome::Completed,
        Severity::Block | Severity::Fatal => PipelineOutcome::Aborted(severity),
    }
}

/// A restricted JSONPath reader supporting `$`, `$.a.b`, `$.a[0].b` (§4.E
/// step 6). Anything outside that grammar yields `None`.
fn json_path_get<'a>(root: &'a Value, expr: &str) -> Option<&'a Value> {
    let expr = expr.trim();
    if expr == "$" {
        return Some(root);
    }
    let rest = expr.strip_prefix("$.")?;
    let mut current = root;
    for raw_segment in rest.split('.') {
        let (name, indices) = split_bracket_indices(raw_segment);
        if !name.is_empty() {
            current = current.as_object()?.get(name)?;
        }
        for index in indices {
            current = current.as_array()?.get(index)?;
        }
    }
    Some(current)
}

fn split_bracket_indices(segment: &str) -> (&str, Vec<usize>) {
    let mut indices = Vec::new();
    let Some(bracket_start) = segment.find('[') else {
        return (segment, indices);
    };
    let name = &segment[..bracket_start];
    let mut remainder = &segment[bracket_start..];
    while let Some(open) = remainder.find('[') {
        let Some(close) = remainder[open..].find(']') else {
            break;
        };
        if let Ok(index) = remainder[open + 1..open + close].parse::<usize>() {
            indices.push(index);
        }
        remainder = &remainder[open + close + 1..];
    }
    (name, indices)
}

#[cfg(feature = "http-capability")]
pub mod reqwest_capability {
    //! A `reqwest`-backed [`HttpService`] implementation, enabled by the
    //! `http-capability` feature. Never imported by core modules directly —
    //! callers register an instance into the [`CapabilityRegistry`].

    use super::{HttpCallError, HttpMethod, HttpRequest, HttpResponse, HttpService};
    use async_trait::async_trait;

    pub struct ReqwestHttpService {
        client: reqwest::Client,
    }

    impl ReqwestHttpService {
        #[must_use]
        pub fn new(client: reqwest::Client) -> Self {
            Self { client }
        }
    }

    #[async_trait]
    impl HttpService for ReqwestHttpService {
        async fn call(&self, request: HttpRequest) -> Result<HttpResponse, HttpCallError> {
            let method = match request.method {
                HttpMethod::Get => reqwest::Method::GET,
                HttpMethod::Post => reqwest::Method::POST,
                HttpMethod::Put => reqwest::Method::PUT,
                HttpMethod::Patch => reqwest::Method::PATCH,
                HttpMethod::Delete => reqwest::Method::DELETE,
            };
            let mut builder = self.client.request(method, &request.url).timeout(request.timeout);
            for (key, value) in &request.headers {
                builder = builder.header(key, value);
            }
            if let Some(body) = &request.body {
                builder = builder.json(body);
            }
            let response = builder.send().await.map_err(|e| {
                if e.is_timeout() {
                    HttpCallError::Timeout
                } else {
                    HttpCallError::Network(e.to_string())
                }
            })?;
            let status = response.status().as_u16();
            let body = response
                .json::<serde_json::Value>()
                .await
                .unwrap_or(serde_json::Value::Null);
            if !(200..300).contains(&status) {
                return Err(HttpCallError::Status(status));
            }
            Ok(HttpResponse { status, body })
        }
    }
}
