//! The response pipeline: rate limit → latency → render → content-type →
//! pagination → write, run in that strict order for one matched scenario
//! (§4.4, §5 Ordering guarantees).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rand::Rng;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::compiler::{BodySource, CompiledScenario};
use crate::evaluator::IncomingRequest;
use crate::extractor::resolve_array_path;
use crate::ratelimiter::RateLimiterStore;
use crate::scenario::{PaginationSpec, PaginationStyle};
use crate::template::RenderContext;

/// What the HTTP surface adapter writes back for one request.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub rate_limited: bool,
}

impl PipelineOutcome {
    fn json_error(status: u16, message: impl Into<String>) -> Self {
        let body = json!({ "error": message.into() }).to_string().into_bytes();
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        PipelineOutcome {
            status,
            headers,
            body,
            rate_limited: false,
        }
    }
}

/// Runs the full pipeline for an already-matched scenario. Returns `None` if
/// the request was cancelled mid-flight: no write is attempted and no trace
/// `matched_id` should be recorded for it (§5 Cancellation & timeouts).
pub async fn run(
    scenario: &Arc<CompiledScenario>,
    request: &IncomingRequest,
    path_params: &HashMap<String, String>,
    query_params: &HashMap<String, String>,
    rate_limiter: &RateLimiterStore,
    cancel: &CancellationToken,
) -> Option<PipelineOutcome> {
    if let Some(policy) = &scenario.policy {
        if let Some(rate_limit) = &policy.rate_limit {
            let key = resolve_rate_limit_key(&rate_limit.key, request);
            if !rate_limiter.allow(&key, rate_limit.rate, rate_limit.burst) {
                let mut outcome =
                    PipelineOutcome::json_error(429, "rate limited");
                outcome.headers.insert(
                    "retry-after".to_string(),
                    (1.0 / rate_limit.rate.max(0.001)).ceil().to_string(),
                );
                outcome.rate_limited = true;
                return Some(outcome);
            }
        }

        if let Some(latency) = &policy.latency {
            let jitter = if latency.jitter_ms > 0 {
                rand::thread_rng().gen_range(0..=latency.jitter_ms)
            } else {
                0
            };
            let delay = std::time::Duration::from_millis(latency.fixed_ms + jitter);
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    if cancel.is_cancelled() {
        return None;
    }

    let mut body = match &scenario.response.body {
        BodySource::Literal(bytes) => bytes.clone(),
        BodySource::Rendered(renderer) => {
            let ctx = RenderContext {
                method: request.method.clone(),
                path: request.path.clone(),
                headers: request.headers.clone(),
                query_params: query_params.clone(),
                path_params: path_params.clone(),
                body: request.body.clone(),
                now: Utc::now(),
            };
            let rendered = tokio::select! {
                _ = cancel.cancelled() => return None,
                result = renderer.render(&ctx) => result,
            };
            match rendered {
                Ok(bytes) => bytes,
                Err(err) => {
                    return Some(PipelineOutcome::json_error(
                        500,
                        format!("render failed: {err}"),
                    ))
                }
            }
        }
    };

    let mut headers = scenario.response.headers.clone();
    let content_type = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
        .map(|(_, v)| v.clone())
        .or_else(|| scenario.response.content_type.clone());

    if let Some(ct) = &content_type {
        if !headers.keys().any(|k| k.eq_ignore_ascii_case("content-type")) {
            headers.insert("content-type".to_string(), ct.clone());
        }
    }

    if let Some(policy) = &scenario.policy {
        if let Some(pagination) = &policy.pagination {
            // §4.4 step 5 gates on whether the rendered body *is* a JSON
            // document, not on a content-type header/field — a templated
            // body with no explicit `content_type:` still renders JSON.
            match apply_pagination(&body, pagination, query_params) {
                Some(paginated) => body = paginated,
                None => warn!(
                    data_path = %pagination.data_path,
                    "response body is not JSON or data_path did not resolve to an array; skipping pagination"
                ),
            }
        }
    }

    Some(PipelineOutcome {
        status: scenario.response.status,
        headers,
        body,
        rate_limited: false,
    })
}

fn resolve_rate_limit_key(key_template: &str, request: &IncomingRequest) -> String {
    if let Some(header_name) = key_template.strip_prefix("header:") {
        request
            .header(header_name)
            .map(|v| v.to_string())
            .unwrap_or_else(|| key_template.to_string())
    } else if key_template == "client_ip" || key_template == "ip" {
        request.peer.ip().to_string()
    } else {
        key_template.to_string()
    }
}

/// Parses the body as JSON, locates the array at `data_path`, slices it per
/// the configured style, and re-serialises the envelope (§4.4 step 5).
fn apply_pagination(
    body: &[u8],
    spec: &PaginationSpec,
    query_params: &HashMap<String, String>,
) -> Option<Vec<u8>> {
    let document: Value = serde_json::from_slice(body).ok()?;
    let array = resolve_array_path(&document, &spec.data_path)?;
    let total_items = array.len();

    let (offset, limit) = match spec.style {
        PaginationStyle::PageSize => {
            let page = query_params
                .get(&spec.page_param)
                .and_then(|v| v.parse::<usize>().ok())
                .filter(|p| *p >= 1)
                .unwrap_or(1);
            let size = query_params
                .get(&spec.size_param)
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(spec.default_size)
                .min(spec.max_size);
            ((page - 1) * size, size)
        }
        PaginationStyle::OffsetLimit => {
            let offset = query_params
                .get(&spec.offset_param)
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(0);
            let limit = query_params
                .get(&spec.limit_param)
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(spec.default_size)
                .min(spec.max_size);
            (offset, limit)
        }
    };

    let slice_start = offset.min(total_items);
    let slice_end = (offset + limit).min(total_items);
    let page_data = &array[slice_start..slice_end];

    let mut envelope = serde_json::Map::new();
    envelope.insert(
        spec.envelope.data_field.clone(),
        Value::Array(page_data.to_vec()),
    );

    match spec.style {
        PaginationStyle::PageSize => {
            let size = limit;
            let page = offset / size.max(1) + 1;
            let total_pages = (total_items + size.saturating_sub(1)).checked_div(size.max(1)).unwrap_or(0).max(
                if total_items == 0 { 0 } else { 1 },
            );
            envelope.insert(spec.envelope.page_field.clone(), json!(page));
            envelope.insert(spec.envelope.size_field.clone(), json!(size));
            envelope.insert(spec.envelope.total_pages_field.clone(), json!(total_pages));
        }
        PaginationStyle::OffsetLimit => {
            envelope.insert(spec.envelope.page_field.clone(), json!(offset));
            envelope.insert(spec.envelope.size_field.clone(), json!(limit));
        }
    }

    envelope.insert(spec.envelope.total_items_field.clone(), json!(total_items));
    envelope.insert(
        spec.envelope.has_next_field.clone(),
        json!(slice_end < total_items),
    );
    envelope.insert(
        spec.envelope.has_previous_field.clone(),
        json!(slice_start > 0),
    );

    serde_json::to_vec(&Value::Object(envelope)).ok()
}
