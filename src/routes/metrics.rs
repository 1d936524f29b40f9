//! Prometheus metrics endpoint
//!
//! Request, error and chat-completion series exported in Prometheus text
//! format for scraping.

use axum::response::IntoResponse;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::Lazy;

static PROMETHEUS_HANDLE: Lazy<PrometheusHandle> = Lazy::new(|| {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
});

/// Initialize metrics (call once at startup).
pub fn init_metrics() {
    let _ = &*PROMETHEUS_HANDLE;
    register_metrics();
}

fn register_metrics() {
    metrics::describe_counter!(
        "switchboard_requests_total",
        "Total number of requests processed"
    );
    metrics::describe_histogram!(
        "switchboard_request_duration_seconds",
        "Request duration in seconds"
    );
    metrics::describe_counter!(
        "switchboard_errors_total",
        "Total number of request errors by kind"
    );
    metrics::describe_counter!(
        "switchboard_chat_completions_total",
        "Total OpenAI-compat chat completions by engine and model"
    );
    metrics::describe_histogram!(
        "switchboard_chat_completion_duration_seconds",
        "OpenAI-compat chat completion duration in seconds"
    );
}

/// Prometheus scrape handler.
pub async fn prometheus_metrics() -> impl IntoResponse {
    PROMETHEUS_HANDLE.render()
}

pub fn record_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    metrics::counter!(
        "switchboard_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!(
        "switchboard_request_duration_seconds",
        "method" => method.to_string(),
        "path" => path.to_string()
    )
    .record(duration_secs);
}

pub fn record_error(method: &str, path: &str, kind: &str) {
    metrics::counter!(
        "switchboard_errors_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "kind" => kind.to_string()
    )
    .increment(1);
}

pub fn record_chat_completion(engine: &str, model: &str, duration_secs: f64) {
    metrics::counter!(
        "switchboard_chat_completions_total",
        "engine" => engine.to_string(),
        "model" => model.to_string()
    )
    .increment(1);
    metrics::histogram!(
        "switchboard_chat_completion_duration_seconds",
        "engine" => engine.to_string(),
        "model" => model.to_string()
    )
    .record(duration_secs);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_initialize_once() {
        init_metrics();
        record_request("GET", "/healthz", 200, 0.001);
        record_error("POST", "/openai-proxy/v1/chat/completions", "request_parse");
        record_chat_completion("bedrock", "bedrock/claude", 0.5);
    }
}
