//! Backend Client / Source layer (§4.3, §6).
//!
//! Each dialect module (`metrics_source`, `logs_source`, `traces_source`)
//! implements one of the capability traits below against a specific wire
//! format. `federated.rs` composes any number of same-capability sources
//! into one that fans requests out and aggregates per §4.3's rules.

pub mod endpoint;
pub mod federated;
pub mod logs_source;
pub mod metrics_source;
pub mod retry;
pub mod traces_source;
pub mod transport;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::CoreResult;

/// Shared per-source configuration (§6 config table).
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub name: String,
    pub endpoints: Vec<String>,
    pub timeout: std::time::Duration,
    pub retries: u32,
    pub backoff_ms: u64,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl SourceConfig {
    pub fn new(name: impl Into<String>, endpoints: Vec<String>) -> Self {
        Self {
            name: name.into(),
            endpoints,
            timeout: std::time::Duration::from_secs(10),
            retries: 3,
            backoff_ms: 100,
            username: None,
            password: None,
        }
    }
}

/// A decimal-digit unsigned 32-bit integer tenant identifier, validated per
/// the tenant-identifier rule (§6).
pub fn is_valid_tenant_id(tenant: &str) -> bool {
    !tenant.is_empty() && tenant.chars().all(|c| c.is_ascii_digit()) && tenant.parse::<u32>().is_ok()
}

/// Per-call context threaded through every Source operation: the tenant
/// header, a cancellation token, and a row/result limit.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    pub tenant_id: Option<String>,
    pub scope_org_id: Option<String>,
    pub limit: Option<usize>,
    pub cancellation: Option<tokio_util::sync::CancellationToken>,
}

impl CallContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .map(|t| t.is_cancelled())
            .unwrap_or(false)
    }
}

#[async_trait]
pub trait MetricsQuerier: Send + Sync {
    async fn instant_query(&self, query: &str, ctx: &CallContext) -> CoreResult<Value>;
    async fn range_query(
        &self,
        query: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: chrono::Duration,
        ctx: &CallContext,
    ) -> CoreResult<Value>;
    async fn series(&self, matchers: &[String], ctx: &CallContext) -> CoreResult<Value>;
    async fn labels(&self, ctx: &CallContext) -> CoreResult<Value>;
    async fn label_values(&self, label: &str, ctx: &CallContext) -> CoreResult<Value>;
    async fn health(&self, ctx: &CallContext) -> CoreResult<bool>;
}

/// Sink for streamed log export: one call per record. Returning an error
/// aborts the stream (§4.3 back-pressure rule).
pub trait LogSink: Send {
    fn accept(&mut self, record: Value) -> CoreResult<()>;
}

#[async_trait]
pub trait LogsQuerier: Send + Sync {
    async fn query(&self, query: &str, ctx: &CallContext) -> CoreResult<Value>;
    async fn export(
        &self,
        query: &str,
        sink: &mut dyn LogSink,
        ctx: &CallContext,
    ) -> CoreResult<Vec<String>>;
    async fn labels(&self, ctx: &CallContext) -> CoreResult<Value>;
    async fn health(&self, ctx: &CallContext) -> CoreResult<bool>;
}

#[async_trait]
pub trait TracesQuerier: Send + Sync {
    async fn services(&self, ctx: &CallContext) -> CoreResult<Value>;
    async fn operations(&self, service: &str, ctx: &CallContext) -> CoreResult<Value>;
    async fn search(
        &self,
        service: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        ctx: &CallContext,
    ) -> CoreResult<Value>;
    async fn get_trace(&self, trace_id: &str, ctx: &CallContext) -> CoreResult<Value>;
    async fn health(&self, ctx: &CallContext) -> CoreResult<bool>;
}

/// Normalizes a timestamp expressed in RFC3339 text, or seconds/millis/micros
/// since epoch, to milliseconds since epoch, per §4.3's magnitude heuristic.
pub fn normalize_timestamp_ms(value: &Value) -> Option<i64> {
    if let Some(text) = value.as_str() {
        if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
            return Some(dt.timestamp_millis());
        }
        if let Ok(n) = text.parse::<f64>() {
            return Some(magnitude_to_millis(n));
        }
        return None;
    }
    value.as_f64().map(magnitude_to_millis)
}

fn magnitude_to_millis(n: f64) -> i64 {
    // seconds ~1e9, millis ~1e12, micros ~1e15 for "now"-ish timestamps.
    if n >= 1e17 {
        (n / 1_000.0) as i64 // nanoseconds
    } else if n >= 1e14 {
        (n / 1_000.0) as i64 // microseconds
    } else if n >= 1e11 {
        n as i64 // milliseconds
    } else {
        (n * 1_000.0) as i64 // seconds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tenant_id_validation() {
        assert!(is_valid_tenant_id("42"));
        assert!(is_valid_tenant_id("0"));
        assert!(!is_valid_tenant_id("-1"));
        assert!(!is_valid_tenant_id("abc"));
        assert!(!is_valid_tenant_id(""));
        assert!(!is_valid_tenant_id("99999999999999999999"));
    }

    #[test]
    fn normalizes_seconds_millis_micros() {
        let secs = normalize_timestamp_ms(&json!(1_700_000_000.0)).unwrap();
        let millis = normalize_timestamp_ms(&json!(1_700_000_000_000.0)).unwrap();
        let micros = normalize_timestamp_ms(&json!(1_700_000_000_000_000.0)).unwrap();
        assert_eq!(secs, 1_700_000_000_000);
        assert_eq!(millis, 1_700_000_000_000);
        assert_eq!(micros, 1_700_000_000_000);
    }

    #[test]
    fn normalizes_rfc3339_text() {
        let ms = normalize_timestamp_ms(&json!("2024-01-01T00:00:00Z")).unwrap();
        assert!(ms > 0);
    }
}
