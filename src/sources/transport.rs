//! Shared HTTP plumbing for the dialect Sources: endpoint selection, path
//! fallback, retry/backoff, and auth header attachment (§4.3).

use reqwest::{Client, RequestBuilder, Response};

use crate::error::CoreError;

use super::endpoint::EndpointPool;
use super::retry::{is_retryable_status, BackoffCalculator, RetryPolicy};
use super::{CallContext, SourceConfig};

/// Classification of a single HTTP attempt, used to decide retry vs.
/// fallback vs. give-up without re-borrowing a consumed `Response`.
enum Outcome {
    Fallback,
    Retryable(CoreError),
    Fatal(CoreError),
}

/// Owns the HTTP client, endpoint pool and auth for one backend instance.
/// Cloning is cheap: `reqwest::Client` is an `Arc` internally and the pool
/// is shared behind its own lock.
#[derive(Clone)]
pub struct Transport {
    client: Client,
    pool: std::sync::Arc<EndpointPool>,
    policy: RetryPolicy,
    username: Option<String>,
    password: Option<String>,
}

impl Transport {
    pub fn new(config: &SourceConfig) -> Result<Self, CoreError> {
        if config.endpoints.is_empty() {
            return Err(CoreError::Config(format!(
                "source {}: no endpoint configured",
                config.name
            )));
        }
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| CoreError::Config(format!("building http client: {e}")))?;
        Ok(Self {
            client,
            pool: std::sync::Arc::new(EndpointPool::new(config.endpoints.clone())),
            policy: RetryPolicy {
                max_attempts: config.retries.max(1),
                base_ms: config.backoff_ms,
                ..RetryPolicy::default()
            },
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    fn authed(&self, builder: RequestBuilder, ctx: &CallContext) -> RequestBuilder {
        let mut builder = builder;
        if let (Some(user), Some(pass)) = (&self.username, &self.password) {
            builder = builder.basic_auth(user, Some(pass));
        }
        if let Some(tenant) = &ctx.tenant_id {
            if super::is_valid_tenant_id(tenant) {
                builder = builder.header("AccountID", tenant);
            }
        }
        if let Some(org) = &ctx.scope_org_id {
            builder = builder.header("X-Scope-OrgID", org);
        }
        builder
    }

    /// Issues a GET against the cluster-style path; on HTTP 404, or HTTP 400
    /// whose body contains "unsupported path", retries once against the
    /// single-node path. Both attempts share the outer retry/backoff loop.
    pub async fn get_with_fallback(
        &self,
        cluster_path: &str,
        single_node_path: &str,
        query: &[(&str, String)],
        ctx: &CallContext,
    ) -> Result<Response, CoreError> {
        let mut backoff = BackoffCalculator::new(self.policy);

        loop {
            if ctx.is_cancelled() {
                return Err(CoreError::Cancelled);
            }
            let base = self.pool.next();
            let url = format!("{base}{cluster_path}");

            let attempt = self.try_one(&url, query, ctx).await;

            let needs_fallback = matches!(&attempt, Err(Outcome::Fallback));
            let attempt = if needs_fallback {
                let fallback_url = format!("{base}{single_node_path}");
                self.try_one(&fallback_url, query, ctx).await
            } else {
                attempt
            };

            match attempt {
                Ok(resp) => return Ok(resp),
                Err(Outcome::Fallback) if !backoff.exhausted() => {
                    sleep_or_cancel(backoff.next_backoff(), ctx).await?;
                }
                Err(Outcome::Retryable(_)) if !backoff.exhausted() => {
                    metrics::counter!(crate::telemetry::metric_names::RETRY_ATTEMPTS).increment(1);
                    sleep_or_cancel(backoff.next_backoff(), ctx).await?;
                }
                Err(Outcome::Fallback) => {
                    return Err(CoreError::upstream(
                        url,
                        "both cluster and single-node paths exhausted".to_string(),
                        None,
                    ))
                }
                Err(Outcome::Retryable(e)) => return Err(e),
                Err(Outcome::Fatal(e)) => return Err(e),
            }
        }
    }

    /// One request attempt, classified into whether the caller should
    /// retry, fall back to the single-node path, or give up.
    async fn try_one(
        &self,
        url: &str,
        query: &[(&str, String)],
        ctx: &CallContext,
    ) -> Result<Response, Outcome> {
        let request = self.authed(self.client.get(url).query(query), ctx);
        match request.send().await {
            Ok(resp) if resp.status().is_success() => Ok(resp),
            Ok(resp) if resp.status() == reqwest::StatusCode::NOT_FOUND => Err(Outcome::Fallback),
            Ok(resp) if resp.status() == reqwest::StatusCode::BAD_REQUEST => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                if body.contains("unsupported path") {
                    Err(Outcome::Fallback)
                } else {
                    Err(Outcome::Fatal(CoreError::upstream(
                        url.to_string(),
                        format!("status {status}"),
                        Some(body),
                    )))
                }
            }
            Ok(resp) if is_retryable_status(resp.status()) => {
                let status = resp.status();
                let body = resp.text().await.ok();
                Err(Outcome::Retryable(CoreError::upstream(
                    url.to_string(),
                    format!("status {status}"),
                    body,
                )))
            }
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.ok();
                Err(Outcome::Fatal(CoreError::upstream(
                    url.to_string(),
                    format!("status {status}"),
                    body,
                )))
            }
            Err(e) => Err(Outcome::Retryable(CoreError::upstream(
                url.to_string(),
                e.to_string(),
                None,
            ))),
        }
    }

    pub fn endpoint_count(&self) -> usize {
        self.pool.len()
    }
}

/// Sleeps for `duration`, racing the caller's cancellation token so a
/// retry loop doesn't sit through a full backoff after the caller has
/// already given up (§5 "Cancellation").
async fn sleep_or_cancel(duration: std::time::Duration, ctx: &CallContext) -> Result<(), CoreError> {
    match &ctx.cancellation {
        Some(token) => {
            tokio::select! {
                _ = tokio::time::sleep(duration) => Ok(()),
                _ = token.cancelled() => Err(CoreError::Cancelled),
            }
        }
        None => {
            tokio::time::sleep(duration).await;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_rejects_empty_endpoint_list() {
        let config = SourceConfig::new("metrics", vec![]);
        assert!(Transport::new(&config).is_err());
    }

    #[test]
    fn transport_constructs_with_endpoints() {
        let config = SourceConfig::new("metrics", vec!["http://localhost:9090".into()]);
        let transport = Transport::new(&config).unwrap();
        assert_eq!(transport.endpoint_count(), 1);
    }
}
