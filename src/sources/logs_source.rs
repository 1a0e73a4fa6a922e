//! LogsQL-dialect logs Source (§6).

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::Value;

use crate::error::{CoreError, CoreResult};

use super::transport::Transport;
use super::{CallContext, LogSink, LogsQuerier, SourceConfig};

/// A single streamed row is capped at this many bytes; a row over the cap
/// is dropped rather than accumulated unbounded (§4.3).
pub const MAX_ROW_BYTES: usize = 16 * 1024 * 1024;

pub struct LogsQlSource {
    transport: Transport,
}

impl LogsQlSource {
    pub fn new(config: &SourceConfig) -> CoreResult<Self> {
        Ok(Self {
            transport: Transport::new(config)?,
        })
    }
}

#[async_trait]
impl LogsQuerier for LogsQlSource {
    async fn query(&self, query: &str, ctx: &CallContext) -> CoreResult<Value> {
        let resp = self
            .transport
            .get_with_fallback(
                "/select/logsql/query",
                "/select/logsql/query",
                &[("query", query.to_string())],
                ctx,
            )
            .await?;
        resp.json::<Value>()
            .await
            .map_err(|e| CoreError::upstream("/select/logsql/query", e.to_string(), None))
    }

    /// Streams line-delimited JSON rows to `sink` as bytes arrive off the
    /// wire, stopping at `ctx.limit` rows or the instant the sink rejects a
    /// row (§4.3 back-pressure rule) — never buffers the whole response
    /// body before delivering the first record. A single unterminated line
    /// over `MAX_ROW_BYTES` is dropped rather than accumulated without
    /// bound. Returns the union of field names observed across accepted
    /// rows.
    async fn export(
        &self,
        query: &str,
        sink: &mut dyn LogSink,
        ctx: &CallContext,
    ) -> CoreResult<Vec<String>> {
        let resp = self
            .transport
            .get_with_fallback(
                "/select/logsql/api/v1/export",
                "/select/logsql/api/v1/export",
                &[("query", query.to_string()), ("format", "json".to_string())],
                ctx,
            )
            .await?;

        let byte_stream = resp.bytes_stream().map(|chunk| {
            chunk.map_err(|e| {
                CoreError::upstream("/select/logsql/api/v1/export", e.to_string(), None)
            })
        });

        process_export_stream(byte_stream, sink, ctx).await
    }

    async fn labels(&self, ctx: &CallContext) -> CoreResult<Value> {
        let resp = self
            .transport
            .get_with_fallback(
                "/select/logsql/labels",
                "/select/logsql/labels",
                &[],
                ctx,
            )
            .await?;
        resp.json::<Value>()
            .await
            .map_err(|e| CoreError::upstream("/select/logsql/labels", e.to_string(), None))
    }

    async fn health(&self, ctx: &CallContext) -> CoreResult<bool> {
        match self
            .transport
            .get_with_fallback("/health", "/health", &[], ctx)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.is_cancelled() => Err(e),
            Err(_) => Ok(false),
        }
    }
}

/// Drives the line-delimited-JSON parsing loop shared by `export` and its
/// tests: consumes a byte stream (a real HTTP body in production, a
/// synthetic stream of chunks in tests), splits on `\n`, drops any
/// unterminated line over `MAX_ROW_BYTES` instead of growing `line_buf`
/// without bound, and stops after `ctx.limit` rows.
async fn process_export_stream(
    mut byte_stream: impl futures_util::Stream<Item = CoreResult<bytes::Bytes>> + Unpin,
    sink: &mut dyn LogSink,
    ctx: &CallContext,
) -> CoreResult<Vec<String>> {
    let mut fields = std::collections::BTreeSet::new();
    let mut emitted = 0usize;
    let limit = ctx.limit.unwrap_or(usize::MAX);
    let mut line_buf: Vec<u8> = Vec::new();

    'stream: while let Some(chunk) = byte_stream.next().await {
        if ctx.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        let chunk = chunk?;

        for byte in chunk.as_ref() {
            if *byte != b'\n' {
                if line_buf.len() < MAX_ROW_BYTES {
                    line_buf.push(*byte);
                }
                continue;
            }

            if emitted >= limit {
                break 'stream;
            }
            if !line_buf.is_empty() && line_buf.len() <= MAX_ROW_BYTES {
                if let Ok(record) = serde_json::from_slice::<Value>(&line_buf) {
                    if let Some(obj) = record.as_object() {
                        fields.extend(obj.keys().cloned());
                    }
                    sink.accept(record)?;
                    emitted += 1;
                }
            }
            line_buf.clear();
        }
    }

    if emitted < limit && !line_buf.is_empty() && line_buf.len() <= MAX_ROW_BYTES {
        if let Ok(record) = serde_json::from_slice::<Value>(&line_buf) {
            if let Some(obj) = record.as_object() {
                fields.extend(obj.keys().cloned());
            }
            sink.accept(record)?;
        }
    }

    Ok(fields.into_iter().collect())
}

/// Extracts a timestamp + label map from one exported log record, per the
/// label extraction schema in §4.5.
pub fn extract_record_labels(record: &Value, schema: &crate::labels::LabelSchema) -> Value {
    let mut map = serde_json::Map::new();
    for (canonical, value) in schema.resolve_all(record) {
        map.insert(canonical.to_string(), Value::String(value));
    }
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct VecSink(Vec<Value>);
    impl LogSink for VecSink {
        fn accept(&mut self, record: Value) -> CoreResult<()> {
            self.0.push(record);
            Ok(())
        }
    }

    struct RejectingSink;
    impl LogSink for RejectingSink {
        fn accept(&mut self, _record: Value) -> CoreResult<()> {
            Err(CoreError::Internal("sink full".into()))
        }
    }

    #[tokio::test]
    async fn rejects_oversized_row_without_panicking() {
        // One unterminated line over MAX_ROW_BYTES, followed by one small
        // well-formed row. The oversized line must be dropped rather than
        // accumulated or delivered to the sink, and the stream must not
        // panic while doing so.
        let oversized_line = "x".repeat(MAX_ROW_BYTES + 10);
        let mut body = oversized_line.into_bytes();
        body.push(b'\n');
        body.extend_from_slice(br#"{"a":1}"#);
        body.push(b'\n');

        let chunks: Vec<CoreResult<bytes::Bytes>> = vec![Ok(bytes::Bytes::from(body))];
        let stream = futures_util::stream::iter(chunks);

        let mut sink = VecSink(Vec::new());
        let ctx = CallContext::default();
        let fields = process_export_stream(stream, &mut sink, &ctx)
            .await
            .unwrap();

        assert_eq!(sink.0.len(), 1);
        assert_eq!(sink.0[0], serde_json::json!({"a": 1}));
        assert_eq!(fields, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn export_stream_stops_at_row_limit() {
        let body = b"{\"a\":1}\n{\"a\":2}\n{\"a\":3}\n".to_vec();
        let chunks: Vec<CoreResult<bytes::Bytes>> = vec![Ok(bytes::Bytes::from(body))];
        let stream = futures_util::stream::iter(chunks);

        let mut sink = VecSink(Vec::new());
        let ctx = CallContext {
            limit: Some(2),
            ..CallContext::default()
        };
        process_export_stream(stream, &mut sink, &ctx)
            .await
            .unwrap();

        assert_eq!(sink.0.len(), 2);
    }

    #[test]
    fn sink_error_type_is_plumbed_through_core_error() {
        let mut sink = RejectingSink;
        let err = sink.accept(serde_json::json!({})).unwrap_err();
        assert!(matches!(err, CoreError::Internal(_)));
    }

    #[test]
    fn vec_sink_accumulates_records() {
        let mut sink = VecSink(Vec::new());
        sink.accept(serde_json::json!({"a": 1})).unwrap();
        assert_eq!(sink.0.len(), 1);
    }
}
