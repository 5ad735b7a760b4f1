//! Line-at-a-time decoding of `k6 run --out json` output.

use async_stream::stream;
use futures::Stream;
use spansynth_core::model::k6::{NdjsonLine, PointData};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct MetricPoint {
    pub metric: String,
    pub data: PointData,
}

/// A line that could not be decoded. The stream carries on after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedLine {
    pub line: usize,
    pub reason: String,
}

/// Decodes `Point` records one line at a time. Blank lines and non-point
/// records are dropped, undecodable lines are yielded as [`MalformedLine`],
/// and a read error ends the stream with whatever was decoded so far.
pub fn points<R>(mut reader: R) -> impl Stream<Item = Result<MetricPoint, MalformedLine>>
where
    R: AsyncBufRead + Unpin,
{
    stream! {
        let mut buf = Vec::with_capacity(512);
        let mut line = 0usize;
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    line += 1;
                    let raw = buf.trim_ascii();
                    if raw.is_empty() {
                        continue;
                    }
                    match serde_json::from_slice::<NdjsonLine>(raw) {
                        Ok(NdjsonLine::Point { metric, data }) => yield Ok(MetricPoint { metric, data }),
                        Ok(_) => {}
                        Err(err) => yield Err(MalformedLine { line, reason: err.to_string() }),
                    }
                }
                Err(err) => {
                    warn!(line, error = %err, "ndjson read failed, keeping partial data");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    async fn collect(input: &'static [u8]) -> Vec<Result<MetricPoint, MalformedLine>> {
        points(input).collect().await
    }

    #[tokio::test]
    async fn keeps_points_and_reports_bad_lines() {
        let input = br#"{"type":"Metric","metric":"http_req_duration","data":{"type":"trend"}}
{"type":"Point","metric":"http_req_duration","data":{"time":"2026-01-01T00:00:00Z","value":12}}
{"type":"Point","metric":"http_req_dur

{"type":"Point","metric":"checks","data":{"time":"2026-01-01T00:00:01Z","value":1,"tags":{"check":"ok"}}}"#;
        let items = collect(input).await;

        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_ref().unwrap().metric, "http_req_duration");
        let bad = items[1].as_ref().unwrap_err();
        assert_eq!(bad.line, 3);
        assert!(bad.reason.contains("EOF"), "{}", bad.reason);
        assert_eq!(items[2].as_ref().unwrap().metric, "checks");
    }

    #[tokio::test]
    async fn invalid_utf8_is_one_malformed_line() {
        let input: &'static [u8] = b"\xff\xfe{\"type\":\"Point\"}\n{\"type\":\"Point\",\"metric\":\"vus\",\"data\":{\"time\":\"2026-01-01T00:00:00Z\",\"value\":1}}\n";
        let items = collect(input).await;

        assert_eq!(items.len(), 2);
        assert!(items[0].is_err());
        assert_eq!(items[1].as_ref().unwrap().metric, "vus");
    }

    #[tokio::test]
    async fn point_without_value_is_malformed() {
        let items = collect(br#"{"type":"Point","metric":"checks","data":{"time":"2026-01-01T00:00:00Z"}}"#).await;
        assert_eq!(items.len(), 1);
        assert!(items[0].is_err());
    }
}
