//! The stdio loop: one request per line in, one response per line out.
//!
//! Each request runs on its own task so a slow `connect` or `playMacro`
//! never holds up the next line. A single writer task owns the output, so
//! responses never interleave.

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tracing::{debug, info, warn};
use vncpilot_core::EngineHandle;

use crate::protocol::{Request, Response};
use crate::tools;

/// Longest accepted request line.
pub const MAX_LINE: usize = 16 * 1024 * 1024;

/// Answer one request line.
pub async fn handle_line(handle: &EngineHandle, line: &str) -> Response {
    let request = match Request::parse(line) {
        Ok(request) => request,
        Err(e) => return Response::error(Value::Null, format!("invalid request: {e}")),
    };
    match tools::call(handle, &request.tool, &request.args()).await {
        Ok(content) => Response::content(request.id, content),
        Err(e) => {
            debug!(tool = %request.tool, error = %e, "Rejected tool call");
            Response::error(request.id, e.to_string())
        }
    }
}

/// Serve requests from `input` until it ends, then wait for every
/// in-flight request to be answered.
pub async fn serve<R, W>(handle: EngineHandle, input: R, output: W) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut lines = FramedRead::new(input, LinesCodec::new_with_max_length(MAX_LINE));
    let mut sink = FramedWrite::new(output, LinesCodec::new());
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();

    // Writer task: responses -> output
    let writer = tokio::spawn(async move {
        while let Some(line) = out_rx.recv().await {
            if let Err(e) = sink.send(line).await {
                warn!(error = %e, "Output write error");
                return Err(into_io(e));
            }
        }
        Ok(())
    });

    // Reader: input -> one task per request
    while let Some(next) = lines.next().await {
        let line = match next {
            Ok(line) => line,
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                warn!("Request line too long; skipped");
                let _ = out_tx.send(Response::error(Value::Null, "request line too long").to_line());
                continue;
            }
            Err(LinesCodecError::Io(e)) => return Err(e),
        };
        if line.trim().is_empty() {
            continue;
        }

        let handle = handle.clone();
        let out_tx = out_tx.clone();
        tokio::spawn(async move {
            let response = handle_line(&handle, &line).await;
            let _ = out_tx.send(response.to_line());
        });
    }

    info!("Input closed; draining pending requests");
    drop(out_tx);
    match writer.await {
        Ok(result) => result,
        Err(e) => Err(std::io::Error::other(e)),
    }
}

fn into_io(e: LinesCodecError) -> std::io::Error {
    match e {
        LinesCodecError::Io(e) => e,
        other => std::io::Error::other(other),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::io::AsyncReadExt;

    use super::*;
    use crate::testing::idle_engine as engine;

    #[tokio::test]
    async fn malformed_lines_get_error_responses() {
        let h = engine();
        let resp = handle_line(&h, "not json").await;
        assert_eq!(resp.id, Value::Null);
        assert!(resp.error.unwrap().starts_with("invalid request"));

        let resp = handle_line(&h, r#"{"id":3,"tool":"nope"}"#).await;
        assert_eq!(resp.id, json!(3));
        assert_eq!(resp.error.as_deref(), Some("unknown tool: nope"));
    }

    #[tokio::test]
    async fn every_line_is_answered_once() {
        let input: &[u8] = b"{\"id\":1,\"tool\":\"status\"}\n\n{\"id\":2,\"tool\":\"listMacros\"}\ngarbage\n";
        let (output, mut client) = tokio::io::duplex(64 * 1024);

        serve(engine(), input, output).await.unwrap();

        let mut text = String::new();
        client.read_to_string(&mut text).await.unwrap();
        let mut responses: Vec<Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        responses.sort_by_key(|r| r["id"].as_i64().unwrap_or(0));

        assert_eq!(responses.len(), 3);
        assert!(responses[0]["error"].is_string());
        assert_eq!(
            responses[1],
            json!({"id": 1, "content": [{"type": "text", "text": "disconnected"}]})
        );
        assert_eq!(responses[2], json!({"id": 2, "content": []}));
    }
}
