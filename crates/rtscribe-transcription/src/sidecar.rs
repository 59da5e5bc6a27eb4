//! # Sidecar transcriber
//!
//! Talks to an out-of-process speech server over HTTP. Audio is POSTed as
//! multipart to `{base}/transcribe/stream`; the response body is
//! newline-delimited JSON, one object per segment:
//!
//! ```text
//! {"text":"hello","isFinal":false,"start":0.0,"end":0.8}
//! {"text":"hello world","isFinal":true,"start":0.0,"end":1.6}
//! {"error":"decoder crashed"}
//! ```
//!
//! An `error` line terminates the stream with [`TranscriptionError::Backend`].

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::transcriber::{SegmentStream, Transcriber};
use crate::types::{AudioSource, TranscribedSegment, TranscriptionError, TranscriptionRequest};

/// Longest NDJSON line accepted from the sidecar.
const MAX_LINE_BYTES: usize = 1024 * 1024;

/// HTTP client for a transcription sidecar.
#[derive(Clone, Debug)]
pub struct SidecarTranscriber {
    client: reqwest::Client,
    base_url: String,
    segment_timeout: Duration,
}

impl SidecarTranscriber {
    /// Build a client for `base_url`.
    ///
    /// `segment_timeout` bounds the wait for the response headers and the
    /// gap between two streamed segments.
    pub fn new(
        base_url: impl Into<String>,
        connect_timeout: Duration,
        segment_timeout: Duration,
    ) -> Result<Self, TranscriptionError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            segment_timeout,
        })
    }

    /// Base URL without trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Transcriber for SidecarTranscriber {
    fn name(&self) -> &str {
        "sidecar"
    }

    #[instrument(skip(self), fields(base_url = %self.base_url))]
    async fn load_model(&self, model: &str) -> Result<(), TranscriptionError> {
        let response = self
            .client
            .post(format!("{}/models/load", self.base_url))
            .json(&serde_json::json!({ "model": model }))
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(TranscriptionError::ModelNotAvailable(model.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TranscriptionError::Backend {
                status: status.as_u16(),
                message: body,
            });
        }
        debug!(model, "sidecar model loaded");
        Ok(())
    }

    #[instrument(skip_all, fields(source = %request.source.describe(), model = %request.model, language = %request.language))]
    async fn transcribe(
        &self,
        request: TranscriptionRequest,
    ) -> Result<SegmentStream, TranscriptionError> {
        let (file_name, audio) = read_source(&request.source).await?;

        let part = reqwest::multipart::Part::bytes(audio.to_vec())
            .file_name(file_name)
            .mime_str("application/octet-stream")?;
        let form = reqwest::multipart::Form::new()
            .text("model", request.model.clone())
            .text("language", request.language.clone())
            .part("audio", part);

        // headers only; the body is bounded per segment by `ndjson_segments`
        let pending = self
            .client
            .post(format!("{}/transcribe/stream", self.base_url))
            .multipart(form)
            .send();
        let response = tokio::time::timeout(self.segment_timeout, pending)
            .await
            .map_err(|_| TranscriptionError::Stalled(self.segment_timeout))??;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TranscriptionError::Backend {
                status: status.as_u16(),
                message: body,
            });
        }

        Ok(ndjson_segments(
            response.bytes_stream(),
            self.segment_timeout,
        ))
    }
}

async fn read_source(source: &AudioSource) -> Result<(String, Bytes), TranscriptionError> {
    match source {
        AudioSource::File(path) => {
            let data = tokio::fs::read(path).await.map_err(|e| {
                TranscriptionError::SourceUnavailable(format!("{}: {e}", path.display()))
            })?;
            Ok((file_name_of(path), Bytes::from(data)))
        }
        AudioSource::Buffer { name, data } => Ok((name.clone(), data.clone())),
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("audio")
        .to_string()
}

// ── NDJSON decoding ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SidecarLine {
    #[serde(default)]
    text: Option<String>,
    #[serde(default, alias = "is_final")]
    is_final: bool,
    #[serde(default)]
    start: Option<f64>,
    #[serde(default)]
    end: Option<f64>,
    #[serde(default)]
    error: Option<String>,
}

fn decode_line(line: &[u8]) -> Result<TranscribedSegment, TranscriptionError> {
    let parsed: SidecarLine =
        serde_json::from_slice(line).map_err(|e| TranscriptionError::Decode(e.to_string()))?;
    if let Some(message) = parsed.error {
        return Err(TranscriptionError::Backend { status: 0, message });
    }
    let text = parsed
        .text
        .ok_or_else(|| TranscriptionError::Decode("segment without text".into()))?;
    Ok(TranscribedSegment {
        text,
        is_final: parsed.is_final,
        start: parsed.start,
        end: parsed.end,
    })
}

fn is_blank(bytes: &[u8]) -> bool {
    bytes.iter().all(u8::is_ascii_whitespace)
}

/// Turn a chunked NDJSON body into a segment stream.
///
/// The first error ends the stream. Waiting longer than `idle_timeout` for
/// the next chunk yields [`TranscriptionError::Stalled`].
fn ndjson_segments<S>(byte_stream: S, idle_timeout: Duration) -> SegmentStream
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + Unpin + 'static,
{
    let stream = futures::stream::unfold(
        (byte_stream, BytesMut::with_capacity(4096), false),
        move |(mut stream, mut buffer, done)| async move {
            if done {
                return None;
            }

            loop {
                if let Some(newline_pos) = buffer.iter().position(|&b| b == b'\n') {
                    let mut line = buffer.split_to(newline_pos + 1);
                    line.truncate(line.len() - 1);
                    if line.last() == Some(&b'\r') {
                        line.truncate(line.len() - 1);
                    }
                    if is_blank(&line) {
                        continue;
                    }
                    let item = decode_line(&line);
                    let stop = item.is_err();
                    return Some((item, (stream, buffer, stop)));
                }
                if buffer.len() > MAX_LINE_BYTES {
                    let err = TranscriptionError::Decode(format!(
                        "line exceeds {MAX_LINE_BYTES} bytes without a newline"
                    ));
                    return Some((Err(err), (stream, buffer, true)));
                }

                match tokio::time::timeout(idle_timeout, stream.next()).await {
                    Ok(Some(Ok(chunk))) => buffer.extend_from_slice(&chunk),
                    Ok(Some(Err(e))) => {
                        warn!("sidecar stream read error: {e}");
                        return Some((Err(TranscriptionError::Http(e)), (stream, buffer, true)));
                    }
                    Ok(None) => {
                        if is_blank(&buffer) {
                            return None;
                        }
                        let rest = buffer.split();
                        return Some((decode_line(&rest), (stream, buffer, true)));
                    }
                    Err(_) => {
                        return Some((
                            Err(TranscriptionError::Stalled(idle_timeout)),
                            (stream, buffer, true),
                        ));
                    }
                }
            }
        },
    );
    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transcriber(server: &MockServer) -> SidecarTranscriber {
        SidecarTranscriber::new(
            server.uri(),
            Duration::from_secs(2),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn buffer_request() -> TranscriptionRequest {
        TranscriptionRequest {
            source: AudioSource::Buffer {
                name: "clip.wav".into(),
                data: Bytes::from_static(b"RIFF....WAVE"),
            },
            language: "en".into(),
            model: "tiny".into(),
        }
    }

    async fn collect(stream: SegmentStream) -> Vec<Result<TranscribedSegment, TranscriptionError>> {
        stream.collect().await
    }

    // ── decode_line ─────────────────────────────────────────────────

    #[test]
    fn decode_camel_and_snake() {
        let a = decode_line(br#"{"text":"hi","isFinal":true,"start":0.0,"end":0.5}"#).unwrap();
        assert!(a.is_final);
        assert_eq!(a.end, Some(0.5));
        let b = decode_line(br#"{"text":"hi","is_final":true}"#).unwrap();
        assert!(b.is_final);
        assert_eq!(b.start, None);
    }

    #[test]
    fn decode_error_line() {
        assert_matches!(
            decode_line(br#"{"error":"boom"}"#),
            Err(TranscriptionError::Backend { status: 0, message }) if message == "boom"
        );
    }

    #[test]
    fn decode_garbage() {
        assert_matches!(decode_line(b"not json"), Err(TranscriptionError::Decode(_)));
        assert_matches!(decode_line(b"{}"), Err(TranscriptionError::Decode(_)));
    }

    // ── HTTP ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn streams_segments_in_order() {
        let server = MockServer::start().await;
        let body = "{\"text\":\"one\",\"isFinal\":false}\n\n{\"text\":\"one two\",\"isFinal\":true}\r\n";
        Mock::given(method("POST"))
            .and(path("/transcribe/stream"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .expect(1)
            .mount(&server)
            .await;

        let stream = transcriber(&server).transcribe(buffer_request()).await.unwrap();
        let items = collect(stream).await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap().text, "one");
        assert!(items[1].as_ref().unwrap().is_final);
    }

    #[tokio::test]
    async fn trailing_line_without_newline_is_kept() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/transcribe/stream"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("{\"text\":\"a\"}\n{\"text\":\"b\"}"),
            )
            .mount(&server)
            .await;

        let items = collect(transcriber(&server).transcribe(buffer_request()).await.unwrap()).await;
        let texts: Vec<_> = items.into_iter().map(|r| r.unwrap().text).collect();
        assert_eq!(texts, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn error_line_ends_stream() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/transcribe/stream"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "{\"text\":\"a\"}\n{\"error\":\"decoder crashed\"}\n{\"text\":\"never\"}\n",
            ))
            .mount(&server)
            .await;

        let items = collect(transcriber(&server).transcribe(buffer_request()).await.unwrap()).await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert_matches!(&items[1], Err(TranscriptionError::Backend { .. }));
    }

    #[tokio::test]
    async fn non_success_status_is_start_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/transcribe/stream"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;

        let result = transcriber(&server).transcribe(buffer_request()).await;
        assert_matches!(
            result.err(),
            Some(TranscriptionError::Backend { status: 503, message }) if message == "busy"
        );
    }

    #[tokio::test]
    async fn slow_response_headers_stall() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/transcribe/stream"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("{\"text\":\"late\"}\n")
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let t = SidecarTranscriber::new(
            server.uri(),
            Duration::from_secs(2),
            Duration::from_millis(100),
        )
        .unwrap();
        assert_matches!(
            t.transcribe(buffer_request()).await.err(),
            Some(TranscriptionError::Stalled(_))
        );
    }

    #[tokio::test]
    async fn unterminated_oversized_line_is_decode_error() {
        let chunk = Bytes::from(vec![b'x'; MAX_LINE_BYTES + 1]);
        let body = futures::stream::iter(vec![Ok::<_, reqwest::Error>(chunk)]);
        let items = collect(ndjson_segments(body, Duration::from_secs(1))).await;
        assert_eq!(items.len(), 1);
        assert_matches!(&items[0], Err(TranscriptionError::Decode(msg)) if msg.contains("newline"));
    }

    #[tokio::test]
    async fn missing_file_is_source_unavailable() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let request = TranscriptionRequest {
            source: AudioSource::File(dir.path().join("absent.wav")),
            language: "en".into(),
            model: "tiny".into(),
        };
        assert_matches!(
            transcriber(&server).transcribe(request).await.err(),
            Some(TranscriptionError::SourceUnavailable(_))
        );
    }

    #[tokio::test]
    async fn file_source_is_uploaded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/transcribe/stream"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"text\":\"ok\"}\n"))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("speech.wav");
        std::fs::write(&file, b"RIFF").unwrap();
        let request = TranscriptionRequest {
            source: AudioSource::File(file),
            language: "de".into(),
            model: "base".into(),
        };
        let items = collect(transcriber(&server).transcribe(request).await.unwrap()).await;
        assert_eq!(items.len(), 1);

        let received = server.received_requests().await.unwrap();
        let body = String::from_utf8_lossy(&received[0].body);
        assert!(body.contains("speech.wav"));
        assert!(body.contains("base"));
    }

    #[tokio::test]
    async fn load_model_posts_name() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/load"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        transcriber(&server).load_model("base.en").await.unwrap();

        let received = server.received_requests().await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
        assert_eq!(json["model"], "base.en");
    }

    #[tokio::test]
    async fn load_unknown_model() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/load"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        assert_matches!(
            transcriber(&server).load_model("huge").await,
            Err(TranscriptionError::ModelNotAvailable(m)) if m == "huge"
        );
    }

    #[test]
    fn base_url_trailing_slash_trimmed() {
        let t = SidecarTranscriber::new(
            "http://127.0.0.1:8787/",
            Duration::from_secs(1),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(t.base_url(), "http://127.0.0.1:8787");
    }
}
