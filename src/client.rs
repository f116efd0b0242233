use std::cell::Cell;
use std::time::Instant;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client as ReqwestClient, Response};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{Error, Result};
use crate::observability::{
    CLIENT_REQUEST_ERRORS, CLIENT_REQUESTS, STREAM_CANCELLED, STREAM_DURATION, STREAM_ERRORS,
    STREAM_FLUSHES, STREAM_RESPONSE_TIME,
};
use crate::reassemble::Reassembler;
use crate::sse::{Frame, process_sse};
use crate::types::{
    ApiErrorBody, ChatCompletionRequest, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE, Message,
    ModelEndpoint,
};

const COMPLETIONS_PATH: &str = "chat/completions";

/// How a stream that did not fail came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// The terminal frame arrived and the body was read to the end.
    Completed,
    /// The cancellation token fired.  Output delivered before that point stands.
    Cancelled,
}

/// Client for an OpenAI-compatible chat-completions endpoint.
///
/// The client has no request timeout; callers that want one cancel the token.
#[derive(Debug, Clone)]
pub struct ChatClient {
    endpoint: ModelEndpoint,
    url: Url,
    client: ReqwestClient,
    temperature: f32,
    max_tokens: u32,
}

impl ChatClient {
    /// Create a client for `endpoint`.
    ///
    /// Fails if a credential is blank or the base URL does not parse.
    pub fn new(endpoint: ModelEndpoint) -> Result<Self> {
        endpoint.validate()?;
        let url = completions_url(&endpoint.base_url)?;
        let client = ReqwestClient::builder().build().map_err(|e| {
            Error::http_client(
                format!("Failed to build HTTP client: {e}"),
                Some(Box::new(e)),
            )
        })?;
        Ok(Self {
            endpoint,
            url,
            client,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        })
    }

    /// Sets the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Sets the maximum tokens per response.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// The endpoint this client talks to.
    pub fn endpoint(&self) -> &ModelEndpoint {
        &self.endpoint
    }

    /// The full URL requests are posted to.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The body that [`ChatClient::send`] would post for `messages`.
    pub fn request_body(&self, messages: &[Message]) -> ChatCompletionRequest {
        ChatCompletionRequest::new(&self.endpoint.model, messages)
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens)
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers.insert(header::ACCEPT, HeaderValue::from_static("text/event-stream"));
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", self.endpoint.api_key.trim()))
            .map_err(|_| {
                Error::validation(
                    "API key contains characters that are not allowed in a header",
                    Some("api_key".to_string()),
                )
            })?;
        auth.set_sensitive(true);
        headers.insert(header::AUTHORIZATION, auth);
        Ok(headers)
    }

    /// Stream a reply to `messages`.
    ///
    /// Each flush of the reassembled reply is passed to `on_flush` in order.  The call returns
    /// once the body is exhausted, or as soon as `cancel` fires, in which case the connection is
    /// dropped and `on_flush` is not called again.
    pub async fn send<F>(
        &self,
        messages: &[Message],
        on_flush: F,
        cancel: &CancellationToken,
    ) -> Result<StreamOutcome>
    where
        F: FnMut(&str),
    {
        CLIENT_REQUESTS.click();
        let started = Instant::now();
        let body = self.request_body(messages);
        tracing::debug!(
            url = %self.url,
            model = %body.model,
            messages = body.messages.len(),
            "sending chat completion request"
        );

        let request = self
            .client
            .post(self.url.clone())
            .headers(self.headers()?)
            .json(&body)
            .send();
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                STREAM_CANCELLED.click();
                tracing::debug!("request cancelled before response");
                return Ok(StreamOutcome::Cancelled);
            }
            response = request => response,
        };
        let response = match response {
            Ok(response) => response,
            Err(e) => return Err(self.request_failed(classify_send_error(e))),
        };
        if !response.status().is_success() {
            let err = process_error_response(response).await;
            return Err(self.request_failed(err));
        }
        // Time until the status line and headers arrive, before any body bytes.
        STREAM_RESPONSE_TIME.add(started.elapsed().as_secs_f64());

        let outcome = stream_flushes(response.bytes_stream(), on_flush, cancel).await;
        STREAM_DURATION.add(started.elapsed().as_secs_f64());
        if let Err(err) = &outcome {
            STREAM_ERRORS.click();
            tracing::error!(url = %self.url, model = %body.model, error = %err, "stream failed");
        }
        outcome
    }

    fn request_failed(&self, err: Error) -> Error {
        CLIENT_REQUEST_ERRORS.click();
        tracing::error!(
            status = err.status_code(),
            url = %self.url,
            model = %self.endpoint.model,
            error = %err,
            "chat completion request failed"
        );
        err
    }
}

/// Run a response body through the frame decoder and reassembler.
///
/// This is the body half of [`ChatClient::send`] and works on any byte stream.  A body that ends
/// without the terminal frame still delivers what was buffered.  A transport error delivers what
/// was buffered and then returns the error.  A body with no bytes at all is a transport error.
pub async fn stream_flushes<S, E, F>(
    byte_stream: S,
    mut on_flush: F,
    cancel: &CancellationToken,
) -> Result<StreamOutcome>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
    E: std::error::Error + Send + Sync + 'static,
    F: FnMut(&str),
{
    let received = Cell::new(0usize);
    let counted = byte_stream.inspect(|chunk| {
        if let Ok(bytes) = chunk {
            received.set(received.get() + bytes.len());
        }
    });
    let frames = process_sse(counted);
    futures::pin_mut!(frames);

    let mut reassembler = Reassembler::new();
    let mut deliver = |text: String| {
        STREAM_FLUSHES.click();
        on_flush(&text);
    };
    let mut terminated = false;
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                STREAM_CANCELLED.click();
                tracing::debug!(pending = reassembler.pending().len(), "stream cancelled");
                return Ok(StreamOutcome::Cancelled);
            }
            next = frames.next() => next,
        };
        match next {
            Some(Ok(Frame::Delta(delta))) => {
                if terminated {
                    tracing::debug!("ignoring content after end-of-stream sentinel");
                    continue;
                }
                if let Some(text) = reassembler.push(&delta) {
                    deliver(text);
                }
            }
            Some(Ok(Frame::Done)) => {
                if !terminated {
                    terminated = true;
                    if let Some(text) = reassembler.finish() {
                        deliver(text);
                    }
                }
            }
            Some(Err(err)) => {
                if let Some(text) = reassembler.finish() {
                    deliver(text);
                }
                return Err(err);
            }
            None => break,
        }
    }

    if received.get() == 0 {
        return Err(Error::streaming("Response body is empty", None));
    }
    if !terminated {
        tracing::warn!("stream ended without the [DONE] sentinel");
        if let Some(text) = reassembler.finish() {
            deliver(text);
        }
    }
    Ok(StreamOutcome::Completed)
}

/// Map a non-2xx status and its body to an error.
///
/// The message comes from `error.message` in a JSON body when there is one.
pub fn classify_status(status: u16, body: &str, retry_after: Option<u64>) -> Error {
    let detail = ApiErrorBody::parse(body).and_then(|b| b.error);
    let message = detail
        .as_ref()
        .and_then(|d| d.message.clone())
        .unwrap_or_else(|| format!("HTTP error! status: {status}"));
    match status {
        400 => Error::bad_request(message, detail.and_then(|d| d.param)),
        401 => Error::authentication(message),
        429 => Error::rate_limit(message, retry_after),
        _ => Error::api(status, detail.and_then(|d| d.error_type), message),
    }
}

async fn process_error_response(response: Response) -> Error {
    let status = response.status().as_u16();
    let retry_after = response
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|val| val.to_str().ok())
        .and_then(|val| val.trim().parse::<u64>().ok());
    let body = match response.text().await {
        Ok(body) => body,
        Err(e) => {
            tracing::debug!(status, error = %e, "could not read error body");
            String::new()
        }
    };
    classify_status(status, &body, retry_after)
}

fn classify_send_error(e: reqwest::Error) -> Error {
    if e.is_connect() {
        Error::connection(format!("Connection error: {e}"), Some(Box::new(e)))
    } else {
        Error::http_client(format!("Request failed: {e}"), Some(Box::new(e)))
    }
}

fn completions_url(base_url: &str) -> Result<Url> {
    let mut base = base_url.trim().to_string();
    if !base.ends_with('/') {
        base.push('/');
    }
    Ok(Url::parse(&base)?.join(COMPLETIONS_PATH)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::time::Duration;

    type Chunk = std::result::Result<Bytes, std::io::Error>;

    fn data_line(content: &str) -> String {
        let payload = serde_json::json!({"choices": [{"delta": {"content": content}}]});
        format!("data: {payload}\n\n")
    }

    fn body(deltas: &[&str], done: bool) -> String {
        let mut body: String = deltas.iter().map(|d| data_line(d)).collect();
        if done {
            body.push_str("data: [DONE]\n\n");
        }
        body
    }

    fn chunks(body: &str, size: usize) -> Vec<Chunk> {
        body.as_bytes()
            .chunks(size)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect()
    }

    async fn collect(chunks: Vec<Chunk>) -> (Result<StreamOutcome>, Vec<String>) {
        let mut flushes = Vec::new();
        let cancel = CancellationToken::new();
        let outcome = stream_flushes(
            stream::iter(chunks),
            |text| flushes.push(text.to_string()),
            &cancel,
        )
        .await;
        (outcome, flushes)
    }

    #[test]
    fn client_creation() {
        let client =
            ChatClient::new(ModelEndpoint::new("https://api.example.com/v1", "sk-test", "m"))
                .unwrap();
        assert_eq!(
            client.url().as_str(),
            "https://api.example.com/v1/chat/completions"
        );
        let client = ChatClient::new(ModelEndpoint::new(
            "https://api.example.com/v1/",
            "sk-test",
            "m",
        ))
        .unwrap();
        assert_eq!(
            client.url().as_str(),
            "https://api.example.com/v1/chat/completions"
        );
    }

    #[test]
    fn client_creation_rejects_missing_credentials() {
        let err = ChatClient::new(ModelEndpoint::new("https://x", "", "m")).unwrap_err();
        assert!(err.is_validation());
        let err = ChatClient::new(ModelEndpoint::new("not a url", "k", "m")).unwrap_err();
        assert!(matches!(err, Error::Url { .. }));
    }

    #[test]
    fn request_body_uses_client_options() {
        let client = ChatClient::new(ModelEndpoint::new("https://x", "k", "m"))
            .unwrap()
            .with_temperature(0.2)
            .with_max_tokens(64);
        let body = client.request_body(&[Message::user("u"), Message::system("s")]);
        assert_eq!(body.temperature, 0.2);
        assert_eq!(body.max_tokens, 64);
        assert_eq!(body.messages[0].content, "s");
        assert!(body.stream);
    }

    #[test]
    fn status_classification() {
        assert!(classify_status(400, "", None).is_bad_request());
        assert!(classify_status(401, "", None).is_authentication());
        assert!(classify_status(429, "", Some(2)).is_rate_limit());
        let err = classify_status(503, "", None);
        assert!(err.is_api());
        assert_eq!(err.status_code(), Some(503));
        assert_eq!(err.to_string(), "API error: HTTP error! status: 503");
    }

    #[test]
    fn error_message_from_body() {
        let err = classify_status(
            500,
            r#"{"error":{"message":"model overloaded","type":"server_error"}}"#,
            None,
        );
        assert_eq!(err.to_string(), "server_error: model overloaded");
        let err = classify_status(
            400,
            r#"{"error":{"message":"bad max_tokens","param":"max_tokens"}}"#,
            None,
        );
        assert_eq!(
            err.to_string(),
            "Bad request: bad max_tokens (parameter: max_tokens)"
        );
    }

    #[tokio::test]
    async fn flushes_in_order() {
        let body = body(&[" Hello", " world", "\n\n\n", "Next:", " line"], true);
        for size in [1, 3, 17, body.len()] {
            let (outcome, flushes) = collect(chunks(&body, size)).await;
            assert_eq!(outcome.unwrap(), StreamOutcome::Completed);
            assert_eq!(flushes, vec!["Hello world\nNext:", " line"], "size {size}");
        }
    }

    #[tokio::test]
    async fn missing_sentinel_still_flushes() {
        let (outcome, flushes) = collect(chunks(&body(&["partial"], false), 8)).await;
        assert_eq!(outcome.unwrap(), StreamOutcome::Completed);
        assert_eq!(flushes, vec!["partial"]);
    }

    #[tokio::test]
    async fn content_after_sentinel_is_ignored() {
        let mut text = body(&["a"], true);
        text.push_str(&data_line("late"));
        let (outcome, flushes) = collect(chunks(&text, 5)).await;
        assert_eq!(outcome.unwrap(), StreamOutcome::Completed);
        assert_eq!(flushes, vec!["a"]);
    }

    #[tokio::test]
    async fn empty_body_is_transport_error() {
        let (outcome, flushes) = collect(Vec::new()).await;
        assert!(outcome.unwrap_err().is_transport());
        assert!(flushes.is_empty());
    }

    #[tokio::test]
    async fn transport_error_keeps_partial_output() {
        let mut chunks = chunks(&body(&["Hi", " there"], false), 64);
        chunks.push(Err(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        )));
        let (outcome, flushes) = collect(chunks).await;
        assert!(outcome.unwrap_err().is_transport());
        assert_eq!(flushes.concat(), "Hi there");
    }

    #[tokio::test]
    async fn cancel_inside_callback_stops_delivery() {
        let text = body(&["one:", "two:", "three:"], true);
        let cancel = CancellationToken::new();
        let mut flushes = Vec::new();
        let outcome = stream_flushes(
            stream::iter(chunks(&text, text.len())),
            |text| {
                flushes.push(text.to_string());
                cancel.cancel();
            },
            &cancel,
        )
        .await;
        assert_eq!(outcome.unwrap(), StreamOutcome::Cancelled);
        assert_eq!(flushes, vec!["one:"]);
    }

    #[tokio::test]
    async fn cancel_while_waiting_for_body() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let first: Vec<Chunk> = chunks(&body(&["Title:", " pending"], false), 4);
        let body_stream = stream::iter(first).chain(stream::pending());
        let mut flushes = Vec::new();
        let outcome = stream_flushes(body_stream, |t| flushes.push(t.to_string()), &cancel).await;
        assert_eq!(outcome.unwrap(), StreamOutcome::Cancelled);
        assert_eq!(flushes, vec!["Title:"]);
    }

    #[tokio::test]
    async fn already_cancelled_token_reads_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut flushes = Vec::new();
        let outcome = stream_flushes(
            stream::iter(chunks(&body(&["x:"], true), 4)),
            |t| flushes.push(t.to_string()),
            &cancel,
        )
        .await;
        assert_eq!(outcome.unwrap(), StreamOutcome::Cancelled);
        assert!(flushes.is_empty());
    }
}
