use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use futures_util::stream::{Stream, StreamExt};
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Serialize};

use crate::config::HttpCfg;
use crate::error::{CoreResult, ProbeError};

/// Represents a single Server-Sent-Event line, with its line terminator removed.
#[derive(Debug, Clone)]
pub struct SseLine {
    pub line: String,
}

/// A boxed stream of `SseLine` results.
pub type SseStream = Pin<Box<dyn Stream<Item = CoreResult<SseLine>> + Send>>;

/// Raw response body chunks, transport errors already mapped.
pub(crate) type ByteStream = Pin<Box<dyn Stream<Item = CoreResult<Bytes>> + Send>>;

/// Thin wrapper around reqwest::Client with defaults and helpers.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
    user_agent: String,
}

impl HttpClient {
    pub fn new(cfg: &HttpCfg) -> CoreResult<Self> {
        let inner = Client::builder()
            .connect_timeout(Duration::from_millis(cfg.connect_timeout_ms))
            .timeout(Duration::from_millis(cfg.request_timeout_ms))
            .build()
            .map_err(|e| ProbeError::Other(anyhow::anyhow!("http client build failed: {e}")))?;
        Ok(Self {
            inner,
            user_agent: concat!("chatprobe/", env!("CARGO_PKG_VERSION")).to_string(),
        })
    }

    pub fn new_default() -> CoreResult<Self> {
        Self::new(&HttpCfg::default())
    }

    /// POST a JSON body and decode a JSON reply.
    /// Returns the parsed body, the upstream request id (if any header carries one)
    /// and the elapsed milliseconds.
    pub async fn post_json<T: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
    ) -> CoreResult<(R, Option<String>, u32)> {
        let start = Instant::now();
        let mut req = self
            .inner
            .post(url)
            .json(body)
            .header("User-Agent", &self.user_agent);
        for (k, v) in headers {
            req = req.header(*k, *v);
        }

        let resp = req.send().await.map_err(|e| map_send_error(url, &e))?;

        let latency = start.elapsed().as_millis() as u32;
        let status = resp.status();
        let headers = resp.headers().clone();
        let request_id = extract_request_id(&headers);

        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let ra = parse_retry_after(&headers);
            return Err(map_http_error(url, status, ra, &text));
        }

        let parsed = resp.json::<R>().await.map_err(|e| {
            if e.is_timeout() {
                map_send_error(url, &e)
            } else {
                ProbeError::Upstream {
                    endpoint: url.to_string(),
                    code: status.as_u16().to_string(),
                    message: format!("json decode error: {e}"),
                }
            }
        })?;
        Ok((parsed, request_id, latency))
    }

    /// POST JSON and return an SSE (Server-Sent Events) line stream.
    /// Each yielded item is one raw line (trim not applied) from the SSE channel.
    /// Status failures are reported here, before any line is produced.
    pub async fn post_sse_lines<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
    ) -> CoreResult<SseStream> {
        let mut req = self
            .inner
            .post(url)
            .json(body)
            .header("User-Agent", &self.user_agent)
            .header("Accept", "text/event-stream");
        for (k, v) in headers {
            req = req.header(*k, *v);
        }

        let resp = req.send().await.map_err(|e| map_send_error(url, &e))?;

        let status = resp.status();
        if !status.is_success() {
            let headers = resp.headers().clone();
            let ra = parse_retry_after(&headers);
            let body = resp.text().await.unwrap_or_default();
            return Err(map_http_error(url, status, ra, &body));
        }
        tracing::debug!(url, status = status.as_u16(), "sse stream opened");

        let endpoint = url.to_string();
        let bytes = resp
            .bytes_stream()
            .map(move |r| r.map_err(|e| map_send_error(&endpoint, &e)));
        Ok(Box::pin(LineStream::new(Box::pin(bytes))))
    }
}

fn map_send_error(url: &str, e: &reqwest::Error) -> ProbeError {
    if e.is_timeout() {
        ProbeError::Timeout {
            endpoint: url.to_string(),
        }
    } else {
        tracing::debug!(url, error = %e, "transport error");
        ProbeError::Unavailable {
            endpoint: url.to_string(),
        }
    }
}

fn extract_request_id(headers: &reqwest::header::HeaderMap) -> Option<String> {
    static CANDIDATES: [&str; 4] = ["x-request-id", "request-id", "x-oneapi-request-id", "x-amzn-requestid"];
    for k in CANDIDATES {
        if let Some(v) = headers.get(k)
            && let Ok(s) = v.to_str()
        {
            return Some(s.to_string());
        }
    }
    None
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    // Only the delta-seconds form; HTTP-date values are ignored.
    if let Some(v) = headers.get("retry-after")
        && let Ok(s) = v.to_str()
        && let Ok(secs) = s.trim().parse::<u64>()
    {
        return Some(secs);
    }
    None
}

fn map_http_error(url: &str, status: StatusCode, retry_after: Option<u64>, body: &str) -> ProbeError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => ProbeError::RateLimited {
            endpoint: url.to_string(),
            retry_after,
        },
        s if s.is_server_error() => ProbeError::Unavailable {
            endpoint: url.to_string(),
        },
        s => ProbeError::Upstream {
            endpoint: url.to_string(),
            code: s.as_u16().to_string(),
            message: truncate(body, 300),
        },
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    let mut t = s[..end].to_string();
    t.push_str("...");
    t
}

/// Line splitter over a bytes stream; yields `SseLine`s ended by `\n`, `\r\n`
/// or a lone `\r`.
///
/// Bytes are buffered until a full line is present, so a multi-byte character
/// split across two chunks is decoded intact. `scanned` marks how much of the
/// buffer is known to hold no line end.
pub(crate) struct LineStream {
    inner: ByteStream,
    buf: BytesMut,
    scanned: usize,
    done: bool,
}

impl LineStream {
    pub(crate) fn new(inner: ByteStream) -> Self {
        Self {
            inner,
            buf: BytesMut::new(),
            scanned: 0,
            done: false,
        }
    }

    fn next_line(&mut self) -> Option<SseLine> {
        let Some(idx) = self.buf[self.scanned..]
            .iter()
            .position(|b| *b == b'\n' || *b == b'\r')
            .map(|p| p + self.scanned)
        else {
            self.scanned = self.buf.len();
            return None;
        };
        let sep_len = if self.buf[idx] == b'\r' {
            match self.buf.get(idx + 1).copied() {
                Some(b'\n') => 2,
                Some(_) => 1,
                // A trailing '\r' may be the first half of "\r\n".
                None if !self.done => {
                    self.scanned = idx;
                    return None;
                }
                None => 1,
            }
        } else {
            1
        };
        let raw = self.buf.split_to(idx + sep_len);
        self.scanned = 0;
        Some(SseLine {
            line: String::from_utf8_lossy(&raw[..idx]).into_owned(),
        })
    }
}

impl Stream for LineStream {
    type Item = CoreResult<SseLine>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(line) = self.next_line() {
                return Poll::Ready(Some(Ok(line)));
            }
            if self.done {
                if self.buf.is_empty() {
                    return Poll::Ready(None);
                }
                let tail = self.buf.split();
                self.scanned = 0;
                let line = String::from_utf8_lossy(&tail).into_owned();
                return Poll::Ready(Some(Ok(SseLine { line })));
            }

            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    self.buf.extend_from_slice(&chunk);
                }
                Poll::Ready(Some(Err(e))) => {
                    self.done = true;
                    self.buf.clear();
                    self.scanned = 0;
                    return Poll::Ready(Some(Err(e)));
                }
                // Loop once more so a held trailing '\r' is released.
                Poll::Ready(None) => self.done = true,
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
pub(crate) fn lines_from_chunks(chunks: Vec<CoreResult<Bytes>>) -> SseStream {
    Box::pin(LineStream::new(Box::pin(futures_util::stream::iter(chunks))))
}
