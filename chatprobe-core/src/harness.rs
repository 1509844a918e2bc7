//! Smoke checks against a chat-completion endpoint.
//!
//! Each check issues one request and folds the result into a [`CheckReport`].
//! Transport failures, empty replies and unexpected replies are all reported
//! as outcomes rather than errors; the harness itself never fails.

use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use serde::Serialize;
use tracing::field;
use tracing_futures::Instrument;

use crate::config::{ChecksCfg, Config};
use crate::endpoint::{ChatEndpoint, OpenAiCompatible};
use crate::error::{CoreResult, ProbeError};
use crate::model::{ChatRequest, StopReason, extract_message_content, extract_stop_reason};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    NonStreaming,
    Streaming,
}

impl CheckKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NonStreaming => "non_streaming",
            Self::Streaming => "streaming",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    /// The call succeeded but carried no assistant text.
    NoContent,
    /// Text arrived but did not satisfy the check's expectation.
    UnexpectedContent,
    /// Connection, timeout or status failure. Any other request error also
    /// lands here; `CheckReport::error_kind` tells them apart.
    TransportFailure,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::NoContent => "no_content",
            Self::UnexpectedContent => "unexpected_content",
            Self::TransportFailure => "transport_failure",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckReport {
    pub check: CheckKind,
    pub outcome: Outcome,
    pub message: String,
    /// Assistant text received (for streaming: the concatenated increments).
    pub content: String,
    pub stop_reason: Option<StopReason>,
    /// Number of content increments; always 0 or 1 for the non-streaming check.
    pub increments: usize,
    pub latency_ms: u64,
    /// `ProbeError::kind()` of the error that failed the check, if any.
    pub error_kind: Option<&'static str>,
}

impl CheckReport {
    fn new(check: CheckKind) -> Self {
        Self {
            check,
            outcome: Outcome::TransportFailure,
            message: String::new(),
            content: String::new(),
            stop_reason: None,
            increments: 0,
            latency_ms: 0,
            error_kind: None,
        }
    }

    pub fn passed(&self) -> bool {
        self.outcome == Outcome::Passed
    }

    fn fail_with(&mut self, context: &str, e: &ProbeError) {
        if e.is_transport() {
            tracing::debug!(error_kind = e.kind(), error = %e, "{context}");
        } else {
            tracing::error!(error_kind = e.kind(), error = %e, "{context}");
        }
        self.outcome = Outcome::TransportFailure;
        self.message = format!("{context}: {e}");
        self.error_kind = Some(e.kind());
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct SuiteReport {
    pub checks: Vec<CheckReport>,
}

impl SuiteReport {
    pub fn passed(&self) -> bool {
        !self.checks.is_empty() && self.checks.iter().all(CheckReport::passed)
    }

    pub fn get(&self, kind: CheckKind) -> Option<&CheckReport> {
        self.checks.iter().find(|c| c.check == kind)
    }
}

pub struct SmokeHarness {
    endpoint: Arc<dyn ChatEndpoint>,
    checks: ChecksCfg,
}

impl SmokeHarness {
    pub fn new(endpoint: Arc<dyn ChatEndpoint>, checks: ChecksCfg) -> Self {
        Self { endpoint, checks }
    }

    /// Resolve the target from `cfg` (reading the credential from the environment)
    /// and probe it through an OpenAI-compatible endpoint.
    pub fn from_config(cfg: &Config) -> CoreResult<Self> {
        let endpoint = OpenAiCompatible::from_target(cfg.target()?, &cfg.http)?;
        Ok(Self::new(Arc::new(endpoint), cfg.checks.clone()))
    }

    pub fn endpoint(&self) -> &dyn ChatEndpoint {
        self.endpoint.as_ref()
    }

    fn span(&self, kind: CheckKind) -> tracing::Span {
        tracing::info_span!(
            "chatprobe.check",
            check = kind.as_str(),
            endpoint = self.endpoint.name(),
            model = self.endpoint.model(),
            outcome = field::Empty,
            latency_ms = field::Empty,
            error_kind = field::Empty,
        )
    }

    fn finish(span: &tracing::Span, report: &CheckReport) {
        span.record("outcome", report.outcome.as_str());
        span.record("latency_ms", report.latency_ms);
        if let Some(kind) = report.error_kind {
            span.record("error_kind", kind);
        }
        let _enter = span.enter();
        if report.passed() {
            tracing::info!(increments = report.increments, "check passed");
        } else {
            tracing::warn!(reason = %report.message, "check failed");
        }
    }

    /// Send one non-streaming request and require the reply to contain the
    /// configured substring.
    pub async fn check_non_streaming(&self) -> CheckReport {
        let span = self.span(CheckKind::NonStreaming);
        let report = self.non_streaming_inner().instrument(span.clone()).await;
        Self::finish(&span, &report);
        report
    }

    async fn non_streaming_inner(&self) -> CheckReport {
        let cfg = &self.checks.non_streaming;
        let req = ChatRequest::single(self.endpoint.model(), cfg.prompt.as_str(), false)
            .with_max_tokens(cfg.max_tokens);
        let start = Instant::now();
        let result = self.endpoint.complete(&req).await;
        let latency_ms = start.elapsed().as_millis() as u64;

        let body = match result {
            Ok(body) => body,
            Err(e) => {
                let mut report = CheckReport::new(CheckKind::NonStreaming);
                report.fail_with("non-streaming request failed", &e);
                report.latency_ms = latency_ms;
                return report;
            }
        };

        let content = extract_message_content(&body);
        let (outcome, message) = if content.is_empty() {
            (Outcome::NoContent, "non-streaming request returned no content".to_string())
        } else if !content.contains(cfg.expect_substring.as_str()) {
            (
                Outcome::UnexpectedContent,
                format!(
                    "reply does not mention {:?}: {content}",
                    cfg.expect_substring
                ),
            )
        } else {
            (Outcome::Passed, format!("non-streaming request succeeded: {content}"))
        };
        CheckReport {
            check: CheckKind::NonStreaming,
            outcome,
            message,
            increments: usize::from(!content.is_empty()),
            content,
            stop_reason: extract_stop_reason(&body),
            latency_ms,
            error_kind: None,
        }
    }

    pub async fn check_streaming(&self) -> CheckReport {
        self.check_streaming_with(|_| {}).await
    }

    /// Send one streaming request and require at least one content increment.
    /// `on_increment` sees each increment as it is decoded.
    pub async fn check_streaming_with<F>(&self, on_increment: F) -> CheckReport
    where
        F: FnMut(&str) + Send,
    {
        let span = self.span(CheckKind::Streaming);
        let report = self
            .streaming_inner(on_increment)
            .instrument(span.clone())
            .await;
        Self::finish(&span, &report);
        report
    }

    async fn streaming_inner<F>(&self, mut on_increment: F) -> CheckReport
    where
        F: FnMut(&str) + Send,
    {
        let cfg = &self.checks.streaming;
        let req = ChatRequest::single(self.endpoint.model(), cfg.prompt.as_str(), true)
            .with_max_tokens(cfg.max_tokens);
        let start = Instant::now();

        let mut report = CheckReport::new(CheckKind::Streaming);

        let mut stream = match self.endpoint.stream(&req).await {
            Ok(s) => s,
            Err(e) => {
                report.fail_with("streaming request failed", &e);
                report.latency_ms = start.elapsed().as_millis() as u64;
                return report;
            }
        };
        tracing::debug!("stream established");

        let mut failure = None;
        while let Some(item) = stream.next().await {
            match item {
                Ok(text) => {
                    on_increment(&text);
                    report.content.push_str(&text);
                    report.increments += 1;
                }
                Err(e) => failure = Some(e),
            }
        }
        report.stop_reason = stream.stop_reason();
        report.latency_ms = start.elapsed().as_millis() as u64;

        if let Some(e) = failure {
            report.fail_with("stream interrupted", &e);
        } else if report.increments == 0 {
            report.outcome = Outcome::NoContent;
            report.message = "streaming request finished without content".into();
        } else {
            report.outcome = Outcome::Passed;
            report.message = format!(
                "streaming request succeeded with {} increments",
                report.increments
            );
        }
        report
    }

    /// Run the non-streaming check, then the streaming one.
    pub async fn run_suite(&self) -> SuiteReport {
        self.run_suite_with(|_| {}).await
    }

    pub async fn run_suite_with<F>(&self, on_increment: F) -> SuiteReport
    where
        F: FnMut(&str) + Send,
    {
        let non_streaming = self.check_non_streaming().await;
        let streaming = self.check_streaming_with(on_increment).await;
        SuiteReport {
            checks: vec![non_streaming, streaming],
        }
    }
}
