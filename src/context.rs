//! Request-scoped deadline, cancellation and trace correlation.
//!
//! A [`RequestContext`] is created once at the edge of a unit of work and
//! threaded through every concurrent branch and downstream call. Child
//! contexts can only shrink the deadline they inherit, so budgets along a
//! chain of calls are monotonic by construction.

use std::{fmt, future::Future, time::Duration};

use axum::http::HeaderMap;
use rand::Rng;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

/// Header carrying the remaining budget, in whole milliseconds.
pub const BUDGET_HEADER: &str = "x-request-budget-ms";

/// W3C trace context header.
pub const TRACEPARENT_HEADER: &str = "traceparent";

/// Absolute expiry instant shared by every branch of one unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Deadline(Instant);

impl Deadline {
    pub fn at(instant: Instant) -> Self {
        Self(instant)
    }

    /// Deadline `budget` from now.
    pub fn after(budget: Duration) -> Self {
        Self(Instant::now() + budget)
    }

    pub fn instant(&self) -> Instant {
        self.0
    }

    /// Time left before expiry, zero once expired.
    pub fn remaining(&self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.0
    }

    /// Pull the deadline earlier by `margin`. A margin larger than what is
    /// left yields an already expired deadline.
    pub fn narrowed_by(self, margin: Duration) -> Deadline {
        match self.0.checked_sub(margin) {
            Some(instant) => Deadline(instant),
            None => Deadline(Instant::now().min(self.0)),
        }
    }
}

/// Correlation token for one logical unit of work across stages.
///
/// Only used for observability; nothing in the race or forward paths
/// branches on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    trace_id: String,
    span_id: String,
    parent_span_id: Option<String>,
    sampled: bool,
}

impl TraceContext {
    /// Start a new trace.
    pub fn root() -> Self {
        Self {
            trace_id: random_hex_id::<16>(),
            span_id: random_hex_id::<8>(),
            parent_span_id: None,
            sampled: true,
        }
    }

    /// Child scope: same trace, fresh span, parented on this one.
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            span_id: random_hex_id::<8>(),
            parent_span_id: Some(self.span_id.clone()),
            sampled: self.sampled,
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn span_id(&self) -> &str {
        &self.span_id
    }

    pub fn parent_span_id(&self) -> Option<&str> {
        self.parent_span_id.as_deref()
    }

    pub fn to_traceparent(&self) -> String {
        let flags = if self.sampled { "01" } else { "00" };
        format!("00-{}-{}-{}", self.trace_id, self.span_id, flags)
    }

    /// Parse a `traceparent` header value.
    ///
    /// The parsed span becomes the parent of the returned context, so the
    /// receiving stage gets its own span in the same trace.
    pub fn parse_traceparent(value: &str) -> Option<Self> {
        let mut parts = value.trim().split('-');
        let version = parts.next()?;
        let trace_id = parts.next()?;
        let span_id = parts.next()?;
        let flags = parts.next()?;
        if parts.next().is_some() || version.len() != 2 || flags.len() != 2 {
            return None;
        }
        if !is_hex_id(trace_id, 32) || !is_hex_id(span_id, 16) {
            return None;
        }
        let flags = u8::from_str_radix(flags, 16).ok()?;

        Some(Self {
            trace_id: trace_id.to_ascii_lowercase(),
            span_id: random_hex_id::<8>(),
            parent_span_id: Some(span_id.to_ascii_lowercase()),
            sampled: flags & 0x01 == 0x01,
        })
    }
}

impl fmt::Display for TraceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.trace_id, self.span_id)
    }
}

fn random_hex_id<const N: usize>() -> String {
    let mut rng = rand::thread_rng();
    let mut bytes = [0u8; N];
    loop {
        rng.fill(&mut bytes[..]);
        // all-zero ids are invalid in W3C trace context
        if bytes.iter().any(|b| *b != 0) {
            return bytes.iter().map(|b| format!("{b:02x}")).collect();
        }
    }
}

fn is_hex_id(value: &str, len: usize) -> bool {
    value.len() == len
        && value.chars().all(|c| c.is_ascii_hexdigit())
        && value.chars().any(|c| c != '0')
}

/// Why a context-bound future stopped before completing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    DeadlineExceeded,
    Cancelled,
}

/// Deadline, cancellation signal and trace for one unit of work.
#[derive(Debug, Clone)]
pub struct RequestContext {
    deadline: Deadline,
    cancel: CancellationToken,
    trace: TraceContext,
}

impl RequestContext {
    /// Root context expiring `budget` from now, with a fresh trace.
    pub fn with_timeout(budget: Duration) -> Self {
        Self::with_deadline(Deadline::after(budget))
    }

    pub fn with_deadline(deadline: Deadline) -> Self {
        Self {
            deadline,
            cancel: CancellationToken::new(),
            trace: TraceContext::root(),
        }
    }

    pub fn with_trace(mut self, trace: TraceContext) -> Self {
        self.trace = trace;
        self
    }

    /// Build the context for an inbound request.
    ///
    /// The caller's budget is honoured but clamped to `max_budget`; when the
    /// caller sent no usable budget, `max_budget` applies. A missing or
    /// malformed `traceparent` starts a new trace.
    pub fn from_headers(headers: &HeaderMap, max_budget: Duration) -> Self {
        let inherited = headers
            .get(BUDGET_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_millis);
        let budget = match inherited {
            Some(budget) => budget.min(max_budget),
            None => max_budget,
        };

        let trace = headers
            .get(TRACEPARENT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(TraceContext::parse_traceparent)
            .unwrap_or_else(TraceContext::root);

        Self::with_timeout(budget).with_trace(trace)
    }

    /// Derive a child context for a nested unit of work.
    ///
    /// The child's deadline is the parent's, further limited to
    /// `max_budget` from now when given; it is never later than the parent's.
    /// Cancelling the parent cancels the child, not the other way round.
    pub fn child(&self, max_budget: Option<Duration>) -> Self {
        let deadline = match max_budget {
            Some(budget) => self.deadline.min(Deadline::after(budget)),
            None => self.deadline,
        };
        self.child_with_deadline(deadline)
    }

    /// Child context whose deadline is `deadline` clamped to this context's.
    pub fn child_with_deadline(&self, deadline: Deadline) -> Self {
        Self {
            deadline: self.deadline.min(deadline),
            cancel: self.cancel.child_token(),
            trace: self.trace.child(),
        }
    }

    pub fn deadline(&self) -> Deadline {
        self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.remaining()
    }

    pub fn trace(&self) -> &TraceContext {
        &self.trace
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Headers propagating budget and trace to a downstream stage.
    pub fn header_pairs(&self) -> [(&'static str, String); 2] {
        [
            (BUDGET_HEADER, self.remaining().as_millis().to_string()),
            (TRACEPARENT_HEADER, self.trace.to_traceparent()),
        ]
    }

    /// Drive `fut` until it completes, the deadline passes, or the context is
    /// cancelled. On interruption `fut` is dropped, which releases whatever
    /// I/O it had in flight.
    pub async fn run<F>(&self, fut: F) -> Result<F::Output, Interrupted>
    where
        F: Future,
    {
        if self.cancel.is_cancelled() {
            return Err(Interrupted::Cancelled);
        }
        if self.deadline.is_expired() {
            return Err(Interrupted::DeadlineExceeded);
        }

        tokio::select! {
            out = fut => Ok(out),
            _ = self.cancel.cancelled() => Err(Interrupted::Cancelled),
            _ = time::sleep_until(self.deadline.instant()) => Err(Interrupted::DeadlineExceeded),
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn child_deadline_never_exceeds_parent() {
        let parent = RequestContext::with_timeout(Duration::from_millis(200));

        let wider = parent.child(Some(Duration::from_secs(10)));
        assert_eq!(wider.deadline(), parent.deadline());

        let narrower = parent.child(Some(Duration::from_millis(50)));
        assert!(narrower.deadline() < parent.deadline());

        let explicit = parent.child_with_deadline(Deadline::after(Duration::from_secs(60)));
        assert_eq!(explicit.deadline(), parent.deadline());
    }

    #[tokio::test]
    async fn cancelling_parent_cancels_child_only_downwards() {
        let parent = RequestContext::with_timeout(Duration::from_secs(1));
        let child = parent.child(None);
        child.cancel();
        assert!(!parent.is_cancelled());

        let other = parent.child(None);
        parent.cancel();
        assert!(other.is_cancelled());
    }

    #[tokio::test]
    async fn child_keeps_trace_id_with_new_span() {
        let parent = RequestContext::with_timeout(Duration::from_secs(1));
        let child = parent.child(None);
        assert_eq!(child.trace().trace_id(), parent.trace().trace_id());
        assert_ne!(child.trace().span_id(), parent.trace().span_id());
        assert_eq!(child.trace().parent_span_id(), Some(parent.trace().span_id()));
    }

    #[test]
    fn traceparent_round_trips_trace_id() {
        let trace = TraceContext::root();
        let header = trace.to_traceparent();
        let parsed = TraceContext::parse_traceparent(&header).expect("valid traceparent");
        assert_eq!(parsed.trace_id(), trace.trace_id());
        assert_eq!(parsed.parent_span_id(), Some(trace.span_id()));
    }

    #[test]
    fn malformed_traceparent_is_rejected() {
        for bad in [
            "",
            "00-abc-def-01",
            "00-00000000000000000000000000000000-00f067aa0ba902b7-01",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7",
            "00-4bf92f3577b34da6a3ce929d0e0e473z-00f067aa0ba902b7-01",
        ] {
            assert!(TraceContext::parse_traceparent(bad).is_none(), "{bad}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_budget_is_clamped_to_local_maximum() {
        let mut headers = HeaderMap::new();
        headers.insert(BUDGET_HEADER, HeaderValue::from_static("60000"));
        let ctx = RequestContext::from_headers(&headers, Duration::from_millis(500));
        assert_eq!(ctx.remaining(), Duration::from_millis(500));

        headers.insert(BUDGET_HEADER, HeaderValue::from_static("120"));
        let ctx = RequestContext::from_headers(&headers, Duration::from_millis(500));
        assert_eq!(ctx.remaining(), Duration::from_millis(120));

        headers.insert(BUDGET_HEADER, HeaderValue::from_static("soon"));
        let ctx = RequestContext::from_headers(&headers, Duration::from_millis(500));
        assert_eq!(ctx.remaining(), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn inbound_traceparent_is_continued() {
        let mut headers = HeaderMap::new();
        headers.insert(
            TRACEPARENT_HEADER,
            HeaderValue::from_static("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01"),
        );
        let ctx = RequestContext::from_headers(&headers, Duration::from_secs(1));
        assert_eq!(ctx.trace().trace_id(), "4bf92f3577b34da6a3ce929d0e0e4736");
        assert_eq!(ctx.trace().parent_span_id(), Some("00f067aa0ba902b7"));
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_at_deadline() {
        let ctx = RequestContext::with_timeout(Duration::from_millis(10));
        let out = ctx.run(time::sleep(Duration::from_millis(50))).await;
        assert_eq!(out, Err(Interrupted::DeadlineExceeded));
    }

    #[tokio::test(start_paused = true)]
    async fn run_observes_cancellation() {
        let ctx = RequestContext::with_timeout(Duration::from_secs(1));
        let canceller = ctx.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(5)).await;
            canceller.cancel();
        });
        let out = ctx.run(time::sleep(Duration::from_millis(50))).await;
        assert_eq!(out, Err(Interrupted::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn narrowing_pulls_deadline_earlier() {
        let deadline = Deadline::after(Duration::from_millis(100));
        let narrowed = deadline.narrowed_by(Duration::from_millis(30));
        assert_eq!(narrowed.remaining(), Duration::from_millis(70));
        assert!(narrowed <= deadline);
    }
}
