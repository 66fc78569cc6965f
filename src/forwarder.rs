//! Chained calls to a downstream stage under an inherited budget.

use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, warn, Instrument};

use crate::{
    config::ForwardConfig,
    context::{Interrupted, RequestContext},
    errors::{DownstreamError, ForwardError},
};

/// A second-stage service reachable over some transport.
///
/// `ctx` carries the deadline and trace to propagate; implementations send
/// both along with the payload.
#[async_trait]
pub trait Downstream: Send + Sync {
    async fn call(&self, payload: Value, ctx: &RequestContext) -> Result<Value, DownstreamError>;
}

/// JSON-over-HTTP downstream stage.
#[derive(Debug, Clone)]
pub struct HttpDownstream {
    url: String,
    http: reqwest::Client,
}

impl HttpDownstream {
    /// `base_url` and `path` are joined with exactly one `/`.
    pub fn new(base_url: &str, path: &str, http: reqwest::Client) -> Self {
        let url = format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Self { url, http }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Downstream for HttpDownstream {
    async fn call(&self, payload: Value, ctx: &RequestContext) -> Result<Value, DownstreamError> {
        let mut req = self.http.post(&self.url).json(&payload);
        for (name, value) in ctx.header_pairs() {
            req = req.header(name, value);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = resp.bytes().await?;

        if !status.is_success() {
            return Err(DownstreamError::Status {
                status: status.as_u16(),
                content_type,
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        Ok(serde_json::from_slice(&body)?)
    }
}

/// Forwards one request per call to a downstream stage, inheriting the
/// caller's deadline and trace.
#[derive(Debug, Clone)]
pub struct Forwarder<D> {
    downstream: D,
    cfg: ForwardConfig,
}

impl<D: Downstream> Forwarder<D> {
    pub fn new(downstream: D, cfg: ForwardConfig) -> Self {
        Self { downstream, cfg }
    }

    pub fn config(&self) -> &ForwardConfig {
        &self.cfg
    }

    /// Context for the outbound call: a child of `inherited` whose deadline
    /// is capped by the request timeout and pulled in by the safety margin.
    /// It is never later than the inherited deadline.
    pub fn outbound_context(&self, inherited: &RequestContext) -> RequestContext {
        let capped = inherited.child(Some(self.cfg.request_timeout));
        let narrowed = capped.deadline().narrowed_by(self.cfg.safety_margin);
        capped.child_with_deadline(narrowed)
    }

    /// Sends `request` downstream at most once.
    ///
    /// When the budget runs out first the in-flight call is dropped, closing
    /// its connection, and [`ForwardError::Timeout`] is returned. If the
    /// safety margin already consumes the whole inherited budget, no call is
    /// made and the result is [`ForwardError::Timeout`] with a zero budget.
    pub async fn forward<Req, Resp>(
        &self,
        request: &Req,
        inherited: &RequestContext,
    ) -> Result<Resp, ForwardError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let outbound = self.outbound_context(inherited);
        let budget = outbound.remaining();
        let span = tracing::info_span!(
            "forward",
            trace_id = %outbound.trace().trace_id(),
            span_id = %outbound.trace().span_id(),
            budget_ms = budget.as_millis() as u64,
        );

        self.call_once(request, &outbound, budget)
            .instrument(span)
            .await
    }

    async fn call_once<Req, Resp>(
        &self,
        request: &Req,
        outbound: &RequestContext,
        budget: Duration,
    ) -> Result<Resp, ForwardError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let payload = serde_json::to_value(request).map_err(DownstreamError::from)?;
        debug!("calling downstream");

        let reply = match outbound.run(self.downstream.call(payload, outbound)).await {
            Ok(reply) => reply,
            Err(Interrupted::DeadlineExceeded) => {
                warn!("downstream call timed out");
                return Err(ForwardError::Timeout(budget));
            }
            Err(Interrupted::Cancelled) => return Err(ForwardError::Cancelled),
        };
        // Release anything tied to the outbound scope.
        outbound.cancel();

        let value = reply.inspect_err(|e| warn!(error = %e, "downstream call failed"))?;
        Ok(serde_json::from_value(value).map_err(DownstreamError::from)?)
    }
}
