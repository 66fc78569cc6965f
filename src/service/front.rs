//! First stage: validates the CEP and forwards it to the temperature stage.

use std::{sync::Arc, time::Duration};

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::Value;
use tracing::{warn, Instrument};

use super::{CepRequest, ServiceError};
use crate::{
    cep::Cep,
    context::RequestContext,
    errors::{DownstreamError, ForwardError},
    forwarder::{Downstream, Forwarder},
};

pub const PATH: &str = "/consulta";

pub struct FrontService<D> {
    forwarder: Forwarder<D>,
    budget: Duration,
}

impl<D: Downstream> FrontService<D> {
    /// `budget` is the total time a request may take, downstream included.
    pub fn new(forwarder: Forwarder<D>, budget: Duration) -> Self {
        Self { forwarder, budget }
    }

    /// Validate `raw_cep` and forward it downstream within `ctx`.
    pub async fn consult(
        &self,
        raw_cep: &str,
        ctx: &RequestContext,
    ) -> Result<Value, ServiceError> {
        let cep = Cep::parse(raw_cep).map_err(|_| ServiceError::InvalidZipcode)?;
        let request = CepRequest {
            cep: cep.to_string(),
        };

        self.forwarder
            .forward(&request, ctx)
            .await
            .map_err(|e| match e {
                ForwardError::Timeout(_) => ServiceError::Timeout("temperature service"),
                ForwardError::Cancelled => ServiceError::Cancelled,
                ForwardError::Downstream(DownstreamError::Status {
                    status,
                    content_type,
                    body,
                }) => ServiceError::Relayed {
                    status,
                    content_type,
                    body,
                },
                ForwardError::Downstream(e) => {
                    warn!(error = %e, "temperature service call failed");
                    ServiceError::Downstream
                }
            })
    }
}

pub fn router<D: Downstream + 'static>(service: Arc<FrontService<D>>) -> Router {
    Router::new()
        .route(PATH, post(consulta::<D>))
        .with_state(service)
}

async fn consulta<D: Downstream + 'static>(
    State(service): State<Arc<FrontService<D>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let ctx = RequestContext::from_headers(&headers, service.budget);
    let span = tracing::info_span!("consulta", trace_id = %ctx.trace().trace_id());
    let request = CepRequest::from_body(&body);

    async {
        match service.consult(&request.cep, &ctx).await {
            Ok(reply) => Json(reply).into_response(),
            Err(e) => e.into_response(),
        }
    }
    .instrument(span)
    .await
}
