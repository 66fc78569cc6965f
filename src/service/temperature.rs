//! Second stage: resolves a CEP to a city by racing the CEP providers, then
//! reports the city's current temperature.

use std::{sync::Arc, time::Duration};

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn, Instrument};

use super::{CepRequest, ServiceError};
use crate::{
    cep::{Address, Cep},
    context::RequestContext,
    dispatcher::RaceDispatcher,
    errors::RaceError,
    weather::{Temperature, WeatherClient, WeatherError},
};

pub const PATH: &str = "/temperaturebycep";

/// Successful reply of the temperature stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemperatureReply {
    pub city: String,
    #[serde(flatten)]
    pub temperature: Temperature,
}

pub struct TemperatureService {
    dispatcher: RaceDispatcher<Address>,
    weather: WeatherClient,
    max_budget: Duration,
}

impl TemperatureService {
    /// `max_budget` bounds each request, including when a caller asks for more.
    pub fn new(
        dispatcher: RaceDispatcher<Address>,
        weather: WeatherClient,
        max_budget: Duration,
    ) -> Self {
        Self {
            dispatcher,
            weather,
            max_budget,
        }
    }

    pub fn dispatcher(&self) -> &RaceDispatcher<Address> {
        &self.dispatcher
    }

    /// Resolve `raw_cep` and look up the temperature, all within `ctx`.
    pub async fn temperature_for(
        &self,
        raw_cep: &str,
        ctx: &RequestContext,
    ) -> Result<TemperatureReply, ServiceError> {
        let cep = Cep::parse(raw_cep).map_err(|_| ServiceError::InvalidZipcode)?;

        let address = self
            .dispatcher
            .race_in(cep.as_str(), ctx)
            .await
            .map_err(|e| match e {
                RaceError::AllFailed(_) => {
                    if !e.is_not_found() {
                        warn!(error = %e, "zipcode providers failed");
                    }
                    ServiceError::ZipcodeNotFound
                }
                RaceError::DeadlineExceeded => ServiceError::Timeout("zipcode lookup"),
                RaceError::Cancelled => ServiceError::Cancelled,
                RaceError::NoProviders => ServiceError::Misconfigured,
            })?;
        info!(source = %address.source, city = %address.payload.city, "zipcode resolved");

        let city = address.payload.city;
        if city.is_empty() {
            return Err(ServiceError::CityMissing);
        }

        let celsius = self
            .weather
            .current_celsius(&city, ctx)
            .await
            .map_err(|e| {
                warn!(error = %e, "temperature lookup failed");
                match e {
                    WeatherError::Timeout => ServiceError::Timeout("temperature lookup"),
                    WeatherError::Cancelled => ServiceError::Cancelled,
                    _ => ServiceError::Weather,
                }
            })?;

        Ok(TemperatureReply {
            city,
            temperature: Temperature::from_celsius(celsius),
        })
    }
}

pub fn router(service: Arc<TemperatureService>) -> Router {
    Router::new()
        .route(PATH, post(temperature_by_cep))
        .with_state(service)
}

async fn temperature_by_cep(
    State(service): State<Arc<TemperatureService>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let ctx = RequestContext::from_headers(&headers, service.max_budget);
    let span = tracing::info_span!(
        "temperature_by_cep",
        trace_id = %ctx.trace().trace_id(),
        budget_ms = ctx.remaining().as_millis() as u64,
    );
    let request = CepRequest::from_body(&body);

    async {
        match service.temperature_for(&request.cep, &ctx).await {
            Ok(reply) => Json(reply).into_response(),
            Err(e) => {
                warn!(error = %e, "request failed");
                e.into_response()
            }
        }
    }
    .instrument(span)
    .await
}
