//! Environment configuration for the binary: upstream URLs, keys and budgets.

use std::{env, sync::Arc, time::Duration};

use cep_race::{
    cep::{Address, CepApi, HttpCepProvider},
    config::{ProviderConfig, RaceConfig},
    dispatcher::SharedProvider,
    RaceDispatcher,
};
use color_eyre::{eyre::WrapErr, Result};

pub const DEFAULT_BRASILAPI_URL: &str = "https://brasilapi.com.br";
pub const DEFAULT_VIACEP_URL: &str = "http://viacep.com.br";
pub const DEFAULT_WEATHER_API_URL: &str = "http://api.weatherapi.com/v1/current.json";

fn var_or(keys: &[&str], default: &str) -> String {
    keys.iter()
        .find_map(|key| env::var(key).ok().filter(|v| !v.is_empty()))
        .unwrap_or_else(|| default.to_string())
}

/// Reads a millisecond budget from `key`, falling back to `default`.
pub fn budget_from_env(key: &str, default: Duration) -> Result<Duration> {
    match env::var(key) {
        Ok(raw) => {
            let ms: u64 = raw
                .trim()
                .parse()
                .wrap_err_with(|| format!("{key} must be a number of milliseconds, got {raw:?}"))?;
            Ok(Duration::from_millis(ms))
        }
        Err(_) => Ok(default),
    }
}

/// CEP providers from the environment.
///
/// - `BRASILAPI_URL` (default `https://brasilapi.com.br`)
/// - `VIACEP_URL` (default `http://viacep.com.br`)
///
/// Setting either to `off` leaves that provider out.
pub fn providers_from_env() -> Vec<(ProviderConfig, CepApi)> {
    let mut providers = Vec::new();

    let brasil = var_or(&["BRASILAPI_URL"], DEFAULT_BRASILAPI_URL);
    if brasil != "off" {
        providers.push((ProviderConfig::new("BrasilAPI", brasil), CepApi::BrasilApi));
    }
    let via_cep = var_or(&["VIACEP_URL"], DEFAULT_VIACEP_URL);
    if via_cep != "off" {
        providers.push((ProviderConfig::new("ViaCEP", via_cep), CepApi::ViaCep));
    }

    providers
}

/// Builds the CEP race dispatcher from environment variables.
///
/// `RACE_TIMEOUT_MS` overrides the default race budget of one second.
/// Returns an error if every provider has been switched off.
pub fn build_dispatcher_from_env(http: &reqwest::Client) -> Result<RaceDispatcher<Address>> {
    let providers = providers_from_env();
    if providers.is_empty() {
        color_eyre::eyre::bail!(
            "No providers configured.\n\
             Leave at least one of BRASILAPI_URL, VIACEP_URL unset or pointing at a server"
        );
    }

    let cfg = RaceConfig::with_timeout(budget_from_env(
        "RACE_TIMEOUT_MS",
        RaceConfig::default().timeout,
    )?);

    let providers: Vec<SharedProvider<Address>> = providers
        .into_iter()
        .map(|(pcfg, api)| {
            Arc::new(HttpCepProvider::new(pcfg, api, http.clone())) as SharedProvider<Address>
        })
        .collect();

    Ok(RaceDispatcher::new(providers, cfg))
}

/// `WEATHER_API_URL` and `WEATHER_API_KEY` (or `API_KEY`).
pub fn weather_from_env() -> (String, String) {
    (
        var_or(&["WEATHER_API_URL"], DEFAULT_WEATHER_API_URL),
        var_or(&["WEATHER_API_KEY", "API_KEY"], ""),
    )
}

/// Base URL of the temperature stage, from `TEMPERATURE_SERVICE_URL` or `SERVICO_B_URL`.
pub fn temperature_service_url() -> String {
    var_or(
        &["TEMPERATURE_SERVICE_URL", "SERVICO_B_URL"],
        "http://localhost:8082",
    )
}
