//! Brazilian postal code (CEP) validation and the HTTP providers that
//! resolve a CEP to an address.

use std::{fmt, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    config::{ProviderConfig, ProviderId},
    errors::ProviderError,
    provider::Provider,
};

/// Reasons a string is not a valid CEP.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CepError {
    #[error("invalid CEP: must contain 8 digits")]
    Length,
    #[error("invalid CEP: must contain only digits")]
    NonDigit,
}

/// A validated eight-digit CEP.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cep(String);

impl Cep {
    /// Accepts `12345678` or `12345-678`. Hyphens are dropped wherever they appear.
    pub fn parse(input: &str) -> Result<Self, CepError> {
        let digits: String = input.chars().filter(|c| *c != '-').collect();
        if digits.chars().count() != 8 {
            return Err(CepError::Length);
        }
        if !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(CepError::NonDigit);
        }
        Ok(Self(digits))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Address returned by whichever provider answered first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub cep: String,
    pub state: String,
    pub city: String,
    pub neighborhood: String,
    pub street: String,
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  CEP: {}", self.cep)?;
        writeln!(f, "  State: {}", self.state)?;
        writeln!(f, "  City: {}", self.city)?;
        writeln!(f, "  Neighborhood: {}", self.neighborhood)?;
        write!(f, "  Street: {}", self.street)
    }
}

/// Wire format spoken by a CEP provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CepApi {
    /// `GET {base}/api/cep/v1/{cep}`
    BrasilApi,
    /// `GET {base}/ws/{cep}/json/`
    ViaCep,
}

impl CepApi {
    fn url(&self, base: &str, cep: &str) -> String {
        let base = base.trim_end_matches('/');
        match self {
            CepApi::BrasilApi => format!("{base}/api/cep/v1/{cep}"),
            CepApi::ViaCep => format!("{base}/ws/{cep}/json/"),
        }
    }

    fn decode(&self, body: &[u8]) -> Result<Address, ProviderError> {
        match self {
            CepApi::BrasilApi => {
                let resp: BrasilApiResponse = serde_json::from_slice(body)?;
                Ok(Address {
                    cep: resp.cep,
                    state: resp.state,
                    city: resp.city,
                    neighborhood: resp.neighborhood,
                    street: resp.street,
                })
            }
            CepApi::ViaCep => {
                let resp: ViaCepResponse = serde_json::from_slice(body)?;
                if resp.erro {
                    return Err(ProviderError::NotFound("can not find zipcode".to_string()));
                }
                Ok(Address {
                    cep: resp.cep,
                    state: resp.uf,
                    city: resp.localidade,
                    neighborhood: resp.bairro,
                    street: resp.logradouro,
                })
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct BrasilApiResponse {
    #[serde(default)]
    cep: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    city: String,
    #[serde(default)]
    neighborhood: String,
    #[serde(default)]
    street: String,
}

#[derive(Debug, Deserialize)]
struct ViaCepResponse {
    #[serde(default)]
    cep: String,
    #[serde(default)]
    logradouro: String,
    #[serde(default)]
    bairro: String,
    #[serde(default)]
    localidade: String,
    #[serde(default)]
    uf: String,
    #[serde(default, deserialize_with = "flag")]
    erro: bool,
}

/// ViaCEP reports a missing CEP as either `true` or `"true"`.
fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Text(s) => s.eq_ignore_ascii_case("true"),
    })
}

/// A CEP provider reached over HTTP.
///
/// BrasilAPI and ViaCEP differ only in URL layout and payload shape, so a
/// single type covers both.
#[derive(Debug, Clone)]
pub struct HttpCepProvider {
    id: ProviderId,
    base_url: String,
    api: CepApi,
    http: reqwest::Client,
}

impl HttpCepProvider {
    pub fn new(cfg: ProviderConfig, api: CepApi, http: reqwest::Client) -> Self {
        Self {
            id: cfg.id,
            base_url: cfg.url,
            api,
            http,
        }
    }

    pub fn brasil_api(url: impl Into<String>, http: reqwest::Client) -> Self {
        Self::new(ProviderConfig::new("BrasilAPI", url), CepApi::BrasilApi, http)
    }

    pub fn via_cep(url: impl Into<String>, http: reqwest::Client) -> Self {
        Self::new(ProviderConfig::new("ViaCEP", url), CepApi::ViaCep, http)
    }

    pub fn api(&self) -> CepApi {
        self.api
    }

    async fn fetch(&self, cep: &str) -> Result<Address, ProviderError> {
        let url = self.api.url(&self.base_url, cep);
        debug!(provider = %self.id, %url, "looking up cep");

        let resp = self.http.get(&url).send().await?;
        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ProviderError::NotFound("can not find zipcode".to_string()));
        }
        if !status.is_success() {
            return Err(ProviderError::Status(status.as_u16()));
        }

        let body = resp.bytes().await?;
        self.api.decode(&body)
    }
}

#[async_trait]
impl Provider for HttpCepProvider {
    type Output = Address;

    fn id(&self) -> ProviderId {
        self.id
    }

    async fn lookup(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Address, ProviderError> {
        // Dropping the request future closes its connection.
        tokio::select! {
            _ = cancel.cancelled() => Err(ProviderError::Cancelled),
            result = self.fetch(query) => result,
        }
    }
}

/// Shared HTTP client for providers, with a connect timeout so a dead host
/// cannot pin a socket past any reasonable race budget.
pub fn http_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_and_hyphenated_ceps() {
        for (input, expected) in [
            ("12345-678", "12345678"),
            ("12345678", "12345678"),
            ("1234-5678", "12345678"),
        ] {
            assert_eq!(Cep::parse(input).unwrap().as_str(), expected, "{input}");
        }
    }

    #[test]
    fn rejects_malformed_ceps() {
        assert_eq!(Cep::parse("12a45-678"), Err(CepError::NonDigit));
        assert_eq!(Cep::parse("12345 678"), Err(CepError::NonDigit));
        assert_eq!(Cep::parse("12#45-678"), Err(CepError::NonDigit));
        assert_eq!(Cep::parse("123456789"), Err(CepError::Length));
        assert_eq!(Cep::parse(""), Err(CepError::Length));
        assert_eq!(Cep::parse("１２３４５６７８"), Err(CepError::NonDigit));
    }

    #[test]
    fn urls_follow_each_api_layout() {
        assert_eq!(
            CepApi::BrasilApi.url("https://brasilapi.com.br/", "01001000"),
            "https://brasilapi.com.br/api/cep/v1/01001000"
        );
        assert_eq!(
            CepApi::ViaCep.url("http://viacep.com.br", "01001000"),
            "http://viacep.com.br/ws/01001000/json/"
        );
    }

    #[test]
    fn decodes_via_cep_payload() {
        let body = br#"{"cep":"01001-000","logradouro":"Praca da Se","complemento":"lado impar",
            "bairro":"Se","localidade":"Sao Paulo","uf":"SP"}"#;
        let address = CepApi::ViaCep.decode(body).unwrap();
        assert_eq!(address.city, "Sao Paulo");
        assert_eq!(address.state, "SP");
        assert_eq!(address.street, "Praca da Se");
    }

    #[test]
    fn via_cep_erro_flag_means_not_found() {
        for body in [&br#"{"erro": true}"#[..], &br#"{"erro": "true"}"#[..]] {
            let err = CepApi::ViaCep.decode(body).unwrap_err();
            assert!(err.is_not_found(), "{err:?}");
        }
    }

    #[test]
    fn decodes_brasil_api_payload() {
        let body = br#"{"cep":"01001000","state":"SP","city":"Sao Paulo",
            "neighborhood":"Se","street":"Praca da Se","service":"open-cep"}"#;
        let address = CepApi::BrasilApi.decode(body).unwrap();
        assert_eq!(address.cep, "01001000");
        assert_eq!(address.neighborhood, "Se");
    }

    #[test]
    fn malformed_payload_is_a_decode_error() {
        let err = CepApi::BrasilApi.decode(b"<html>").unwrap_err();
        assert!(matches!(err, ProviderError::Decode(_)));
    }
}
