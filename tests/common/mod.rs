#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use axum::{
    body::{to_bytes, Body},
    http::{header::CONTENT_TYPE, Request, StatusCode},
    Router,
};
use cep_race::{
    cep::{Address, HttpCepProvider},
    RaceConfig, RaceDispatcher, SharedProvider,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

pub const CEP: &str = "01001000";

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Two CEP providers, BrasilAPI and ViaCEP, backed by one mock server.
pub fn dispatcher_for(server: &MockServer, cfg: RaceConfig) -> RaceDispatcher<Address> {
    let http = reqwest::Client::new();
    let providers: Vec<SharedProvider<Address>> = vec![
        Arc::new(HttpCepProvider::brasil_api(server.uri(), http.clone())),
        Arc::new(HttpCepProvider::via_cep(server.uri(), http)),
    ];
    RaceDispatcher::new(providers, cfg)
}

pub fn brasil_api_body() -> Value {
    json!({
        "cep": CEP,
        "state": "SP",
        "city": "Sao Paulo",
        "neighborhood": "Se",
        "street": "Praca da Se",
        "service": "open-cep"
    })
}

pub fn via_cep_body() -> Value {
    json!({
        "cep": "01001-000",
        "logradouro": "Praca da Se",
        "complemento": "lado impar",
        "bairro": "Se",
        "localidade": "Sao Paulo",
        "uf": "SP"
    })
}

pub async fn mock_brasil_api(server: &MockServer, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(format!("/api/cep/v1/{CEP}")))
        .respond_with(response)
        .mount(server)
        .await;
}

pub async fn mock_via_cep(server: &MockServer, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(format!("/ws/{CEP}/json/")))
        .respond_with(response)
        .mount(server)
        .await;
}

pub fn ok_json(body: Value, delay_ms: u64) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .set_body_json(body)
        .set_delay(Duration::from_millis(delay_ms))
}

pub async fn post_json(
    router: Router,
    uri: &str,
    body: Value,
    headers: &[(&str, &str)],
) -> (StatusCode, Vec<u8>) {
    let (status, _, body) = post_json_typed(router, uri, body, headers).await;
    (status, body)
}

/// Like [`post_json`], also returning the reply's content type.
pub async fn post_json_typed(
    router: Router,
    uri: &str,
    body: Value,
    headers: &[(&str, &str)],
) -> (StatusCode, Option<String>, Vec<u8>) {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let request = builder
        .body(Body::from(body.to_string()))
        .expect("valid request");

    let response = router.oneshot(request).await.expect("router is infallible");
    let status = response.status();
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("readable body");
    (status, content_type, bytes.to_vec())
}
