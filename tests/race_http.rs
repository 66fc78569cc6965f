use std::time::Duration;

use cep_race::{Deadline, ProviderError, ProviderId, RaceConfig, RaceError};
use serde_json::json;
use wiremock::{MockServer, ResponseTemplate};

mod common;
use common::*;

#[tokio::test]
async fn faster_success_beats_quicker_failure() {
    init_logging();
    let server = MockServer::start().await;
    mock_brasil_api(&server, ok_json(brasil_api_body(), 10)).await;
    mock_via_cep(
        &server,
        ResponseTemplate::new(500).set_delay(Duration::from_millis(5)),
    )
    .await;

    let dispatcher = dispatcher_for(&server, RaceConfig::default());
    let result = dispatcher
        .race(CEP, Deadline::after(Duration::from_secs(1)))
        .await
        .expect("BrasilAPI should win");

    assert_eq!(result.source, ProviderId("BrasilAPI"));
    assert_eq!(result.payload.city, "Sao Paulo");
    assert_eq!(result.payload.state, "SP");
}

#[tokio::test]
async fn via_cep_payload_is_normalized() {
    let server = MockServer::start().await;
    mock_brasil_api(&server, ResponseTemplate::new(503)).await;
    mock_via_cep(&server, ok_json(via_cep_body(), 0)).await;

    let dispatcher = dispatcher_for(&server, RaceConfig::default());
    let result = dispatcher.race_default(CEP).await.expect("ViaCEP should win");

    assert_eq!(result.source, ProviderId("ViaCEP"));
    assert_eq!(result.payload.city, "Sao Paulo");
    assert_eq!(result.payload.neighborhood, "Se");
    assert_eq!(result.payload.street, "Praca da Se");
}

#[tokio::test]
async fn slow_providers_lose_to_the_deadline() {
    let server = MockServer::start().await;
    mock_brasil_api(&server, ok_json(brasil_api_body(), 2000)).await;
    mock_via_cep(&server, ok_json(via_cep_body(), 2000)).await;

    let dispatcher = dispatcher_for(&server, RaceConfig::default());
    let start = std::time::Instant::now();
    let err = dispatcher
        .race(CEP, Deadline::after(Duration::from_millis(300)))
        .await
        .expect_err("deadline should win");

    assert!(matches!(err, RaceError::DeadlineExceeded), "{err:?}");
    assert!(start.elapsed() < Duration::from_millis(1500));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(dispatcher.in_flight(), 0);
}

#[tokio::test]
async fn every_failure_is_reported_with_its_provider() {
    let server = MockServer::start().await;
    mock_brasil_api(&server, ResponseTemplate::new(404)).await;
    mock_via_cep(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({"erro": "true"})),
    )
    .await;

    let dispatcher = dispatcher_for(&server, RaceConfig::default());
    let err = dispatcher.race_default(CEP).await.expect_err("all fail");
    assert!(err.is_not_found());

    let RaceError::AllFailed(failures) = err else {
        panic!("expected AllFailed");
    };
    assert_eq!(failures.len(), 2);
    for (id, e) in &failures {
        assert!(
            *id == ProviderId("BrasilAPI") || *id == ProviderId("ViaCEP"),
            "unexpected provider {id}"
        );
        assert!(e.is_not_found(), "{id}: {e}");
    }
}

#[tokio::test]
async fn malformed_and_unreachable_upstreams_are_distinguished() {
    let server = MockServer::start().await;
    mock_brasil_api(
        &server,
        ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"),
    )
    .await;

    // ViaCEP points at a closed port.
    let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let dead_url = format!("http://{}", closed.local_addr().unwrap());
    drop(closed);

    let http = reqwest::Client::new();
    let providers: Vec<cep_race::SharedProvider<cep_race::cep::Address>> = vec![
        std::sync::Arc::new(cep_race::cep::HttpCepProvider::brasil_api(
            server.uri(),
            http.clone(),
        )),
        std::sync::Arc::new(cep_race::cep::HttpCepProvider::via_cep(dead_url, http)),
    ];
    let dispatcher = cep_race::RaceDispatcher::new(providers, RaceConfig::default());

    let err = dispatcher.race_default(CEP).await.expect_err("all fail");
    let RaceError::AllFailed(failures) = err else {
        panic!("expected AllFailed");
    };
    for (id, e) in failures {
        match id.0 {
            "BrasilAPI" => assert!(matches!(e, ProviderError::Decode(_)), "{e:?}"),
            "ViaCEP" => assert!(matches!(e, ProviderError::Http(_)), "{e:?}"),
            other => panic!("unexpected provider {other}"),
        }
    }
}
