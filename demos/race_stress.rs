//! High-volume stress test for CEP races.
//!
//! Runs many concurrent races with a cap on in-flight races and reports
//! how often each provider won. Useful for comparing provider latency.

use std::{
    collections::HashMap,
    env,
    sync::Arc,
    time::{Duration, Instant},
};

use cep_race::{
    cep::{http_client, Address, HttpCepProvider},
    Deadline, ProviderId, RaceConfig, RaceDispatcher, SharedProvider,
};
use tokio::sync::{mpsc, Semaphore};

const NUM_CALLS: usize = 500;
const MAX_IN_FLIGHT: usize = 32;

#[derive(Debug)]
enum CallOutcome {
    Ok {
        provider: ProviderId,
        latency: Duration,
    },
    Err {
        error: String,
        latency: Duration,
    },
}

#[derive(Debug)]
struct CallResult {
    call_idx: usize,
    outcome: CallOutcome,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cep = env::args().nth(1).unwrap_or_else(|| "01001000".to_string());
    let http = http_client()?;

    let providers: Vec<SharedProvider<Address>> = vec![
        Arc::new(HttpCepProvider::brasil_api(
            env::var("BRASILAPI_URL").unwrap_or_else(|_| "https://brasilapi.com.br".into()),
            http.clone(),
        )),
        Arc::new(HttpCepProvider::via_cep(
            env::var("VIACEP_URL").unwrap_or_else(|_| "http://viacep.com.br".into()),
            http,
        )),
    ];
    let dispatcher = RaceDispatcher::new(providers, RaceConfig::default());

    let (tx, mut rx) = mpsc::channel::<CallResult>(MAX_IN_FLIGHT * 2);
    let semaphore = Arc::new(Semaphore::new(MAX_IN_FLIGHT));
    let consumer = tokio::spawn(async move {
        let mut results: Vec<CallResult> = Vec::with_capacity(NUM_CALLS);

        while let Some(res) = rx.recv().await {
            match &res.outcome {
                CallOutcome::Ok { provider, latency } => {
                    println!(
                        "[call {:05}] OK   provider={} latency={:?}",
                        res.call_idx, provider, latency
                    );
                }
                CallOutcome::Err { error, latency } => {
                    println!(
                        "[call {:05}] ERR  latency={:?} error={}",
                        res.call_idx, latency, error
                    );
                }
            }

            results.push(res);
        }

        results
    });

    for i in 0..NUM_CALLS {
        let dispatcher = dispatcher.clone();
        let tx = tx.clone();
        let cep = cep.clone();
        let sem = Arc::clone(&semaphore);

        tokio::spawn(async move {
            let Ok(_permit) = sem.acquire_owned().await else {
                return;
            };

            let start = Instant::now();
            let res = dispatcher
                .race(&cep, Deadline::after(dispatcher.config().timeout))
                .await;
            let elapsed = start.elapsed();

            let outcome = match res {
                Ok(result) => CallOutcome::Ok {
                    provider: result.source,
                    latency: elapsed,
                },
                Err(e) => CallOutcome::Err {
                    error: e.to_string(),
                    latency: elapsed,
                },
            };

            let _ = tx
                .send(CallResult {
                    call_idx: i,
                    outcome,
                })
                .await;
        });
    }

    drop(tx);
    let mut results = consumer.await?;
    results.sort_by_key(|r| r.call_idx);

    let mut wins: HashMap<ProviderId, usize> = HashMap::new();
    let mut total_latency: HashMap<ProviderId, Duration> = HashMap::new();
    let mut error_count = 0usize;

    for r in &results {
        match &r.outcome {
            CallOutcome::Ok { provider, latency } => {
                *wins.entry(*provider).or_insert(0) += 1;
                *total_latency.entry(*provider).or_insert(Duration::ZERO) += *latency;
            }
            CallOutcome::Err { .. } => {
                error_count += 1;
            }
        }
    }

    println!("\n=== summary ===");
    println!("total races          : {}", NUM_CALLS);
    println!("successes            : {}", NUM_CALLS - error_count);
    println!("errors (any kind)    : {}", error_count);

    for (provider, count) in wins.iter() {
        let total = total_latency[provider];
        let avg_ms = total.as_secs_f64() * 1000.0 / (*count as f64);
        println!(
            "provider {:>10}: wins = {:6}, avg_latency = {:8.3} ms",
            provider.0, count, avg_ms,
        );
    }

    // Lookups that lost their race wind down after the race returns.
    tokio::time::sleep(Duration::from_millis(200)).await;
    println!("lookups still running: {}", dispatcher.in_flight());

    Ok(())
}
