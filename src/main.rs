//! `cep-race` command line.
//!
//! - `lookup <CEP>` races BrasilAPI and ViaCEP and prints whichever answers
//!   first, or reports that none did within the budget.
//! - `serve-front` runs the stage that validates a CEP and forwards it.
//! - `serve-temperature` runs the stage that resolves a CEP to a city and
//!   reports its temperature.

mod env;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use cep_race::{
    cep::{http_client, Cep},
    forwarder::{Forwarder, HttpDownstream},
    service::{
        front::{self, FrontService},
        temperature::{self, TemperatureService},
    },
    weather::WeatherClient,
    Deadline, ForwardConfig, RaceError,
};
use clap::{Parser, Subcommand};
use color_eyre::{eyre::WrapErr, Result};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "cep-race", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Look up a CEP, taking the first provider to answer.
    Lookup {
        cep: String,
        /// Overall budget in milliseconds.
        #[arg(long, default_value_t = 1000)]
        timeout_ms: u64,
    },
    /// Serve `POST /consulta`, forwarding to the temperature stage.
    ServeFront {
        #[arg(long, default_value = "0.0.0.0:8081")]
        listen: SocketAddr,
        /// Total budget per request in milliseconds, downstream included.
        #[arg(long, default_value_t = 10_000)]
        budget_ms: u64,
        /// Time kept back from the downstream budget, in milliseconds.
        #[arg(long, default_value_t = 50)]
        margin_ms: u64,
    },
    /// Serve `POST /temperaturebycep`.
    ServeTemperature {
        #[arg(long, default_value = "0.0.0.0:8082")]
        listen: SocketAddr,
        /// Upper bound on the budget a caller can hand down, in milliseconds.
        #[arg(long, default_value_t = 10_000)]
        max_budget_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cep_race=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match Cli::parse().command {
        Command::Lookup { cep, timeout_ms } => {
            lookup(&cep, Duration::from_millis(timeout_ms)).await
        }
        Command::ServeFront {
            listen,
            budget_ms,
            margin_ms,
        } => {
            let downstream = HttpDownstream::new(
                &env::temperature_service_url(),
                temperature::PATH,
                http_client()?,
            );
            let cfg = ForwardConfig::default()
                .with_safety_margin(Duration::from_millis(margin_ms));
            let service = FrontService::new(
                Forwarder::new(downstream, cfg),
                Duration::from_millis(budget_ms),
            );
            serve(listen, front::router(Arc::new(service))).await
        }
        Command::ServeTemperature {
            listen,
            max_budget_ms,
        } => {
            let http = http_client()?;
            let dispatcher = env::build_dispatcher_from_env(&http)?;
            let (weather_url, weather_key) = env::weather_from_env();
            if weather_key.is_empty() {
                tracing::warn!("WEATHER_API_KEY is not set; temperature lookups will be rejected");
            }
            let service = TemperatureService::new(
                dispatcher,
                WeatherClient::new(weather_url, weather_key, http),
                Duration::from_millis(max_budget_ms),
            );
            serve(listen, temperature::router(Arc::new(service))).await
        }
    }
}

async fn lookup(raw_cep: &str, budget: Duration) -> Result<()> {
    let cep = Cep::parse(raw_cep).wrap_err("usage: cep-race lookup <CEP>")?;
    let dispatcher = env::build_dispatcher_from_env(&http_client()?)?;

    match dispatcher.race(cep.as_str(), Deadline::after(budget)).await {
        Ok(result) => {
            println!("API response: {}\n{}", result.source, result.payload);
            Ok(())
        }
        Err(RaceError::DeadlineExceeded) => {
            color_eyre::eyre::bail!("no API answered within {budget:?}")
        }
        Err(RaceError::AllFailed(failures)) => {
            for (id, err) in &failures {
                eprintln!("{id}: {err}");
            }
            color_eyre::eyre::bail!("all {} APIs failed", failures.len())
        }
        Err(e) => Err(e.into()),
    }
}

async fn serve(addr: SocketAddr, router: axum::Router) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("failed to bind {addr}"))?;
    tracing::info!(address = %listener.local_addr()?, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    tracing::info!("server stopped");
    Ok(())
}
