//! Postal-code lookups that race independent providers against one deadline,
//! and a two-stage service chain that propagates that deadline downstream.
//!
//! The [`RaceDispatcher`] sends the same query to every registered provider
//! at once and returns the first success. A race ends in exactly one of three
//! ways: a winning [`LookupResult`], [`RaceError::AllFailed`] with one error
//! per provider, or [`RaceError::DeadlineExceeded`]. Losing lookups are
//! cancelled and finish on their own tasks.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use cep_race::{
//!     cep::{Address, HttpCepProvider},
//!     Deadline, RaceConfig, RaceDispatcher, SharedProvider,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let http = cep_race::cep::http_client()?;
//! let providers: Vec<SharedProvider<Address>> = vec![
//!     Arc::new(HttpCepProvider::brasil_api("https://brasilapi.com.br", http.clone())),
//!     Arc::new(HttpCepProvider::via_cep("http://viacep.com.br", http)),
//! ];
//! let dispatcher = RaceDispatcher::new(providers, RaceConfig::default());
//!
//! let result = dispatcher
//!     .race("01001000", Deadline::after(Duration::from_secs(1)))
//!     .await?;
//! println!("{} answered first:\n{}", result.source, result.payload);
//! # Ok(())
//! # }
//! ```
//!
//! # Chained calls
//!
//! A [`Forwarder`] sends one request to a downstream stage inside a child of
//! the caller's [`RequestContext`]. The child's deadline can be narrowed but
//! never extended, so budgets only shrink along a chain. The [`service`]
//! module wires both pieces into the two HTTP stages.

pub mod cep;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod errors;
pub mod forwarder;
pub mod provider;
pub mod service;
pub mod weather;

pub use config::{ForwardConfig, ProviderConfig, ProviderId, RaceConfig};
pub use context::{Deadline, RequestContext, TraceContext};
pub use dispatcher::{ProviderStatsSnapshot, RaceDispatcher, RaceOutcome, SharedProvider};
pub use errors::{DownstreamError, ForwardError, ProviderError, RaceError};
pub use forwarder::{Downstream, Forwarder, HttpDownstream};
pub use provider::{LookupResult, Provider};
