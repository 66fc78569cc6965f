use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, PoisonError,
    },
};

use futures::{stream::FuturesUnordered, StreamExt};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use crate::{
    config::{ProviderId, RaceConfig},
    context::{Deadline, RequestContext},
    errors::{ProviderError, RaceError},
    provider::{LookupResult, Provider},
};

/// Outcome of one race: the winning result, or exactly one terminal failure.
pub type RaceOutcome<T> = Result<LookupResult<T>, RaceError>;

/// Provider handle as registered with a dispatcher.
pub type SharedProvider<T> = Arc<dyn Provider<Output = T>>;

#[derive(Debug, Default)]
struct ProviderStats {
    wins: u64,
    total_latency_ms: f64,
    errors: u64,
}

/// Snapshot of provider performance statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderStatsSnapshot {
    /// Number of races this provider won.
    pub wins: u64,
    /// Average latency in milliseconds for winning lookups.
    pub avg_latency_ms: f64,
    /// Number of lookups that failed or missed the deadline.
    pub errors: u64,
}

/// Decrements the in-flight counter when a launched lookup task ends,
/// however it ends.
struct InFlightGuard(Arc<AtomicUsize>);

impl InFlightGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Races one query across a fixed set of independent providers.
///
/// Every provider is queried at once under a single shared deadline. The
/// first success wins; the remaining lookups are told to stop through a
/// shared cancellation token and wind down on their own tasks.
pub struct RaceDispatcher<T> {
    providers: Arc<Vec<SharedProvider<T>>>,
    cfg: RaceConfig,
    stats: Arc<Mutex<HashMap<ProviderId, ProviderStats>>>,
    in_flight: Arc<AtomicUsize>,
}

impl<T> Clone for RaceDispatcher<T> {
    fn clone(&self) -> Self {
        Self {
            providers: Arc::clone(&self.providers),
            cfg: self.cfg.clone(),
            stats: Arc::clone(&self.stats),
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

impl<T: Send + 'static> RaceDispatcher<T> {
    /// Creates a dispatcher over `providers`.
    ///
    /// Registration order is kept but carries no priority: the winner is
    /// whichever success the dispatcher observes first.
    pub fn new(providers: Vec<SharedProvider<T>>, cfg: RaceConfig) -> Self {
        let mut stats_map = HashMap::new();
        for provider in &providers {
            stats_map.insert(provider.id(), ProviderStats::default());
        }

        Self {
            providers: Arc::new(providers),
            cfg,
            stats: Arc::new(Mutex::new(stats_map)),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Identifiers of the registered providers, in registration order.
    pub fn provider_ids(&self) -> Vec<ProviderId> {
        self.providers.iter().map(|p| p.id()).collect()
    }

    pub fn config(&self) -> &RaceConfig {
        &self.cfg
    }

    /// Number of launched lookups that have not terminated yet, across all
    /// races run by this dispatcher and its clones.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Returns a snapshot of accumulated performance statistics for each provider.
    pub fn provider_stats(&self) -> HashMap<ProviderId, ProviderStatsSnapshot> {
        let stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);

        stats
            .iter()
            .map(|(id, s)| {
                let avg = if s.wins > 0 {
                    s.total_latency_ms / (s.wins as f64)
                } else {
                    0.0
                };

                (
                    *id,
                    ProviderStatsSnapshot {
                        wins: s.wins,
                        avg_latency_ms: avg,
                        errors: s.errors,
                    },
                )
            })
            .collect()
    }

    /// Races `query` with the configured default budget.
    pub async fn race_default(&self, query: &str) -> RaceOutcome<T> {
        self.race(query, Deadline::after(self.cfg.timeout)).await
    }

    /// Races `query` across every provider until `deadline`.
    pub async fn race(&self, query: &str, deadline: Deadline) -> RaceOutcome<T> {
        self.race_in(query, &RequestContext::with_deadline(deadline))
            .await
    }

    /// Races `query` inside the caller's context.
    ///
    /// The race inherits the caller's deadline and is cancelled along with
    /// the caller. Dropping the returned future cancels the launched lookups
    /// as well.
    pub async fn race_in(&self, query: &str, ctx: &RequestContext) -> RaceOutcome<T> {
        if self.providers.is_empty() {
            return Err(RaceError::NoProviders);
        }
        if ctx.is_cancelled() {
            return Err(RaceError::Cancelled);
        }
        if ctx.deadline().is_expired() {
            return Err(RaceError::DeadlineExceeded);
        }

        let group = ctx.child(None);
        // Dropping the race before it settles still stops every lookup.
        let _cancel_on_drop = group.cancellation().clone().drop_guard();
        let span = tracing::info_span!(
            "race",
            trace_id = %group.trace().trace_id(),
            providers = self.providers.len(),
        );

        async {
            let start = Instant::now();
            let outcome = self.run_race(query, &group, ctx).await;
            // Losing lookups are only told to stop once the outcome is known.
            group.cancel();

            let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
            self.record(&outcome, elapsed_ms);

            match &outcome.0 {
                Ok(result) => info!(winner = %result.source, elapsed_ms, "race won"),
                Err(e) => warn!(error = %e, elapsed_ms, "race lost"),
            }
            outcome.0
        }
        .instrument(span)
        .await
    }

    async fn run_race(
        &self,
        query: &str,
        group: &RequestContext,
        caller: &RequestContext,
    ) -> (RaceOutcome<T>, Vec<ProviderId>) {
        let total = self.providers.len();
        let query: Arc<str> = Arc::from(query);
        let mut branches = FuturesUnordered::new();

        for provider in self.providers.iter() {
            let id = provider.id();
            let handle = self.launch(
                Arc::clone(provider),
                Arc::clone(&query),
                group.cancellation().child_token(),
            );
            // Dropping this future detaches the task; it is never aborted.
            branches.push(async move {
                match handle.await {
                    Ok(result) => (id, result),
                    Err(join_err) => {
                        warn!(provider = %id, error = %join_err, "lookup task failed");
                        (id, Err(ProviderError::Panicked))
                    }
                }
            });
        }

        let deadline = time::sleep_until(group.deadline().instant());
        tokio::pin!(deadline);

        let mut failures = Vec::with_capacity(total);
        let outcome = loop {
            tokio::select! {
                biased;
                _ = caller.cancellation().cancelled() => break Err(RaceError::Cancelled),
                Some((id, result)) = branches.next(), if !branches.is_empty() => {
                    match result {
                        Ok(payload) => break Ok(LookupResult { source: id, payload }),
                        Err(e) => {
                            debug!(provider = %id, error = %e, "provider failed");
                            failures.push((id, e));
                            if failures.len() == total {
                                break Err(RaceError::AllFailed(std::mem::take(&mut failures)));
                            }
                        }
                    }
                }
                _ = &mut deadline => break Err(RaceError::DeadlineExceeded),
            }
        };

        let failed = match &outcome {
            Err(RaceError::AllFailed(_)) => Vec::new(),
            _ => failures.iter().map(|(id, _)| *id).collect(),
        };
        (outcome, failed)
    }

    fn launch(
        &self,
        provider: SharedProvider<T>,
        query: Arc<str>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<Result<T, ProviderError>> {
        let guard = InFlightGuard::enter(&self.in_flight);
        let span = tracing::debug_span!("lookup", provider = %provider.id());

        tokio::spawn(
            async move {
                let _guard = guard;
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!("lookup cancelled");
                        Err(ProviderError::Cancelled)
                    }
                    result = provider.lookup(&query, &cancel) => result,
                }
            }
            .instrument(span),
        )
    }

    fn record(&self, outcome: &(RaceOutcome<T>, Vec<ProviderId>), elapsed_ms: f64) {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        let (result, failed_before_end) = outcome;

        for id in failed_before_end {
            if let Some(entry) = stats.get_mut(id) {
                entry.errors += 1;
            }
        }

        match result {
            Ok(result) => {
                if let Some(entry) = stats.get_mut(&result.source) {
                    entry.wins += 1;
                    entry.total_latency_ms += elapsed_ms;
                }
            }
            Err(RaceError::AllFailed(failures)) => {
                for (id, _err) in failures {
                    if let Some(entry) = stats.get_mut(id) {
                        entry.errors += 1;
                    }
                }
            }
            Err(RaceError::DeadlineExceeded) => {
                for provider in self.providers.iter() {
                    let id = provider.id();
                    if failed_before_end.contains(&id) {
                        continue;
                    }
                    if let Some(entry) = stats.get_mut(&id) {
                        entry.errors += 1;
                    }
                }
            }
            Err(_) => {}
        }
    }
}
