//! Quorum RPC fan-out
//!
//! Sends one request per target concurrently and waits until either
//! `required_acks` targets responded or so many failed that the quorum can no
//! longer be reached. Every target runs in its own task and reports a typed
//! result over a channel; the collector owns all counters. Tasks still in flight
//! when the collector returns are aborted.

use crate::common::metrics::METRICS;
use crate::common::{Error, Result};
use crate::coordinator::transport::InvalidateResponse;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;

/// Which reconfiguration phase a fan-out belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Invalidate,
    Update,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Invalidate => "invalidate",
            Phase::Update => "update",
        }
    }
}

pub trait FanOutResponse: Send + 'static {
    /// Whether the responder reported holding the primary lease
    fn is_primary(&self) -> bool {
        false
    }
}

impl FanOutResponse for InvalidateResponse {
    fn is_primary(&self) -> bool {
        self.is_primary
    }
}

impl FanOutResponse for () {}

struct Reply<T> {
    index: usize,
    result: Result<T>,
}

#[derive(Debug, Default)]
struct Tally {
    responded: usize,
    errored: usize,
    primary_responded: bool,
    permission_errors: usize,
}

impl Tally {
    fn settled(&self) -> usize {
        self.responded + self.errored
    }
}

#[derive(Debug, Clone)]
pub struct FanOut {
    phase: Phase,
    required_acks: usize,
    rpc_timeout: Duration,
    primary_wait: Option<Duration>,
}

impl FanOut {
    pub fn new(phase: Phase, required_acks: usize, rpc_timeout: Duration) -> Self {
        Self {
            phase,
            required_acks,
            rpc_timeout,
            primary_wait: None,
        }
    }

    /// After quorum, keep waiting up to `bound` for a primary to respond, or
    /// until every target has settled.
    pub fn wait_for_primary(mut self, bound: Duration) -> Self {
        self.primary_wait = Some(bound);
        self
    }

    /// Run `call` against every target. Returns one slot per target, `None` for
    /// targets that did not respond in time.
    pub async fn run<T, F, Fut>(&self, targets: &[String], call: F) -> Result<Vec<Option<T>>>
    where
        T: FanOutResponse,
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let total = targets.len();
        let mut responses: Vec<Option<T>> = (0..total).map(|_| None).collect();

        if self.required_acks == 0 {
            return Ok(responses);
        }
        if self.required_acks > total {
            return Err(self.unreachable(total, &Tally::default()));
        }
        let max_errors = total - self.required_acks;

        let (tx, mut rx) = mpsc::channel::<Reply<T>>(total);
        let mut tasks = JoinSet::new();
        for (index, target) in targets.iter().enumerate() {
            let tx = tx.clone();
            let request = call(target.clone());
            let target = target.clone();
            let rpc_timeout = self.rpc_timeout;
            tasks.spawn(async move {
                let result = match tokio::time::timeout(rpc_timeout, request).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::Timeout(format!("no response from {}", target))),
                };
                let _ = tx.send(Reply { index, result }).await;
            });
        }
        drop(tx);

        match self.phase {
            Phase::Invalidate => METRICS.invalidate_rpcs.add(total as u64),
            Phase::Update => METRICS.update_rpcs.add(total as u64),
        }

        let mut tally = Tally::default();
        let mut primary_deadline: Option<Instant> = None;

        loop {
            let reply = match primary_deadline {
                None => rx.recv().await,
                Some(deadline) => match tokio::time::timeout_at(deadline, rx.recv()).await {
                    Ok(reply) => reply,
                    Err(_) => {
                        METRICS.primary_wait_timeouts.inc();
                        tracing::debug!(
                            "{}: no primary responded within the lease timeout, continuing with {} of {}",
                            self.phase.as_str(),
                            tally.responded,
                            total
                        );
                        break;
                    }
                },
            };

            // Every task has reported
            let Some(Reply { index, result }) = reply else {
                break;
            };

            match result {
                Ok(response) => {
                    tally.responded += 1;
                    tally.primary_responded |= response.is_primary();
                    responses[index] = Some(response);
                }
                Err(e) => {
                    METRICS.rpc_errors.inc();
                    tracing::debug!("{} RPC to {} failed: {}", self.phase.as_str(), targets[index], e);
                    tally.errored += 1;
                    if e.is_permission_denied() {
                        tally.permission_errors += 1;
                    }
                    if tally.errored > max_errors {
                        return Err(self.unreachable(total, &tally));
                    }
                }
            }

            if tally.responded >= self.required_acks {
                match self.primary_wait {
                    None => break,
                    Some(_) if tally.primary_responded || tally.settled() == total => break,
                    Some(bound) => {
                        primary_deadline.get_or_insert_with(|| Instant::now() + bound);
                    }
                }
            }
        }

        // Replies already delivered count even though the quorum is complete
        while let Ok(Reply { index, result }) = rx.try_recv() {
            if let Ok(response) = result {
                tally.responded += 1;
                responses[index] = Some(response);
            }
        }

        if tally.responded < self.required_acks {
            return Err(self.unreachable(total, &tally));
        }

        tasks.abort_all();
        Ok(responses)
    }

    fn unreachable(&self, total: usize, tally: &Tally) -> Error {
        if tally.errored > 0 && tally.permission_errors == tally.errored {
            return Error::PermissionDenied(format!(
                "{} rejected by {} of {} replicas",
                self.phase.as_str(),
                tally.errored,
                total
            ));
        }
        METRICS.quorum_failures.inc();
        Error::QuorumUnreachable {
            phase: self.phase.as_str(),
            required: self.required_acks,
            total,
            responded: tally.responded,
            errored: tally.errored,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Clone)]
    enum Behaviour {
        Ok { primary: bool, delay_ms: u64 },
        Fail { delay_ms: u64 },
        PermissionDenied,
        Hang,
    }

    fn targets(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("osd-{}", i)).collect()
    }

    async fn run_with(
        fan_out: FanOut,
        behaviours: Vec<Behaviour>,
    ) -> (Result<Vec<Option<InvalidateResponse>>>, usize) {
        let targets = targets(behaviours.len());
        let script: Arc<HashMap<String, Behaviour>> =
            Arc::new(targets.iter().cloned().zip(behaviours).collect());
        let calls = Arc::new(AtomicUsize::new(0));

        let result = {
            let calls = calls.clone();
            fan_out
                .run(&targets, move |target| {
                    let behaviour = script[&target].clone();
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        match behaviour {
                            Behaviour::Ok { primary, delay_ms } => {
                                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                                Ok(InvalidateResponse {
                                    is_primary: primary,
                                    status: None,
                                })
                            }
                            Behaviour::Fail { delay_ms } => {
                                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                                Err(Error::ConnectionFailed(target))
                            }
                            Behaviour::PermissionDenied => {
                                Err(Error::Grpc(tonic::Status::permission_denied("bad cap")))
                            }
                            Behaviour::Hang => std::future::pending().await,
                        }
                    }
                })
                .await
        };
        (result, calls.load(Ordering::SeqCst))
    }

    fn ok(delay_ms: u64) -> Behaviour {
        Behaviour::Ok {
            primary: false,
            delay_ms,
        }
    }

    fn primary(delay_ms: u64) -> Behaviour {
        Behaviour::Ok {
            primary: true,
            delay_ms,
        }
    }

    #[tokio::test]
    async fn test_zero_required_sends_nothing() {
        let fan_out = FanOut::new(Phase::Update, 0, Duration::from_secs(1));
        let (result, calls) = run_with(fan_out, vec![ok(0), ok(0)]).await;
        assert_eq!(result.unwrap().len(), 2);
        assert_eq!(calls, 0);
    }

    #[tokio::test]
    async fn test_required_exceeds_targets() {
        let fan_out = FanOut::new(Phase::Update, 3, Duration::from_secs(1));
        let (result, calls) = run_with(fan_out, vec![ok(0), ok(0)]).await;
        assert!(matches!(result, Err(Error::QuorumUnreachable { .. })));
        assert_eq!(calls, 0);
    }

    #[tokio::test]
    async fn test_quorum_reached_without_waiting_for_stragglers() {
        let fan_out = FanOut::new(Phase::Update, 2, Duration::from_secs(30));
        let started = std::time::Instant::now();
        let (result, _) = run_with(fan_out, vec![ok(0), ok(10), Behaviour::Hang]).await;

        let responses = result.unwrap();
        assert!(responses[0].is_some());
        assert!(responses[1].is_some());
        assert!(responses[2].is_none());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_aborts_once_errors_exceed_budget() {
        // 3 targets, 2 required: the second error makes quorum impossible
        let fan_out = FanOut::new(Phase::Invalidate, 2, Duration::from_secs(30));
        let started = std::time::Instant::now();
        let (result, _) = run_with(
            fan_out,
            vec![Behaviour::Fail { delay_ms: 0 }, Behaviour::Fail { delay_ms: 5 }, Behaviour::Hang],
        )
        .await;

        match result {
            Err(Error::QuorumUnreachable {
                phase,
                required,
                total,
                responded,
                errored,
            }) => {
                assert_eq!(phase, "invalidate");
                assert_eq!((required, total, responded, errored), (2, 3, 0, 2));
            }
            other => panic!("expected quorum failure, got {:?}", other.map(|_| ())),
        }
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_tolerates_errors_within_budget() {
        let fan_out = FanOut::new(Phase::Invalidate, 3, Duration::from_secs(5));
        let (result, _) = run_with(
            fan_out,
            vec![ok(0), Behaviour::Fail { delay_ms: 0 }, ok(5), Behaviour::Fail { delay_ms: 5 }, ok(10)],
        )
        .await;
        let responses = result.unwrap();
        assert_eq!(responses.iter().filter(|r| r.is_some()).count(), 3);
    }

    #[tokio::test]
    async fn test_rpc_timeout_counts_as_error() {
        let fan_out = FanOut::new(Phase::Update, 1, Duration::from_millis(20));
        let (result, _) = run_with(fan_out, vec![Behaviour::Hang]).await;
        assert!(matches!(result, Err(Error::QuorumUnreachable { errored: 1, .. })));
    }

    #[tokio::test]
    async fn test_all_permission_errors_reported_as_permission_denied() {
        let fan_out = FanOut::new(Phase::Invalidate, 1, Duration::from_secs(1));
        let (result, _) = run_with(
            fan_out,
            vec![Behaviour::PermissionDenied, Behaviour::PermissionDenied],
        )
        .await;
        assert!(matches!(result, Err(Error::PermissionDenied(_))));
    }

    #[tokio::test]
    async fn test_primary_wait_ends_when_primary_responds() {
        let fan_out =
            FanOut::new(Phase::Invalidate, 2, Duration::from_secs(30)).wait_for_primary(Duration::from_secs(10));
        let started = std::time::Instant::now();
        let (result, _) = run_with(fan_out, vec![ok(0), ok(0), primary(50), Behaviour::Hang]).await;

        let responses = result.unwrap();
        assert!(responses[2].as_ref().unwrap().is_primary);
        assert!(responses[3].is_none());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_primary_wait_ends_when_everyone_settled() {
        let fan_out =
            FanOut::new(Phase::Invalidate, 2, Duration::from_secs(30)).wait_for_primary(Duration::from_secs(10));
        let started = std::time::Instant::now();
        let (result, _) = run_with(fan_out, vec![ok(0), ok(0), Behaviour::Fail { delay_ms: 30 }]).await;

        assert_eq!(result.unwrap().iter().filter(|r| r.is_some()).count(), 2);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_primary_wait_bounded_by_lease() {
        let fan_out = FanOut::new(Phase::Invalidate, 2, Duration::from_secs(30))
            .wait_for_primary(Duration::from_millis(100));
        let started = std::time::Instant::now();
        let (result, _) = run_with(fan_out, vec![ok(0), ok(0), Behaviour::Hang]).await;

        assert_eq!(result.unwrap().iter().filter(|r| r.is_some()).count(), 2);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_secs(5));
    }
}
