//! Turns spawn requests into running trackers.

use std::collections::HashSet;
use std::sync::Arc;

use sov_assertion_chain::{AssertionChain, ChallengeId, VertexId};
use sov_challenge_interface::services::ExecutionOracle;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::config::{TrackerConfig, ValidatorConfig};
use crate::tracker::{TrackerContext, TrackerError, TrackerState, VertexTracker};

/// Asks for a tracker to follow `vertex`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpawnRequest {
    /// Challenge the vertex belongs to.
    pub challenge: ChallengeId,
    /// Vertex to follow.
    pub vertex: VertexId,
}

fn tracker_context(
    chain: Arc<AssertionChain>,
    oracle: Arc<dyn ExecutionOracle>,
    validator: &ValidatorConfig,
    tracker: &TrackerConfig,
) -> (TrackerContext, mpsc::UnboundedReceiver<SpawnRequest>) {
    let (spawner, requests) = mpsc::unbounded_channel();
    let ctx = TrackerContext {
        chain,
        oracle,
        name: validator.name.clone(),
        address: validator.address,
        act_every: tracker.act_every(),
        spawner,
    };
    (ctx, requests)
}

/// Runs one tokio task per tracked vertex.
///
/// At most `max_concurrent_trackers` trackers run at once. Others wait for a permit. A vertex
/// has at most one live tracker.
pub struct TrackerSupervisor {
    ctx: TrackerContext,
    requests: mpsc::UnboundedReceiver<SpawnRequest>,
    permits: Arc<Semaphore>,
    shutdown: watch::Receiver<()>,
    tracked: HashSet<VertexId>,
    tasks: JoinSet<VertexId>,
}

impl TrackerSupervisor {
    /// A supervisor that stops, together with all its trackers, when `shutdown` fires.
    pub fn new(
        chain: Arc<AssertionChain>,
        oracle: Arc<dyn ExecutionOracle>,
        validator: &ValidatorConfig,
        tracker: &TrackerConfig,
        shutdown: watch::Receiver<()>,
    ) -> Self {
        let (ctx, requests) = tracker_context(chain, oracle, validator, tracker);
        Self {
            ctx,
            requests,
            permits: Arc::new(Semaphore::new(tracker.max_concurrent_trackers.max(1))),
            shutdown,
            tracked: HashSet::new(),
            tasks: JoinSet::new(),
        }
    }

    /// Sender for spawn requests. Trackers get one too.
    pub fn spawner(&self) -> mpsc::UnboundedSender<SpawnRequest> {
        self.ctx.spawner.clone()
    }

    /// Serves spawn requests until shutdown, then waits for every tracker to exit.
    pub async fn run(mut self) {
        info!(validator = %self.ctx.name, "Starting tracker supervisor");
        loop {
            tokio::select! {
                Some(request) = self.requests.recv() => self.spawn(request),
                Some(result) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    self.finished(result);
                }
                _ = self.shutdown.changed() => break,
            }
        }
        debug!(
            validator = %self.ctx.name,
            running = self.tasks.len(),
            "Stopping tracker supervisor"
        );
        while let Some(result) = self.tasks.join_next().await {
            self.finished(result);
        }
    }

    fn finished(&mut self, result: Result<VertexId, JoinError>) {
        match result {
            Ok(vertex) => {
                self.tracked.remove(&vertex);
            }
            Err(err) => error!(validator = %self.ctx.name, %err, "Tracker task failed"),
        }
    }

    fn spawn(&mut self, request: SpawnRequest) {
        if !self.tracked.insert(request.vertex) {
            debug!(vertex = request.vertex.0, "Vertex already tracked");
            return;
        }
        let tracker = match VertexTracker::new(self.ctx.clone(), request.challenge, request.vertex)
        {
            Ok(tracker) => tracker,
            Err(err) => {
                error!(vertex = request.vertex.0, %err, "Could not build tracker");
                return;
            }
        };
        debug!(
            validator = %self.ctx.name,
            challenge = request.challenge.0,
            vertex = request.vertex.0,
            "Spawning tracker"
        );
        let vertex = request.vertex;
        let permits = self.permits.clone();
        let shutdown = self.shutdown.clone();
        let mut waiting = self.shutdown.clone();
        self.tasks.spawn(async move {
            let permit = tokio::select! {
                permit = permits.acquire_owned() => permit,
                _ = waiting.changed() => return vertex,
            };
            let Ok(_permit) = permit else {
                return vertex;
            };
            tracker.run(shutdown).await;
            vertex
        });
    }
}

/// Drives trackers by hand: every call to [`DeterministicScheduler::round`] ticks each live
/// tracker once, in the order they were spawned.
pub struct DeterministicScheduler {
    ctx: TrackerContext,
    requests: mpsc::UnboundedReceiver<SpawnRequest>,
    trackers: Vec<VertexTracker>,
    tracked: HashSet<VertexId>,
}

impl DeterministicScheduler {
    /// An empty scheduler.
    pub fn new(
        chain: Arc<AssertionChain>,
        oracle: Arc<dyn ExecutionOracle>,
        validator: &ValidatorConfig,
    ) -> Self {
        let (ctx, requests) =
            tracker_context(chain, oracle, validator, &TrackerConfig::default());
        Self {
            ctx,
            requests,
            trackers: Vec::new(),
            tracked: HashSet::new(),
        }
    }

    /// Sender for spawn requests.
    pub fn spawner(&self) -> mpsc::UnboundedSender<SpawnRequest> {
        self.ctx.spawner.clone()
    }

    /// Starts tracking `vertex` unless it has a live tracker.
    pub fn track(&mut self, challenge: ChallengeId, vertex: VertexId) -> Result<(), TrackerError> {
        if self.tracked.insert(vertex) {
            self.trackers
                .push(VertexTracker::new(self.ctx.clone(), challenge, vertex)?);
        }
        Ok(())
    }

    /// Ticks every live tracker once and returns how many are still live.
    ///
    /// Trackers spawned during the round join at its end. Failed steps are logged and retried
    /// on the next round.
    pub async fn round(&mut self) -> Result<usize, TrackerError> {
        self.drain_requests()?;
        let mut live = Vec::with_capacity(self.trackers.len());
        for mut tracker in std::mem::take(&mut self.trackers) {
            match tracker.tick().await {
                Ok(true) => {
                    self.tracked.remove(&tracker.vertex());
                    debug!(
                        validator = %self.ctx.name,
                        vertex = tracker.vertex().0,
                        state = %tracker.state(),
                        "Tracker finished"
                    );
                    continue;
                }
                Ok(false) => {}
                Err(err) => warn!(
                    validator = %self.ctx.name,
                    vertex = tracker.vertex().0,
                    %err,
                    "Tracker step failed"
                ),
            }
            live.push(tracker);
        }
        self.trackers = live;
        self.drain_requests()?;
        Ok(self.trackers.len())
    }

    /// State of the tracker following `vertex`, if it is live.
    pub fn state_of(&self, vertex: VertexId) -> Option<TrackerState> {
        self.trackers
            .iter()
            .find(|t| t.vertex() == vertex)
            .map(VertexTracker::state)
    }

    /// Vertices with a live tracker, in spawn order.
    pub fn tracked_vertices(&self) -> Vec<VertexId> {
        self.trackers.iter().map(VertexTracker::vertex).collect()
    }

    fn drain_requests(&mut self) -> Result<(), TrackerError> {
        while let Ok(request) = self.requests.try_recv() {
            self.track(request.challenge, request.vertex)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use sov_assertion_chain::{AssertionId, ChainError, ProtocolConfig};
    use sov_challenge_interface::mocks::{ArtificialTimeReference, SimulatedExecution};
    use sov_challenge_interface::{Address, Hash, HistoryCommitment, StateCommitment};

    use super::*;

    /// A challenge on genesis and its confirmed root vertex.
    fn challenge_root() -> (Arc<AssertionChain>, ValidatorConfig, SpawnRequest) {
        let chain = Arc::new(AssertionChain::new(
            ProtocolConfig::with_challenge_period(Duration::from_secs(100)),
            Arc::new(ArtificialTimeReference::new()),
        ));
        let (alice, bob) = (Address::repeat_byte(0xa1), Address::repeat_byte(0xb0));
        let challenge = chain
            .tx(|tx| {
                tx.set_balance(alice, 1_000_000_000_000);
                tx.set_balance(bob, 1_000_000_000_000);
                let genesis = tx.view().assertion(AssertionId::GENESIS)?;
                let first =
                    tx.create_leaf(&genesis, StateCommitment::new(2, Hash::for_u64(1)), alice)?;
                tx.create_leaf(&genesis, StateCommitment::new(2, Hash::for_u64(2)), bob)?;
                let challenge = tx.create_challenge(AssertionId::GENESIS, bob)?;
                tx.add_leaf(challenge.id, first.seq, HistoryCommitment::new(2, Hash::for_u64(3)), alice)?;
                Ok::<_, ChainError>(challenge)
            })
            .unwrap();
        let config = ValidatorConfig {
            name: "alice".to_string(),
            address: alice,
        };
        let request = SpawnRequest {
            challenge: challenge.id,
            vertex: challenge.root_vertex,
        };
        (chain, config, request)
    }

    #[tokio::test]
    async fn finished_trackers_release_their_vertex() {
        let (chain, config, request) = challenge_root();
        let (_shutdown, shutdown_rx) = watch::channel(());
        let mut supervisor = TrackerSupervisor::new(
            chain,
            Arc::new(SimulatedExecution::honest(3)),
            &config,
            &TrackerConfig::default(),
            shutdown_rx,
        );

        supervisor.spawn(request);
        supervisor.spawn(request);
        assert_eq!(supervisor.tasks.len(), 1);
        let result = tokio::time::timeout(Duration::from_secs(5), supervisor.tasks.join_next())
            .await
            .unwrap()
            .unwrap();
        supervisor.finished(result);
        assert!(supervisor.tracked.is_empty());

        supervisor.spawn(request);
        assert_eq!(supervisor.tasks.len(), 1);
    }

    #[tokio::test]
    async fn scheduler_forgets_finished_vertices() {
        let (chain, config, request) = challenge_root();
        let mut scheduler =
            DeterministicScheduler::new(chain, Arc::new(SimulatedExecution::honest(3)), &config);

        scheduler.track(request.challenge, request.vertex).unwrap();
        scheduler.track(request.challenge, request.vertex).unwrap();
        assert_eq!(scheduler.tracked_vertices(), vec![request.vertex]);
        assert_eq!(scheduler.round().await.unwrap(), 0);
        assert!(scheduler.tracked.is_empty());

        scheduler.track(request.challenge, request.vertex).unwrap();
        assert_eq!(scheduler.tracked_vertices(), vec![request.vertex]);
    }
}
