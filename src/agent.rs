//! The pondering agent. A fixed pool of worker threads grows the search
//! tree whenever `do_ponder` is set; the controller swaps the root and the
//! position under a two-phase barrier protocol, so tree-mutating
//! transitions never interleave with sampling.
//!
//! Worker loop:
//! ```text
//! while !do_terminate:
//!     if pending_change or !do_ponder:
//!         wait(barrier_before_change); wait(barrier_after_change)
//!     if do_ponder:
//!         sample the tree 100 times
//! ```
//!
//! Controller section: raise `pending_change`, wait on the first barrier
//! (every worker is now paused), apply the change with exclusive access,
//! clear the flag and release everyone through the second barrier.

use crate::movegen::{random_move, Move};
use crate::state::{FenError, State};
use crate::tree::{RestoreError, SavedTree, Tree};
use log::{debug, info, warn};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

/// Samples a worker runs between barrier checks; coordination overhead is
/// O(1) per batch.
const SAMPLES_PER_BATCH: usize = 100;

/// Probability of accepting an offered draw. Arbitrary, inherited.
const DRAW_ACCEPT_PROBABILITY: f64 = 0.1;

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("encoding: {0}")]
    Encoding(#[from] bincode::Error),
    #[error("saved tree is corrupt: {0}")]
    Corrupt(#[from] RestoreError),
    #[error("saved position is invalid: {0}")]
    Position(#[from] FenError),
    #[error("agent has no position to save")]
    NoPosition,
}

#[derive(Serialize, Deserialize)]
struct SavedAgent {
    fen: String,
    tree: SavedTree,
}

struct Shared {
    state: RwLock<Option<State>>,
    tree: Tree,
    pending_change: AtomicBool,
    do_ponder: AtomicBool,
    do_terminate: AtomicBool,
    barrier_before_change: Barrier,
    barrier_after_change: Barrier,
}

pub struct MctsAgent {
    shared: Arc<Shared>,
    ponderers: Vec<JoinHandle<()>>,
}

/// A pending time-budgeted decision; `get` blocks until the budget elapses.
pub struct Decision {
    handle: JoinHandle<Move>,
}

impl Decision {
    pub fn get(self) -> Move {
        match self.handle.join() {
            Ok(mov) => mov,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

impl MctsAgent {
    pub fn new(nponderers: usize) -> Self {
        let shared = Arc::new(Shared {
            state: RwLock::new(None),
            tree: Tree::new(),
            pending_change: AtomicBool::new(false),
            do_ponder: AtomicBool::new(false),
            do_terminate: AtomicBool::new(false),
            barrier_before_change: Barrier::new(nponderers + 1),
            barrier_after_change: Barrier::new(nponderers + 1),
        });

        let mut seeder = rand::rng();
        let ponderers = (0..nponderers)
            .map(|i| {
                let shared = Arc::clone(&shared);
                let seed: u64 = seeder.random();
                thread::Builder::new()
                    .name(format!("ponderer-{i}"))
                    .spawn(move || ponder(&shared, SmallRng::seed_from_u64(seed)))
                    .expect("failed to spawn ponderer thread")
            })
            .collect();

        Self { shared, ponderers }
    }

    fn between_ponderings(&self, change: impl FnOnce()) {
        let shared = &self.shared;
        shared.pending_change.store(true, Ordering::SeqCst);
        shared.barrier_before_change.wait();
        change();
        shared.pending_change.store(false, Ordering::SeqCst);
        shared.barrier_after_change.wait();
    }

    /// Installs a new position and drops the whole tree.
    pub fn set_state(&mut self, state: State) {
        if self.shared.state.read().unwrap().as_ref() == Some(&state) {
            return;
        }
        debug!("set_state: {}", state.as_fen());
        self.between_ponderings(|| {
            *self.shared.state.write().unwrap() = Some(state);
            self.shared.tree.reset();
        });
    }

    /// Plays `mov` on the current position and re-roots the tree on the
    /// matching child so its accumulated statistics survive.
    pub fn advance_state(&mut self, mov: Move) {
        debug!("advance_state: {mov}");
        self.between_ponderings(|| {
            let mut guard = self.shared.state.write().unwrap();
            let state = guard.as_mut().expect("advance_state before set_state");
            state.make_move(mov);
            self.shared.tree.advance_root(mov);
        });
    }

    pub fn start_pondering(&mut self) {
        self.between_ponderings(|| self.shared.do_ponder.store(true, Ordering::SeqCst));
    }

    /// Quiesces the workers. Idempotent.
    pub fn stop_pondering(&mut self) {
        self.between_ponderings(|| self.shared.do_ponder.store(false, Ordering::SeqCst));
    }

    pub fn idle(&mut self) {
        self.stop_pondering();
    }

    pub fn pause(&mut self) {
        self.stop_pondering();
    }

    pub fn resume(&mut self) {
        self.start_pondering();
    }

    /// Starts pondering and schedules a decision after `budget` elapses.
    /// The chosen move is the most-visited root child at that moment.
    pub fn start_decision(&mut self, budget: Duration) -> Decision {
        self.start_pondering();
        let shared = Arc::clone(&self.shared);
        let handle = thread::spawn(move || {
            thread::sleep(budget);
            decide(&shared)
        });
        Decision { handle }
    }

    pub fn accept_draw(&self) -> bool {
        rand::rng().random_bool(DRAW_ACCEPT_PROBABILITY)
    }

    /// A copy of the current position, if one has been set.
    pub fn state(&self) -> Option<State> {
        self.shared.state.read().unwrap().clone()
    }

    /// Root visit count and per-child statistics, for display.
    pub fn root_statistics(&self) -> (u64, Vec<(Move, u64, f64)>) {
        (self.shared.tree.root_visits(), self.shared.tree.root_children())
    }

    /// Serializes the position and the whole tree. Stops pondering first.
    pub fn save_yourself<P: AsRef<Path>>(&mut self, path: P) -> Result<(), PersistError> {
        self.stop_pondering();
        let mut result: Result<(), PersistError> = Ok(());
        self.between_ponderings(|| result = save(&self.shared, path.as_ref()));
        result
    }

    /// Restores a position and tree saved by [`Self::save_yourself`].
    pub fn load_yourself<P: AsRef<Path>>(&mut self, path: P) -> Result<(), PersistError> {
        self.stop_pondering();
        let saved: SavedAgent = bincode::deserialize_from(BufReader::new(File::open(path)?))?;
        let state = State::from_fen(&saved.fen)?;
        let tree = Tree::restore(&saved.tree)?;
        info!("loaded agent: {} nodes at {}", saved.tree.nodes.len(), saved.fen);
        self.between_ponderings(|| {
            *self.shared.state.write().unwrap() = Some(state);
            self.shared.tree.replace(tree);
        });
        Ok(())
    }
}

impl Drop for MctsAgent {
    fn drop(&mut self) {
        // raise the terminate flag inside a change so every worker observes
        // it at a barrier instead of mid-batch; no thread is left parked
        self.stop_pondering();
        self.between_ponderings(|| self.shared.do_terminate.store(true, Ordering::SeqCst));
        for ponderer in self.ponderers.drain(..) {
            let _ = ponderer.join();
        }
    }
}

fn ponder(shared: &Shared, mut rng: SmallRng) {
    while !shared.do_terminate.load(Ordering::SeqCst) {
        if shared.pending_change.load(Ordering::SeqCst)
            || !shared.do_ponder.load(Ordering::SeqCst)
        {
            shared.barrier_before_change.wait();
            shared.barrier_after_change.wait();
        }
        if shared.do_ponder.load(Ordering::SeqCst) {
            let state = shared.state.read().unwrap().clone();
            if let Some(state) = state {
                for _ in 0..SAMPLES_PER_BATCH {
                    shared.tree.sample(&state, &mut rng);
                }
            }
        }
    }
}

fn decide(shared: &Shared) -> Move {
    let state = shared
        .state
        .read()
        .unwrap()
        .clone()
        .expect("decision requested before set_state");

    for (mov, visits, wins) in shared.tree.root_children() {
        debug!("candidate {mov}: {visits} visits, {wins:+.1}");
    }

    match shared.tree.best_move() {
        Some(mov) => {
            info!(
                "decided on {mov} after {} root visits",
                shared.tree.root_visits()
            );
            mov
        }
        None => {
            // the budget was too short for a single batch; any legal move
            warn!("deciding without samples, falling back to a random move");
            random_move(&state, &mut rand::rng()).expect("no legal moves to decide between")
        }
    }
}

fn save(shared: &Shared, path: &Path) -> Result<(), PersistError> {
    let guard = shared.state.read().unwrap();
    let state = guard.as_ref().ok_or(PersistError::NoPosition)?;
    let saved = SavedAgent {
        fen: state.as_fen(),
        tree: shared.tree.snapshot(),
    };
    bincode::serialize_into(BufWriter::new(File::create(path)?), &saved)?;
    info!(
        "saved agent: {} nodes at {} to {}",
        saved.tree.nodes.len(),
        saved.fen,
        path.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::movegen::moves;

    #[test]
    fn pondering_grows_the_tree() {
        let mut agent = MctsAgent::new(2);
        agent.set_state(State::default());
        agent.start_pondering();
        thread::sleep(Duration::from_millis(200));
        agent.stop_pondering();
        let (visits, children) = agent.root_statistics();
        assert!(visits > 0, "workers never sampled");
        assert_eq!(children.len(), 20);
    }

    #[test]
    fn advancing_reroots_between_ponderings() {
        let mut agent = MctsAgent::new(2);
        agent.set_state(State::default());
        agent.start_pondering();
        thread::sleep(Duration::from_millis(100));

        let state = agent.state().unwrap();
        let mov = moves(&state)[0];
        agent.advance_state(mov);

        let advanced = agent.state().unwrap();
        assert_ne!(state, advanced);
        assert_eq!(advanced.us(), state.them());
        agent.stop_pondering();
    }

    #[test]
    fn draws_are_accepted_occasionally() {
        let agent = MctsAgent::new(0);
        let accepted = (0..2000).filter(|_| agent.accept_draw()).count();
        // ~10%; generous bounds to keep this non-flaky
        assert!(accepted > 50, "accepted {accepted} of 2000");
        assert!(accepted < 500, "accepted {accepted} of 2000");
    }

    #[test]
    fn shutdown_does_not_deadlock_while_pondering() {
        let mut agent = MctsAgent::new(3);
        agent.set_state(State::default());
        agent.start_pondering();
        thread::sleep(Duration::from_millis(50));
        drop(agent);
    }
}
