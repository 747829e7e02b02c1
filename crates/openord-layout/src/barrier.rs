//! Phase barrier with a single post-phase action.
//!
//! Every party hands its contribution to [`PhaseBarrier::arrive`]. The last
//! party to arrive runs the action on all contributions while holding the
//! barrier lock, publishes the resulting frame and wakes everyone. The action
//! therefore never overlaps with itself or with any party's work between
//! phases, and it does not care which thread happens to run it.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::warn;

use crate::{LayoutError, Result};

/// What the action decided after a phase.
#[derive(Debug)]
pub enum Release<F> {
    /// Publish the frame and run another phase.
    Continue(Arc<F>),
    /// Publish the frame and end the run.
    Finished(Arc<F>),
    /// Abort the run; the previous frame stays published.
    Failed(LayoutError),
}

/// Run status as seen by parties and observers.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Active,
    Finished,
    Failed(LayoutError),
}

/// Snapshot handed to an observer after a release.
#[derive(Debug)]
pub struct Observed<F> {
    pub generation: u64,
    pub frame: Arc<F>,
    pub outcome: Outcome,
}

type Action<C, F> = Box<dyn FnMut(Vec<C>) -> Release<F> + Send>;

struct BarrierState<C, F> {
    slots: Vec<Option<C>>,
    arrived: usize,
    /// Number of completed phases.
    generation: u64,
    latest: Arc<F>,
    outcome: Outcome,
    action: Action<C, F>,
}

pub struct PhaseBarrier<C, F> {
    parties: usize,
    state: Mutex<BarrierState<C, F>>,
    released: Condvar,
}

impl<C, F> PhaseBarrier<C, F> {
    /// Barrier for `parties` parties, publishing `initial` until the first
    /// phase completes.
    pub fn new<A>(parties: usize, initial: Arc<F>, action: A) -> Self
    where
        A: FnMut(Vec<C>) -> Release<F> + Send + 'static,
    {
        let parties = parties.max(1);
        Self {
            parties,
            state: Mutex::new(BarrierState {
                slots: (0..parties).map(|_| None).collect(),
                arrived: 0,
                generation: 0,
                latest: initial,
                outcome: Outcome::Active,
                action: Box::new(action),
            }),
            released: Condvar::new(),
        }
    }

    pub fn parties(&self) -> usize {
        self.parties
    }

    /// Deposit `contribution` for `party` and block until the phase is released.
    ///
    /// Returns the next frame, `None` once the run has finished, or the
    /// failure that aborted it.
    pub fn arrive(&self, party: usize, contribution: C) -> Result<Option<Arc<F>>> {
        let mut state = self.state.lock();
        match &state.outcome {
            Outcome::Active => {}
            Outcome::Finished => return Ok(None),
            Outcome::Failed(error) => return Err(error.clone()),
        }

        match state.slots.get(party) {
            Some(None) => {}
            Some(Some(_)) => {
                let error =
                    LayoutError::invariant(format!("party {party} arrived twice in one phase"));
                Self::finish(&mut state, Outcome::Failed(error.clone()));
                self.released.notify_all();
                return Err(error);
            }
            None => {
                let error = LayoutError::invariant(format!(
                    "party {party} is not one of {} parties",
                    self.parties
                ));
                Self::finish(&mut state, Outcome::Failed(error.clone()));
                self.released.notify_all();
                return Err(error);
            }
        }
        state.slots[party] = Some(contribution);
        state.arrived += 1;
        let generation = state.generation;

        if state.arrived == self.parties {
            self.release(&mut state);
        }

        while state.generation == generation && state.outcome == Outcome::Active {
            self.released.wait(&mut state);
        }
        match &state.outcome {
            Outcome::Active => Ok(Some(Arc::clone(&state.latest))),
            Outcome::Finished => Ok(None),
            Outcome::Failed(error) => Err(error.clone()),
        }
    }

    fn release(&self, state: &mut BarrierState<C, F>) {
        let contributions: Vec<C> = state.slots.iter_mut().filter_map(Option::take).collect();
        state.arrived = 0;
        match (state.action)(contributions) {
            Release::Continue(frame) => {
                state.latest = frame;
                state.generation += 1;
            }
            Release::Finished(frame) => {
                state.latest = frame;
                Self::finish(state, Outcome::Finished);
            }
            Release::Failed(error) => Self::finish(state, Outcome::Failed(error)),
        }
        self.released.notify_all();
    }

    fn finish(state: &mut BarrierState<C, F>, outcome: Outcome) {
        state.outcome = outcome;
        state.generation += 1;
        for slot in &mut state.slots {
            *slot = None;
        }
        state.arrived = 0;
    }

    /// Abort the run with `error` and wake every waiter. No-op once the run
    /// has already ended.
    pub fn fail(&self, error: LayoutError) {
        let mut state = self.state.lock();
        if state.outcome == Outcome::Active {
            Self::finish(&mut state, Outcome::Failed(error));
            self.released.notify_all();
        }
    }

    /// Called when `party` can no longer arrive.
    pub fn abandon(&self, party: usize) {
        warn!(worker = party, "openord_worker_abandoned_barrier");
        self.fail(LayoutError::WorkerPanicked { worker: party });
    }

    /// Block until more than `seen` phases have completed or the run ended.
    pub fn observe_after(&self, seen: u64) -> Observed<F> {
        let mut state = self.state.lock();
        while state.generation <= seen && state.outcome == Outcome::Active {
            self.released.wait(&mut state);
        }
        Observed {
            generation: state.generation,
            frame: Arc::clone(&state.latest),
            outcome: state.outcome.clone(),
        }
    }

    /// Most recently published frame.
    pub fn latest(&self) -> Arc<F> {
        Arc::clone(&self.state.lock().latest)
    }

    pub fn outcome(&self) -> Outcome {
        self.state.lock().outcome.clone()
    }

    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Guard that abandons the barrier if dropped while `party` is panicking.
    pub fn panic_guard(&self, party: usize) -> PanicGuard<'_, C, F> {
        PanicGuard {
            barrier: self,
            party,
        }
    }
}

pub struct PanicGuard<'a, C, F> {
    barrier: &'a PhaseBarrier<C, F>,
    party: usize,
}

impl<C, F> Drop for PanicGuard<'_, C, F> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.barrier.abandon(self.party);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn summing_barrier(parties: usize, phases: u64) -> Arc<PhaseBarrier<u64, u64>> {
        let mut done = 0;
        Arc::new(PhaseBarrier::new(parties, Arc::new(0), move |values: Vec<u64>| {
            done += 1;
            let sum = values.iter().sum::<u64>() + done * 1000;
            if done >= phases {
                Release::Finished(Arc::new(sum))
            } else {
                Release::Continue(Arc::new(sum))
            }
        }))
    }

    #[test]
    fn test_single_party_runs_action_inline() {
        let barrier = summing_barrier(1, 2);
        assert_eq!(barrier.arrive(0, 5).unwrap().as_deref(), Some(&1005));
        assert_eq!(barrier.arrive(0, 5).unwrap(), None);
        assert_eq!(*barrier.latest(), 2005);
        assert_eq!(barrier.outcome(), Outcome::Finished);
        // Further arrivals after the end are harmless.
        assert_eq!(barrier.arrive(0, 5).unwrap(), None);
    }

    #[test]
    fn test_all_parties_see_the_same_frame() {
        let barrier = summing_barrier(4, 3);
        let handles: Vec<_> = (0..4u64)
            .map(|party| {
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let mut seen = Vec::new();
                    while let Some(frame) = barrier.arrive(party as usize, party + 1).unwrap() {
                        seen.push(*frame);
                    }
                    seen
                })
            })
            .collect();
        let results: Vec<Vec<u64>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for seen in &results {
            assert_eq!(seen, &vec![1010, 2010]);
        }
        assert_eq!(*barrier.latest(), 3010);
    }

    #[test]
    fn test_action_runs_once_per_phase() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut phase = 0;
        let barrier = Arc::new(PhaseBarrier::new(3, Arc::new(()), move |values: Vec<usize>| {
            assert_eq!(values.len(), 3);
            counter.fetch_add(1, Ordering::SeqCst);
            phase += 1;
            if phase == 5 {
                Release::Finished(Arc::new(()))
            } else {
                Release::Continue(Arc::new(()))
            }
        }));
        let handles: Vec<_> = (0..3)
            .map(|party| {
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || while barrier.arrive(party, party).unwrap().is_some() {})
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(barrier.generation(), 5);
    }

    #[test]
    fn test_failed_action_reaches_every_party() {
        let barrier: Arc<PhaseBarrier<u8, u8>> = Arc::new(PhaseBarrier::new(2, Arc::new(7), |_| {
            Release::Failed(LayoutError::invariant("bad merge"))
        }));
        let other = {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || barrier.arrive(1, 0))
        };
        let mine = barrier.arrive(0, 0);
        let theirs = other.join().unwrap();
        for result in [mine, theirs] {
            assert!(matches!(result, Err(LayoutError::ConcurrencyInvariant { .. })));
        }
        assert_eq!(*barrier.latest(), 7);
    }

    #[test]
    fn test_unknown_party_fails_the_barrier() {
        let barrier = summing_barrier(2, 10);
        assert_eq!(barrier.parties(), 2);
        let waiter = {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || barrier.arrive(0, 1))
        };
        let stray = barrier.arrive(5, 1);
        assert!(matches!(stray, Err(LayoutError::ConcurrencyInvariant { .. })));
        assert!(matches!(
            waiter.join().unwrap(),
            Err(LayoutError::ConcurrencyInvariant { .. })
        ));
        assert!(matches!(barrier.outcome(), Outcome::Failed(_)));
        assert_eq!(*barrier.latest(), 0);
    }

    #[test]
    fn test_panicking_party_does_not_deadlock() {
        let barrier = summing_barrier(2, 10);
        let waiter = {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || barrier.arrive(0, 1))
        };
        let panicker = {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let _guard = barrier.panic_guard(1);
                panic!("worker blew up");
            })
        };
        assert!(panicker.join().is_err());
        assert_eq!(
            waiter.join().unwrap(),
            Err(LayoutError::WorkerPanicked { worker: 1 })
        );
    }

    #[test]
    fn test_observer_wakes_on_release() {
        let barrier = summing_barrier(1, 3);
        assert_eq!(barrier.generation(), 0);
        let observer = {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || barrier.observe_after(0))
        };
        barrier.arrive(0, 1).unwrap();
        let observed = observer.join().unwrap();
        assert!(observed.generation >= 1);
        assert_eq!(observed.outcome, Outcome::Active);

        barrier.arrive(0, 1).unwrap();
        barrier.arrive(0, 1).unwrap();
        let end = barrier.observe_after(100);
        assert_eq!(end.outcome, Outcome::Finished);
        assert_eq!(*end.frame, 3001);
    }
}
