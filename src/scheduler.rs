//! Scheduler adapter
//!
//! The cyclic scheduler that turns the composite pattern into sound lives
//! outside this crate and is reached through the [`Cyclist`] trait. The
//! [`SchedulerAdapter`] is the only way the rest of the session talks to it:
//! it serializes pattern updates and keeps the committed composite where the
//! highlight loop can read it without locking.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use arc_swap::ArcSwapOption;
use tracing::{debug, info, trace};

use crate::error::SchedulerError;
use crate::pattern::{ControlPattern, Hap, Value};

/// Default tempo in cycles per second.
pub const DEFAULT_CPS: f64 = 0.5;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// When a triggered event should sound, relative to the scheduler's clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriggerTiming {
    /// Onset of the event in cycles.
    pub onset: f64,
    /// Seconds between the scheduling tick and the onset.
    pub deadline: f64,
    /// Length of the event in seconds at the current tempo.
    pub duration: f64,
    pub cps: f64,
}

/// Callback the audio backend runs for every scheduled event.
pub type Trigger = Arc<dyn Fn(&Hap<Value>, TriggerTiming) + Send + Sync>;

/// An external cyclic scheduler.
pub trait Cyclist: Send + Sync {
    /// Current position in cycles.
    fn now(&self) -> f64;

    fn cps(&self) -> f64;

    fn set_cps(&self, cps: f64) -> Result<(), SchedulerError>;

    /// Replace the scheduled pattern. `reset_phase` starts a stopped
    /// scheduler from cycle zero.
    fn set_pattern(
        &self,
        pattern: ControlPattern,
        reset_phase: bool,
    ) -> BoxFuture<'_, Result<(), SchedulerError>>;

    /// The per-event callback this scheduler fires.
    fn trigger(&self) -> Trigger;
}

/// Most recent composite handed to [`SchedulerAdapter::set_pattern`].
#[derive(Default)]
struct PendingPattern {
    generation: u64,
    latest: Option<(ControlPattern, bool)>,
}

pub struct SchedulerAdapter {
    cyclist: Arc<dyn Cyclist>,
    current: ArcSwapOption<ControlPattern>,
    pending: Mutex<PendingPattern>,
    /// Generation of the composite the cyclist last accepted.
    applied: tokio::sync::Mutex<u64>,
}

impl SchedulerAdapter {
    pub fn new(cyclist: Arc<dyn Cyclist>) -> Self {
        Self {
            cyclist,
            current: ArcSwapOption::empty(),
            pending: Mutex::new(PendingPattern::default()),
            applied: tokio::sync::Mutex::new(0),
        }
    }

    /// Hand a new composite to the scheduler.
    ///
    /// Calls are applied one at a time. When several calls overlap, the newest
    /// composite is the one applied; a call whose composite was superseded
    /// before it got its turn returns without touching the scheduler.
    pub async fn set_pattern(
        &self,
        pattern: ControlPattern,
        reset_phase: bool,
    ) -> Result<(), SchedulerError> {
        let generation = {
            let mut pending = self.lock_pending();
            pending.generation += 1;
            pending.latest = Some((pattern, reset_phase));
            pending.generation
        };

        let mut applied = self.applied.lock().await;
        if *applied >= generation {
            trace!(generation, "composite already superseded");
            return Ok(());
        }

        let (target, latest) = {
            let pending = self.lock_pending();
            (pending.generation, pending.latest.clone())
        };
        let Some((pattern, reset_phase)) = latest else {
            return Ok(());
        };

        self.cyclist.set_pattern(pattern.clone(), reset_phase).await?;
        *applied = target;
        self.current.store(Some(Arc::new(pattern)));
        debug!(generation = target, "scheduler pattern updated");
        Ok(())
    }

    /// Current session time in cycles.
    pub fn now(&self) -> f64 {
        self.cyclist.now()
    }

    pub fn cps(&self) -> f64 {
        self.cyclist.cps()
    }

    pub fn set_tempo(&self, cps: f64) -> Result<(), SchedulerError> {
        if !cps.is_finite() || cps <= 0.0 {
            return Err(SchedulerError::InvalidTempo(cps));
        }
        self.cyclist.set_cps(cps)?;
        info!(cps, "tempo changed");
        Ok(())
    }

    /// The composite the scheduler is currently playing, if any.
    pub fn pattern(&self) -> Option<Arc<ControlPattern>> {
        self.current.load_full()
    }

    pub fn has_pattern(&self) -> bool {
        self.current.load().is_some()
    }

    pub fn trigger(&self) -> Trigger {
        self.cyclist.trigger()
    }

    fn lock_pending(&self) -> MutexGuard<'_, PendingPattern> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct CyclistState {
    phase: f64,
    cps: f64,
    started: bool,
    pattern: Option<ControlPattern>,
}

/// Cyclic scheduler running on virtual time.
///
/// Time only moves when [`VirtualCyclist::advance`] is called; every event
/// whose onset falls inside the advanced window is passed to the trigger.
pub struct VirtualCyclist {
    state: Mutex<CyclistState>,
    trigger: Trigger,
}

impl VirtualCyclist {
    pub fn new(cps: f64, trigger: Trigger) -> Self {
        Self {
            state: Mutex::new(CyclistState {
                phase: 0.0,
                cps,
                started: false,
                pattern: None,
            }),
            trigger,
        }
    }

    /// A scheduler whose trigger does nothing.
    pub fn silent(cps: f64) -> Self {
        Self::new(cps, Arc::new(|_: &Hap<Value>, _: TriggerTiming| {}))
    }

    pub fn start(&self) {
        let mut state = self.lock_state();
        if !state.started {
            state.started = true;
            info!(phase = state.phase, "scheduler started");
        }
    }

    pub fn stop(&self) {
        let mut state = self.lock_state();
        state.started = false;
        state.phase = 0.0;
        info!("scheduler stopped");
    }

    pub fn is_started(&self) -> bool {
        self.lock_state().started
    }

    /// Jump to an absolute cycle position without triggering anything.
    pub fn seek(&self, phase: f64) {
        self.lock_state().phase = phase;
    }

    /// Move time forward by `seconds` of wall clock and fire the trigger for
    /// every onset in between. Returns the number of triggered events.
    pub fn advance(&self, seconds: f64) -> usize {
        let (begin, end, cps, pattern) = {
            let mut state = self.lock_state();
            if !state.started || seconds <= 0.0 {
                return 0;
            }
            let begin = state.phase;
            state.phase += seconds * state.cps;
            (begin, state.phase, state.cps, state.pattern.clone())
        };

        let Some(pattern) = pattern else {
            return 0;
        };

        let mut fired = 0;
        for hap in pattern.query_arc(begin, end) {
            let Some(whole) = hap.whole.filter(|_| hap.has_onset()) else {
                continue;
            };
            let onset = whole.begin.to_float();
            let timing = TriggerTiming {
                onset,
                deadline: (onset - begin) / cps,
                duration: whole.duration().to_float() / cps,
                cps,
            };
            (self.trigger)(&hap, timing);
            fired += 1;
        }
        fired
    }

    fn lock_state(&self) -> MutexGuard<'_, CyclistState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Cyclist for VirtualCyclist {
    fn now(&self) -> f64 {
        self.lock_state().phase
    }

    fn cps(&self) -> f64 {
        self.lock_state().cps
    }

    fn set_cps(&self, cps: f64) -> Result<(), SchedulerError> {
        if !cps.is_finite() || cps <= 0.0 {
            return Err(SchedulerError::InvalidTempo(cps));
        }
        self.lock_state().cps = cps;
        Ok(())
    }

    fn set_pattern(
        &self,
        pattern: ControlPattern,
        reset_phase: bool,
    ) -> BoxFuture<'_, Result<(), SchedulerError>> {
        let mut state = self.lock_state();
        state.pattern = Some(pattern);
        if reset_phase && !state.started {
            state.phase = 0.0;
            state.started = true;
            info!("scheduler started");
        }
        Box::pin(std::future::ready(Ok(())))
    }

    fn trigger(&self) -> Trigger {
        self.trigger.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::Pattern;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Rejects every pattern after the first `accept` calls.
    struct FlakyCyclist {
        accept: usize,
        calls: AtomicUsize,
    }

    impl Cyclist for FlakyCyclist {
        fn now(&self) -> f64 {
            0.0
        }

        fn cps(&self) -> f64 {
            DEFAULT_CPS
        }

        fn set_cps(&self, _cps: f64) -> Result<(), SchedulerError> {
            Ok(())
        }

        fn set_pattern(
            &self,
            _pattern: ControlPattern,
            _reset_phase: bool,
        ) -> BoxFuture<'_, Result<(), SchedulerError>> {
            Box::pin(async move {
                if self.calls.fetch_add(1, Ordering::SeqCst) < self.accept {
                    Ok(())
                } else {
                    Err(SchedulerError::Rejected("audio context closed".to_string()))
                }
            })
        }

        fn trigger(&self) -> Trigger {
            Arc::new(|_: &Hap<Value>, _: TriggerTiming| {})
        }
    }

    #[tokio::test]
    async fn test_set_pattern_commits_composite() {
        let cyclist = Arc::new(VirtualCyclist::silent(DEFAULT_CPS));
        let adapter = SchedulerAdapter::new(cyclist.clone());
        assert!(!adapter.has_pattern());

        adapter
            .set_pattern(Pattern::pure(json!({ "s": "bd" })), true)
            .await
            .unwrap();

        assert!(adapter.has_pattern());
        assert!(cyclist.is_started());
        assert_eq!(adapter.pattern().unwrap().query_arc(0.0, 1.0).len(), 1);
    }

    #[tokio::test]
    async fn test_latest_overlapping_pattern_wins() {
        let cyclist = Arc::new(VirtualCyclist::silent(DEFAULT_CPS));
        let adapter = Arc::new(SchedulerAdapter::new(cyclist));

        let first = adapter.set_pattern(Pattern::pure(json!({ "s": "bd" })), true);
        let second = adapter.set_pattern(Pattern::pure(json!({ "s": "sn" })), true);
        let (a, b) = tokio::join!(first, second);
        a.unwrap();
        b.unwrap();

        let haps = adapter.pattern().unwrap().query_arc(0.0, 1.0);
        assert_eq!(haps.len(), 1);
        assert_eq!(haps[0].value["s"], "sn");
    }

    #[tokio::test]
    async fn test_scheduler_errors_reach_the_caller() {
        let adapter = SchedulerAdapter::new(Arc::new(FlakyCyclist {
            accept: 1,
            calls: AtomicUsize::new(0),
        }));

        adapter.set_pattern(Pattern::pure(json!(1)), false).await.unwrap();
        let err = adapter
            .set_pattern(Pattern::pure(json!(2)), false)
            .await
            .unwrap_err();

        assert!(matches!(err, SchedulerError::Rejected(_)));
        // the previously accepted composite stays current
        let haps = adapter.pattern().unwrap().query_arc(0.0, 1.0);
        assert_eq!(haps[0].value, json!(1));
    }

    #[test]
    fn test_set_tempo_rejects_nonsense() {
        let adapter = SchedulerAdapter::new(Arc::new(VirtualCyclist::silent(DEFAULT_CPS)));
        assert_eq!(adapter.set_tempo(0.0), Err(SchedulerError::InvalidTempo(0.0)));
        adapter.set_tempo(1.0).unwrap();
        assert_eq!(adapter.cps(), 1.0);
    }

    #[tokio::test]
    async fn test_virtual_cyclist_triggers_onsets() {
        let onsets = Arc::new(Mutex::new(Vec::new()));
        let recorder = onsets.clone();
        let cyclist = VirtualCyclist::new(
            1.0,
            Arc::new(move |hap: &Hap<Value>, timing: TriggerTiming| {
                recorder
                    .lock()
                    .unwrap()
                    .push((hap.value["s"].as_str().unwrap_or("").to_string(), timing.onset));
            }),
        );

        // not started yet: time stands still
        assert_eq!(cyclist.advance(1.0), 0);
        assert_eq!(cyclist.now(), 0.0);

        cyclist
            .set_pattern(Pattern::sequence(vec![json!({ "s": "bd" }), json!({ "s": "sn" })]), true)
            .await
            .unwrap();

        assert_eq!(cyclist.advance(0.75), 2);
        assert_eq!(cyclist.now(), 0.75);
        // sn's fragment in [0.75, 1.0) was already triggered at its onset
        assert_eq!(cyclist.advance(0.25), 0);
        assert_eq!(cyclist.advance(0.5), 1);

        let onsets = onsets.lock().unwrap();
        assert_eq!(
            *onsets,
            vec![
                ("bd".to_string(), 0.0),
                ("sn".to_string(), 0.5),
                ("bd".to_string(), 1.0)
            ]
        );
    }
}
