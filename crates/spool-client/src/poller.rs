//! Change detection by polling the pull endpoint.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use spool_core::{ContentEvent, ContentEventKind, ContentUpdate, Fingerprint};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::handler::ChangeHandler;
use crate::pull::UpdateSource;

/// Observable state of a consumer.
///
/// `Unchanged` and `Changed` report the last sweep and stay in place while
/// the poller waits for its next tick; that wait is the idle phase between
/// polls. `Idle` proper means no sweep result is held: nothing polled yet,
/// the last fetch failed, or the poller stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConsumerState {
    /// Not polled yet, the last fetch failed, or stopped
    #[default]
    Idle,
    /// A fetch or sweep is in flight
    Polling,
    /// The last sweep found nothing new
    Unchanged,
    /// The last sweep handled at least one change
    Changed,
}

/// Counts from one sweep over a pull response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SweepOutcome {
    /// First sweep; fingerprints recorded without notifying
    pub seeded: bool,
    pub changed: usize,
    pub failed: usize,
}

#[derive(Default)]
struct TrackerState {
    seeded: bool,
    fingerprints: HashMap<String, Fingerprint>,
}

/// Last-seen fingerprints keyed by item id.
#[derive(Default)]
pub struct ChangeTracker {
    state: Mutex<TrackerState>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare a pull response with the cache and hand every change to
    /// `handler`. A fingerprint is stored only after its handler succeeded,
    /// so failed items come back on the next sweep. Items missing from
    /// `updates` are dropped, keeping the cache as large as the pull window.
    pub async fn sweep<H: ChangeHandler>(
        &self,
        updates: &[ContentUpdate],
        handler: &H,
    ) -> SweepOutcome {
        let mut state = self.state.lock().await;
        let mut outcome = SweepOutcome::default();

        if !state.seeded {
            for update in updates {
                state
                    .fingerprints
                    .insert(update.item_id.clone(), Fingerprint::of_update(update));
            }
            state.seeded = true;
            outcome.seeded = true;
            tracing::debug!(items = updates.len(), "Seeded fingerprint cache");
            return outcome;
        }

        for update in updates {
            let fingerprint = Fingerprint::of_update(update);
            let kind = match state.fingerprints.get(&update.item_id) {
                Some(previous) if *previous == fingerprint => continue,
                Some(_) => ContentEventKind::Updated,
                None => ContentEventKind::Created,
            };

            let event = ContentEvent {
                event: kind,
                collection: update.collection.clone(),
                slug: update.slug.clone(),
                item_id: update.item_id.clone(),
            };
            match handler.handle(&event).await {
                Ok(()) => {
                    state.fingerprints.insert(update.item_id.clone(), fingerprint);
                    outcome.changed += 1;
                }
                Err(error) => {
                    tracing::warn!(
                        item = %update.item_id,
                        event = %kind,
                        %error,
                        "Change handler failed; will retry next poll"
                    );
                    outcome.failed += 1;
                }
            }
        }

        let current: HashSet<&str> = updates
            .iter()
            .map(|update| update.item_id.as_str())
            .collect();
        state
            .fingerprints
            .retain(|item_id, _| current.contains(item_id.as_str()));

        outcome
    }

    pub async fn fingerprint(&self, item_id: &str) -> Option<Fingerprint> {
        self.state.lock().await.fingerprints.get(item_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.fingerprints.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Running poller. Dropping the handle stops the loop as well.
pub struct PollerHandle {
    shutdown: watch::Sender<bool>,
    state: watch::Receiver<ConsumerState>,
    tracker: Arc<ChangeTracker>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    /// Receiver for state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ConsumerState> {
        self.state.clone()
    }

    pub fn tracker(&self) -> &Arc<ChangeTracker> {
        &self.tracker
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop polling and wait for the loop to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(error) = self.task.await {
            tracing::error!(%error, "Poller task failed");
        }
    }
}

/// Shortest accepted poll interval; anything below is raised to it.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Poll `source` every `interval`, one fetch at a time, until shut down.
///
/// The first poll runs immediately and only seeds the cache.
pub fn spawn_poller<S, H>(source: S, handler: Arc<H>, interval: Duration) -> PollerHandle
where
    S: UpdateSource,
    H: ChangeHandler,
{
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let (state_tx, state_rx) = watch::channel(ConsumerState::Idle);
    let tracker = Arc::new(ChangeTracker::new());
    let loop_tracker = Arc::clone(&tracker);
    if interval < MIN_POLL_INTERVAL {
        tracing::warn!(
            requested_ms = interval.as_millis(),
            "Poll interval below minimum; using {}ms",
            MIN_POLL_INTERVAL.as_millis()
        );
    }
    let interval = interval.max(MIN_POLL_INTERVAL);

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => break,
                _ = ticker.tick() => {}
            }

            state_tx.send_replace(ConsumerState::Polling);
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => break,
                next = poll_once(&source, &loop_tracker, handler.as_ref()) => {
                    state_tx.send_replace(next);
                }
            }
        }

        state_tx.send_replace(ConsumerState::Idle);
        tracing::debug!("Poller stopped");
    });

    PollerHandle {
        shutdown: shutdown_tx,
        state: state_rx,
        tracker,
        task,
    }
}

async fn poll_once<S: UpdateSource, H: ChangeHandler>(
    source: &S,
    tracker: &ChangeTracker,
    handler: &H,
) -> ConsumerState {
    match source.fetch_updates().await {
        Ok(updates) => {
            let outcome = tracker.sweep(&updates.items, handler).await;
            if outcome.changed > 0 {
                tracing::info!(
                    changed = outcome.changed,
                    failed = outcome.failed,
                    "Detected content changes"
                );
                ConsumerState::Changed
            } else {
                ConsumerState::Unchanged
            }
        }
        Err(error) => {
            tracing::warn!(%error, retryable = error.is_retryable(), "Content poll failed");
            ConsumerState::Idle
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::error::ClientError;
    use crate::handler::HandlerError;
    use crate::pull::ContentUpdates;

    fn update(item_id: &str, title: &str, updated_at: i64) -> ContentUpdate {
        ContentUpdate {
            item_id: item_id.to_string(),
            slug: item_id.to_string(),
            title: title.to_string(),
            collection: "posts".to_string(),
            updated_at,
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: StdMutex<Vec<(ContentEventKind, String)>>,
        failing: StdMutex<Vec<String>>,
    }

    impl ChangeHandler for Recorder {
        async fn handle(&self, event: &ContentEvent) -> Result<(), HandlerError> {
            if self.failing.lock().unwrap().contains(&event.item_id) {
                return Err(HandlerError::new("boom"));
            }
            self.events
                .lock()
                .unwrap()
                .push((event.event, event.item_id.clone()));
            Ok(())
        }
    }

    /// Serves scripted responses, repeating the last one.
    struct ScriptedSource {
        responses: StdMutex<VecDeque<Result<Vec<ContentUpdate>, ()>>>,
        last: StdMutex<Vec<ContentUpdate>>,
    }

    impl ScriptedSource {
        fn new(responses: Vec<Result<Vec<ContentUpdate>, ()>>) -> Self {
            Self {
                responses: StdMutex::new(responses.into()),
                last: StdMutex::new(Vec::new()),
            }
        }
    }

    impl UpdateSource for ScriptedSource {
        async fn fetch_updates(&self) -> Result<ContentUpdates, ClientError> {
            let next = self.responses.lock().unwrap().pop_front();
            let items = match next {
                Some(Ok(items)) => {
                    self.last.lock().unwrap().clone_from(&items);
                    items
                }
                Some(Err(())) => return Err(ClientError::Http("connection refused".into())),
                None => self.last.lock().unwrap().clone(),
            };
            Ok(ContentUpdates {
                items,
                timestamp: 0,
            })
        }
    }

    #[tokio::test]
    async fn first_sweep_only_seeds() {
        let tracker = ChangeTracker::new();
        let recorder = Recorder::default();

        let outcome = tracker
            .sweep(&[update("a", "A", 1), update("b", "B", 1)], &recorder)
            .await;

        assert!(outcome.seeded);
        assert_eq!(tracker.len().await, 2);
        assert!(recorder.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn changed_and_new_items_are_reported() {
        let tracker = ChangeTracker::new();
        let recorder = Recorder::default();
        tracker.sweep(&[update("a", "A", 1)], &recorder).await;

        let outcome = tracker
            .sweep(&[update("a", "A", 2), update("b", "B", 1)], &recorder)
            .await;
        assert_eq!(
            outcome,
            SweepOutcome {
                seeded: false,
                changed: 2,
                failed: 0
            }
        );
        assert_eq!(
            *recorder.events.lock().unwrap(),
            vec![
                (ContentEventKind::Updated, "a".to_string()),
                (ContentEventKind::Created, "b".to_string()),
            ]
        );

        let quiet = tracker
            .sweep(&[update("a", "A", 2), update("b", "B", 1)], &recorder)
            .await;
        assert_eq!(quiet.changed, 0);
    }

    #[tokio::test]
    async fn failed_items_are_retried_next_sweep() {
        let tracker = ChangeTracker::new();
        let recorder = Recorder::default();
        tracker.sweep(&[update("a", "A", 1)], &recorder).await;
        recorder.failing.lock().unwrap().push("a".to_string());

        let changed = [update("a", "A2", 2)];
        let failed = tracker.sweep(&changed, &recorder).await;
        assert_eq!(failed.failed, 1);
        assert_eq!(
            tracker.fingerprint("a").await,
            Some(Fingerprint::of_update(&update("a", "A", 1)))
        );

        recorder.failing.lock().unwrap().clear();
        let retried = tracker.sweep(&changed, &recorder).await;
        assert_eq!(retried.changed, 1);
        assert_eq!(
            tracker.fingerprint("a").await,
            Some(Fingerprint::of_update(&changed[0]))
        );
    }

    #[tokio::test]
    async fn items_leaving_the_window_are_forgotten() {
        let tracker = ChangeTracker::new();
        let recorder = Recorder::default();
        tracker
            .sweep(&[update("a", "A", 1), update("b", "B", 1)], &recorder)
            .await;

        tracker
            .sweep(&[update("b", "B", 1), update("c", "C", 1)], &recorder)
            .await;
        assert_eq!(tracker.len().await, 2);
        assert_eq!(tracker.fingerprint("a").await, None);

        for round in 0..20 {
            let window: Vec<_> = (0..10)
                .map(|index| update(&format!("item-{round}-{index}"), "T", 1))
                .collect();
            tracker.sweep(&window, &recorder).await;
            assert_eq!(tracker.len().await, 10);
        }
    }

    #[tokio::test]
    async fn failed_items_survive_pruning() {
        let tracker = ChangeTracker::new();
        let recorder = Recorder::default();
        tracker.sweep(&[update("a", "A", 1)], &recorder).await;
        recorder.failing.lock().unwrap().push("a".to_string());

        tracker.sweep(&[update("a", "A", 2)], &recorder).await;
        assert_eq!(
            tracker.fingerprint("a").await,
            Some(Fingerprint::of_update(&update("a", "A", 1)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn outcome_holds_until_next_tick_and_failures_go_idle() {
        let source = ScriptedSource::new(vec![Ok(vec![update("a", "A", 1)]), Err(())]);
        let handle = spawn_poller(
            source,
            Arc::new(Recorder::default()),
            Duration::from_secs(60),
        );
        let mut states = handle.subscribe();

        states
            .wait_for(|state| *state == ConsumerState::Unchanged)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(handle.state(), ConsumerState::Unchanged);

        // Second tick hits the scripted error
        states
            .wait_for(|state| *state == ConsumerState::Idle)
            .await
            .unwrap();
        assert_eq!(handle.tracker().len().await, 1);

        handle.shutdown().await;
        assert_eq!(*states.borrow(), ConsumerState::Idle);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn zero_interval_is_raised_to_the_minimum() {
        let source = ScriptedSource::new(vec![Ok(vec![update("a", "A", 1)])]);
        let handle = spawn_poller(source, Arc::new(Recorder::default()), Duration::ZERO);

        tokio::time::timeout(Duration::from_secs(5), async {
            while handle.tracker().is_empty().await {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("poller never seeded");
        assert!(!handle.is_finished());

        handle.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn poller_detects_changes_and_shuts_down() {
        let source = ScriptedSource::new(vec![
            Ok(vec![update("a", "A", 1)]),
            Err(()),
            Ok(vec![update("a", "A", 2)]),
        ]);
        let recorder = Arc::new(Recorder::default());
        let handle = spawn_poller(source, Arc::clone(&recorder), Duration::from_millis(10));

        tokio::time::timeout(Duration::from_secs(5), async {
            while recorder.events.lock().unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("poller never reported a change");

        // Later polls see the same fingerprint again
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            *recorder.events.lock().unwrap(),
            vec![(ContentEventKind::Updated, "a".to_string())]
        );

        handle.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn dropping_the_handle_stops_the_loop() {
        let source = ScriptedSource::new(vec![Ok(Vec::new())]);
        let handle = spawn_poller(
            source,
            Arc::new(Recorder::default()),
            Duration::from_millis(10),
        );
        let mut states = handle.subscribe();
        drop(handle);

        // The state sender goes away with the task
        tokio::time::timeout(Duration::from_secs(5), async {
            while states.changed().await.is_ok() {}
        })
        .await
        .expect("poller kept running");
    }
}
