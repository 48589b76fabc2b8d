//! Decision overlay controller (content side of a tab).
//!
//! ## State Transitions
//!
//! ```text
//! Hidden -> Pending -> Shown -> Resolved -> Hidden
//!              \-> Hidden (not eligible, status unknown, or navigated away)
//! ```
//!
//! A new video id in the tab starts a session: wait for the page to
//! settle, ask the background whether to prompt, then count down while the
//! user picks count, bank or skip. The session holds a oneshot sender as
//! its decision guard; whichever of the clicks or the timeout takes it
//! first is the only resolution that happens.
//!
//! Navigating to another video (or off the watch page) cancels the session
//! and waits for its teardown before the new URL is looked at, so no timer
//! or input listener outlives its video.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::events::{Event, Resolution};
use crate::messaging::{Background, Request, UNKNOWN_TITLE};
use crate::navigation::{extract_video_id, is_watch_url};
use crate::storage::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Count,
    Bank,
    Skip,
}

impl Decision {
    /// Keyboard shortcut: Y counts, B banks, N skips.
    pub fn from_key(key: char) -> Option<Self> {
        match key.to_ascii_lowercase() {
            'y' => Some(Decision::Count),
            'b' => Some(Decision::Bank),
            'n' => Some(Decision::Skip),
            _ => None,
        }
    }
}

/// What the page renders when the overlay appears.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OverlayView {
    pub video_id: String,
    pub title: String,
    pub current_count: usize,
    pub daily_limit: usize,
    pub bank_count: usize,
    pub bank_capacity: usize,
    /// False once the bank is full; the bank button is greyed out.
    pub bank_enabled: bool,
    pub countdown_secs: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverlayPhase {
    Hidden,
    Pending { video_id: String },
    Shown { video_id: String, remaining: u32 },
    Resolved { video_id: String },
}

/// The page the controller draws on.
pub trait Page: Send + Sync {
    /// URL the page currently shows, if known.
    fn url(&self) -> Option<String>;

    /// Title of the video currently on the page, if it has rendered.
    fn title(&self) -> Option<String>;

    /// Insert the overlay and attach its button and key listeners.
    fn render(&self, view: &OverlayView);

    fn countdown(&self, remaining: u32);

    fn detach_input(&self);

    fn play_exit_animation(&self);

    /// Remove the overlay element.
    fn remove(&self);

    fn navigate(&self, url: &str);
}

#[derive(Debug)]
struct SessionInput {
    decision: Option<oneshot::Sender<Decision>>,
    shown: bool,
    bank_enabled: bool,
}

struct Session {
    generation: u64,
    video_id: String,
    cancel: CancellationToken,
    input: Arc<Mutex<SessionInput>>,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct ControllerState {
    last_url: Option<String>,
    current_video: Option<String>,
    next_generation: u64,
    session: Option<Session>,
}

struct Shared {
    page: Arc<dyn Page>,
    background: Background,
    countdown_secs: u32,
    debounce: Duration,
    exit_animation: Duration,
    home_url: String,
    host: String,
    state: Mutex<ControllerState>,
    phase: watch::Sender<OverlayPhase>,
    events: broadcast::Sender<Event>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Shared {
    fn emit(&self, event: Event) {
        let _ = self.events.send(event);
    }

    fn set_phase(&self, phase: OverlayPhase) {
        self.phase.send_replace(phase);
    }

    /// End of a session: back to Hidden and forget it if still current.
    fn finish(&self, generation: u64) {
        let mut state = lock(&self.state);
        if state.session.as_ref().map(|s| s.generation) == Some(generation) {
            state.session = None;
        }
        self.set_phase(OverlayPhase::Hidden);
    }

    fn close_input(input: &Mutex<SessionInput>) {
        let mut input = lock(input);
        input.decision = None;
        input.shown = false;
    }
}

#[derive(Clone)]
pub struct OverlayController {
    shared: Arc<Shared>,
}

impl OverlayController {
    pub fn new(page: Arc<dyn Page>, background: Background, config: &Config) -> Self {
        let (phase, _) = watch::channel(OverlayPhase::Hidden);
        let (events, _) = broadcast::channel(64);
        Self {
            shared: Arc::new(Shared {
                page,
                background,
                countdown_secs: config.overlay.countdown_secs,
                debounce: config.overlay.debounce(),
                exit_animation: config.overlay.exit_animation(),
                home_url: config.navigation.home_url.clone(),
                host: config.navigation.host.clone(),
                state: Mutex::new(ControllerState::default()),
                phase,
                events,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.shared.events.subscribe()
    }

    pub fn phase(&self) -> OverlayPhase {
        self.shared.phase.borrow().clone()
    }

    pub fn watch_phase(&self) -> watch::Receiver<OverlayPhase> {
        self.shared.phase.subscribe()
    }

    /// The tab's URL changed (initial load or in-page navigation).
    pub async fn on_url_change(&self, url: &str) {
        let video_id = if is_watch_url(url, &self.shared.host) {
            extract_video_id(url).ok()
        } else {
            None
        };

        let stale = {
            let mut state = lock(&self.shared.state);
            if state.last_url.as_deref() == Some(url) {
                return;
            }
            state.last_url = Some(url.to_string());
            match &state.session {
                Some(s) if video_id.as_deref() != Some(s.video_id.as_str()) => state.session.take(),
                _ => None,
            }
        };

        if let Some(old) = stale {
            tracing::debug!(video_id = %old.video_id, "navigated away, cancelling overlay");
            old.cancel.cancel();
            let _ = old.task.await;
        }

        let mut state = lock(&self.shared.state);
        let Some(video_id) = video_id else {
            state.current_video = None;
            return;
        };
        if state.current_video.as_deref() == Some(video_id.as_str()) {
            return;
        }
        state.current_video = Some(video_id.clone());

        let generation = state.next_generation;
        state.next_generation += 1;

        let (tx, rx) = oneshot::channel();
        let input = Arc::new(Mutex::new(SessionInput {
            decision: Some(tx),
            shown: false,
            bank_enabled: false,
        }));
        let cancel = CancellationToken::new();

        self.shared.set_phase(OverlayPhase::Pending {
            video_id: video_id.clone(),
        });
        let task = tokio::spawn(run_session(
            Arc::clone(&self.shared),
            generation,
            video_id.clone(),
            cancel.clone(),
            Arc::clone(&input),
            rx,
        ));
        state.session = Some(Session {
            generation,
            video_id,
            cancel,
            input,
            task,
        });
    }

    /// User picked an action. Returns whether it was taken; later picks,
    /// picks with no overlay shown and a bank pick on a full bank are not.
    pub fn decide(&self, decision: Decision) -> bool {
        let input = {
            let state = lock(&self.shared.state);
            match &state.session {
                Some(s) => Arc::clone(&s.input),
                None => return false,
            }
        };

        let mut input = lock(&input);
        if !input.shown {
            return false;
        }
        if decision == Decision::Bank && !input.bank_enabled {
            tracing::debug!("bank is full, ignoring bank action");
            return false;
        }
        match input.decision.take() {
            Some(tx) => tx.send(decision).is_ok(),
            None => false,
        }
    }

    pub fn on_key(&self, key: char) -> bool {
        Decision::from_key(key).is_some_and(|d| self.decide(d))
    }

    /// Cancel whatever is pending and wait for its teardown.
    pub async fn shutdown(&self) {
        let session = lock(&self.shared.state).session.take();
        if let Some(session) = session {
            session.cancel.cancel();
            let _ = session.task.await;
        }
    }
}

async fn run_session(
    shared: Arc<Shared>,
    generation: u64,
    video_id: String,
    cancel: CancellationToken,
    input: Arc<Mutex<SessionInput>>,
    mut decisions: oneshot::Receiver<Decision>,
) {
    tokio::select! {
        _ = cancel.cancelled() => {
            shared.finish(generation);
            return;
        }
        _ = tokio::time::sleep(shared.debounce) => {}
    }

    // Dropping the query on cancel discards a status that arrives for a
    // video the tab has already left.
    let status = tokio::select! {
        _ = cancel.cancelled() => {
            shared.finish(generation);
            return;
        }
        status = shared.background.handle(Request::CheckVideoStatus {
            video_id: video_id.clone(),
        }) => status,
    };

    let moved_on = shared
        .page
        .url()
        .and_then(|url| extract_video_id(&url).ok())
        .is_some_and(|current| current != video_id);
    if moved_on {
        tracing::debug!(video_id = %video_id, "page moved on, dropping status");
        shared.finish(generation);
        return;
    }

    if !status.shows_overlay() {
        tracing::debug!(video_id = %video_id, reason = ?status.reason, "no overlay");
        shared.finish(generation);
        return;
    }

    let limits = shared.background.engine().limits().clone();
    let title = shared
        .page
        .title()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| UNKNOWN_TITLE.to_string());
    let view = OverlayView {
        video_id: video_id.clone(),
        title: title.clone(),
        current_count: status.current_count.unwrap_or(0),
        daily_limit: limits.daily_limit,
        bank_count: status.bank_count.unwrap_or(0),
        bank_capacity: limits.bank_capacity,
        bank_enabled: status.bank_remaining.unwrap_or(0) > 0,
        countdown_secs: shared.countdown_secs,
    };

    {
        let mut input = lock(&input);
        input.shown = true;
        input.bank_enabled = view.bank_enabled;
    }
    shared.page.render(&view);
    shared.set_phase(OverlayPhase::Shown {
        video_id: video_id.clone(),
        remaining: view.countdown_secs,
    });
    shared.emit(Event::OverlayShown {
        video_id: video_id.clone(),
        title: title.clone(),
        current_count: view.current_count,
        bank_count: view.bank_count,
        bank_enabled: view.bank_enabled,
        countdown_secs: view.countdown_secs,
        at: Utc::now(),
    });
    tracing::info!(video_id = %video_id, title = %title, "overlay shown");

    let mut remaining = view.countdown_secs;
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.tick().await;

    let (decision, timed_out) = loop {
        tokio::select! {
            biased;
            picked = &mut decisions => match picked {
                Ok(decision) => break (decision, false),
                Err(_) => break (Decision::Skip, true),
            },
            _ = cancel.cancelled() => {
                Shared::close_input(&input);
                shared.page.detach_input();
                shared.page.remove();
                shared.emit(Event::OverlayDiscarded {
                    video_id: video_id.clone(),
                    at: Utc::now(),
                });
                shared.finish(generation);
                return;
            }
            _ = ticker.tick() => {
                remaining = remaining.saturating_sub(1);
                shared.page.countdown(remaining);
                shared.set_phase(OverlayPhase::Shown {
                    video_id: video_id.clone(),
                    remaining,
                });
                shared.emit(Event::CountdownTick {
                    video_id: video_id.clone(),
                    remaining,
                    at: Utc::now(),
                });
                if remaining == 0 && lock(&input).decision.take().is_some() {
                    break (Decision::Skip, true);
                }
                // Otherwise a click took the guard first; its decision is
                // already waiting in `decisions`.
            }
        }
    };

    Shared::close_input(&input);
    shared.set_phase(OverlayPhase::Resolved {
        video_id: video_id.clone(),
    });
    shared.page.detach_input();

    let resolution = match decision {
        Decision::Count => Resolution::Counted {
            response: shared
                .background
                .handle(Request::AddVideoToCount {
                    video_id: video_id.clone(),
                    video_title: title,
                })
                .await,
        },
        Decision::Bank => Resolution::Banked {
            response: shared
                .background
                .handle(Request::AddVideoToBank {
                    video_id: video_id.clone(),
                    video_title: title,
                })
                .await,
        },
        Decision::Skip => Resolution::Skipped { timed_out },
    };
    tracing::info!(video_id = %video_id, ?decision, timed_out, "overlay resolved");
    shared.emit(Event::OverlayResolved {
        video_id,
        resolution,
        at: Utc::now(),
    });

    if decision == Decision::Skip {
        shared.page.remove();
        shared.page.navigate(&shared.home_url);
    } else {
        shared.page.play_exit_animation();
        tokio::time::sleep(shared.exit_animation).await;
        shared.page.remove();
    }
    shared.finish(generation);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::LimitEngine;
    use crate::reset::FixedClock;
    use crate::storage::{MemoryBackend, Store};
    use chrono::NaiveDate;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Render(OverlayView),
        Countdown(u32),
        DetachInput,
        ExitAnimation,
        Remove,
        Navigate(String),
    }

    #[derive(Default)]
    struct RecordingPage {
        calls: Mutex<Vec<Call>>,
    }

    impl RecordingPage {
        fn calls(&self) -> Vec<Call> {
            lock(&self.calls).clone()
        }

        fn push(&self, call: Call) {
            lock(&self.calls).push(call);
        }
    }

    impl Page for RecordingPage {
        fn url(&self) -> Option<String> {
            None
        }
        fn title(&self) -> Option<String> {
            Some("A video".into())
        }
        fn render(&self, view: &OverlayView) {
            self.push(Call::Render(view.clone()));
        }
        fn countdown(&self, remaining: u32) {
            self.push(Call::Countdown(remaining));
        }
        fn detach_input(&self) {
            self.push(Call::DetachInput);
        }
        fn play_exit_animation(&self) {
            self.push(Call::ExitAnimation);
        }
        fn remove(&self) {
            self.push(Call::Remove);
        }
        fn navigate(&self, url: &str) {
            self.push(Call::Navigate(url.to_string()));
        }
    }

    fn watch(id: &str) -> String {
        format!("https://www.youtube.com/watch?v={id}")
    }

    fn setup() -> (OverlayController, Arc<RecordingPage>, LimitEngine) {
        let clock = FixedClock::new(NaiveDate::from_ymd_opt(2024, 8, 1).unwrap());
        let config = Config::default();
        let engine = LimitEngine::new(
            Store::new(MemoryBackend::new()),
            Arc::new(clock),
            config.limits.clone(),
        );
        let page = Arc::new(RecordingPage::default());
        let controller = OverlayController::new(page.clone(), Background::new(engine.clone()), &config);
        (controller, page, engine)
    }

    async fn next_event(rx: &mut broadcast::Receiver<Event>, pred: impl Fn(&Event) -> bool) -> Event {
        loop {
            let event = rx.recv().await.unwrap();
            if pred(&event) {
                return event;
            }
        }
    }

    fn is_shown(e: &Event) -> bool {
        matches!(e, Event::OverlayShown { .. })
    }

    fn is_resolved(e: &Event) -> bool {
        matches!(e, Event::OverlayResolved { .. })
    }

    async fn wait_hidden(controller: &OverlayController) {
        let mut phase = controller.watch_phase();
        phase.wait_for(|p| *p == OverlayPhase::Hidden).await.unwrap();
    }

    #[test]
    fn keys_map_to_decisions() {
        assert_eq!(Decision::from_key('Y'), Some(Decision::Count));
        assert_eq!(Decision::from_key('b'), Some(Decision::Bank));
        assert_eq!(Decision::from_key('n'), Some(Decision::Skip));
        assert_eq!(Decision::from_key('x'), None);
    }

    #[tokio::test(start_paused = true)]
    async fn count_records_and_tears_down() {
        let (controller, page, engine) = setup();
        let mut rx = controller.subscribe();

        controller.on_url_change(&watch("V1")).await;
        assert_eq!(controller.phase(), OverlayPhase::Pending { video_id: "V1".into() });

        next_event(&mut rx, is_shown).await;
        assert!(controller.decide(Decision::Count));
        assert!(!controller.decide(Decision::Skip));

        let event = next_event(&mut rx, is_resolved).await;
        match event {
            Event::OverlayResolved { resolution: Resolution::Counted { response }, .. } => {
                assert!(response.is_success());
            }
            other => panic!("unexpected {other:?}"),
        }
        wait_hidden(&controller).await;

        let watched = engine.store().watched().await.unwrap();
        assert_eq!(watched.len(), 1);
        assert_eq!(watched[0].title, "A video");

        let calls = page.calls();
        assert!(matches!(calls[0], Call::Render(ref v) if v.current_count == 0 && v.bank_enabled));
        assert_eq!(
            &calls[calls.len() - 3..],
            &[Call::DetachInput, Call::ExitAnimation, Call::Remove]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_skips_after_ten_ticks() {
        let (controller, page, engine) = setup();
        let mut rx = controller.subscribe();

        controller.on_url_change(&watch("V2")).await;
        let event = next_event(&mut rx, is_resolved).await;
        assert!(matches!(
            event,
            Event::OverlayResolved { resolution: Resolution::Skipped { timed_out: true }, .. }
        ));
        wait_hidden(&controller).await;

        let ticks: Vec<u32> = page
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Countdown(n) => Some(n),
                _ => None,
            })
            .collect();
        assert_eq!(ticks, (0..10).rev().collect::<Vec<_>>());
        assert_eq!(
            page.calls().last(),
            Some(&Call::Navigate("https://www.youtube.com".into()))
        );
        assert!(engine.store().watched().await.unwrap().is_empty());
        assert!(!controller.decide(Decision::Count));
    }

    #[tokio::test(start_paused = true)]
    async fn full_bank_rejects_bank_action() {
        let (controller, _page, engine) = setup();
        for id in ["X", "Y", "Z"] {
            engine.record_banked(id, id).await.unwrap();
        }
        let mut rx = controller.subscribe();

        controller.on_url_change(&watch("W")).await;
        let shown = next_event(&mut rx, is_shown).await;
        assert!(matches!(shown, Event::OverlayShown { bank_enabled: false, bank_count: 3, .. }));

        assert!(!controller.decide(Decision::Bank));
        assert!(controller.on_key('n'));
        next_event(&mut rx, is_resolved).await;
        assert_eq!(engine.store().bank().await.unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn bank_action_banks() {
        let (controller, _page, engine) = setup();
        let mut rx = controller.subscribe();

        controller.on_url_change(&watch("B1")).await;
        next_event(&mut rx, is_shown).await;
        assert!(controller.on_key('B'));
        next_event(&mut rx, is_resolved).await;

        assert_eq!(engine.store().bank().await.unwrap()[0].id, "B1");
        assert!(engine.store().watched().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn ineligible_video_stays_hidden() {
        let (controller, page, engine) = setup();
        engine.record_watched("SEEN", "seen").await.unwrap();

        controller.on_url_change(&watch("SEEN")).await;
        wait_hidden(&controller).await;
        assert!(page.calls().is_empty());
        assert!(!controller.decide(Decision::Count));
    }

    #[tokio::test(start_paused = true)]
    async fn navigating_away_discards_overlay() {
        let (controller, page, engine) = setup();
        let mut rx = controller.subscribe();

        controller.on_url_change(&watch("OLD")).await;
        next_event(&mut rx, is_shown).await;

        controller.on_url_change(&watch("NEW")).await;
        let discarded = next_event(&mut rx, |e| matches!(e, Event::OverlayDiscarded { .. })).await;
        assert!(matches!(discarded, Event::OverlayDiscarded { ref video_id, .. } if video_id == "OLD"));
        assert_eq!(controller.phase(), OverlayPhase::Pending { video_id: "NEW".into() });

        let calls = page.calls();
        assert_eq!(&calls[calls.len() - 2..], &[Call::DetachInput, Call::Remove]);

        let shown = next_event(&mut rx, is_shown).await;
        assert!(matches!(shown, Event::OverlayShown { ref video_id, .. } if video_id == "NEW"));
        controller.shutdown().await;
        assert!(engine.store().watched().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn navigation_during_debounce_drops_old_query() {
        let (controller, page, _engine) = setup();
        let mut rx = controller.subscribe();

        controller.on_url_change(&watch("FIRST")).await;
        controller.on_url_change(&watch("SECOND")).await;

        let shown = next_event(&mut rx, is_shown).await;
        assert!(matches!(shown, Event::OverlayShown { ref video_id, .. } if video_id == "SECOND"));
        let renders = page
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Render(_)))
            .count();
        assert_eq!(renders, 1);
        controller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn same_video_does_not_restart() {
        let (controller, _page, _engine) = setup();
        let mut rx = controller.subscribe();

        controller.on_url_change(&watch("SAME")).await;
        next_event(&mut rx, is_shown).await;
        controller.on_url_change(&format!("{}&t=42", watch("SAME"))).await;

        assert!(matches!(controller.phase(), OverlayPhase::Shown { .. }));
        assert!(controller.decide(Decision::Count));
        next_event(&mut rx, is_resolved).await;
    }

    #[tokio::test(start_paused = true)]
    async fn leaving_watch_page_cancels() {
        let (controller, page, _engine) = setup();

        controller.on_url_change(&watch("GONE")).await;
        controller.on_url_change("https://www.youtube.com/feed/subscriptions").await;

        assert_eq!(controller.phase(), OverlayPhase::Hidden);
        assert!(page.calls().is_empty());
    }
}
