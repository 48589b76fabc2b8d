//! `visit`: one navigation through the watcher, then the overlay in the
//! terminal. Keys (y/b/n) are read from stdin, one per line.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use watchlimit_core::{
    Event, HostAction, MemoryHost, NavigationEvent, NavigationWatcher, OverlayController, OverlayPhase,
    OverlayView, Page, Resolution, TabPhase,
};

use super::{App, CommandResult};

/// Draws the overlay as plain text.
struct TerminalPage {
    url: String,
    title: Option<String>,
}

impl Page for TerminalPage {
    fn url(&self) -> Option<String> {
        Some(self.url.clone())
    }

    fn title(&self) -> Option<String> {
        self.title.clone()
    }

    fn render(&self, view: &OverlayView) {
        println!("+ Count this video? {} [{}]", view.title, view.video_id);
        println!(
            "| Today: {}/{}   Bank: {}/{}",
            view.current_count, view.daily_limit, view.bank_count, view.bank_capacity
        );
        let bank = if view.bank_enabled { "[B] bank" } else { "(bank full)" };
        println!("| [Y] count  {bank}  [N] skip   {}s", view.countdown_secs);
    }

    fn countdown(&self, remaining: u32) {
        println!("| {remaining}s");
    }

    fn detach_input(&self) {}

    fn play_exit_animation(&self) {}

    fn remove(&self) {
        println!("+");
    }

    fn navigate(&self, url: &str) {
        println!("navigating to {url}");
    }
}

fn print_action(action: &HostAction) {
    match action {
        HostAction::Redirected { tab, url } => println!("tab {tab}: redirected to {url}"),
        HostAction::StylesApplied(tab) => println!("tab {tab}: limit styling on"),
        HostAction::StylesRemoved(tab) => println!("tab {tab}: limit styling off"),
    }
}

fn print_resolution(resolution: &Resolution) {
    match resolution {
        Resolution::Counted { response } | Resolution::Banked { response } => {
            let message = response.message.as_deref().unwrap_or("done");
            println!("{message}");
        }
        Resolution::Skipped { timed_out: true } => println!("skipped (timed out)"),
        Resolution::Skipped { timed_out: false } => println!("skipped"),
    }
}

pub async fn run(url: &str, title: Option<String>) -> CommandResult {
    let app = App::open()?;
    let host = Arc::new(MemoryHost::default());
    let watcher = NavigationWatcher::new(app.engine().clone(), host.clone(), app.config.navigation.clone());
    watcher.start().await;

    let mut watcher_events = watcher.subscribe();
    let tab = host.open_tab(url);
    let phase = watcher.handle(NavigationEvent::page_loaded(tab, url)).await;
    for action in host.take_actions() {
        print_action(&action);
    }
    while let Ok(event) = watcher_events.try_recv() {
        match event {
            Event::TabAllowed { video_id, .. } => println!("allowed: {video_id}"),
            Event::TabBlocked { video_id, .. } => println!("blocked: {video_id} (daily limit reached)"),
            _ => {}
        }
    }
    if matches!(phase, TabPhase::Blocked { .. }) {
        return Ok(());
    }

    let page = Arc::new(TerminalPage {
        url: url.to_string(),
        title,
    });
    let overlay = OverlayController::new(page, app.background.clone(), &app.config);
    let mut events = overlay.subscribe();
    let mut phase_rx = overlay.watch_phase();
    overlay.on_url_change(url).await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut queued: Option<char> = None;
    loop {
        let phase = phase_rx.borrow_and_update().clone();
        match phase {
            OverlayPhase::Hidden => break,
            // Keys typed before the overlay appears wait for it.
            OverlayPhase::Shown { .. } => {
                if let Some(key) = queued.take() {
                    if !overlay.on_key(key) {
                        println!("ignored: {key}");
                    }
                }
            }
            OverlayPhase::Pending { .. } | OverlayPhase::Resolved { .. } => {}
        }

        tokio::select! {
            changed = phase_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) => queued = line.trim().chars().next(),
                None => stdin_open = false,
            },
        }
    }

    while let Ok(event) = events.try_recv() {
        if let Event::OverlayResolved { resolution, .. } = event {
            print_resolution(&resolution);
        }
    }
    Ok(())
}
