use clap::Subcommand;
use watchlimit_core::{DailyState, Request, Response};

use super::{App, CommandResult};

#[derive(Subcommand)]
pub enum VideoAction {
    /// Show today's count, the bank and preferences
    Status {
        /// Print the state as JSON
        #[arg(long)]
        json: bool,
    },
    /// Count a video against today's limit
    Count {
        video_id: String,
        /// Video title (defaults to "Unknown Video")
        title: Option<String>,
    },
    /// Save a video in the bank for another day
    Bank {
        video_id: String,
        title: Option<String>,
    },
    /// Remove a video from today's count
    Remove { video_id: String },
    /// Remove a video from the bank
    Unbank { video_id: String },
    /// Ask whether the overlay would show for a video (JSON reply)
    Check { video_id: String },
    /// Enable or disable the limit
    Toggle,
    /// Switch between dark and light theme
    Theme,
}

pub async fn run(action: VideoAction) -> CommandResult {
    let app = App::open()?;
    match action {
        VideoAction::Status { json } => {
            let state = app.engine().snapshot().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&state)?);
            } else {
                print_status(&state);
            }
        }
        VideoAction::Count { video_id, title } => {
            let reply = app
                .background
                .handle(Request::AddVideoToCount {
                    video_id,
                    video_title: title.unwrap_or_default(),
                })
                .await;
            report(reply)?;
        }
        VideoAction::Bank { video_id, title } => {
            let reply = app
                .background
                .handle(Request::AddVideoToBank {
                    video_id,
                    video_title: title.unwrap_or_default(),
                })
                .await;
            report(reply)?;
        }
        VideoAction::Remove { video_id } => {
            report(app.background.handle(Request::RemoveVideo { video_id }).await)?;
            println!("removed");
        }
        VideoAction::Unbank { video_id } => {
            report(app.background.handle(Request::RemoveVideoFromBank { video_id }).await)?;
            println!("removed from bank");
        }
        VideoAction::Check { video_id } => {
            let reply = app.background.handle(Request::CheckVideoStatus { video_id }).await;
            println!("{}", serde_json::to_string_pretty(&reply)?);
        }
        VideoAction::Toggle => {
            let enabled = app.engine().toggle_enabled().await?;
            println!("limit {}", if enabled { "enabled" } else { "disabled" });
        }
        VideoAction::Theme => {
            let dark = app.engine().toggle_dark_theme().await?;
            println!("theme: {}", if dark { "dark" } else { "light" });
        }
    }
    Ok(())
}

/// Print the reply's message, or turn a refusal into an error.
fn report(reply: Response) -> CommandResult {
    if !reply.is_success() {
        let message = reply.message.unwrap_or_else(|| "request failed".to_string());
        return Err(message.into());
    }
    if let Some(message) = reply.message {
        println!("{message}");
    }
    Ok(())
}

fn print_status(state: &DailyState) {
    println!(
        "Today: {}/{} watched ({} remaining, {:.0}%)",
        state.watched.len(),
        state.daily_limit,
        state.remaining(),
        state.progress_pct()
    );
    for entry in &state.watched {
        println!("  - {} [{}] {}", entry.title, entry.id, entry.added_at.format("%H:%M"));
    }
    println!("Bank: {}/{}", state.bank.len(), state.bank_capacity);
    for entry in &state.bank {
        println!("  - {} [{}] {}", entry.title, entry.id, entry.banked_at.format("%Y-%m-%d"));
    }
    println!(
        "Limit: {}  Theme: {}",
        if state.preferences.enabled { "on" } else { "off" },
        if state.preferences.dark_theme { "dark" } else { "light" }
    );
    if state.limit_reached() {
        println!("Daily limit reached.");
    }
}
