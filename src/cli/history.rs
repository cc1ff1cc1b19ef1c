//! `anidesk history` subcommands.

use std::io::{self, Write};

use clap::{Subcommand, ValueEnum};
use console::style;

use anidesk::history::{MediaSnapshot, WatchFilter};

use super::helpers::{format_millis, format_position, truncate, AppContext};

#[derive(Subcommand)]
pub enum HistoryCommands {
    /// List tracked titles
    List,

    /// Show every saved episode of a title
    Show { media_id: i64 },

    /// Show the most recently watched episode of a title
    Last { media_id: i64 },

    /// Save a playback position
    Record {
        media_id: i64,
        episode: u32,
        /// Position in seconds
        time: f64,
        /// Episode length in seconds
        duration: f64,
    },

    /// Titles to pick up where you left off
    Continue {
        #[arg(long, value_enum, default_value = "all")]
        filter: FilterArg,
    },

    /// Re-fetch media snapshots whose airing data has gone stale
    Refresh,

    /// Stop tracking a title
    Remove {
        media_id: i64,
        /// Skip confirmation prompt
        #[arg(short = 'y', long)]
        confirm: bool,
    },

    /// Delete all watch history
    Clear {
        /// Skip confirmation prompt
        #[arg(short = 'y', long)]
        confirm: bool,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum FilterArg {
    #[default]
    All,
    InProgress,
    Completed,
}

impl From<FilterArg> for WatchFilter {
    fn from(arg: FilterArg) -> Self {
        match arg {
            FilterArg::All => WatchFilter::All,
            FilterArg::InProgress => WatchFilter::InProgress,
            FilterArg::Completed => WatchFilter::Completed,
        }
    }
}

pub async fn run_history(ctx: AppContext, command: HistoryCommands) -> anyhow::Result<()> {
    match command {
        HistoryCommands::List => cmd_list(&ctx),
        HistoryCommands::Show { media_id } => cmd_show(&ctx, media_id),
        HistoryCommands::Last { media_id } => cmd_last(&ctx, media_id),
        HistoryCommands::Record {
            media_id,
            episode,
            time,
            duration,
        } => cmd_record(&ctx, media_id, episode, time, duration).await,
        HistoryCommands::Continue { filter } => cmd_continue(&ctx, filter.into()),
        HistoryCommands::Refresh => cmd_refresh(&ctx).await,
        HistoryCommands::Remove { media_id, confirm } => cmd_remove(&ctx, media_id, confirm),
        HistoryCommands::Clear { confirm } => cmd_clear(&ctx, confirm),
    }
}

fn cmd_list(ctx: &AppContext) -> anyhow::Result<()> {
    let entries = ctx.history.get_history_entries();
    if entries.is_empty() {
        println!("{} No watch history", style("!").yellow());
        return Ok(());
    }

    println!("\n{}", style("Watch History").bold());
    println!("{}", "-".repeat(72));
    println!(
        "{:<10} {:<36} {:>8} {:<16}",
        "ID", "Title", "Episodes", "Last Watched"
    );
    println!("{}", "-".repeat(72));
    for (media_id, entry) in &entries {
        let title = entry
            .data
            .as_ref()
            .map(MediaSnapshot::title)
            .unwrap_or_default();
        let last = entry
            .last_watched()
            .map(|(_, e)| format_millis(e.timestamp))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<10} {:<36} {:>8} {:<16}",
            media_id,
            truncate(&title, 35),
            entry.history.len(),
            last
        );
    }
    Ok(())
}

fn cmd_show(ctx: &AppContext, media_id: i64) -> anyhow::Result<()> {
    let Some(entry) = ctx.history.get_anime_history(media_id) else {
        println!("{} Title {} is not tracked", style("!").yellow(), media_id);
        return Ok(());
    };

    let title = entry
        .data
        .as_ref()
        .map(MediaSnapshot::title)
        .unwrap_or_default();
    println!("\n{} {}", style(media_id).cyan(), style(title).bold());
    println!("{}", "-".repeat(60));
    for (number, episode) in &entry.history {
        let name = episode
            .data
            .as_ref()
            .and_then(|d| d.title.as_ref())
            .and_then(|t| t.en.clone())
            .unwrap_or_default();
        let marker = if episode.completed {
            style("✓").green()
        } else {
            style("…").dim()
        };
        println!(
            "{} {:>4}  {:<28} {:>8} / {:<8} {}",
            marker,
            number,
            truncate(&name, 27),
            format_position(episode.time),
            format_position(episode.duration),
            format_millis(episode.timestamp)
        );
    }
    Ok(())
}

fn cmd_last(ctx: &AppContext, media_id: i64) -> anyhow::Result<()> {
    match ctx.history.get_last_watched_episode(media_id) {
        Some(episode) => {
            let number = episode
                .data
                .as_ref()
                .and_then(|d| d.episode_number)
                .map(|n| n.to_string())
                .unwrap_or_else(|| "?".to_string());
            println!(
                "Episode {} at {} of {} ({})",
                style(number).cyan(),
                format_position(episode.time),
                format_position(episode.duration),
                if episode.completed {
                    "finished"
                } else {
                    "in progress"
                }
            );
        }
        None => println!("{} Nothing watched for {}", style("!").yellow(), media_id),
    }
    Ok(())
}

async fn cmd_record(
    ctx: &AppContext,
    media_id: i64,
    episode: u32,
    time: f64,
    duration: f64,
) -> anyhow::Result<()> {
    let snapshot = match ctx.history.get_anime_history(media_id).and_then(|e| e.data) {
        Some(snapshot) => snapshot,
        None => match ctx.metadata().anime_info(media_id).await {
            Some(media) => MediaSnapshot::from_media(media),
            None => anyhow::bail!("Could not look up media {}", media_id),
        },
    };

    if !ctx
        .history
        .record_progress(&snapshot, episode, None, time, duration)
    {
        anyhow::bail!("Failed to save progress for {} episode {}", media_id, episode);
    }

    let resume = ctx.history.resume_position(media_id, episode);
    println!(
        "{} Saved {} episode {} at {}{}",
        style("✓").green(),
        snapshot.title(),
        episode,
        format_position(time),
        if resume.is_none() { " (finished)" } else { "" }
    );
    Ok(())
}

fn cmd_continue(ctx: &AppContext, filter: WatchFilter) -> anyhow::Result<()> {
    let items = ctx.history.continue_watching(filter);
    if items.is_empty() {
        println!("{} Nothing to continue", style("!").yellow());
        return Ok(());
    }

    for item in items {
        let status = if item.last_watched.completed {
            style("done".to_string()).green()
        } else {
            style(format!(
                "{:.0}%",
                item.last_watched.progress() * 100.0
            ))
            .yellow()
        };
        println!(
            "{:<10} {:<36} ep {:<4} {:>5}  {}",
            item.media_id,
            truncate(&item.media.title(), 35),
            item.episode,
            status,
            format_millis(item.last_watched.timestamp)
        );
    }
    Ok(())
}

async fn cmd_refresh(ctx: &AppContext) -> anyhow::Result<()> {
    let stale = ctx.history.stale_entries();
    if stale.is_empty() {
        println!("{} All snapshots are current", style("✓").green());
        return Ok(());
    }

    let metadata = ctx.metadata();
    let mut refreshed = 0usize;
    for media_id in &stale {
        let Some(media) = metadata.anime_info(*media_id).await else {
            println!("  {} {} lookup failed", style("✗").red(), media_id);
            continue;
        };
        let mut snapshot = ctx
            .history
            .get_anime_history(*media_id)
            .and_then(|e| e.data)
            .unwrap_or_default();
        snapshot.media = Some(media);
        if ctx.history.refresh_media(*media_id, snapshot) {
            refreshed += 1;
        }
    }

    println!(
        "{} Refreshed {}/{} titles",
        style("✓").green(),
        refreshed,
        stale.len()
    );
    Ok(())
}

fn cmd_remove(ctx: &AppContext, media_id: i64, confirm: bool) -> anyhow::Result<()> {
    if ctx.history.get_anime_history(media_id).is_none() {
        println!("{} Title {} is not tracked", style("!").yellow(), media_id);
        return Ok(());
    }
    if !confirm && !prompt(&format!("Remove history for {}?", media_id))? {
        println!("{} Cancelled", style("!").yellow());
        return Ok(());
    }

    if ctx.history.remove_anime_from_history(media_id) {
        println!("{} Removed {}", style("✓").green(), media_id);
        Ok(())
    } else {
        anyhow::bail!("Failed to remove {}", media_id)
    }
}

fn cmd_clear(ctx: &AppContext, confirm: bool) -> anyhow::Result<()> {
    let count = ctx.history.get_history_entries().len();
    if !confirm && !prompt(&format!("Delete history for {} titles?", count))? {
        println!("{} Cancelled", style("!").yellow());
        return Ok(());
    }

    if ctx.history.clear_all_history() {
        println!("{} Cleared watch history", style("✓").green());
        Ok(())
    } else {
        anyhow::bail!("Failed to clear watch history")
    }
}

fn prompt(question: &str) -> anyhow::Result<bool> {
    print!("{} [y/N] ", question);
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}
