//! CLI command implementations.

use std::path::Path;

use anyhow::{Context, Result};

use gauntlet::bank::QuestionBank;
use gauntlet::config::EventConfig;
use gauntlet::server::{ServerConfig, start_server};
use gauntlet::session::store::ProgressStore;

/// `gauntlet serve`: run the event server until Ctrl+C.
pub async fn cmd_serve(
    port: u16,
    db_path: &Path,
    bank_path: Option<&Path>,
    config_path: Option<&Path>,
) -> Result<()> {
    let event = EventConfig::load_or_default(config_path)?;

    // Fail fast on a broken bank file instead of at first request.
    let bank = QuestionBank::load_or_default(bank_path)?;
    tracing::info!(phases = bank.phases.len(), "question bank loaded");

    start_server(ServerConfig {
        port,
        db_path: db_path.to_path_buf(),
        bank_path: bank_path.map(Path::to_path_buf),
        event,
    })
    .await
}

/// `gauntlet status`: print team progress from the database.
pub async fn cmd_status(db_path: &Path, team: Option<u32>) -> Result<()> {
    if !db_path.exists() {
        println!("No progress database at {}", db_path.display());
        return Ok(());
    }

    let store = ProgressStore::open(db_path).context("Failed to open progress store")?;
    let team_ids = match team {
        Some(id) => vec![id],
        None => store.team_ids()?,
    };

    if team_ids.is_empty() {
        println!("No teams have logged in yet");
        return Ok(());
    }

    println!();
    println!("Team Progress");
    println!("=============");
    println!();

    for team_id in team_ids {
        let Some(session) = store.get(team_id)? else {
            println!("Team {team_id}: no record");
            continue;
        };

        let order = session
            .phase_order
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" -> ");
        let won = if session.final_merge.won { ", WON" } else { "" };
        println!(
            "Team {}: at {} ({} of {} phases done{})",
            session.team_id,
            session.current_phase(),
            session.current_phase_index.min(session.phase_order.len()),
            session.phase_order.len(),
            won
        );
        println!("  order: {order}");
    }
    println!();

    Ok(())
}

/// `gauntlet reset <team>`: delete one team's progress record.
pub async fn cmd_reset(db_path: &Path, team: u32, force: bool) -> Result<()> {
    use dialoguer::Confirm;

    if !force {
        let confirm = Confirm::new()
            .with_prompt(format!(
                "This will erase all progress for team {team}. Are you sure?"
            ))
            .default(false)
            .interact()
            .unwrap_or(false);

        if !confirm {
            println!("Reset cancelled");
            return Ok(());
        }
    }

    let store = ProgressStore::open(db_path).context("Failed to open progress store")?;
    if store.delete(team)? {
        println!("Team {team} reset");
    } else {
        println!("Team {team} has no record");
    }

    Ok(())
}
