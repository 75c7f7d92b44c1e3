use std::{process::ExitCode, sync::Arc, time::Duration};

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use client_core::{
    token_from_link, HttpScoringService, ScoreEdit, ScoringSession, SessionSettings, SubmitError,
    SubmitOutcome,
};
use shared::domain::{CriterionId, Round, TeamId, TeamStatus};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Score the teams assigned to you")]
struct Args {
    #[arg(long, env = "JUDGE_SERVER_URL", default_value = "http://127.0.0.1:8443")]
    server_url: String,
    /// Invitation link or the bare access token.
    #[arg(long, env = "JUDGE_LINK")]
    link: Option<String>,
    #[arg(long, env = "JUDGE_ROUND", default_value_t = 1)]
    round: u32,
    #[arg(long, default_value_t = 10)]
    request_timeout_secs: u64,
    #[arg(long, default_value_t = 30)]
    submit_timeout_secs: u64,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print assigned teams, criteria and current scores.
    Show,
    /// Enter scores for one team and submit them in the same run. Scores
    /// reach the server only on submit, so a team with a missing criterion
    /// is not saved at all.
    Score {
        #[arg(long)]
        team: String,
        /// `criterion=value`; an empty value clears the field.
        #[arg(long = "set", value_parser = parse_assignment, required = true)]
        sets: Vec<(String, String)>,
    },
}

fn parse_assignment(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(criterion, value)| (criterion.trim().to_string(), value.to_string()))
        .filter(|(criterion, _)| !criterion.is_empty())
        .ok_or_else(|| format!("expected criterion=value, got '{raw}'"))
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let service = Arc::new(HttpScoringService::new(&args.server_url)?);
    let settings = SessionSettings {
        round: Round(args.round),
        request_timeout: Duration::from_secs(args.request_timeout_secs),
        submit_timeout: Duration::from_secs(args.submit_timeout_secs),
    };
    let token = args.link.as_deref().and_then(token_from_link);

    let mut session = match ScoringSession::load(service, token.as_deref(), settings).await {
        Ok(session) => session,
        Err(failure) => {
            eprintln!("{}", serde_json::to_string_pretty(&failure.report)?);
            return Err(failure.into());
        }
    };

    match args.command.unwrap_or(Command::Show) {
        Command::Show => print_dashboard(&session),
        Command::Score { team, sets } => {
            score_team(&mut session, &TeamId(team), &sets).await?;
        }
    }
    Ok(())
}

/// Applies the edits for one team, then submits it.
async fn score_team(
    session: &mut ScoringSession,
    team_id: &TeamId,
    sets: &[(String, String)],
) -> Result<SubmitOutcome> {
    for (criterion, value) in sets {
        let criterion_id = CriterionId(criterion.clone());
        match session.set_score(team_id, &criterion_id, value) {
            ScoreEdit::Accepted(score) => println!("{criterion_id} = {score}"),
            ScoreEdit::Cleared => println!("{criterion_id} cleared"),
            ScoreEdit::Rejected(reason) => {
                println!("{criterion_id}: ignored '{value}' ({reason})")
            }
        }
    }
    let outcome = match session.submit_team(team_id).await {
        Ok(outcome) => outcome,
        Err(SubmitError::Incomplete { missing, .. }) => {
            let names: Vec<_> = missing
                .iter()
                .map(|id| {
                    session
                        .criterion(id)
                        .map_or_else(|| id.to_string(), |c| c.name.clone())
                })
                .collect();
            return Err(anyhow!(
                "nothing saved for team {team_id}; fill in all criteria, missing: {}",
                names.join(", ")
            ));
        }
        Err(error) => return Err(error.into()),
    };
    match outcome {
        SubmitOutcome::Submitted { writes } => {
            println!("team {team_id} submitted ({writes} scores saved)");
        }
        SubmitOutcome::AlreadySubmitted => println!("team {team_id} was already submitted"),
    }
    if session.all_submitted() {
        println!("all assigned teams are submitted. Thank you!");
    }
    Ok(outcome)
}

fn print_dashboard(session: &ScoringSession) {
    let judge = session.judge();
    let progress = session.progress();
    println!(
        "{} (event {}, round {}): {}/{} teams submitted",
        judge.name,
        judge.event_id,
        session.settings().round,
        progress.submitted,
        progress.total
    );
    for team in session.teams() {
        let status = match session.status(&team.id) {
            TeamStatus::Submitted => "submitted",
            TeamStatus::Pending => "pending",
        };
        println!("\n[{}] {} - {} ({status})", team.id, team.name, team.project_title);
        let scores = session.scores(&team.id);
        for criterion in session.criteria() {
            let value = scores
                .get(&criterion.id)
                .map_or_else(|| "-".to_string(), |score| score.to_string());
            println!(
                "  {:<24} {:>6} / {} (weight {})",
                criterion.name, value, criterion.max_score, criterion.weight
            );
        }
        if let Some(total) = session.weighted_total(&team.id) {
            println!("  weighted total: {total}");
        }
    }
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
