use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use server_api::{event_progress, ApiContext};
use shared::domain::{Criterion, CriterionId, EventId, Judge, JudgeId, Round, Team, TeamId};
use storage::Storage;
use url::Url;
use uuid::Uuid;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://./data/scoring.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    CreateEvent {
        name: String,
        #[arg(long)]
        id: Option<String>,
    },
    AddTeam {
        event_id: String,
        name: String,
        #[arg(long, default_value = "")]
        project_title: String,
        #[arg(long)]
        id: Option<String>,
    },
    AddCriterion {
        event_id: String,
        name: String,
        #[arg(long)]
        max_score: f64,
        #[arg(long, default_value_t = 1.0)]
        weight: f64,
        #[arg(long)]
        id: Option<String>,
    },
    /// Registers a judge and prints a fresh invitation link.
    AddJudge {
        event_id: String,
        name: String,
        #[arg(long)]
        id: Option<String>,
        #[arg(long, default_value = "http://127.0.0.1:8443/judge")]
        link_base: String,
    },
    Assign {
        judge_id: String,
        #[arg(required = true)]
        team_ids: Vec<String>,
    },
    Progress {
        event_id: String,
        #[arg(long, default_value_t = 1)]
        round: u32,
    },
}

fn new_id(explicit: Option<String>) -> String {
    explicit.unwrap_or_else(|| Uuid::new_v4().simple().to_string())
}

fn invitation_link(link_base: &str, token: &str) -> Result<Url> {
    let mut url =
        Url::parse(link_base).with_context(|| format!("invalid link base '{link_base}'"))?;
    url.query_pairs_mut().append_pair("token", token);
    Ok(url)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url).await?;

    match cli.command {
        Command::CreateEvent { name, id } => {
            let event_id = EventId(new_id(id));
            storage.create_event(&event_id, &name).await?;
            println!("created event_id={event_id}");
        }
        Command::AddTeam {
            event_id,
            name,
            project_title,
            id,
        } => {
            let team = Team {
                id: TeamId(new_id(id)),
                name,
                project_title,
                event_id: EventId(event_id),
            };
            ensure_event(&storage, &team.event_id).await?;
            storage.create_team(&team).await?;
            println!("created team_id={}", team.id);
        }
        Command::AddCriterion {
            event_id,
            name,
            max_score,
            weight,
            id,
        } => {
            if !(max_score.is_finite() && max_score > 0.0 && weight.is_finite() && weight > 0.0) {
                return Err(anyhow!("max_score and weight must be positive numbers"));
            }
            let event_id = EventId(event_id);
            ensure_event(&storage, &event_id).await?;
            let criterion = Criterion {
                id: CriterionId(new_id(id)),
                name,
                max_score,
                weight,
            };
            storage.create_criterion(&event_id, &criterion).await?;
            println!("created criterion_id={}", criterion.id);
        }
        Command::AddJudge {
            event_id,
            name,
            id,
            link_base,
        } => {
            let judge = Judge {
                id: JudgeId(new_id(id)),
                name,
                event_id: EventId(event_id),
            };
            ensure_event(&storage, &judge.event_id).await?;
            let token = Uuid::new_v4().simple().to_string();
            let link = invitation_link(&link_base, &token)?;
            storage.create_judge(&judge, &token).await?;
            println!("created judge_id={}", judge.id);
            println!("invitation link (shown once): {link}");
        }
        Command::Assign { judge_id, team_ids } => {
            let judge_id = JudgeId(judge_id);
            let Some(judge) = storage.judge(&judge_id).await? else {
                return Err(anyhow!("judge {judge_id} not found"));
            };
            let event_teams = storage.teams_for_event(&judge.event_id).await?;
            let team_ids: Vec<TeamId> = team_ids.into_iter().map(TeamId).collect();
            check_same_event(&judge, &event_teams, &team_ids)?;
            for team_id in team_ids {
                storage.assign_team(&judge.id, &team_id).await?;
                println!("assigned team_id={team_id} to judge_id={}", judge.id);
            }
        }
        Command::Progress { event_id, round } => {
            let ctx = ApiContext { storage };
            let progress = event_progress(&ctx, &EventId(event_id), Round(round))
                .await
                .map_err(|err| anyhow!("{err}"))?;
            for judge in progress.judges {
                let marker = if judge.is_done() { "done" } else { "open" };
                println!(
                    "{:<24} {}/{} teams complete [{marker}]",
                    judge.judge_name, judge.completed_teams, judge.assigned_teams
                );
            }
        }
    }

    Ok(())
}

async fn ensure_event(storage: &Storage, event_id: &EventId) -> Result<()> {
    if storage.event_exists(event_id).await? {
        Ok(())
    } else {
        Err(anyhow!("event {event_id} not found"))
    }
}

/// Assignments only make sense inside the judge's event; reject the whole
/// batch before writing anything.
fn check_same_event(judge: &Judge, event_teams: &[Team], team_ids: &[TeamId]) -> Result<()> {
    let foreign: Vec<&str> = team_ids
        .iter()
        .filter(|id| !event_teams.iter().any(|team| &team.id == *id))
        .map(TeamId::as_str)
        .collect();
    if foreign.is_empty() {
        Ok(())
    } else {
        Err(anyhow!(
            "teams not in event {} of judge {}: {}",
            judge.event_id,
            judge.id,
            foreign.join(", ")
        ))
    }
}
