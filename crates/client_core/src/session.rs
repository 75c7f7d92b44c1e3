//! Scoring session controller: owns one judge's store and submission latch.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    future::Future,
    sync::Arc,
    time::Duration,
};

use futures::future::join_all;
use serde::Serialize;
use shared::domain::{
    Criterion, CriterionId, Judge, JudgeId, Round, ScoreRecord, Team, TeamId, TeamStatus,
};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
    error::{LoadError, LoadFailure, ScoreRejection, SubmitError},
    score_store::{ScoreEdit, ScoreStore},
    submission::SubmissionTracker,
    ScoringService,
};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_SUBMIT_TIMEOUT: Duration = Duration::from_secs(30);
const TOKEN_QUERY_PARAM: &str = "token";

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub round: Round,
    /// Applied to each load step.
    pub request_timeout: Duration,
    /// Applied to the whole set of writes of one team.
    pub submit_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            round: Round::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            submit_timeout: DEFAULT_SUBMIT_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStage {
    ResolveJudge,
    FetchAssignments,
    FetchTeams,
    FetchCriteria,
    FetchScores,
}

impl fmt::Display for LoadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::ResolveJudge => "resolve judge",
            Self::FetchAssignments => "fetch assignments",
            Self::FetchTeams => "fetch teams",
            Self::FetchCriteria => "fetch criteria",
            Self::FetchScores => "fetch scores",
        };
        f.write_str(label)
    }
}

/// Structured trace of the load sequence, kept on success and returned with
/// a [`LoadFailure`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    pub token_present: bool,
    pub judge_id: Option<JudgeId>,
    pub completed: Vec<LoadStage>,
    pub failed_stage: Option<LoadStage>,
    pub message: Option<String>,
    pub assigned_team_count: Option<usize>,
    pub event_team_count: Option<usize>,
    pub criteria_count: Option<usize>,
    pub persisted_score_count: Option<usize>,
    /// Persisted scores ignored because of round, unknown ids, or bounds.
    pub ignored_scores: usize,
    pub seeded_submitted: usize,
}

impl LoadReport {
    fn fail(&mut self, stage: LoadStage, message: impl Into<String>) {
        self.failed_stage = Some(stage);
        self.message = Some(message.into());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Submitted { writes: usize },
    AlreadySubmitted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionProgress {
    pub submitted: usize,
    pub total: usize,
}

/// Teams of the event that are assigned to the judge, in event order.
pub fn assigned_teams(event_teams: &[Team], assigned_ids: &BTreeSet<TeamId>) -> Vec<Team> {
    event_teams
        .iter()
        .filter(|team| assigned_ids.contains(&team.id))
        .cloned()
        .collect()
}

/// Pulls the access token out of a shareable link. A value that is not a URL
/// is taken as the token itself.
pub fn token_from_link(link: &str) -> Option<String> {
    let link = link.trim();
    if link.is_empty() {
        return None;
    }
    match Url::parse(link) {
        Ok(url) if url.has_host() => url
            .query_pairs()
            .find(|(key, _)| key == TOKEN_QUERY_PARAM)
            .map(|(_, value)| value.trim().to_string())
            .filter(|value| !value.is_empty()),
        _ => Some(link.to_string()),
    }
}

pub struct ScoringSession {
    service: Arc<dyn ScoringService>,
    settings: SessionSettings,
    judge: Judge,
    teams: Vec<Team>,
    criteria: Vec<Criterion>,
    store: ScoreStore,
    tracker: SubmissionTracker,
    report: LoadReport,
}

impl fmt::Debug for ScoringSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScoringSession")
            .field("judge", &self.judge.id)
            .field("round", &self.settings.round)
            .field("teams", &self.teams.len())
            .field("criteria", &self.criteria.len())
            .finish_non_exhaustive()
    }
}

impl ScoringSession {
    /// Runs the ordered load sequence. Any failing step aborts the whole
    /// session; no partial dashboard is produced.
    pub async fn load(
        service: Arc<dyn ScoringService>,
        token: Option<&str>,
        settings: SessionSettings,
    ) -> Result<Self, LoadFailure> {
        let mut report = LoadReport::default();
        match Self::load_inner(service, token, settings, &mut report).await {
            Ok(mut session) => {
                session.report = report;
                Ok(session)
            }
            Err(error) => {
                error!(
                    stage = ?report.failed_stage,
                    judge_id = ?report.judge_id,
                    %error,
                    "scoring session failed to load"
                );
                Err(LoadFailure { error, report })
            }
        }
    }

    async fn load_inner(
        service: Arc<dyn ScoringService>,
        token: Option<&str>,
        settings: SessionSettings,
        report: &mut LoadReport,
    ) -> Result<Self, LoadError> {
        let Some(token) = token.map(str::trim).filter(|token| !token.is_empty()) else {
            report.message = Some("missing access token".to_string());
            return Err(LoadError::MissingToken);
        };
        report.token_present = true;
        let limit = settings.request_timeout;

        let judge = run_stage(
            report,
            LoadStage::ResolveJudge,
            limit,
            service.resolve_judge_by_token(token),
        )
        .await?;
        let Some(judge) = judge else {
            report.completed.pop();
            report.fail(LoadStage::ResolveJudge, "token did not resolve to a judge");
            return Err(LoadError::InvalidToken);
        };
        report.judge_id = Some(judge.id.clone());

        let assigned_ids = run_stage(
            report,
            LoadStage::FetchAssignments,
            limit,
            service.assignments_for_judge(&judge.id),
        )
        .await?;
        report.assigned_team_count = Some(assigned_ids.len());

        let event_teams = run_stage(
            report,
            LoadStage::FetchTeams,
            limit,
            service.teams_for_event(&judge.event_id),
        )
        .await?;
        report.event_team_count = Some(event_teams.len());

        let criteria = run_stage(
            report,
            LoadStage::FetchCriteria,
            limit,
            service.criteria_for_event(&judge.event_id),
        )
        .await?;
        report.criteria_count = Some(criteria.len());
        let positive = |value: f64| value.is_finite() && value > 0.0;
        if let Some(bad) = criteria
            .iter()
            .find(|c| !(positive(c.max_score) && positive(c.weight)))
        {
            let message = format!(
                "criterion {} has max_score {} and weight {}; both must be positive",
                bad.id, bad.max_score, bad.weight
            );
            report.fail(LoadStage::FetchCriteria, message.clone());
            return Err(LoadError::InvalidData {
                stage: LoadStage::FetchCriteria,
                message,
            });
        }

        let persisted = run_stage(
            report,
            LoadStage::FetchScores,
            limit,
            service.scores_for_judge(&judge.id),
        )
        .await?;
        report.persisted_score_count = Some(persisted.len());

        let teams = assigned_teams(&event_teams, &assigned_ids);
        if teams.len() < assigned_ids.len() {
            warn!(
                judge_id = %judge.id,
                assigned = assigned_ids.len(),
                matched = teams.len(),
                "some assigned teams are not part of the judge's event"
            );
        }

        let mut store = ScoreStore::new();
        for record in persisted {
            if accept_persisted(&record, &judge, &teams, &criteria, settings.round) {
                store.seed(&record.team_id, &record.criterion_id, record.score);
            } else {
                report.ignored_scores += 1;
            }
        }

        let mut tracker = SubmissionTracker::new();
        report.seeded_submitted = tracker.seed_from_store(&store, &teams, &criteria);

        info!(
            judge_id = %judge.id,
            event_id = %judge.event_id,
            round = settings.round.0,
            teams = teams.len(),
            criteria = criteria.len(),
            already_submitted = report.seeded_submitted,
            ignored_scores = report.ignored_scores,
            "scoring session loaded"
        );

        Ok(Self {
            service,
            settings,
            judge,
            teams,
            criteria,
            store,
            tracker,
            report: LoadReport::default(),
        })
    }

    pub fn judge(&self) -> &Judge {
        &self.judge
    }

    pub fn teams(&self) -> &[Team] {
        &self.teams
    }

    pub fn criteria(&self) -> &[Criterion] {
        &self.criteria
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn report(&self) -> &LoadReport {
        &self.report
    }

    pub fn team(&self, team_id: &TeamId) -> Option<&Team> {
        self.teams.iter().find(|team| &team.id == team_id)
    }

    pub fn criterion(&self, criterion_id: &CriterionId) -> Option<&Criterion> {
        self.criteria
            .iter()
            .find(|criterion| &criterion.id == criterion_id)
    }

    pub fn scores(&self, team_id: &TeamId) -> BTreeMap<CriterionId, f64> {
        self.store.get_scores(team_id)
    }

    pub fn is_complete(&self, team_id: &TeamId) -> bool {
        self.store.is_complete(team_id, &self.criteria)
    }

    pub fn weighted_total(&self, team_id: &TeamId) -> Option<f64> {
        self.store.weighted_total(team_id, &self.criteria)
    }

    pub fn status(&self, team_id: &TeamId) -> TeamStatus {
        self.tracker.status(team_id)
    }

    pub fn all_submitted(&self) -> bool {
        self.tracker.all_submitted(&self.teams)
    }

    pub fn progress(&self) -> SessionProgress {
        SessionProgress {
            submitted: self.tracker.submitted_count(&self.teams),
            total: self.teams.len(),
        }
    }

    /// Applies one edit. Refusals are silent: they change nothing and are
    /// reported only through the returned [`ScoreEdit`].
    pub fn set_score(
        &mut self,
        team_id: &TeamId,
        criterion_id: &CriterionId,
        raw_value: &str,
    ) -> ScoreEdit {
        if self.team(team_id).is_none() {
            return ScoreEdit::Rejected(ScoreRejection::UnknownTeam);
        }
        if self.tracker.is_submitted(team_id) {
            return ScoreEdit::Rejected(ScoreRejection::Locked);
        }
        let Some(max_score) = self.criterion(criterion_id).map(|c| c.max_score) else {
            return ScoreEdit::Rejected(ScoreRejection::UnknownCriterion);
        };
        let edit = self
            .store
            .set_score(team_id, criterion_id, raw_value, max_score);
        debug!(%team_id, %criterion_id, ?edit, "score edit");
        edit
    }

    /// Persists every criterion of a complete team and latches it.
    ///
    /// All writes are issued together and must all succeed within the submit
    /// timeout; otherwise the team stays pending. Writes that landed before a
    /// failure are left in place since the upsert key makes a retry
    /// idempotent.
    pub async fn submit_team(&mut self, team_id: &TeamId) -> Result<SubmitOutcome, SubmitError> {
        if self.team(team_id).is_none() {
            return Err(SubmitError::UnknownTeam {
                team_id: team_id.clone(),
            });
        }
        if self.tracker.is_submitted(team_id) {
            debug!(%team_id, "team already submitted");
            return Ok(SubmitOutcome::AlreadySubmitted);
        }
        let missing = self.store.missing_criteria(team_id, &self.criteria);
        if !missing.is_empty() {
            return Err(SubmitError::Incomplete {
                team_id: team_id.clone(),
                missing,
            });
        }

        let scores = self.store.get_scores(team_id);
        let records: Vec<ScoreRecord> = self
            .criteria
            .iter()
            .filter_map(|criterion| {
                scores.get(&criterion.id).map(|score| ScoreRecord {
                    judge_id: self.judge.id.clone(),
                    team_id: team_id.clone(),
                    criterion_id: criterion.id.clone(),
                    score: *score,
                    round: self.settings.round,
                })
            })
            .collect();
        let total = records.len();

        let writes = records
            .iter()
            .map(|record| self.service.upsert_score(record.clone()));
        let results = match timeout(self.settings.submit_timeout, join_all(writes)).await {
            Ok(results) => results,
            Err(_) => {
                warn!(%team_id, after = ?self.settings.submit_timeout, "team submission timed out");
                return Err(SubmitError::Timeout {
                    team_id: team_id.clone(),
                    after: self.settings.submit_timeout,
                });
            }
        };

        let failed: Vec<(CriterionId, String)> = records
            .iter()
            .zip(results)
            .filter_map(|(record, result)| {
                result
                    .err()
                    .map(|err| (record.criterion_id.clone(), format!("{err:#}")))
            })
            .collect();
        if !failed.is_empty() {
            warn!(
                %team_id,
                failed = failed.len(),
                total,
                "team submission failed; team stays pending"
            );
            return Err(SubmitError::Persistence {
                team_id: team_id.clone(),
                total,
                failed,
            });
        }

        self.tracker.mark_submitted(team_id.clone());
        info!(
            judge_id = %self.judge.id,
            %team_id,
            writes = total,
            all_submitted = self.all_submitted(),
            "team submitted"
        );
        Ok(SubmitOutcome::Submitted { writes: total })
    }
}

async fn run_stage<T>(
    report: &mut LoadReport,
    stage: LoadStage,
    limit: Duration,
    step: impl Future<Output = anyhow::Result<T>>,
) -> Result<T, LoadError> {
    match timeout(limit, step).await {
        Ok(Ok(value)) => {
            report.completed.push(stage);
            Ok(value)
        }
        Ok(Err(source)) => {
            report.fail(stage, format!("{source:#}"));
            Err(LoadError::Service { stage, source })
        }
        Err(_) => {
            report.fail(stage, format!("timed out after {limit:?}"));
            Err(LoadError::Timeout {
                stage,
                after: limit,
            })
        }
    }
}

fn accept_persisted(
    record: &ScoreRecord,
    judge: &Judge,
    teams: &[Team],
    criteria: &[Criterion],
    round: Round,
) -> bool {
    if record.round != round || record.judge_id != judge.id {
        return false;
    }
    if !teams.iter().any(|team| team.id == record.team_id) {
        return false;
    }
    let Some(criterion) = criteria.iter().find(|c| c.id == record.criterion_id) else {
        return false;
    };
    if !criterion.bounds().contains(record.score) {
        warn!(
            team_id = %record.team_id,
            criterion_id = %record.criterion_id,
            score = record.score,
            max_score = criterion.max_score,
            "ignoring persisted score outside criterion bounds"
        );
        return false;
    }
    true
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
