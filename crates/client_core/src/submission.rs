use std::collections::HashSet;

use shared::domain::{Criterion, Team, TeamId, TeamStatus};

use crate::score_store::ScoreStore;

/// One-way `Pending -> Submitted` latch per team. The set only grows.
#[derive(Debug, Clone, Default)]
pub struct SubmissionTracker {
    submitted: HashSet<TeamId>,
}

impl SubmissionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self, team_id: &TeamId) -> TeamStatus {
        if self.submitted.contains(team_id) {
            TeamStatus::Submitted
        } else {
            TeamStatus::Pending
        }
    }

    pub fn is_submitted(&self, team_id: &TeamId) -> bool {
        self.submitted.contains(team_id)
    }

    /// Returns `false` when the team was already submitted.
    pub fn mark_submitted(&mut self, team_id: TeamId) -> bool {
        self.submitted.insert(team_id)
    }

    /// Marks every team whose persisted scores already cover all criteria.
    /// An event without criteria seeds nothing.
    pub fn seed_from_store(
        &mut self,
        store: &ScoreStore,
        teams: &[Team],
        criteria: &[Criterion],
    ) -> usize {
        if criteria.is_empty() {
            return 0;
        }
        teams
            .iter()
            .filter(|team| store.is_complete(&team.id, criteria))
            .filter(|team| self.mark_submitted(team.id.clone()))
            .count()
    }

    pub fn submitted_count(&self, teams: &[Team]) -> usize {
        teams
            .iter()
            .filter(|team| self.submitted.contains(&team.id))
            .count()
    }

    /// Informational gate over the whole assigned set.
    pub fn all_submitted(&self, teams: &[Team]) -> bool {
        teams.iter().all(|team| self.submitted.contains(&team.id))
    }
}
