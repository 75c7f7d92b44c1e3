use std::collections::{BTreeMap, HashMap};

use shared::domain::{Criterion, CriterionId, TeamId};

use crate::error::ScoreRejection;

/// Result of one edit. `Cleared` means the entry for the pair is gone, which
/// is not the same as a score of zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScoreEdit {
    Accepted(f64),
    Cleared,
    Rejected(ScoreRejection),
}

impl ScoreEdit {
    pub fn changed_state(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }
}

/// Parses raw input. `Ok(None)` is an empty field.
pub fn parse_score(raw: &str) -> Result<Option<f64>, ScoreRejection> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    let value: f64 = raw.parse().map_err(|_| ScoreRejection::NotANumber)?;
    if !value.is_finite() {
        return Err(ScoreRejection::NotANumber);
    }
    Ok(Some(value))
}

#[derive(Debug, Clone, Default)]
pub struct ScoreStore {
    scores: HashMap<TeamId, BTreeMap<CriterionId, f64>>,
}

impl ScoreStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_score(
        &mut self,
        team_id: &TeamId,
        criterion_id: &CriterionId,
        raw_value: &str,
        max_score: f64,
    ) -> ScoreEdit {
        match parse_score(raw_value) {
            Err(rejection) => ScoreEdit::Rejected(rejection),
            Ok(None) => {
                self.clear(team_id, criterion_id);
                ScoreEdit::Cleared
            }
            Ok(Some(value)) if !(0.0..=max_score).contains(&value) => {
                ScoreEdit::Rejected(ScoreRejection::OutOfRange)
            }
            Ok(Some(value)) => {
                self.seed(team_id, criterion_id, value);
                ScoreEdit::Accepted(value)
            }
        }
    }

    /// Inserts an already validated value, overwriting any previous one.
    pub fn seed(&mut self, team_id: &TeamId, criterion_id: &CriterionId, value: f64) {
        self.scores
            .entry(team_id.clone())
            .or_default()
            .insert(criterion_id.clone(), value);
    }

    fn clear(&mut self, team_id: &TeamId, criterion_id: &CriterionId) {
        if let Some(team_scores) = self.scores.get_mut(team_id) {
            team_scores.remove(criterion_id);
            if team_scores.is_empty() {
                self.scores.remove(team_id);
            }
        }
    }

    pub fn score(&self, team_id: &TeamId, criterion_id: &CriterionId) -> Option<f64> {
        self.scores
            .get(team_id)
            .and_then(|team_scores| team_scores.get(criterion_id))
            .copied()
    }

    pub fn get_scores(&self, team_id: &TeamId) -> BTreeMap<CriterionId, f64> {
        self.scores.get(team_id).cloned().unwrap_or_default()
    }

    pub fn is_complete(&self, team_id: &TeamId, criteria: &[Criterion]) -> bool {
        criteria
            .iter()
            .all(|criterion| self.score(team_id, &criterion.id).is_some())
    }

    pub fn missing_criteria(&self, team_id: &TeamId, criteria: &[Criterion]) -> Vec<CriterionId> {
        criteria
            .iter()
            .filter(|criterion| self.score(team_id, &criterion.id).is_none())
            .map(|criterion| criterion.id.clone())
            .collect()
    }

    /// Sum of `score * weight`, only once every criterion is scored.
    pub fn weighted_total(&self, team_id: &TeamId, criteria: &[Criterion]) -> Option<f64> {
        criteria.iter().try_fold(0.0, |total, criterion| {
            self.score(team_id, &criterion.id)
                .map(|score| total + score * criterion.weight)
        })
    }
}

#[cfg(test)]
#[path = "tests/score_store_tests.rs"]
mod tests;
