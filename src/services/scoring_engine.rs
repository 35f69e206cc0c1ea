use std::{collections::HashMap, time::SystemTime};

use serde::Serialize;
use tracing::{debug, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dao::models::{
        RecordedSubmission, SubmissionEntity, SubmissionQuery, TeamEntity, WORDS_PER_CATEGORY,
        WordGridItem,
    },
    error::ServiceError,
    state::SharedState,
};

/// Verdict on a full selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionOutcome {
    /// All items share this category.
    Correct(String),
    /// Items span several categories.
    Incorrect,
}

/// Decide whether four selected items share one category.
pub fn evaluate_selection(selected: &[WordGridItem]) -> Result<SelectionOutcome, ServiceError> {
    if selected.len() != WORDS_PER_CATEGORY {
        return Err(ServiceError::Validation(format!(
            "a selection needs exactly {WORDS_PER_CATEGORY} items (got {})",
            selected.len()
        )));
    }

    let category = &selected[0].category;
    if selected.iter().all(|item| &item.category == category) {
        Ok(SelectionOutcome::Correct(category.clone()))
    } else {
        Ok(SelectionOutcome::Incorrect)
    }
}

/// Points for a solve `elapsed_secs` into a `window_secs` window.
///
/// Decays linearly from `max_points` to half of it at the end of the window
/// and stays there afterwards. A non-positive window counts as fully elapsed.
pub fn score_for_latency(elapsed_secs: f64, window_secs: f64, max_points: u32) -> i64 {
    let ratio = if window_secs > 0.0 {
        (elapsed_secs / window_secs).clamp(0.0, 1.0)
    } else {
        1.0
    };
    (f64::from(max_points) * (1.0 - ratio / 2.0)).round() as i64
}

/// Atomically add a non-negative `delta` to a team score.
pub async fn apply_score_delta(
    state: &SharedState,
    team_id: Uuid,
    delta: i64,
) -> Result<TeamEntity, ServiceError> {
    if delta < 0 {
        return Err(ServiceError::Validation(format!(
            "score delta must not be negative (got {delta})"
        )));
    }
    let store = state.require_store().await?;
    Ok(store.increment_team_score(team_id, delta).await?)
}

/// Final result of one player attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionRequest {
    /// Submitting player.
    pub player_id: Uuid,
    /// Team credited with the score.
    pub team_id: Uuid,
    /// Session the attempt belongs to.
    pub session_id: Uuid,
    /// All four categories solved.
    pub is_correct: bool,
    /// Points earned; never negative.
    pub score: i64,
}

/// Record a submission and credit its score as one store unit.
///
/// A second submission for the same (player, session), or one arriving after
/// the session left `active`, is a conflict and leaves the score untouched.
/// Retrying after a transient failure is safe.
pub async fn record_submission(
    state: &SharedState,
    request: SubmissionRequest,
) -> Result<RecordedSubmission, ServiceError> {
    if request.score < 0 {
        return Err(ServiceError::Validation(format!(
            "submission score must not be negative (got {})",
            request.score
        )));
    }

    let store = state.require_store().await?;
    let submission = SubmissionEntity {
        id: Uuid::new_v4(),
        player_id: request.player_id,
        team_id: request.team_id,
        session_id: request.session_id,
        is_correct: request.is_correct,
        score: request.score,
        submitted_at: SystemTime::now(),
    };

    match store.record_submission(submission).await {
        Ok(recorded) => {
            debug!(
                player_id = %request.player_id,
                session_id = %request.session_id,
                score = request.score,
                team_score = recorded.team.score,
                "submission recorded"
            );
            Ok(recorded)
        }
        Err(err) => {
            let err = ServiceError::from(err);
            match &err {
                ServiceError::Conflict(conflict) => {
                    debug!(player_id = %request.player_id, %conflict, "submission rejected");
                }
                other => {
                    warn!(player_id = %request.player_id, error = %other, "submission failed");
                }
            }
            Err(err)
        }
    }
}

/// Per-team total for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct TeamSessionScore {
    /// Team the total belongs to.
    pub team_id: Uuid,
    /// Sum of the team's submission scores.
    pub score: i64,
    /// Submissions counted.
    pub submissions: u32,
}

/// Recompute per-team totals of a session from its submissions, highest first.
pub async fn fetch_session_scores(
    state: &SharedState,
    session_id: Uuid,
) -> Result<Vec<TeamSessionScore>, ServiceError> {
    let submissions = fetch_session_submissions(state, session_id).await?;
    Ok(tally(&submissions))
}

/// Every stored submission of `session_id`.
pub async fn fetch_session_submissions(
    state: &SharedState,
    session_id: Uuid,
) -> Result<Vec<SubmissionEntity>, ServiceError> {
    let store = state.require_store().await?;
    Ok(store
        .list_submissions(SubmissionQuery {
            session_id: Some(session_id),
            team_id: None,
        })
        .await?)
}

/// Sum submissions per team, ordering by score desc then first appearance.
pub fn tally(submissions: &[SubmissionEntity]) -> Vec<TeamSessionScore> {
    let mut order: Vec<Uuid> = Vec::new();
    let mut totals: HashMap<Uuid, TeamSessionScore> = HashMap::new();
    for submission in submissions {
        let entry = totals.entry(submission.team_id).or_insert_with(|| {
            order.push(submission.team_id);
            TeamSessionScore {
                team_id: submission.team_id,
                score: 0,
                submissions: 0,
            }
        });
        entry.score += submission.score;
        entry.submissions += 1;
    }

    let mut scores: Vec<TeamSessionScore> = order
        .into_iter()
        .filter_map(|team_id| totals.remove(&team_id))
        .collect();
    scores.sort_by(|a, b| b.score.cmp(&a.score));
    scores
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dao::storage::Conflict,
        services::{
            session_controller,
            test_support::{active_session, memory_state, team},
        },
    };

    fn item(id: u32, category: &str) -> WordGridItem {
        WordGridItem {
            id,
            text: format!("word-{id}"),
            category: category.into(),
        }
    }

    #[test]
    fn latency_score_decays_to_half() {
        assert_eq!(score_for_latency(0.0, 60.0, 1000), 1000);
        assert_eq!(score_for_latency(30.0, 60.0, 1000), 750);
        assert_eq!(score_for_latency(60.0, 60.0, 1000), 500);
        assert_eq!(score_for_latency(90.0, 60.0, 1000), 500);
        assert_eq!(score_for_latency(-5.0, 60.0, 1000), 1000);
        assert_eq!(score_for_latency(1.0, 0.0, 1000), 500);
    }

    #[test]
    fn selection_needs_four_items_of_one_category() {
        let same = [item(1, "a"), item(2, "a"), item(3, "a"), item(4, "a")];
        assert_eq!(
            evaluate_selection(&same).unwrap(),
            SelectionOutcome::Correct("a".into())
        );

        let mixed = [item(1, "a"), item(2, "a"), item(3, "b"), item(4, "a")];
        assert_eq!(
            evaluate_selection(&mixed).unwrap(),
            SelectionOutcome::Incorrect
        );

        assert!(matches!(
            evaluate_selection(&same[..3]),
            Err(ServiceError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn negative_delta_is_rejected() {
        let (state, _) = memory_state();
        let owls = team(&state, "owls").await;
        assert!(matches!(
            apply_score_delta(&state, owls.id, -1).await,
            Err(ServiceError::Validation(_))
        ));
        assert!(matches!(
            apply_score_delta(&state, Uuid::new_v4(), 5).await,
            Err(ServiceError::Data(_))
        ));
        assert_eq!(apply_score_delta(&state, owls.id, 5).await.unwrap().score, 5);
    }

    #[tokio::test]
    async fn concurrent_double_submit_credits_once() {
        let (state, _) = memory_state();
        let owls = team(&state, "owls").await;
        let session = active_session(&state).await;
        let request = SubmissionRequest {
            player_id: Uuid::new_v4(),
            team_id: owls.id,
            session_id: session.id,
            is_correct: true,
            score: 800,
        };

        let (first, second) = tokio::join!(
            record_submission(&state, request),
            record_submission(&state, request)
        );
        let outcomes = [first.is_ok(), second.is_ok()];
        assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);
        let rejected = if first.is_err() { first } else { second };
        assert!(matches!(
            rejected,
            Err(ServiceError::Conflict(Conflict::DuplicateSubmission { .. }))
        ));

        let store = state.require_store().await.unwrap();
        assert_eq!(store.find_team(owls.id).await.unwrap().unwrap().score, 800);
    }

    #[tokio::test]
    async fn late_submission_is_rejected() {
        let (state, _) = memory_state();
        let owls = team(&state, "owls").await;
        let session = active_session(&state).await;
        session_controller::end_session(&state, session.id)
            .await
            .unwrap();

        let result = record_submission(
            &state,
            SubmissionRequest {
                player_id: Uuid::new_v4(),
                team_id: owls.id,
                session_id: session.id,
                is_correct: false,
                score: 300,
            },
        )
        .await;
        assert!(matches!(
            result,
            Err(ServiceError::Conflict(Conflict::SessionNotActive { .. }))
        ));
        let store = state.require_store().await.unwrap();
        assert_eq!(store.find_team(owls.id).await.unwrap().unwrap().score, 0);
    }

    #[tokio::test]
    async fn outage_surfaces_as_retryable() {
        let (state, memory) = memory_state();
        let owls = team(&state, "owls").await;
        let session = active_session(&state).await;
        let request = SubmissionRequest {
            player_id: Uuid::new_v4(),
            team_id: owls.id,
            session_id: session.id,
            is_correct: true,
            score: 1000,
        };

        memory.set_online(false);
        let err = record_submission(&state, request).await.unwrap_err();
        assert!(err.is_retryable());

        memory.set_online(true);
        assert!(record_submission(&state, request).await.is_ok());
    }

    #[tokio::test]
    async fn team_score_equals_sum_of_submissions() {
        let (state, _) = memory_state();
        let owls = team(&state, "owls").await;
        let foxes = team(&state, "foxes").await;
        let session = active_session(&state).await;

        let plays = [(owls.id, 900), (owls.id, 650), (foxes.id, 500), (owls.id, 0)];
        for (team_id, score) in plays {
            record_submission(
                &state,
                SubmissionRequest {
                    player_id: Uuid::new_v4(),
                    team_id,
                    session_id: session.id,
                    is_correct: score > 0,
                    score,
                },
            )
            .await
            .unwrap();
        }

        let store = state.require_store().await.unwrap();
        let scores = fetch_session_scores(&state, session.id).await.unwrap();
        for team_id in [owls.id, foxes.id] {
            let stored = store.find_team(team_id).await.unwrap().unwrap().score;
            let tallied = scores
                .iter()
                .find(|entry| entry.team_id == team_id)
                .map(|entry| entry.score)
                .unwrap();
            assert_eq!(stored, tallied);
        }
        assert_eq!(scores[0].team_id, owls.id);
        assert_eq!(scores[0].score, 1550);
        assert_eq!(scores[0].submissions, 3);
    }
}
