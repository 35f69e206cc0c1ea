//! Local gameplay of one attempt: selection, solved categories, countdown and lives.

use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    config::GameRules,
    dao::models::{CATEGORIES_PER_SESSION, WORDS_PER_CATEGORY, WordGridItem},
    services::scoring_engine::{SelectionOutcome, evaluate_selection, score_for_latency},
};

/// Why an attempt stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// The countdown reached zero.
    TimeUp,
    /// Every allowed mistake was used.
    OutOfLives,
    /// All four categories were found.
    AllSolved,
    /// The session was completed by an admin while the attempt was running.
    SessionClosed,
}

/// Final figures of an attempt, emitted once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct AttemptResult {
    /// Why the attempt stopped.
    pub reason: EndReason,
    /// Points earned.
    pub score: i64,
    /// All four categories solved.
    pub is_correct: bool,
}

/// Feedback on the last full selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Feedback {
    /// The selection matched one category.
    Solved {
        /// Category just solved.
        category: String,
        /// Points it earned.
        points: i64,
    },
    /// The selection mixed categories and cost a life.
    Mistake {
        /// Lives remaining.
        lives_left: u32,
    },
}

/// Serializable view of a running attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct AttemptView {
    /// The sixteen shuffled words.
    pub grid: Vec<WordGridItem>,
    /// Items currently selected, in selection order.
    pub selected: Vec<u32>,
    /// Categories solved so far.
    pub solved: Vec<String>,
    /// Seconds left on the countdown.
    pub remaining_secs: u32,
    /// Mistakes still allowed.
    pub lives: u32,
    /// Points earned so far.
    pub score: i64,
    /// Outcome of the last full selection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_feedback: Option<Feedback>,
}

/// One player's run through one session grid.
#[derive(Debug, Clone)]
pub struct Attempt {
    session_id: Uuid,
    grid: Vec<WordGridItem>,
    selected: Vec<u32>,
    solved: Vec<String>,
    window_secs: u32,
    remaining_secs: u32,
    /// Countdown value when the current category started.
    category_started_at: u32,
    lives: u32,
    max_points: u32,
    score: i64,
    last_feedback: Option<Feedback>,
    ended: bool,
}

impl Attempt {
    /// Start an attempt with a full countdown and every life.
    pub fn new(session_id: Uuid, grid: Vec<WordGridItem>, window_secs: u32, rules: &GameRules) -> Self {
        Self {
            session_id,
            grid,
            selected: Vec::with_capacity(WORDS_PER_CATEGORY),
            solved: Vec::with_capacity(CATEGORIES_PER_SESSION),
            window_secs,
            remaining_secs: window_secs,
            category_started_at: window_secs,
            lives: rules.max_mistakes,
            max_points: rules.max_points,
            score: 0,
            last_feedback: None,
            ended: false,
        }
    }

    /// Session the attempt belongs to.
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Toggle `item_id`; the fourth selected item is evaluated at once.
    ///
    /// Items of solved categories and unknown ids are ignored.
    pub fn toggle(&mut self, item_id: u32) -> Option<AttemptResult> {
        if self.ended {
            return None;
        }
        let Some(item) = self.grid.iter().find(|item| item.id == item_id) else {
            return None;
        };
        if self.solved.contains(&item.category) {
            return None;
        }

        if let Some(position) = self.selected.iter().position(|id| *id == item_id) {
            self.selected.remove(position);
            return None;
        }
        self.selected.push(item_id);
        if self.selected.len() < WORDS_PER_CATEGORY {
            return None;
        }
        self.evaluate()
    }

    fn evaluate(&mut self) -> Option<AttemptResult> {
        let items: Vec<WordGridItem> = self
            .selected
            .drain(..)
            .filter_map(|id| self.grid.iter().find(|item| item.id == id).cloned())
            .collect();

        match evaluate_selection(&items) {
            Ok(SelectionOutcome::Correct(category)) => {
                let elapsed = self.category_started_at.saturating_sub(self.remaining_secs);
                let category_window = f64::from(self.window_secs) / CATEGORIES_PER_SESSION as f64;
                let points = score_for_latency(f64::from(elapsed), category_window, self.max_points);
                self.score += points;
                self.category_started_at = self.remaining_secs;
                self.solved.push(category.clone());
                self.last_feedback = Some(Feedback::Solved { category, points });
                if self.solved.len() == CATEGORIES_PER_SESSION {
                    return self.finish(EndReason::AllSolved);
                }
                None
            }
            Ok(SelectionOutcome::Incorrect) | Err(_) => {
                self.lives = self.lives.saturating_sub(1);
                self.last_feedback = Some(Feedback::Mistake {
                    lives_left: self.lives,
                });
                if self.lives == 0 {
                    return self.finish(EndReason::OutOfLives);
                }
                None
            }
        }
    }

    /// Advance the countdown by `secs`.
    pub fn tick(&mut self, secs: u32) -> Option<AttemptResult> {
        if self.ended {
            return None;
        }
        self.remaining_secs = self.remaining_secs.saturating_sub(secs);
        if self.remaining_secs == 0 {
            return self.finish(EndReason::TimeUp);
        }
        None
    }

    /// Stop the attempt without producing a submission.
    pub fn close(&mut self) -> AttemptResult {
        self.ended = true;
        self.selected.clear();
        self.result(EndReason::SessionClosed)
    }

    fn finish(&mut self, reason: EndReason) -> Option<AttemptResult> {
        if self.ended {
            return None;
        }
        self.ended = true;
        self.selected.clear();
        Some(self.result(reason))
    }

    fn result(&self, reason: EndReason) -> AttemptResult {
        AttemptResult {
            reason,
            score: self.score,
            is_correct: self.solved.len() == CATEGORIES_PER_SESSION,
        }
    }

    /// Snapshot for the read model.
    pub fn view(&self) -> AttemptView {
        AttemptView {
            grid: self.grid.clone(),
            selected: self.selected.clone(),
            solved: self.solved.clone(),
            remaining_secs: self.remaining_secs,
            lives: self.lives,
            score: self.score,
            last_feedback: self.last_feedback.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> Vec<WordGridItem> {
        ["a", "b", "c", "d"]
            .iter()
            .enumerate()
            .flat_map(|(c, category)| {
                (0..4).map(move |w| WordGridItem {
                    id: (c * 4 + w) as u32 + 1,
                    text: format!("{category}{w}"),
                    category: (*category).into(),
                })
            })
            .collect()
    }

    fn attempt() -> Attempt {
        Attempt::new(Uuid::new_v4(), grid(), 60, &GameRules::default())
    }

    fn select(attempt: &mut Attempt, ids: [u32; 4]) -> Option<AttemptResult> {
        ids.into_iter().fold(None, |_, id| attempt.toggle(id))
    }

    #[test]
    fn toggle_deselects_and_ignores_unknown_items() {
        let mut attempt = attempt();
        attempt.toggle(1);
        attempt.toggle(2);
        attempt.toggle(1);
        attempt.toggle(99);
        assert_eq!(attempt.view().selected, vec![2]);
    }

    #[test]
    fn solving_scores_on_the_per_category_window() {
        let mut attempt = attempt();
        assert!(select(&mut attempt, [1, 2, 3, 4]).is_none());
        assert_eq!(attempt.view().score, 1000);

        // 15s window per category: 15s late earns half.
        attempt.tick(15);
        assert!(select(&mut attempt, [5, 6, 7, 8]).is_none());
        assert_eq!(attempt.view().score, 1500);
        assert_eq!(attempt.view().solved, vec!["a", "b"]);

        // Solved categories can no longer be selected.
        attempt.toggle(1);
        assert!(attempt.view().selected.is_empty());
    }

    #[test]
    fn all_solved_ends_once() {
        let mut attempt = attempt();
        select(&mut attempt, [1, 2, 3, 4]);
        select(&mut attempt, [5, 6, 7, 8]);
        select(&mut attempt, [9, 10, 11, 12]);
        let result = select(&mut attempt, [13, 14, 15, 16]).unwrap();
        assert_eq!(result.reason, EndReason::AllSolved);
        assert!(result.is_correct);
        assert_eq!(result.score, 4000);
        assert!(attempt.tick(60).is_none());
    }

    #[test]
    fn mistakes_consume_lives() {
        let mut attempt = attempt();
        for round in 0..3 {
            assert!(select(&mut attempt, [1, 2, 3, 5]).is_none());
            assert_eq!(
                attempt.view().last_feedback,
                Some(Feedback::Mistake {
                    lives_left: 3 - round
                })
            );
        }
        let result = select(&mut attempt, [1, 2, 3, 5]).unwrap();
        assert_eq!(result.reason, EndReason::OutOfLives);
        assert!(!result.is_correct);
    }

    #[test]
    fn countdown_ends_the_attempt() {
        let mut attempt = attempt();
        select(&mut attempt, [1, 2, 3, 4]);
        assert!(attempt.tick(59).is_none());
        let result = attempt.tick(5).unwrap();
        assert_eq!(result.reason, EndReason::TimeUp);
        assert_eq!(result.score, 1000);
        assert_eq!(attempt.view().remaining_secs, 0);
        assert!(attempt.toggle(5).is_none());
    }
}
