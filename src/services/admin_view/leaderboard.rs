//! Pure admin read model: leaderboard, session list, submission feed and per-session tallies.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dao::models::{SessionEntity, SessionStatus, SubmissionEntity, TeamEntity},
    dto::{
        common::{SessionSummary, TeamSummary},
        format_system_time,
    },
    services::scoring_engine::{TeamSessionScore, tally},
    state::session_machine::is_forward,
};

/// One accepted submission as shown in the live feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct FeedEntry {
    /// Submission identifier.
    pub submission_id: Uuid,
    /// Session submitted to.
    pub session_id: Uuid,
    /// Credited team.
    pub team_id: Uuid,
    /// Team name at the time the entry was added.
    pub team_name: String,
    /// Submitting player.
    pub player_id: Uuid,
    /// Points earned.
    pub score: i64,
    /// All four categories solved.
    pub is_correct: bool,
    /// Store timestamp (RFC 3339).
    pub submitted_at: String,
}

/// Snapshot published to admin subscribers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct AdminSnapshot {
    /// Teams by score, highest first.
    pub teams: Vec<TeamSummary>,
    /// Sessions by planned start, newest first.
    pub sessions: Vec<SessionSummary>,
    /// Session whose submissions fill the feed.
    pub viewed_session: Option<Uuid>,
    /// Newest first.
    pub feed: Vec<FeedEntry>,
    /// Running per-team totals keyed by session.
    pub session_scores: BTreeMap<Uuid, Vec<TeamSessionScore>>,
}

struct CachedTeam {
    team: TeamEntity,
    first_seen: u64,
}

/// Mutable state behind [`AdminSnapshot`].
pub struct Leaderboard {
    teams: Vec<CachedTeam>,
    next_seen: u64,
    sessions: Vec<SessionEntity>,
    viewed_session: Option<Uuid>,
    feed: VecDeque<FeedEntry>,
    feed_limit: usize,
    tallies: HashMap<Uuid, Vec<TeamSessionScore>>,
    seen_submissions: HashSet<Uuid>,
}

impl Leaderboard {
    /// Empty board keeping at most `feed_limit` feed entries.
    pub fn new(feed_limit: usize) -> Self {
        Self {
            teams: Vec::new(),
            next_seen: 0,
            sessions: Vec::new(),
            viewed_session: None,
            feed: VecDeque::new(),
            feed_limit: feed_limit.max(1),
            tallies: HashMap::new(),
            seen_submissions: HashSet::new(),
        }
    }

    /// Replace everything with freshly read rows.
    ///
    /// Known teams keep their first-seen rank so ties do not reshuffle on reload.
    pub fn load(&mut self, teams: Vec<TeamEntity>, sessions: Vec<SessionEntity>) {
        let previous: HashMap<Uuid, u64> = self
            .teams
            .iter()
            .map(|cached| (cached.team.id, cached.first_seen))
            .collect();
        self.teams = teams
            .into_iter()
            .map(|team| {
                let first_seen = match previous.get(&team.id) {
                    Some(seen) => *seen,
                    None => self.bump_seen(),
                };
                CachedTeam { team, first_seen }
            })
            .collect();
        self.sort_teams();

        self.sessions = sessions;
        self.sort_sessions();
        let known: HashSet<Uuid> = self.sessions.iter().map(|session| session.id).collect();
        self.tallies.retain(|id, _| known.contains(id));
        let active = self
            .sessions
            .iter()
            .find(|session| session.status == SessionStatus::Active)
            .map(|session| session.id);
        if let Some(active) = active {
            self.view_session(active);
        } else if self.viewed_session.is_some_and(|id| !known.contains(&id)) {
            self.view_session_none();
        }
    }

    fn bump_seen(&mut self) -> u64 {
        let seen = self.next_seen;
        self.next_seen += 1;
        seen
    }

    fn sort_teams(&mut self) {
        self.teams.sort_by(|a, b| {
            b.team
                .score
                .cmp(&a.team.score)
                .then(a.first_seen.cmp(&b.first_seen))
        });
    }

    fn sort_sessions(&mut self) {
        self.sessions.sort_by(|a, b| b.start_time.cmp(&a.start_time));
    }

    /// Replace-or-insert; score and player count never move down.
    pub fn upsert_team(&mut self, team: TeamEntity) {
        match self.teams.iter_mut().find(|cached| cached.team.id == team.id) {
            Some(cached) => {
                cached.team.name = team.name;
                cached.team.score = cached.team.score.max(team.score);
                cached.team.player_count = cached.team.player_count.max(team.player_count);
            }
            None => {
                let first_seen = self.bump_seen();
                self.teams.push(CachedTeam { team, first_seen });
            }
        }
        self.sort_teams();
    }

    /// Forget a deleted team.
    pub fn remove_team(&mut self, id: Uuid) {
        self.teams.retain(|cached| cached.team.id != id);
    }

    /// Cached name of a team.
    pub fn team_name(&self, id: Uuid) -> Option<&str> {
        self.teams
            .iter()
            .find(|cached| cached.team.id == id)
            .map(|cached| cached.team.name.as_str())
    }

    /// Replace-or-insert; a stale event never moves a status backwards.
    pub fn upsert_session(&mut self, session: SessionEntity) {
        let activated = session.status == SessionStatus::Active;
        match self.sessions.iter_mut().find(|cached| cached.id == session.id) {
            Some(cached) => {
                if !is_forward(cached.status, session.status) {
                    return;
                }
                let became_active = activated && cached.status != SessionStatus::Active;
                let submission_count = cached.submission_count.max(session.submission_count);
                *cached = session;
                cached.submission_count = submission_count;
                if became_active {
                    let id = cached.id;
                    self.view_session(id);
                }
            }
            None => {
                let id = session.id;
                self.sessions.push(session);
                if activated {
                    self.view_session(id);
                }
            }
        }
        self.sort_sessions();
    }

    /// Forget a deleted session and its tally.
    pub fn remove_session(&mut self, id: Uuid) {
        self.sessions.retain(|session| session.id != id);
        self.tallies.remove(&id);
        if self.viewed_session == Some(id) {
            self.view_session_none();
        }
    }

    /// Whether the session is cached.
    pub fn has_session(&self, id: Uuid) -> bool {
        self.sessions.iter().any(|session| session.id == id)
    }

    /// Switch the feed to `session_id`, clearing it when the session changes.
    pub fn view_session(&mut self, session_id: Uuid) {
        if self.viewed_session != Some(session_id) {
            self.feed.clear();
            self.viewed_session = Some(session_id);
        }
    }

    fn view_session_none(&mut self) {
        self.feed.clear();
        self.viewed_session = None;
    }

    /// Count a submission once and feed it when its session is viewed.
    ///
    /// Ids already counted by a store rebuild only reach the feed.
    pub fn record_submission(&mut self, submission: &SubmissionEntity, team_name: String) {
        if self.seen_submissions.insert(submission.id) {
            let tally = self.tallies.entry(submission.session_id).or_default();
            match tally.iter_mut().find(|entry| entry.team_id == submission.team_id) {
                Some(entry) => {
                    entry.score += submission.score;
                    entry.submissions += 1;
                }
                None => tally.push(TeamSessionScore {
                    team_id: submission.team_id,
                    score: submission.score,
                    submissions: 1,
                }),
            }
            tally.sort_by(|a, b| b.score.cmp(&a.score));
        }

        let in_feed = self
            .feed
            .iter()
            .any(|entry| entry.submission_id == submission.id);
        if self.viewed_session == Some(submission.session_id) && !in_feed {
            self.feed.push_front(FeedEntry {
                submission_id: submission.id,
                session_id: submission.session_id,
                team_id: submission.team_id,
                team_name,
                player_id: submission.player_id,
                score: submission.score,
                is_correct: submission.is_correct,
                submitted_at: format_system_time(submission.submitted_at),
            });
            self.feed.truncate(self.feed_limit);
        }
    }

    /// Rebuild the tally of `session_id` from its stored submissions and mark
    /// them counted, so their queued events do not add them again.
    pub fn replace_scores(
        &mut self,
        session_id: Uuid,
        submissions: &[SubmissionEntity],
    ) -> Vec<TeamSessionScore> {
        let scores = tally(submissions);
        self.seen_submissions
            .extend(submissions.iter().map(|submission| submission.id));
        self.tallies.insert(session_id, scores.clone());
        scores
    }

    /// Live tally of a session; empty when never loaded.
    pub fn session_scores(&self, session_id: Uuid) -> Vec<TeamSessionScore> {
        self.tallies.get(&session_id).cloned().unwrap_or_default()
    }

    /// Project the board for subscribers.
    pub fn snapshot(&self) -> AdminSnapshot {
        AdminSnapshot {
            teams: self
                .teams
                .iter()
                .map(|cached| TeamSummary::from(&cached.team))
                .collect(),
            sessions: self.sessions.iter().map(SessionSummary::from).collect(),
            viewed_session: self.viewed_session,
            feed: self.feed.iter().cloned().collect(),
            session_scores: self
                .tallies
                .iter()
                .map(|(id, scores)| (*id, scores.clone()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    fn team(name: &str, score: i64) -> TeamEntity {
        TeamEntity {
            score,
            ..TeamEntity::new("main".into(), name.into())
        }
    }

    fn session(offset_secs: u64, status: SessionStatus) -> SessionEntity {
        SessionEntity {
            status,
            ..SessionEntity::scheduled(
                "main".into(),
                SystemTime::UNIX_EPOCH + Duration::from_secs(offset_secs),
                vec![],
                60,
            )
        }
    }

    fn submission(session_id: Uuid, team_id: Uuid, score: i64) -> SubmissionEntity {
        SubmissionEntity {
            id: Uuid::new_v4(),
            player_id: Uuid::new_v4(),
            team_id,
            session_id,
            is_correct: true,
            score,
            submitted_at: SystemTime::now(),
        }
    }

    fn names(board: &Leaderboard) -> Vec<String> {
        board.snapshot().teams.into_iter().map(|t| t.name).collect()
    }

    #[test]
    fn ties_keep_first_seen_order() {
        let mut board = Leaderboard::new(10);
        let owls = team("owls", 0);
        let foxes = team("foxes", 0);
        board.upsert_team(owls.clone());
        board.upsert_team(foxes.clone());
        assert_eq!(names(&board), ["owls", "foxes"]);

        board.upsert_team(TeamEntity { score: 10, ..foxes.clone() });
        assert_eq!(names(&board), ["foxes", "owls"]);

        board.upsert_team(TeamEntity { score: 10, ..owls });
        assert_eq!(names(&board), ["owls", "foxes"]);
    }

    #[test]
    fn stale_team_events_never_lower_counters() {
        let mut board = Leaderboard::new(10);
        let owls = team("owls", 0);
        board.upsert_team(TeamEntity {
            score: 50,
            player_count: 3,
            ..owls.clone()
        });
        board.upsert_team(TeamEntity {
            score: 20,
            player_count: 1,
            ..owls.clone()
        });

        let snapshot = board.snapshot();
        assert_eq!(snapshot.teams[0].score, 50);
        assert_eq!(snapshot.teams[0].player_count, 3);

        board.remove_team(owls.id);
        assert!(board.snapshot().teams.is_empty());
    }

    #[test]
    fn sessions_sorted_and_never_move_backwards() {
        let mut board = Leaderboard::new(10);
        let older = session(100, SessionStatus::Scheduled);
        let newer = session(200, SessionStatus::Scheduled);
        board.load(vec![], vec![older.clone(), newer.clone()]);
        let ids: Vec<Uuid> = board.snapshot().sessions.iter().map(|s| s.id).collect();
        assert_eq!(ids, [newer.id, older.id]);

        board.upsert_session(SessionEntity {
            status: SessionStatus::Completed,
            ..older.clone()
        });
        board.upsert_session(SessionEntity {
            status: SessionStatus::Active,
            ..older.clone()
        });
        let status = board
            .snapshot()
            .sessions
            .into_iter()
            .find(|s| s.id == older.id)
            .unwrap()
            .status;
        assert_eq!(status, SessionStatus::Completed);
    }

    #[test]
    fn activation_switches_and_clears_the_feed() {
        let mut board = Leaderboard::new(10);
        let owls = team("owls", 0);
        board.upsert_team(owls.clone());
        let first = session(100, SessionStatus::Active);
        board.upsert_session(first.clone());
        board.record_submission(&submission(first.id, owls.id, 300), "owls".into());
        assert_eq!(board.snapshot().feed.len(), 1);

        let second = session(200, SessionStatus::Scheduled);
        board.upsert_session(second.clone());
        board.upsert_session(SessionEntity {
            status: SessionStatus::Active,
            ..second.clone()
        });

        let snapshot = board.snapshot();
        assert_eq!(snapshot.viewed_session, Some(second.id));
        assert!(snapshot.feed.is_empty());
        assert_eq!(board.session_scores(first.id)[0].score, 300);
    }

    #[test]
    fn tally_counts_each_submission_once_and_feed_is_bounded() {
        let mut board = Leaderboard::new(2);
        let owls = team("owls", 0);
        let foxes = team("foxes", 0);
        let active = session(100, SessionStatus::Active);
        board.load(vec![owls.clone(), foxes.clone()], vec![active.clone()]);

        let repeated = submission(active.id, owls.id, 400);
        board.record_submission(&repeated, "owls".into());
        board.record_submission(&repeated, "owls".into());
        board.record_submission(&submission(active.id, foxes.id, 900), "foxes".into());
        board.record_submission(&submission(active.id, owls.id, 100), "owls".into());

        let scores = board.session_scores(active.id);
        assert_eq!(scores[0].team_id, foxes.id);
        assert_eq!(scores[1].score, 500);
        assert_eq!(scores[1].submissions, 2);

        let feed = board.snapshot().feed;
        assert_eq!(feed.len(), 2);
        assert_eq!(feed[0].score, 100);
    }

    #[test]
    fn rebuilt_tally_ignores_events_it_already_counted() {
        let mut board = Leaderboard::new(10);
        let owls = team("owls", 0);
        let active = session(100, SessionStatus::Active);
        board.load(vec![owls.clone()], vec![active.clone()]);

        // Rebuild first, then the queued insert event arrives.
        let early = submission(active.id, owls.id, 300);
        let rebuilt = board.replace_scores(active.id, &[early.clone()]);
        assert_eq!(rebuilt[0].score, 300);
        board.record_submission(&early, "owls".into());
        assert_eq!(board.session_scores(active.id)[0].score, 300);
        assert_eq!(board.session_scores(active.id)[0].submissions, 1);
        assert_eq!(board.snapshot().feed.len(), 1);

        // Event first, then a rebuild that contains it, then a fresh event.
        let late = submission(active.id, owls.id, 200);
        board.record_submission(&late, "owls".into());
        board.replace_scores(active.id, &[early.clone(), late.clone()]);
        board.record_submission(&late, "owls".into());
        let scores = board.session_scores(active.id);
        assert_eq!(scores[0].score, 500);
        assert_eq!(scores[0].submissions, 2);
        assert_eq!(board.snapshot().feed.len(), 2);
    }
}
