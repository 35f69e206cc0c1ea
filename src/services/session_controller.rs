use std::{collections::HashSet, time::SystemTime};

use rand::{
    Rng, rng,
    seq::{IndexedRandom, SliceRandom},
};
use tracing::info;
use uuid::Uuid;

use crate::{
    config::WordBank,
    dao::{
        models::{
            CATEGORIES_PER_SESSION, SessionEntity, SessionOrder, SessionQuery, SessionStatus,
            WORDS_PER_CATEGORY, WordGridItem,
        },
        storage::Conflict,
    },
    error::ServiceError,
    state::{
        SharedState,
        session_machine::{SessionEvent, compute_transition},
    },
};

/// Create a scheduled session after validating its categories and window.
pub async fn create_session(
    state: &SharedState,
    shard: String,
    start_time: SystemTime,
    categories: Vec<String>,
    window_secs: Option<u32>,
) -> Result<SessionEntity, ServiceError> {
    let categories = normalize_categories(categories)?;
    let window_secs = window_secs.unwrap_or(state.config().rules.window_secs);
    if window_secs == 0 {
        return Err(ServiceError::Validation(
            "window_secs must be positive".into(),
        ));
    }

    let store = state.require_store().await?;
    let session = store
        .insert_session(SessionEntity::scheduled(
            shard,
            start_time,
            categories,
            window_secs,
        ))
        .await?;
    info!(session_id = %session.id, shard = %session.shard, "session scheduled");
    Ok(session)
}

/// Trim categories and require exactly four distinct, non-blank names.
fn normalize_categories(categories: Vec<String>) -> Result<Vec<String>, ServiceError> {
    if categories.len() != CATEGORIES_PER_SESSION {
        return Err(ServiceError::Validation(format!(
            "a session needs exactly {CATEGORIES_PER_SESSION} categories (got {})",
            categories.len()
        )));
    }

    let trimmed: Vec<String> = categories
        .into_iter()
        .map(|category| category.trim().to_owned())
        .collect();
    if trimmed.iter().any(String::is_empty) {
        return Err(ServiceError::Validation(
            "category names must not be blank".into(),
        ));
    }
    let distinct: HashSet<&str> = trimmed.iter().map(String::as_str).collect();
    if distinct.len() != trimmed.len() {
        return Err(ServiceError::Validation(
            "categories must be distinct".into(),
        ));
    }
    Ok(trimmed)
}

/// Move a scheduled session to active.
pub async fn start_session(state: &SharedState, id: Uuid) -> Result<SessionEntity, ServiceError> {
    let session = apply_event(state, id, SessionEvent::Start).await?;
    info!(session_id = %id, shard = %session.shard, "session started");
    Ok(session)
}

/// Move an active session to completed. Scores are left untouched.
pub async fn end_session(state: &SharedState, id: Uuid) -> Result<SessionEntity, ServiceError> {
    let session = apply_event(state, id, SessionEvent::End).await?;
    info!(session_id = %id, shard = %session.shard, "session completed");
    Ok(session)
}

/// Validate `event` against the current status, then apply it as a conditional update.
async fn apply_event(
    state: &SharedState,
    id: Uuid,
    event: SessionEvent,
) -> Result<SessionEntity, ServiceError> {
    let store = state.require_store().await?;
    let current = store
        .find_session(id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("session `{id}` not found")))?;

    let transition = compute_transition(current.status, event).map_err(|invalid| {
        ServiceError::Conflict(Conflict::StatusMismatch {
            session_id: id,
            expected: required_status(invalid.event),
            actual: invalid.from,
        })
    })?;

    Ok(store
        .transition_session(id, transition.from, transition.to, SystemTime::now())
        .await?)
}

fn required_status(event: SessionEvent) -> SessionStatus {
    match event {
        SessionEvent::Start => SessionStatus::Scheduled,
        SessionEvent::End => SessionStatus::Active,
    }
}

/// Delete a session that no submission references.
pub async fn delete_session(state: &SharedState, id: Uuid) -> Result<SessionEntity, ServiceError> {
    let store = state.require_store().await?;
    let removed = store
        .delete_session(id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("session `{id}` not found")))?;
    info!(session_id = %id, "session deleted");
    Ok(removed)
}

/// The active session of `shard`, if any.
pub async fn current_active(
    state: &SharedState,
    shard: &str,
) -> Result<Option<SessionEntity>, ServiceError> {
    let store = state.require_store().await?;
    let sessions = store
        .find_sessions(
            SessionQuery::in_shard(shard, SessionStatus::Active)
                .order(SessionOrder::StartDesc)
                .limit(1),
        )
        .await?;
    Ok(sessions.into_iter().next())
}

/// The scheduled session of `shard` with the earliest planned start.
pub async fn next_scheduled(
    state: &SharedState,
    shard: &str,
) -> Result<Option<SessionEntity>, ServiceError> {
    let store = state.require_store().await?;
    let sessions = store
        .find_sessions(
            SessionQuery::in_shard(shard, SessionStatus::Scheduled)
                .order(SessionOrder::StartAsc)
                .limit(1),
        )
        .await?;
    Ok(sessions.into_iter().next())
}

/// Every session of `shard`, newest planned start first.
pub async fn list_sessions(
    state: &SharedState,
    shard: &str,
) -> Result<Vec<SessionEntity>, ServiceError> {
    let store = state.require_store().await?;
    Ok(store
        .find_sessions(SessionQuery {
            shard: Some(shard.to_owned()),
            ..SessionQuery::default()
        })
        .await?)
}

/// Draw four words per category of `session` and shuffle the sixteen cells.
pub fn assemble_grid(
    word_bank: &WordBank,
    session: &SessionEntity,
) -> Result<Vec<WordGridItem>, ServiceError> {
    assemble_grid_with(word_bank, &session.categories, &mut rng())
}

/// [`assemble_grid`] with an explicit random source.
pub fn assemble_grid_with<R: Rng + ?Sized>(
    word_bank: &WordBank,
    categories: &[String],
    rng: &mut R,
) -> Result<Vec<WordGridItem>, ServiceError> {
    let mut grid = Vec::with_capacity(categories.len() * WORDS_PER_CATEGORY);
    for category in categories {
        let words = word_bank.words(category);
        if words.len() < WORDS_PER_CATEGORY {
            return Err(ServiceError::Data(format!(
                "category `{category}` has {} word(s), {WORDS_PER_CATEGORY} needed",
                words.len()
            )));
        }
        grid.extend(
            words
                .choose_multiple(rng, WORDS_PER_CATEGORY)
                .map(|word| WordGridItem {
                    id: word.id,
                    text: word.text.clone(),
                    category: category.clone(),
                }),
        );
    }
    grid.shuffle(rng);
    Ok(grid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::AppConfig,
        services::test_support::{memory_state, scheduled_session},
    };
    use indexmap::IndexMap;
    use rand::{SeedableRng, rngs::StdRng};
    use std::collections::HashMap;

    fn categories() -> Vec<String> {
        [
            "Programming Languages",
            "Frontend Frameworks",
            "Databases",
            "Version Control",
        ]
        .map(String::from)
        .to_vec()
    }

    #[tokio::test]
    async fn create_session_validates_categories() {
        let (state, _) = memory_state();
        let now = SystemTime::now();

        let three = categories()[..3].to_vec();
        assert!(matches!(
            create_session(&state, "main".into(), now, three, None).await,
            Err(ServiceError::Validation(_))
        ));

        let mut duplicated = categories();
        duplicated[3] = duplicated[0].clone();
        assert!(matches!(
            create_session(&state, "main".into(), now, duplicated, None).await,
            Err(ServiceError::Validation(_))
        ));

        let mut blank = categories();
        blank[1] = "   ".into();
        assert!(matches!(
            create_session(&state, "main".into(), now, blank, None).await,
            Err(ServiceError::Validation(_))
        ));

        assert!(matches!(
            create_session(&state, "main".into(), now, categories(), Some(0)).await,
            Err(ServiceError::Validation(_))
        ));

        let session = create_session(&state, "main".into(), now, categories(), None)
            .await
            .unwrap();
        assert_eq!(session.status, SessionStatus::Scheduled);
        assert_eq!(session.window_secs, 60);
    }

    #[tokio::test]
    async fn lifecycle_only_moves_forward() {
        let (state, _) = memory_state();
        let session = scheduled_session(&state).await;

        assert!(matches!(
            end_session(&state, session.id).await,
            Err(ServiceError::Conflict(Conflict::StatusMismatch {
                actual: SessionStatus::Scheduled,
                ..
            }))
        ));

        let active = start_session(&state, session.id).await.unwrap();
        assert_eq!(active.status, SessionStatus::Active);
        assert_eq!(
            current_active(&state, "main").await.unwrap().map(|s| s.id),
            Some(session.id)
        );

        assert!(matches!(
            start_session(&state, session.id).await,
            Err(ServiceError::Conflict(_))
        ));

        let completed = end_session(&state, session.id).await.unwrap();
        assert_eq!(completed.status, SessionStatus::Completed);
        assert!(completed.end_time.is_some());
        assert!(current_active(&state, "main").await.unwrap().is_none());

        for result in [
            start_session(&state, session.id).await,
            end_session(&state, session.id).await,
        ] {
            assert!(matches!(result, Err(ServiceError::Conflict(_))));
        }
    }

    #[tokio::test]
    async fn second_active_session_is_rejected() {
        let (state, _) = memory_state();
        let first = scheduled_session(&state).await;
        let second = scheduled_session(&state).await;

        start_session(&state, first.id).await.unwrap();
        assert!(matches!(
            start_session(&state, second.id).await,
            Err(ServiceError::Conflict(Conflict::ActiveSessionExists { .. }))
        ));
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let (state, _) = memory_state();
        assert!(matches!(
            start_session(&state, Uuid::new_v4()).await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            delete_session(&state, Uuid::new_v4()).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn next_scheduled_prefers_earliest_start() {
        let (state, _) = memory_state();
        let now = SystemTime::now();
        let later = create_session(
            &state,
            "main".into(),
            now + std::time::Duration::from_secs(600),
            categories(),
            None,
        )
        .await
        .unwrap();
        let sooner = create_session(
            &state,
            "main".into(),
            now + std::time::Duration::from_secs(60),
            categories(),
            None,
        )
        .await
        .unwrap();

        assert_eq!(
            next_scheduled(&state, "main").await.unwrap().map(|s| s.id),
            Some(sooner.id)
        );
        let listed: Vec<Uuid> = list_sessions(&state, "main")
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(listed, vec![later.id, sooner.id]);
    }

    #[test]
    fn grid_has_four_words_per_category_with_unique_ids() {
        let bank = AppConfig::default().word_bank;
        let mut rng = StdRng::seed_from_u64(7);
        let grid = assemble_grid_with(&bank, &categories(), &mut rng).unwrap();

        assert_eq!(grid.len(), 16);
        let mut per_category: HashMap<&str, usize> = HashMap::new();
        for item in &grid {
            *per_category.entry(item.category.as_str()).or_default() += 1;
            assert!(
                bank.words(&item.category)
                    .iter()
                    .any(|word| word.id == item.id && word.text == item.text)
            );
        }
        assert!(per_category.values().all(|count| *count == 4));
        let ids: HashSet<u32> = grid.iter().map(|item| item.id).collect();
        assert_eq!(ids.len(), 16);
    }

    #[test]
    fn grid_rejects_thin_or_unknown_categories() {
        let mut raw = IndexMap::new();
        raw.insert("Tiny".to_owned(), vec!["a".to_owned(), "b".to_owned()]);
        let bank = WordBank::from_map(raw);
        let mut rng = StdRng::seed_from_u64(1);

        assert!(matches!(
            assemble_grid_with(&bank, &["Tiny".to_owned()], &mut rng),
            Err(ServiceError::Data(_))
        ));
        assert!(matches!(
            assemble_grid_with(&bank, &["Unknown".to_owned()], &mut rng),
            Err(ServiceError::Data(_))
        ));
    }
}
