mod common;

use chrono::Utc;
use std::sync::Arc;

use common::{north_of_origin, seed_persona, FixedExtractor, ORIGIN};
use quickhire_sync::error::SyncError;
use quickhire_sync::onboarding::{persona_id_for, CandidateOnboarding, ProfileDraft, SessionContext};
use quickhire_sync::store::{Collection, DocumentStore, MemoryStore, SqliteStore};
use quickhire_sync::sync::{apply_transition, decode_persona, Transition};
use quickhire_sync::types::{Location, PersonaStatus};

const WRITERS: usize = 8;

/// Races `WRITERS` employers for the same persona at v1 and returns
/// (successes, conflicts).
async fn race_offers(store: Arc<dyn DocumentStore>) -> (usize, usize) {
    let id = seed_persona(store.as_ref(), "u1", "Cleaner", north_of_origin(0.0)).await;

    let tasks: Vec<_> = (0..WRITERS)
        .map(|n| {
            let store = Arc::clone(&store);
            let id = id.clone();
            tokio::spawn(async move {
                let transition = Transition::Offer {
                    employer_id: format!("employer-{n}"),
                    broadcast_id: None,
                    expires_at: Utc::now() + chrono::Duration::minutes(5),
                };
                apply_transition(store.as_ref(), &id, 1, &transition).await
            })
        })
        .collect();

    let mut successes = 0;
    let mut conflicts = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(persona) => {
                assert_eq!(persona.status, PersonaStatus::Offered);
                assert_eq!(persona.version, 2);
                successes += 1;
            }
            Err(SyncError::Conflict { expected, .. }) => {
                assert_eq!(expected, 1);
                conflicts += 1;
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    let stored = store.get(Collection::Personas, &id).await.unwrap();
    let persona = decode_persona(&stored.id, &stored.data).unwrap();
    assert_eq!(persona.version, 2);
    assert!(persona.offered_by.is_some());

    (successes, conflicts)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_exactly_one_offer_wins_on_memory_store() {
    let (successes, conflicts) = race_offers(Arc::new(MemoryStore::new())).await;
    assert_eq!(successes, 1);
    assert_eq!(conflicts, WRITERS - 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_exactly_one_offer_wins_on_sqlite_store() {
    let store = SqliteStore::in_memory().await.unwrap();
    let (successes, conflicts) = race_offers(Arc::new(store)).await;
    assert_eq!(successes, 1);
    assert_eq!(conflicts, WRITERS - 1);
}

#[tokio::test]
async fn test_stale_writer_cannot_resurrect_hired_persona() {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    let id = seed_persona(store.as_ref(), "u1", "Cook", north_of_origin(0.0)).await;

    let offer = Transition::Offer {
        employer_id: "e1".to_string(),
        broadcast_id: None,
        expires_at: Utc::now() + chrono::Duration::minutes(5),
    };
    apply_transition(store.as_ref(), &id, 1, &offer).await.unwrap();
    let hired = apply_transition(store.as_ref(), &id, 2, &Transition::Accept)
        .await
        .unwrap();
    assert_eq!(hired.status, PersonaStatus::Hired);

    // Current version, but HIRED cannot be offered again.
    let err = apply_transition(store.as_ref(), &id, 3, &offer).await.unwrap_err();
    assert!(matches!(err, SyncError::InvalidTransition { from: PersonaStatus::Hired, .. }));

    // Old version loses before the status is even considered.
    let err = apply_transition(store.as_ref(), &id, 1, &Transition::Expire)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Conflict { actual: 3, .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_publishes_create_one_persona_per_user() {
    let store: Arc<dyn DocumentStore> = Arc::new(SqliteStore::in_memory().await.unwrap());
    let flow = Arc::new(CandidateOnboarding::new(
        Arc::clone(&store),
        FixedExtractor::role("Cleaner", &["Mopping"]),
    ));
    let draft = ProfileDraft {
        role: "Cleaner".to_string(),
        skills: vec!["Mopping".to_string()],
        location: Location::new(ORIGIN.0, ORIGIN.1),
        video_intro_url: Some("https://videos.test/u1.mp4".to_string()),
    };

    let tasks: Vec<_> = (0..WRITERS)
        .map(|_| {
            let flow = Arc::clone(&flow);
            let draft = draft.clone();
            tokio::spawn(async move {
                let mut ctx = SessionContext::for_user("u1");
                let outcome = flow.publish(&mut ctx, &draft).await;
                (outcome, ctx.persona_id)
            })
        })
        .collect();

    let mut published = 0;
    for task in tasks {
        let (outcome, recorded) = task.await.unwrap();
        match outcome {
            Ok(_) => published += 1,
            Err(SyncError::Validation(message)) => {
                assert!(message.contains("already has persona"), "{message}")
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
        assert_eq!(recorded.as_deref(), Some(persona_id_for("u1").as_str()));
    }
    assert_eq!(published, 1);

    let owned_by_u1 = store
        .list(Collection::Personas)
        .await
        .unwrap()
        .iter()
        .filter(|doc| doc.data["userId"] == "u1")
        .count();
    assert_eq!(owned_by_u1, 1);
}
