use super::*;

async fn seeded() -> (Storage, Judge) {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let event = EventId::from("hack-1");
    storage
        .create_event(&event, "Spring Hack")
        .await
        .expect("event");
    for (id, name) in [("t1", "Rustaceans"), ("t2", "Borrowers"), ("t3", "Lifetimes")] {
        storage
            .create_team(&Team {
                id: TeamId::from(id),
                name: name.to_string(),
                project_title: format!("{name} project"),
                event_id: event.clone(),
            })
            .await
            .expect("team");
    }
    for (id, max) in [("c1", 10.0), ("c2", 5.0)] {
        storage
            .create_criterion(
                &event,
                &Criterion {
                    id: CriterionId::from(id),
                    name: id.to_uppercase(),
                    max_score: max,
                    weight: 1.0,
                },
            )
            .await
            .expect("criterion");
    }
    let judge = Judge {
        id: JudgeId::from("j1"),
        name: "Ada".to_string(),
        event_id: event,
    };
    storage
        .create_judge(&judge, "secret-token")
        .await
        .expect("judge");
    (storage, judge)
}

#[tokio::test]
async fn health_check_succeeds_for_live_pool() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.health_check().await.expect("health check");
}

#[tokio::test]
async fn creates_database_file_when_missing() {
    let suffix = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let temp_root = std::env::temp_dir().join(format!("scoring_storage_test_{suffix}"));
    let db_path = temp_root.join("nested").join("scores.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let storage = Storage::new(&database_url).await.expect("db");
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should exist: {}",
        db_path.display()
    );

    std::fs::remove_dir_all(temp_root).expect("cleanup");
}

#[tokio::test]
async fn resolves_judge_by_token_digest() {
    let (storage, judge) = seeded().await;
    let found = storage
        .judge_by_token("secret-token")
        .await
        .expect("lookup")
        .expect("judge");
    assert_eq!(found, judge);

    let missing = storage.judge_by_token("other").await.expect("lookup");
    assert!(missing.is_none());
}

#[test]
fn token_digest_is_stable_and_not_the_token() {
    let digest = token_digest("secret-token");
    assert_eq!(digest, token_digest("  secret-token "));
    assert_ne!(digest, "secret-token");
}

#[tokio::test]
async fn lists_teams_and_criteria_in_insertion_order() {
    let (storage, judge) = seeded().await;
    let teams = storage
        .teams_for_event(&judge.event_id)
        .await
        .expect("teams");
    let ids: Vec<_> = teams.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec!["t1", "t2", "t3"]);

    let criteria = storage
        .criteria_for_event(&judge.event_id)
        .await
        .expect("criteria");
    assert_eq!(criteria.len(), 2);
    assert_eq!(criteria[0].id, CriterionId::from("c1"));
    assert_eq!(criteria[1].max_score, 5.0);
}

#[tokio::test]
async fn assignments_are_deduplicated() {
    let (storage, judge) = seeded().await;
    for team in ["t2", "t1", "t2"] {
        storage
            .assign_team(&judge.id, &TeamId::from(team))
            .await
            .expect("assign");
    }
    let assigned = storage.assigned_team_ids(&judge.id).await.expect("ids");
    assert_eq!(assigned, vec![TeamId::from("t2"), TeamId::from("t1")]);
    assert!(storage
        .is_assigned(&judge.id, &TeamId::from("t1"))
        .await
        .expect("check"));
    assert!(!storage
        .is_assigned(&judge.id, &TeamId::from("t3"))
        .await
        .expect("check"));
}

#[tokio::test]
async fn upsert_score_is_idempotent_on_natural_key() {
    let (storage, judge) = seeded().await;
    let mut record = ScoreRecord {
        judge_id: judge.id.clone(),
        team_id: TeamId::from("t1"),
        criterion_id: CriterionId::from("c1"),
        score: 7.5,
        round: Round(1),
    };
    storage.upsert_score(&record).await.expect("first");
    storage.upsert_score(&record).await.expect("repeat");
    record.score = 8.0;
    storage.upsert_score(&record).await.expect("overwrite");

    let scores = storage.scores_for_judge(&judge.id).await.expect("scores");
    assert_eq!(scores.len(), 1);
    assert_eq!(scores[0].score, 8.0);

    record.round = Round(2);
    storage.upsert_score(&record).await.expect("other round");
    let scores = storage.scores_for_judge(&judge.id).await.expect("scores");
    assert_eq!(scores.len(), 2);
}

#[tokio::test]
async fn criterion_lookup_is_scoped_to_event() {
    let (storage, judge) = seeded().await;
    let other = EventId::from("hack-2");
    storage.create_event(&other, "Autumn Hack").await.expect("event");

    assert!(storage
        .criterion_for_event(&judge.event_id, &CriterionId::from("c2"))
        .await
        .expect("lookup")
        .is_some());
    assert!(storage
        .criterion_for_event(&other, &CriterionId::from("c2"))
        .await
        .expect("lookup")
        .is_none());
}

#[tokio::test]
async fn out_of_range_stored_round_is_an_error() {
    let (storage, judge) = seeded().await;
    sqlx::query(
        "INSERT INTO scores (judge_id, team_id, criterion_id, round, score, updated_at)
         VALUES (?, 't1', 'c1', ?, 3.0, '2024-01-01T00:00:00Z')",
    )
    .bind(judge.id.as_str())
    .bind(i64::from(u32::MAX) + 1)
    .execute(storage.pool())
    .await
    .expect("raw insert");

    let err = storage
        .scores_for_judge(&judge.id)
        .await
        .expect_err("should fail");
    assert!(format!("{err:#}").contains("out of range"));
}
