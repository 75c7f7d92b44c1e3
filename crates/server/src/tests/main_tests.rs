use super::*;
use axum::{body, body::Body, http::Request};
use shared::domain::{CriterionId, TeamId};
use tower::ServiceExt;

async fn test_app() -> (Router, Storage) {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let event = EventId::from("ev-1");
    storage.create_event(&event, "Hack").await.expect("event");
    for id in ["t1", "t2"] {
        storage
            .create_team(&Team {
                id: TeamId::from(id),
                name: format!("team {id}"),
                project_title: "demo".to_string(),
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
                    name: id.to_string(),
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
    storage.create_judge(&judge, "tok-123").await.expect("judge");
    storage
        .assign_team(&judge.id, &TeamId::from("t1"))
        .await
        .expect("assign");

    let state = AppState {
        api: ApiContext {
            storage: storage.clone(),
        },
    };
    (build_router(Arc::new(state), 4096), storage)
}

async fn json_body<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

fn put_score(team: &str, criterion: &str, score: f64) -> Request<Body> {
    Request::put("/scores")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::json!({
                "judge_id": "j1",
                "team_id": team,
                "criterion_id": criterion,
                "score": score,
                "round": 1,
            })
            .to_string(),
        ))
        .expect("request")
}

#[tokio::test]
async fn healthz_reports_ok_when_storage_is_ready() {
    let (app, _storage) = test_app().await;
    let request = Request::get("/healthz")
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    assert_eq!(body.as_ref(), b"ok");
}

#[tokio::test]
async fn resolve_then_fetch_dashboard_data() {
    let (app, _storage) = test_app().await;

    let response = app
        .clone()
        .oneshot(
            Request::get("/judges/resolve?token=tok-123")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let judge: Judge = json_body(response).await;
    assert_eq!(judge.id, JudgeId::from("j1"));

    let response = app
        .clone()
        .oneshot(
            Request::get(format!("/judges/{}/assignments", judge.id))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    let assignments: AssignmentsResponse = json_body(response).await;
    assert_eq!(assignments.team_ids, vec![TeamId::from("t1")]);

    let response = app
        .clone()
        .oneshot(
            Request::get(format!("/events/{}/criteria", judge.event_id))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    let criteria: Vec<Criterion> = json_body(response).await;
    assert_eq!(criteria.len(), 2);

    let response = app
        .oneshot(
            Request::get(format!("/events/{}/teams", judge.event_id))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    let teams: Vec<Team> = json_body(response).await;
    assert_eq!(teams.len(), 2);
}

#[tokio::test]
async fn unknown_token_is_404() {
    let (app, _storage) = test_app().await;
    let response = app
        .oneshot(
            Request::get("/judges/resolve?token=missing")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let err: ApiError = json_body(response).await;
    assert!(matches!(err.code, ErrorCode::NotFound));
}

#[tokio::test]
async fn upsert_validates_and_is_idempotent() {
    let (app, storage) = test_app().await;

    let response = app
        .clone()
        .oneshot(put_score("t1", "c2", 7.0))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .clone()
        .oneshot(put_score("t2", "c1", 7.0))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(put_score("t1", "c1", 7.5))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }
    let scores = storage
        .scores_for_judge(&JudgeId::from("j1"))
        .await
        .expect("scores");
    assert_eq!(scores.len(), 1);
    assert_eq!(scores[0].score, 7.5);
}

#[tokio::test]
async fn progress_reflects_completed_teams() {
    let (app, _storage) = test_app().await;
    for (criterion, score) in [("c1", 9.0), ("c2", 4.5)] {
        let response = app
            .clone()
            .oneshot(put_score("t1", criterion, score))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .oneshot(
            Request::get("/events/ev-1/progress?round=1")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let progress: EventProgress = json_body(response).await;
    assert_eq!(progress.judges.len(), 1);
    assert_eq!(progress.judges[0].completed_teams, 1);
}

#[tokio::test]
async fn progress_rejects_round_zero() {
    let (app, _storage) = test_app().await;
    let response = app
        .oneshot(
            Request::get("/events/ev-1/progress?round=0")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let err: ApiError = json_body(response).await;
    assert_eq!(err.code, ErrorCode::Validation);
}

#[test]
fn every_error_code_maps_to_a_client_or_server_status() {
    assert_eq!(status_for(ErrorCode::Forbidden), StatusCode::FORBIDDEN);
    assert_eq!(status_for(ErrorCode::NotFound), StatusCode::NOT_FOUND);
    assert_eq!(status_for(ErrorCode::Validation), StatusCode::BAD_REQUEST);
    assert_eq!(
        status_for(ErrorCode::Internal),
        StatusCode::INTERNAL_SERVER_ERROR
    );
}
