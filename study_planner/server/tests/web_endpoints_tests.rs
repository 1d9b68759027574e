use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use study_planner_server::calendar::MockCalendarProvider;
use study_planner_server::calendar::{CalendarError, CalendarEvent};
use study_planner_server::flashcard::FlashcardService;
use study_planner_server::task::{TaskDetails, TaskService, TaskServiceError};
use study_planner_server::user::User;
use study_planner_server::web::create_app;
use std::sync::Arc;
use tower::ServiceExt;

mod common;

use common::{
    auth_cookie, body_json, body_text, location, register_connected_user, register_user,
    returned_cookie, setup_db, test_app, test_config,
};

fn get(user: &User, uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::COOKIE, auth_cookie(user))
        .body(Body::empty())
        .unwrap()
}

fn post_form(user: &User, uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::COOKIE, auth_cookie(user))
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn details(title: &str, due: Option<&str>) -> TaskDetails {
    TaskDetails {
        title: title.to_string(),
        description: None,
        due_date: due.map(|raw| {
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M").unwrap()
        }),
        category: Some("Study".to_string()),
    }
}

#[tokio::test]
async fn can_answer_health_checks_without_login() {
    let db = setup_db().await.unwrap();
    let app = test_app(&db, MockCalendarProvider::new());

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "OK");
}

#[tokio::test]
async fn can_send_visitors_to_the_login_page() {
    let db = setup_db().await.unwrap();
    let app = test_app(&db, MockCalendarProvider::new());

    for uri in ["/", "/dashboard", "/tasks", "/schedule", "/flashcards", "/pomodoro"] {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER, "{uri}");
        assert_eq!(location(response.headers()), Some("/login"), "{uri}");
    }
}

#[tokio::test]
async fn can_render_the_dashboard_without_caching() {
    let db = setup_db().await.unwrap();
    let user = register_user(&db, "ada").await.unwrap();
    let tasks = TaskService::new(&db);
    tasks
        .create_task(user.id(), details("Hand in thesis", Some("2099-01-01 12:00")))
        .await
        .unwrap();
    tasks.create_task(user.id(), details("Undated", None)).await.unwrap();
    let app = test_app(&db, MockCalendarProvider::new());

    let response = app.oneshot(get(&user, "/dashboard")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).unwrap(),
        "no-store"
    );
    let body = body_text(response).await;
    assert!(body.contains("2 to do, 0 in progress, 0 done."));
    assert!(body.contains("Hand in thesis"));
    assert!(body.contains("2099-01-01 12:00"));
}

#[tokio::test]
async fn can_list_upcoming_tasks_in_the_planner_zone() {
    let db = setup_db().await.unwrap();
    let user = register_user(&db, "ada").await.unwrap();
    let tasks = TaskService::new(&db);
    let utc_now = chrono::Utc::now();
    let zone = chrono_tz::Pacific::Kiritimati;
    let local_now = utc_now.with_timezone(&zone).naive_local();
    let already_due = (utc_now.naive_utc() + chrono::Duration::hours(3))
        .format("%Y-%m-%d %H:%M")
        .to_string();
    let still_ahead = (local_now + chrono::Duration::hours(3))
        .format("%Y-%m-%d %H:%M")
        .to_string();
    tasks
        .create_task(user.id(), details("Missed seminar", Some(&already_due)))
        .await
        .unwrap();
    tasks
        .create_task(user.id(), details("Evening reading", Some(&still_ahead)))
        .await
        .unwrap();
    let mut config = test_config();
    config.calendar_time_zone = zone;
    let app = create_app(&config, db.clone(), Arc::new(MockCalendarProvider::new()));

    let response = app.oneshot(get(&user, "/dashboard")).await.unwrap();

    let body = body_text(response).await;
    assert!(body.contains("Evening reading"));
    assert!(!body.contains("Missed seminar"));
}

#[tokio::test]
async fn can_render_the_kanban_board() {
    let db = setup_db().await.unwrap();
    let user = register_user(&db, "ada").await.unwrap();
    let task = TaskService::new(&db)
        .create_task(user.id(), details("Flash & cards", None))
        .await
        .unwrap();
    let app = test_app(&db, MockCalendarProvider::new());

    let response = app.oneshot(get(&user, "/tasks")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_text(response).await;
    assert!(body.contains("Flash &amp; cards"));
    assert!(body.contains(&format!(r#"data-task-id="{}""#, task.id())));
}

#[tokio::test]
async fn can_add_a_task_through_the_form() {
    let db = setup_db().await.unwrap();
    let user = register_user(&db, "ada").await.unwrap();
    let app = test_app(&db, MockCalendarProvider::new());

    let response = app
        .oneshot(post_form(
            &user,
            "/tasks/add",
            "title=Revise+algebra&description=&due_date=2030-05-01T09%3A30&category=Other&other_category=Maths",
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(response.headers()), Some("/tasks"));
    assert!(returned_cookie(response.headers(), "flash").is_some());
    let board = TaskService::new(&db).get_board(user.id()).await.unwrap();
    assert_eq!(board.todo.len(), 1);
    let task = &board.todo[0];
    assert_eq!(task.title(), "Revise algebra");
    assert_eq!(task.category(), Some("Maths"));
    assert_eq!(task.description(), None);
    assert_eq!(task.due_date_display(), "2030-05-01 09:30");
}

#[tokio::test]
async fn can_show_form_errors_without_saving() {
    let db = setup_db().await.unwrap();
    let user = register_user(&db, "ada").await.unwrap();
    let app = test_app(&db, MockCalendarProvider::new());

    let response = app
        .oneshot(post_form(
            &user,
            "/tasks/add",
            "title=Revise&due_date=next+week&category=Study",
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_text(response).await;
    assert!(body.contains("Could not understand due date"));
    assert!(body.contains(r#"value="Revise""#));
    assert!(
        TaskService::new(&db)
            .get_board(user.id())
            .await
            .unwrap()
            .todo
            .is_empty()
    );
}

fn linked_event(id: &str) -> CalendarEvent {
    CalendarEvent {
        id: id.to_string(),
        summary: Some("Essay draft".to_string()),
        description: None,
        start: None,
        end: None,
        html_link: None,
        status: Some("confirmed".to_string()),
    }
}

const EDITED_ESSAY: &str =
    "title=Essay+draft&description=&due_date=2030-05-02T10%3A00&category=Study&other_category=";

#[tokio::test]
async fn can_carry_edits_of_a_linked_task_to_the_calendar() {
    let db = setup_db().await.unwrap();
    let user = register_connected_user(&db, "ada").await.unwrap();
    let tasks = TaskService::new(&db);
    let task = tasks
        .create_task(user.id(), details("essay", Some("2030-05-01 09:00")))
        .await
        .unwrap();
    tasks
        .link_calendar_event(user.id(), task.id(), "evt-1")
        .await
        .unwrap();
    let mut provider = MockCalendarProvider::new();
    provider
        .expect_update_event()
        .withf(|_, calendar_id, event_id, event| {
            calendar_id == "primary"
                && event_id == "evt-1"
                && event.summary == "Essay draft"
                && event.start.format("%Y-%m-%d %H:%M").to_string() == "2030-05-02 10:00"
        })
        .times(1)
        .returning(|_, _, event_id, _| Ok(linked_event(event_id)));
    provider.expect_insert_event().never();
    let app = test_app(&db, provider);

    let response = app
        .oneshot(post_form(&user, &format!("/tasks/{}/edit", task.id()), EDITED_ESSAY))
        .await
        .unwrap();

    assert_eq!(location(response.headers()), Some("/tasks"));
    let stored = tasks.get_task(user.id(), task.id()).await.unwrap();
    assert_eq!(stored.title(), "Essay draft");
    assert_eq!(stored.google_event_id(), Some("evt-1"));
}

#[tokio::test]
async fn can_keep_an_edit_when_the_calendar_refuses_it() {
    let db = setup_db().await.unwrap();
    let user = register_connected_user(&db, "ada").await.unwrap();
    let tasks = TaskService::new(&db);
    let task = tasks
        .create_task(user.id(), details("essay", Some("2030-05-01 09:00")))
        .await
        .unwrap();
    tasks
        .link_calendar_event(user.id(), task.id(), "evt-1")
        .await
        .unwrap();
    let mut provider = MockCalendarProvider::new();
    provider.expect_update_event().times(1).returning(|_, _, _, _| {
        Err(CalendarError::Api {
            status: 500,
            message: "upstream stack trace".to_string(),
        })
    });
    let app = test_app(&db, provider);

    let response = app
        .clone()
        .oneshot(post_form(&user, &format!("/tasks/{}/edit", task.id()), EDITED_ESSAY))
        .await
        .unwrap();

    assert_eq!(location(response.headers()), Some("/tasks"));
    let stored = tasks.get_task(user.id(), task.id()).await.unwrap();
    assert_eq!(stored.title(), "Essay draft");
    assert_eq!(stored.due_date_display(), "2030-05-02 10:00");

    let flash = returned_cookie(response.headers(), "flash").unwrap();
    let board = app
        .oneshot(
            Request::builder()
                .uri("/tasks")
                .header(header::COOKIE, format!("{}; {}", auth_cookie(&user), flash))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_text(board).await;
    assert!(body.contains(
        "Your task has been updated, but Google Calendar was not: \
         Google Calendar could not be reached, please try again later."
    ));
    assert!(!body.contains("upstream stack trace"));
}

#[tokio::test]
async fn can_refuse_editing_tasks_of_other_users() {
    let db = setup_db().await.unwrap();
    let owner = register_user(&db, "ada").await.unwrap();
    let intruder = register_user(&db, "mallory").await.unwrap();
    let task = TaskService::new(&db)
        .create_task(owner.id(), details("private", None))
        .await
        .unwrap();
    let app = test_app(&db, MockCalendarProvider::new());

    let response = app
        .clone()
        .oneshot(post_form(
            &intruder,
            &format!("/tasks/{}/edit", task.id()),
            "title=mine+now&category=Study",
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(response.headers()), Some("/tasks"));
    let stored = TaskService::new(&db)
        .get_task(owner.id(), task.id())
        .await
        .unwrap();
    assert_eq!(stored.title(), "private");

    let missing = app.oneshot(get(&owner, "/tasks/999/edit")).await.unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn can_toggle_completion_from_the_board() {
    let db = setup_db().await.unwrap();
    let user = register_user(&db, "ada").await.unwrap();
    let task = TaskService::new(&db)
        .create_task(user.id(), details("essay", None))
        .await
        .unwrap();
    let app = test_app(&db, MockCalendarProvider::new());

    let response = app
        .oneshot(post_form(&user, &format!("/tasks/{}/complete", task.id()), ""))
        .await
        .unwrap();

    assert_eq!(location(response.headers()), Some("/tasks"));
    let stored = TaskService::new(&db)
        .get_task(user.id(), task.id())
        .await
        .unwrap();
    assert!(stored.is_complete());
}

#[tokio::test]
async fn can_delete_a_task_together_with_its_event() {
    let db = setup_db().await.unwrap();
    let user = register_connected_user(&db, "ada").await.unwrap();
    let tasks = TaskService::new(&db);
    let task = tasks
        .create_task(user.id(), details("essay", Some("2030-05-01 09:00")))
        .await
        .unwrap();
    tasks
        .link_calendar_event(user.id(), task.id(), "evt-1")
        .await
        .unwrap();
    let mut provider = MockCalendarProvider::new();
    provider
        .expect_delete_event()
        .withf(|_, calendar_id, event_id| calendar_id == "primary" && event_id == "evt-1")
        .times(1)
        .returning(|_, _, event_id| Err(CalendarError::EventNotFound(event_id.to_string())));
    let app = test_app(&db, provider);

    let response = app
        .oneshot(post_form(&user, &format!("/tasks/{}/delete", task.id()), ""))
        .await
        .unwrap();

    assert_eq!(location(response.headers()), Some("/tasks"));
    assert!(matches!(
        tasks.get_task(user.id(), task.id()).await,
        Err(TaskServiceError::TaskNotFound(_))
    ));
}

#[tokio::test]
async fn can_push_a_task_to_the_calendar() {
    let db = setup_db().await.unwrap();
    let user = register_connected_user(&db, "ada").await.unwrap();
    let task = TaskService::new(&db)
        .create_task(user.id(), details("essay", Some("2030-05-01 09:00")))
        .await
        .unwrap();
    let mut provider = MockCalendarProvider::new();
    provider
        .expect_insert_event()
        .withf(|_, _, event| event.summary == "essay")
        .times(1)
        .returning(|_, _, _| {
            Ok(CalendarEvent {
                id: "evt-pushed".to_string(),
                summary: Some("essay".to_string()),
                description: None,
                start: None,
                end: None,
                html_link: None,
                status: Some("confirmed".to_string()),
            })
        });
    let app = test_app(&db, provider);

    let response = app
        .oneshot(post_form(&user, &format!("/tasks/{}/sync", task.id()), ""))
        .await
        .unwrap();

    assert_eq!(location(response.headers()), Some("/tasks"));
    let stored = TaskService::new(&db)
        .get_task(user.id(), task.id())
        .await
        .unwrap();
    assert_eq!(stored.google_event_id(), Some("evt-pushed"));
}

#[tokio::test]
async fn can_manage_flashcards() {
    let db = setup_db().await.unwrap();
    let user = register_user(&db, "ada").await.unwrap();
    let app = test_app(&db, MockCalendarProvider::new());

    let response = app
        .clone()
        .oneshot(post_form(
            &user,
            "/flashcards/add",
            "question=Capital+of+France%3F&answer=Paris",
        ))
        .await
        .unwrap();
    assert_eq!(location(response.headers()), Some("/flashcards"));

    let cards = FlashcardService::new(&db)
        .get_flashcards(user.id())
        .await
        .unwrap();
    assert_eq!(cards.len(), 1);
    assert_eq!(cards[0].question(), "Capital of France?");

    let page = app.clone().oneshot(get(&user, "/flashcards")).await.unwrap();
    assert!(body_text(page).await.contains("Paris"));

    let invalid = app
        .oneshot(post_form(&user, "/flashcards/add", "question=&answer=Paris"))
        .await
        .unwrap();
    assert_eq!(invalid.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn can_render_pomodoro_and_settings() {
    let db = setup_db().await.unwrap();
    let user = register_user(&db, "ada").await.unwrap();
    let app = test_app(&db, MockCalendarProvider::new());

    let pomodoro = app.clone().oneshot(get(&user, "/pomodoro")).await.unwrap();
    assert_eq!(pomodoro.status(), StatusCode::OK);
    assert!(body_text(pomodoro).await.contains("25 minutes"));

    let settings = app.oneshot(get(&user, "/settings")).await.unwrap();
    assert_eq!(settings.status(), StatusCode::OK);
    assert!(body_text(settings).await.contains("ada@example.com"));
}

#[tokio::test]
async fn can_serve_the_openapi_document() {
    let db = setup_db().await.unwrap();
    let app = test_app(&db, MockCalendarProvider::new());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api-docs/openapi.json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let document = body_json(response).await;
    assert!(document["paths"]["/api/v1/tasks/{id}/status"]["put"].is_object());
    assert!(document["paths"]["/api/v1/calendar/sync"]["post"].is_object());
    assert!(document["components"]["securitySchemes"]["bearer"].is_object());
}
