use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use chrono::DateTime;
use insta::assert_yaml_snapshot;
use study_planner_server::calendar::sync::SyncReport;
use study_planner_server::calendar::token::GoogleToken;
use study_planner_server::calendar::{CalendarError, CalendarEvent, EventTime, MockCalendarProvider};
use study_planner_server::task::{TaskDetails, TaskService};
use study_planner_server::user::{User, UserService};
use tower::ServiceExt;

mod common;

use common::{
    auth_cookie, bearer_token, body_json, body_text, location, register_connected_user,
    register_user, returned_cookie, setup_db, test_app,
};

fn event(id: &str, summary: &str, start: &str) -> CalendarEvent {
    CalendarEvent {
        id: id.to_string(),
        summary: Some(summary.to_string()),
        description: None,
        start: Some(EventTime::At(DateTime::parse_from_rfc3339(start).unwrap())),
        end: None,
        html_link: Some(format!("https://calendar.google.com/event?eid={id}")),
        status: Some("confirmed".to_string()),
    }
}

fn upcoming_events() -> Vec<CalendarEvent> {
    let mut cancelled = event("evt-3", "Cancelled seminar", "2030-05-03T09:00:00+02:00");
    cancelled.status = Some("cancelled".to_string());
    vec![
        event("evt-1", "Lecture", "2030-05-01T09:00:00+02:00"),
        event("evt-2", "Lab", "2030-05-02T14:30:00+02:00"),
        cancelled,
    ]
}

fn api_request(user: &User, method: &str, uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", bearer_token(user)))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn page_request(user: &User, method: &str, uri: &str, extra_cookie: Option<&str>) -> Request<Body> {
    let cookie = match extra_cookie {
        Some(extra) => format!("{}; {}", auth_cookie(user), extra),
        None => auth_cookie(user),
    };
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::COOKIE, cookie)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn can_import_upcoming_events_only_once_in_the_planner_zone() {
    let db = setup_db().await.unwrap();
    let user = register_connected_user(&db, "ada").await.unwrap();
    let mut provider = MockCalendarProvider::new();
    provider
        .expect_list_upcoming_events()
        .withf(|_, calendar_id, max_results| calendar_id == "primary" && *max_results == 20)
        .times(2)
        .returning(|_, _, _| Ok(upcoming_events()));
    let app = test_app(&db, provider);

    let first = app
        .clone()
        .oneshot(api_request(&user, "POST", "/api/v1/calendar/sync", ""))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    let report: SyncReport = serde_json::from_value(body_json(first).await).unwrap();
    assert_yaml_snapshot!(report, @r###"
    imported: 2
    skipped: 1
    errors: []
    "###);

    let second = app
        .oneshot(api_request(&user, "POST", "/api/v1/calendar/sync", ""))
        .await
        .unwrap();
    let report: SyncReport = serde_json::from_value(body_json(second).await).unwrap();
    assert_eq!(report.imported, 0);
    assert_eq!(report.skipped, 3);

    let tasks = TaskService::new(&db)
        .get_tasks_by_due_date(user.id())
        .await
        .unwrap();
    assert_eq!(
        tasks
            .iter()
            .map(|task| (task.title(), task.due_date_display()))
            .collect::<Vec<_>>(),
        vec![
            ("Lecture", "2030-05-01 07:00".to_string()),
            ("Lab", "2030-05-02 12:30".to_string()),
        ]
    );
}

#[tokio::test]
async fn can_refuse_sync_without_a_connected_calendar() {
    let db = setup_db().await.unwrap();
    let user = register_user(&db, "ada").await.unwrap();
    let app = test_app(&db, MockCalendarProvider::new());

    let response = app
        .oneshot(api_request(&user, "POST", "/api/v1/calendar/sync", ""))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_yaml_snapshot!(body_json(response).await, @r###"
    error: Google Calendar is not connected
    "###);
}

#[tokio::test]
async fn can_create_an_event_linked_to_a_task() {
    let db = setup_db().await.unwrap();
    let user = register_connected_user(&db, "ada").await.unwrap();
    let task = TaskService::new(&db)
        .create_task(
            user.id(),
            TaskDetails {
                title: "Exam".to_string(),
                description: None,
                due_date: None,
                category: Some("Study".to_string()),
            },
        )
        .await
        .unwrap();
    let mut provider = MockCalendarProvider::new();
    provider
        .expect_insert_event()
        .withf(|_, calendar_id, event| {
            calendar_id == "primary"
                && event.summary == "Exam"
                && event.time_zone == "UTC"
                && event.end - event.start == chrono::Duration::hours(1)
        })
        .times(1)
        .returning(|_, _, _| Ok(event("evt-new", "Exam", "2030-06-01T10:00:00+00:00")));
    let app = test_app(&db, provider);

    let response = app
        .oneshot(api_request(
            &user,
            "POST",
            "/api/v1/calendar/events",
            &format!(
                r#"{{"summary": "Exam", "start": "2030-06-01T10:00", "task_id": {}}}"#,
                task.id()
            ),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["event_id"], "evt-new");
    let linked = TaskService::new(&db)
        .get_task(user.id(), task.id())
        .await
        .unwrap();
    assert_eq!(linked.google_event_id(), Some("evt-new"));
    assert!(linked.synced_to_calendar());
}

#[tokio::test]
async fn can_refuse_a_second_event_for_a_linked_task() {
    let db = setup_db().await.unwrap();
    let user = register_connected_user(&db, "ada").await.unwrap();
    let tasks = TaskService::new(&db);
    let task = tasks
        .create_task(
            user.id(),
            TaskDetails {
                title: "Exam".to_string(),
                description: None,
                due_date: None,
                category: Some("Study".to_string()),
            },
        )
        .await
        .unwrap();
    tasks
        .link_calendar_event(user.id(), task.id(), "evt-old")
        .await
        .unwrap();
    let mut provider = MockCalendarProvider::new();
    provider.expect_insert_event().never();
    let app = test_app(&db, provider);

    let response = app
        .oneshot(api_request(
            &user,
            "POST",
            "/api/v1/calendar/events",
            &format!(
                r#"{{"summary": "Exam", "start": "2030-06-01T10:00", "task_id": {}}}"#,
                task.id()
            ),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(
        body_json(response).await["error"],
        "A task is already linked to calendar event 'evt-old'"
    );
    let stored = tasks.get_task(user.id(), task.id()).await.unwrap();
    assert_eq!(stored.google_event_id(), Some("evt-old"));
}

#[tokio::test]
async fn can_reject_events_ending_before_they_start() {
    let db = setup_db().await.unwrap();
    let user = register_connected_user(&db, "ada").await.unwrap();
    let app = test_app(&db, MockCalendarProvider::new());

    let response = app
        .oneshot(api_request(
            &user,
            "POST",
            "/api/v1/calendar/events",
            r#"{"summary": "Exam", "start": "2030-06-01T10:00", "end": "2030-06-01T09:00"}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_yaml_snapshot!(body_json(response).await, @r###"
    error: An event must end after it starts
    "###);
}

#[tokio::test]
async fn can_show_tasks_and_events_on_the_schedule() {
    let db = setup_db().await.unwrap();
    let user = register_connected_user(&db, "ada").await.unwrap();
    let task = TaskService::new(&db)
        .create_task(
            user.id(),
            TaskDetails {
                title: "Write report".to_string(),
                description: None,
                due_date: None,
                category: Some("Work".to_string()),
            },
        )
        .await
        .unwrap();
    TaskService::new(&db)
        .link_calendar_event(user.id(), task.id(), "evt-1")
        .await
        .unwrap();
    let mut provider = MockCalendarProvider::new();
    provider.expect_list_upcoming_events().returning(|_, _, _| {
        Ok(vec![
            event("evt-1", "Write report", "2030-05-01T09:00:00+00:00"),
            event("evt-2", "Dentist", "2030-05-02T08:15:00+00:00"),
        ])
    });
    let app = test_app(&db, provider);

    let response = app
        .oneshot(page_request(&user, "GET", "/schedule", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_text(response).await;
    assert!(body.contains("Write report"));
    assert!(body.contains("Dentist"));
    assert!(body.contains("2030-05-02 08:15"));
    assert!(body.contains(r#"action="/calendar/disconnect""#));
}

#[tokio::test]
async fn can_render_the_schedule_when_the_calendar_fails() {
    let db = setup_db().await.unwrap();
    let user = register_connected_user(&db, "ada").await.unwrap();
    let mut provider = MockCalendarProvider::new();
    provider.expect_list_upcoming_events().returning(|_, _, _| {
        Err(CalendarError::Api {
            status: 500,
            message: "backend unavailable".to_string(),
        })
    });
    let app = test_app(&db, provider);

    let response = app
        .oneshot(page_request(&user, "GET", "/schedule", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_text(response).await;
    assert!(body.contains("Google Calendar could not be reached, please try again later."));
    assert!(!body.contains("backend unavailable"));
}

#[tokio::test]
async fn can_offer_to_connect_when_not_connected() {
    let db = setup_db().await.unwrap();
    let user = register_user(&db, "ada").await.unwrap();
    let app = test_app(&db, MockCalendarProvider::new());

    let response = app
        .oneshot(page_request(&user, "GET", "/schedule", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains(r#"href="/calendar/authorize""#));
}

#[tokio::test]
async fn can_report_an_import_as_a_flash_message() {
    let db = setup_db().await.unwrap();
    let user = register_connected_user(&db, "ada").await.unwrap();
    let mut provider = MockCalendarProvider::new();
    provider
        .expect_list_upcoming_events()
        .returning(|_, _, _| Ok(vec![event("evt-1", "Lecture", "2030-05-01T09:00:00+00:00")]));
    let app = test_app(&db, provider);

    let response = app
        .clone()
        .oneshot(page_request(&user, "POST", "/calendar/sync", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(response.headers()), Some("/schedule"));
    let flash = returned_cookie(response.headers(), "flash").unwrap();

    let page = app
        .oneshot(page_request(&user, "GET", "/schedule", Some(&flash)))
        .await
        .unwrap();
    let body = body_text(page).await;
    assert!(body.contains("Imported 1 event(s) from Google Calendar, skipped 0."));
}

#[tokio::test]
async fn can_start_authorization_with_a_state_cookie() {
    let db = setup_db().await.unwrap();
    let user = register_user(&db, "ada").await.unwrap();
    let mut provider = MockCalendarProvider::new();
    provider
        .expect_authorization_url()
        .returning(|state| Ok(format!("https://accounts.example.com/auth?state={state}")));
    let app = test_app(&db, provider);

    let response = app
        .oneshot(page_request(&user, "GET", "/calendar/authorize", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let state_cookie = returned_cookie(response.headers(), "oauth_state").unwrap();
    let state = state_cookie.trim_start_matches("oauth_state=");
    assert_eq!(
        location(response.headers()),
        Some(format!("https://accounts.example.com/auth?state={state}").as_str())
    );
}

#[tokio::test]
async fn can_connect_the_calendar_on_callback() {
    let db = setup_db().await.unwrap();
    let user = register_user(&db, "ada").await.unwrap();
    let mut provider = MockCalendarProvider::new();
    provider
        .expect_exchange_code()
        .withf(|code| code == "auth-code")
        .times(1)
        .returning(|_| {
            Ok(GoogleToken {
                access_token: "fresh".to_string(),
                refresh_token: Some("refresh".to_string()),
                expires_at: None,
                scopes: vec![],
            })
        });
    let app = test_app(&db, provider);

    let response = app
        .oneshot(page_request(
            &user,
            "GET",
            "/calendar/callback?code=auth-code&state=abc",
            Some("oauth_state=abc"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(response.headers()), Some("/schedule"));
    let connected = UserService::new(&db).get_user_by_id(user.id()).await.unwrap();
    assert!(connected.calendar_sync_enabled());
    let token = GoogleToken::parse(connected.google_token().unwrap()).unwrap();
    assert_eq!(token.access_token, "fresh");
}

#[tokio::test]
async fn can_reject_callbacks_with_a_foreign_state() {
    let db = setup_db().await.unwrap();
    let user = register_user(&db, "ada").await.unwrap();
    let app = test_app(&db, MockCalendarProvider::new());

    let response = app
        .oneshot(page_request(
            &user,
            "GET",
            "/calendar/callback?code=auth-code&state=forged",
            Some("oauth_state=abc"),
        ))
        .await
        .unwrap();

    assert_eq!(location(response.headers()), Some("/schedule"));
    let connected = UserService::new(&db).get_user_by_id(user.id()).await.unwrap();
    assert!(!connected.calendar_sync_enabled());
}

#[tokio::test]
async fn can_disconnect_the_calendar() {
    let db = setup_db().await.unwrap();
    let user = register_connected_user(&db, "ada").await.unwrap();
    let app = test_app(&db, MockCalendarProvider::new());

    let response = app
        .oneshot(page_request(&user, "POST", "/calendar/disconnect", None))
        .await
        .unwrap();

    assert_eq!(location(response.headers()), Some("/schedule"));
    let disconnected = UserService::new(&db).get_user_by_id(user.id()).await.unwrap();
    assert!(!disconnected.calendar_sync_enabled());
    assert!(disconnected.google_token().is_none());
}
