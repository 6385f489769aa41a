#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use calmirror_calendar::{
    CalendarClient, CalendarSync, Event, MemoryPropertyStore, Outcome, PropertyStore, RetryConfig,
};
use calmirror_core::{JobConfig, MirrorMode, SelfAttendee, TargetConfig};

const SOURCE: &str = "primary";
const TARGET: &str = "target";
const BACKUP: &str = "backup";

fn sync_with(server: &MockServer, store: MemoryPropertyStore) -> CalendarSync<MemoryPropertyStore> {
    let client =
        CalendarClient::new_with_base_url("test_token", &server.uri()).with_retry(RetryConfig::none());
    CalendarSync::new(client, store, SOURCE)
}

fn stored(token: &str) -> MemoryPropertyStore {
    MemoryPropertyStore::from_properties(vec![("syncToken_primary".into(), token.into())])
}

fn event(value: Value) -> Event {
    serde_json::from_value(value).unwrap()
}

fn meeting() -> Event {
    event(json!({
        "id": "e1",
        "status": "confirmed",
        "summary": "Planning",
        "description": "Roadmap",
        "start": {"dateTime": "2024-03-01T09:00:00Z"},
        "end": {"dateTime": "2024-03-01T10:00:00Z"},
        "attendees": [{"email": "colleague@example.com"}]
    }))
}

fn target(mode: MirrorMode) -> TargetConfig {
    TargetConfig {
        calendar_id: TARGET.to_string(),
        mode,
    }
}

async fn copies_of(server: &MockServer, calendar: &str, source_event: &str, items: Value) {
    Mock::given(method("GET"))
        .and(path(format!("/calendars/{}/events", calendar)))
        .and(query_param(
            "privateExtendedProperty",
            format!("calmirrorSourceEventId={}", source_event),
        ))
        .and(query_param("privateExtendedProperty", "calmirrorSourceCalendarId=primary"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": items })))
        .mount(server)
        .await;
}

async fn body_of(server: &MockServer, http_method: &str) -> Value {
    let requests = server.received_requests().await.unwrap();
    let request = requests
        .iter()
        .find(|r| r.method.as_str() == http_method)
        .expect("no matching request");
    serde_json::from_slice(&request.body).unwrap()
}

#[tokio::test]
async fn test_initialize_takes_baseline_once() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/calendars/primary/events"))
        .and(query_param("pageToken", "p2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [], "nextSyncToken": "baseline"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/calendars/primary/events"))
        .and(query_param("maxResults", "2500"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{"id": "old"}], "nextPageToken": "p2"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut sync = sync_with(&server, MemoryPropertyStore::new());
    sync.initialize().await.unwrap();
    sync.initialize().await.unwrap();

    assert_eq!(sync.sync_token().await.unwrap(), "baseline");
    assert_eq!(
        sync.store().get_property("syncToken_primary").unwrap().as_deref(),
        Some("baseline")
    );

    let requests = server.received_requests().await.unwrap();
    let first = requests[0].url.query().unwrap_or_default().to_string();
    assert!(first.contains("timeMin="));
    assert!(first.contains("timeMax="));
}

#[tokio::test]
async fn test_stored_token_skips_baseline() {
    let server = MockServer::start().await;

    let mut sync = sync_with(&server, stored("t1"));
    assert_eq!(sync.sync_token().await.unwrap(), "t1");
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_fetch_changes_follows_pages_and_caches() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/calendars/primary/events"))
        .and(query_param("syncToken", "t1"))
        .and(query_param("pageToken", "p2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{"id": "e2", "status": "cancelled"}],
            "nextSyncToken": "t2"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/calendars/primary/events"))
        .and(query_param("syncToken", "t1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{"id": "e1", "summary": "Planning"}],
            "nextPageToken": "p2"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut sync = sync_with(&server, stored("t1"));
    let changes = sync.fetch_changes().await.unwrap();
    let again = sync.fetch_changes().await.unwrap();

    assert_eq!(changes, again);
    assert_eq!(changes.events.len(), 2);
    assert!(changes.events[1].is_cancelled());
    assert_eq!(changes.next_sync_token, "t2");

    // not persisted until committed
    assert_eq!(
        sync.store().get_property("syncToken_primary").unwrap().as_deref(),
        Some("t1")
    );
    sync.commit(&changes).unwrap();
    assert_eq!(
        sync.store().get_property("syncToken_primary").unwrap().as_deref(),
        Some("t2")
    );
}

#[tokio::test]
async fn test_changed_events_commits() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/calendars/primary/events"))
        .and(query_param("syncToken", "t1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{"id": "e1"}], "nextSyncToken": "t2"
        })))
        .mount(&server)
        .await;

    let mut sync = sync_with(&server, stored("t1"));
    let events = sync.changed_events().await.unwrap();

    assert_eq!(events.len(), 1);
    assert_eq!(sync.sync_token().await.unwrap(), "t2");
}

#[tokio::test]
async fn test_expired_token_takes_new_baseline() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/calendars/primary/events"))
        .and(query_param("syncToken", "stale"))
        .respond_with(ResponseTemplate::new(410))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/calendars/primary/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{"id": "recent"}], "nextSyncToken": "fresh"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut sync = sync_with(&server, stored("stale"));
    let changes = sync.fetch_changes().await.unwrap();

    assert!(changes.events.is_empty());
    assert_eq!(changes.next_sync_token, "fresh");
    assert_eq!(sync.store().get_property("syncToken_primary").unwrap(), None);

    sync.commit(&changes).unwrap();
    assert_eq!(
        sync.store().get_property("syncToken_primary").unwrap().as_deref(),
        Some("fresh")
    );
}

#[tokio::test]
async fn test_mirror_inserts_tagged_busy_copy() {
    let server = MockServer::start().await;
    copies_of(&server, TARGET, "e1", json!([])).await;

    Mock::given(method("POST"))
        .and(path("/calendars/target/events"))
        .and(query_param("sendUpdates", "none"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "c1"})))
        .expect(1)
        .mount(&server)
        .await;

    let sync = sync_with(&server, MemoryPropertyStore::new());
    let outcome = sync
        .mirror_event(&meeting(), &target(MirrorMode::Busy), "Busy")
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Inserted);

    let body = body_of(&server, "POST").await;
    assert!(body.get("id").is_none());
    assert_eq!(body["summary"], "Busy");
    assert_eq!(body["description"], "");
    assert_eq!(body["visibility"], "private");
    assert_eq!(body["attendees"], json!([]));
    assert_eq!(body["start"]["dateTime"], "2024-03-01T09:00:00Z");

    let private = &body["extendedProperties"]["private"];
    assert_eq!(private["calmirrorSourceCalendarId"], "primary");
    assert_eq!(private["calmirrorSourceEventId"], "e1");
    assert_eq!(private["calmirrorKind"], "mirror");
}

#[tokio::test]
async fn test_mirror_updates_existing_copy_and_drops_duplicates() {
    let server = MockServer::start().await;
    copies_of(
        &server,
        TARGET,
        "e1",
        json!([
            {"id": "c1", "extendedProperties": {"private": {"calmirrorKind": "mirror"}}},
            {"id": "c2", "extendedProperties": {"private": {"calmirrorKind": "mirror"}}}
        ]),
    )
    .await;

    Mock::given(method("PUT"))
        .and(path("/calendars/target/events/c1"))
        .and(body_partial_json(json!({"id": "c1", "summary": "Planning"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "c1"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/calendars/target/events/c2"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let sync = sync_with(&server, MemoryPropertyStore::new());
    let outcome = sync
        .mirror_event(&meeting(), &target(MirrorMode::Copy), "Busy")
        .await
        .unwrap();

    assert_eq!(outcome, Outcome::Updated);
    let body = body_of(&server, "PUT").await;
    assert_eq!(body["attendees"], json!([]));
    assert!(body.get("organizer").is_none());
}

#[tokio::test]
async fn test_cancelled_source_deletes_mirror() {
    let server = MockServer::start().await;
    copies_of(&server, TARGET, "e1", json!([{"id": "c1"}])).await;

    Mock::given(method("DELETE"))
        .and(path("/calendars/target/events/c1"))
        .and(query_param("sendUpdates", "none"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let sync = sync_with(&server, MemoryPropertyStore::new());
    let cancelled = event(json!({"id": "e1", "status": "cancelled"}));
    let outcome = sync
        .mirror_event(&cancelled, &target(MirrorMode::Busy), "Busy")
        .await
        .unwrap();

    assert_eq!(outcome, Outcome::Deleted);
}

#[tokio::test]
async fn test_copies_and_instances_are_not_propagated() {
    let server = MockServer::start().await;
    let sync = sync_with(&server, MemoryPropertyStore::new());

    let copy = event(json!({
        "id": "c1",
        "extendedProperties": {"private": {"calmirrorSourceEventId": "e1"}}
    }));
    let instance = event(json!({"id": "e1_20240301", "recurringEventId": "e1"}));

    for skipped in [&copy, &instance] {
        let mirrored = sync
            .mirror_event(skipped, &target(MirrorMode::Full), "Busy")
            .await
            .unwrap();
        let backed_up = sync.backup_event(skipped, BACKUP).await.unwrap();
        assert!(matches!(mirrored, Outcome::Skipped(_)));
        assert!(matches!(backed_up, Outcome::Skipped(_)));
    }

    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_backup_keeps_attendees() {
    let server = MockServer::start().await;
    copies_of(&server, BACKUP, "e1", json!([])).await;

    Mock::given(method("POST"))
        .and(path("/calendars/backup/events"))
        .and(body_partial_json(json!({
            "summary": "Planning",
            "attendees": [{"email": "colleague@example.com"}],
            "extendedProperties": {"private": {"calmirrorKind": "backup"}}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "b1"})))
        .expect(1)
        .mount(&server)
        .await;

    let sync = sync_with(&server, MemoryPropertyStore::new());
    assert_eq!(
        sync.backup_event(&meeting(), BACKUP).await.unwrap(),
        Outcome::Inserted
    );
}

#[tokio::test]
async fn test_cancelled_source_tags_backup_instead_of_deleting() {
    let server = MockServer::start().await;
    copies_of(
        &server,
        BACKUP,
        "e1",
        json!([{
            "id": "b1",
            "summary": "Planning",
            "extendedProperties": {"private": {"calmirrorKind": "backup", "calmirrorSourceEventId": "e1"}}
        }]),
    )
    .await;

    Mock::given(method("PUT"))
        .and(path("/calendars/backup/events/b1"))
        .and(body_partial_json(json!({
            "summary": "Planning",
            "extendedProperties": {"private": {"calmirrorSourceDeleted": "true"}}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "b1"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&server)
        .await;

    let sync = sync_with(&server, MemoryPropertyStore::new());
    let cancelled = event(json!({"id": "e1", "status": "cancelled"}));

    assert_eq!(
        sync.backup_event(&cancelled, BACKUP).await.unwrap(),
        Outcome::Tagged
    );
}

#[tokio::test]
async fn test_add_self_as_attendee_once() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/calendars/primary/events/e1"))
        .and(query_param("sendUpdates", "none"))
        .and(body_partial_json(json!({
            "organizer": {"email": "me@example.com"},
            "extendedProperties": {"private": {"calmirrorAttendeeAdded": "ok"}}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "e1"})))
        .expect(1)
        .mount(&server)
        .await;

    let sync = sync_with(&server, MemoryPropertyStore::new());
    let outcome = sync
        .add_self_as_attendee(&meeting(), "me@example.com", "Me")
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Updated);

    let body = body_of(&server, "PUT").await;
    let attendees = body["attendees"].as_array().unwrap();
    assert_eq!(attendees.len(), 2);
    assert_eq!(attendees[1]["email"], "me@example.com");
    assert_eq!(attendees[1]["responseStatus"], "accepted");

    let marked = event(json!({
        "id": "e1",
        "extendedProperties": {"private": {"calmirrorAttendeeAdded": "ok"}}
    }));
    let cancelled = event(json!({"id": "e2", "status": "cancelled"}));
    for skipped in [&marked, &cancelled] {
        let outcome = sync
            .add_self_as_attendee(skipped, "me@example.com", "Me")
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::Skipped(_)));
    }
}

fn job() -> JobConfig {
    let mut job = JobConfig::new(SOURCE);
    job.targets.push(target(MirrorMode::Busy));
    job.backup_calendar = Some(BACKUP.to_string());
    job
}

async fn one_change(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/calendars/primary/events"))
        .and(query_param("syncToken", "t1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{"id": "e1", "status": "confirmed", "summary": "Planning"}],
            "nextSyncToken": "t2"
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_run_commits_after_full_success() {
    let server = MockServer::start().await;
    one_change(&server).await;
    copies_of(&server, TARGET, "e1", json!([])).await;
    copies_of(&server, BACKUP, "e1", json!([])).await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "new"})))
        .expect(2)
        .mount(&server)
        .await;

    let mut sync = sync_with(&server, stored("t1"));
    let report = sync.run(&job()).await.unwrap();

    assert_eq!(report.changed, 1);
    assert_eq!(report.inserted, 2);
    assert_eq!(report.failed, 0);
    assert!(report.committed);
    assert_eq!(
        sync.store().get_property("syncToken_primary").unwrap().as_deref(),
        Some("t2")
    );
}

#[tokio::test]
async fn test_run_keeps_token_when_a_write_fails() {
    let server = MockServer::start().await;
    one_change(&server).await;
    copies_of(&server, TARGET, "e1", json!([])).await;
    copies_of(&server, BACKUP, "e1", json!([])).await;

    Mock::given(method("POST"))
        .and(path("/calendars/target/events"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/calendars/backup/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "b1"})))
        .mount(&server)
        .await;

    let mut sync = sync_with(&server, stored("t1"));
    let report = sync.run(&job()).await.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.inserted, 1);
    assert!(!report.committed);
    assert_eq!(
        sync.store().get_property("syncToken_primary").unwrap().as_deref(),
        Some("t1")
    );
}

#[tokio::test]
async fn test_run_aborts_on_expired_access_token() {
    let server = MockServer::start().await;
    one_change(&server).await;

    Mock::given(method("GET"))
        .and(path("/calendars/target/events"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let mut sync = sync_with(&server, stored("t1"));
    let result = sync.run(&job()).await;

    assert!(result.unwrap_err().should_refresh_token());
    assert_eq!(
        sync.store().get_property("syncToken_primary").unwrap().as_deref(),
        Some("t1")
    );
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let server = MockServer::start().await;
    one_change(&server).await;
    copies_of(&server, TARGET, "e1", json!([])).await;
    copies_of(&server, BACKUP, "e1", json!([])).await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mut job = job();
    job.attendee = Some(SelfAttendee {
        email: "me@example.com".to_string(),
        name: String::new(),
    });
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mut sync = sync_with(&server, stored("t1")).dry_run(true);
    let report = sync.run(&job).await.unwrap();

    assert_eq!(report.inserted, 2);
    assert_eq!(report.updated, 1);
    assert!(report.committed);
}

#[tokio::test]
async fn test_reset_forgets_token() {
    let server = MockServer::start().await;
    let mut sync = sync_with(&server, stored("t1"));

    sync.reset().unwrap();

    assert_eq!(sync.store().get_property("syncToken_primary").unwrap(), None);
}

#[tokio::test]
async fn test_attendee_added_to_exception_instance() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/calendars/primary/events/s_20240301"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "s_20240301"})))
        .expect(1)
        .mount(&server)
        .await;

    let sync = sync_with(&server, MemoryPropertyStore::new());
    let instance = event(json!({"id": "s_20240301", "recurringEventId": "s"}));

    assert_eq!(
        sync.add_self_as_attendee(&instance, "me@example.com", "")
            .await
            .unwrap(),
        Outcome::Updated
    );
}

#[tokio::test]
async fn test_legacy_attendee_marker_is_honoured() {
    let server = MockServer::start().await;
    let sync = sync_with(&server, MemoryPropertyStore::new());

    let handled = event(json!({
        "id": "e1",
        "extendedProperties": {"private": {"isCompletedAddToEventAttendeesAndOrganizers": "ok"}}
    }));
    let outcome = sync
        .add_self_as_attendee(&handled, "me@example.com", "")
        .await
        .unwrap();

    assert_eq!(outcome, Outcome::Skipped("attendee already added"));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_run_counts_forbidden_write_and_continues() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/calendars/primary/events"))
        .and(query_param("syncToken", "t1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [
                {"id": "e1", "status": "confirmed", "summary": "Theirs"},
                {"id": "e2", "status": "confirmed", "summary": "Mine"}
            ],
            "nextSyncToken": "t2"
        })))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/calendars/primary/events/e1"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": {"errors": [{"reason": "forbiddenForNonOrganizer"}], "code": 403}
        })))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/calendars/primary/events/e2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "e2"})))
        .expect(1)
        .mount(&server)
        .await;
    copies_of(&server, TARGET, "e1", json!([])).await;
    copies_of(&server, TARGET, "e2", json!([])).await;
    Mock::given(method("POST"))
        .and(path("/calendars/target/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "new"})))
        .expect(2)
        .mount(&server)
        .await;

    let mut job = JobConfig::new(SOURCE);
    job.attendee = Some(SelfAttendee {
        email: "me@example.com".to_string(),
        name: String::new(),
    });
    job.targets.push(target(MirrorMode::Busy));

    let mut sync = sync_with(&server, stored("t1"));
    let report = sync.run(&job).await.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.updated, 1);
    assert_eq!(report.inserted, 2);
    assert!(!report.committed);
    assert_eq!(
        sync.store().get_property("syncToken_primary").unwrap().as_deref(),
        Some("t1")
    );
}

#[tokio::test]
async fn test_run_counts_quota_error_on_lookup() {
    let server = MockServer::start().await;
    one_change(&server).await;

    Mock::given(method("GET"))
        .and(path("/calendars/target/events"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": {"errors": [{"reason": "rateLimitExceeded"}], "code": 403}
        })))
        .mount(&server)
        .await;
    copies_of(&server, BACKUP, "e1", json!([])).await;
    Mock::given(method("POST"))
        .and(path("/calendars/backup/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "b1"})))
        .expect(1)
        .mount(&server)
        .await;

    let mut sync = sync_with(&server, stored("t1"));
    let report = sync.run(&job()).await.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.inserted, 1);
    assert!(!report.committed);
}

#[tokio::test]
async fn test_run_aborts_when_source_listing_is_forbidden() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/calendars/primary/events"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let mut sync = sync_with(&server, stored("t1"));
    let result = sync.run(&job()).await;

    assert!(matches!(result, Err(calmirror_calendar::CalendarError::AuthRequired)));
}
