//! Sync/backup orchestrator.
//!
//! `CalendarSync` owns the sync token of one source calendar. It fetches the
//! events changed since the last run and propagates each of them: adding the
//! user as attendee, mirroring into target calendars and backing up.
//!
//! Every event calmirror writes carries private extended properties naming its
//! source. They are checked before each write, so a replayed batch updates
//! existing copies instead of duplicating them, and copies are never mirrored
//! back to where they came from.

use std::fmt;

use chrono::{Duration, Utc};
use tracing::{debug, error, info, instrument, warn};

use calmirror_core::{JobConfig, MirrorMode, TargetConfig};

use crate::client::{CalendarClient, EventQuery};
use crate::error::CalendarError;
use crate::store::PropertyStore;
use crate::transform::{
    add_attendee_and_organizer, anonymize, copy_for_insert, strip_attendees_and_organizer,
    with_private_property,
};
use crate::types::Event;

/// Set to `"ok"` once the user has been added as attendee.
pub const ATTENDEE_MARKER: &str = "calmirrorAttendeeAdded";
/// Attendee marker written by earlier tooling; honoured but never written.
pub const LEGACY_ATTENDEE_MARKER: &str = "isCompletedAddToEventAttendeesAndOrganizers";
/// Calendar the copy was made from.
pub const SOURCE_CALENDAR_MARKER: &str = "calmirrorSourceCalendarId";
/// Event the copy was made from. Its presence marks an event as a copy.
pub const SOURCE_EVENT_MARKER: &str = "calmirrorSourceEventId";
/// `"mirror"` or `"backup"`.
pub const KIND_MARKER: &str = "calmirrorKind";
/// Set to `"true"` on a backup whose source was cancelled.
pub const SOURCE_DELETED_MARKER: &str = "calmirrorSourceDeleted";

const MARKER_OK: &str = "ok";
const KIND_MIRROR: &str = "mirror";
const KIND_BACKUP: &str = "backup";

/// Property key holding the sync token of a calendar.
pub fn sync_token_key(calendar_id: &str) -> String {
    format!("syncToken_{}", calendar_id)
}

/// Events changed since the current token, and the token to store once they
/// have been handled.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub events: Vec<Event>,
    pub next_sync_token: String,
}

/// Result of propagating one event in one direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Inserted,
    Updated,
    Deleted,
    /// Backup tagged with the source-deleted marker
    Tagged,
    Skipped(&'static str),
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Inserted => write!(f, "inserted"),
            Outcome::Updated => write!(f, "updated"),
            Outcome::Deleted => write!(f, "deleted"),
            Outcome::Tagged => write!(f, "tagged as deleted"),
            Outcome::Skipped(reason) => write!(f, "skipped ({})", reason),
        }
    }
}

/// Counts for one `run`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub changed: usize,
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub tagged: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Whether the sync token advanced
    pub committed: bool,
}

impl SyncReport {
    pub fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Inserted => self.inserted += 1,
            Outcome::Updated => self.updated += 1,
            Outcome::Deleted => self.deleted += 1,
            Outcome::Tagged => self.tagged += 1,
            Outcome::Skipped(_) => self.skipped += 1,
        }
    }

    pub fn writes(&self) -> usize {
        self.inserted + self.updated + self.deleted + self.tagged
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} changed: {} inserted, {} updated, {} deleted, {} tagged, {} skipped, {} failed",
            self.changed,
            self.inserted,
            self.updated,
            self.deleted,
            self.tagged,
            self.skipped,
            self.failed
        )
    }
}

/// Why an event must not be propagated, if it must not.
fn skip_reason(event: &Event) -> Option<&'static str> {
    if event.private_property(SOURCE_EVENT_MARKER).is_some() {
        Some("event is a calmirror copy")
    } else if event.is_recurring_instance() {
        Some("recurring instance")
    } else if event.id.is_none() {
        Some("event has no id")
    } else {
        None
    }
}

/// Body of a mirror copy in the given mode, before provenance tagging.
fn mirror_body(event: &Event, mode: MirrorMode, busy_summary: &str) -> Event {
    let copy = copy_for_insert(event);
    match mode {
        MirrorMode::Full => copy,
        MirrorMode::Copy => strip_attendees_and_organizer(&copy),
        MirrorMode::Busy => anonymize(&copy, busy_summary),
    }
}

pub struct CalendarSync<S: PropertyStore> {
    client: CalendarClient,
    store: S,
    calendar_id: String,
    token: Option<String>,
    pending: Option<ChangeSet>,
    dry_run: bool,
}

impl<S: PropertyStore> CalendarSync<S> {
    pub fn new(client: CalendarClient, store: S, calendar_id: impl Into<String>) -> Self {
        Self {
            client,
            store,
            calendar_id: calendar_id.into(),
            token: None,
            pending: None,
            dry_run: false,
        }
    }

    /// Log writes instead of performing them.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn calendar_id(&self) -> &str {
        &self.calendar_id
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn token_key(&self) -> String {
        sync_token_key(&self.calendar_id)
    }

    /// Establish a sync token if none is held or stored.
    #[instrument(skip(self), fields(calendar = %self.calendar_id))]
    pub async fn initialize(&mut self) -> Result<(), CalendarError> {
        if self.token.is_some() {
            return Ok(());
        }
        if let Some(token) = self.store.get_property(&self.token_key())? {
            debug!("Loaded stored sync token");
            self.token = Some(token);
            return Ok(());
        }

        let token = self.baseline_token().await?;
        self.store.set_property(&self.token_key(), &token)?;
        info!("Initialized sync token for {}", self.calendar_id);
        self.token = Some(token);
        Ok(())
    }

    pub async fn sync_token(&mut self) -> Result<String, CalendarError> {
        self.initialize().await?;
        self.token
            .clone()
            .ok_or_else(|| CalendarError::ApiError("no sync token available".to_string()))
    }

    /// A token covering the last day, without replaying history.
    async fn baseline_token(&self) -> Result<String, CalendarError> {
        let now = Utc::now();
        let window = EventQuery::window(now - Duration::days(1), now);
        let mut page_token = None;

        loop {
            let query = window.clone().page(page_token);
            let page = self.client.list_events(&self.calendar_id, &query).await?;

            if let Some(token) = page.next_sync_token {
                return Ok(token);
            }
            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => {
                    return Err(CalendarError::ApiError(
                        "event list ended without a sync token".to_string(),
                    ))
                }
            }
        }
    }

    async fn list_changes(&self, token: &str) -> Result<ChangeSet, CalendarError> {
        let mut events = Vec::new();
        let mut page_token = None;

        loop {
            let query = EventQuery::changes_since(token).page(page_token);
            let page = self.client.list_events(&self.calendar_id, &query).await?;
            events.extend(page.items);

            if let Some(next) = page.next_page_token {
                page_token = Some(next);
                continue;
            }
            let next_sync_token = page.next_sync_token.ok_or_else(|| {
                CalendarError::ApiError("last page carried no sync token".to_string())
            })?;
            return Ok(ChangeSet {
                events,
                next_sync_token,
            });
        }
    }

    /// Events changed since the current token.
    ///
    /// The result is cached until `commit` or `reset`. An expired token is
    /// replaced by a fresh baseline and yields no events.
    #[instrument(skip(self), fields(calendar = %self.calendar_id))]
    pub async fn fetch_changes(&mut self) -> Result<ChangeSet, CalendarError> {
        if let Some(pending) = &self.pending {
            return Ok(pending.clone());
        }

        let token = self.sync_token().await?;
        let changes = match self.list_changes(&token).await {
            Err(CalendarError::SyncTokenInvalid) => {
                warn!("Sync token for {} expired, taking a new baseline", self.calendar_id);
                self.store.delete_property(&self.token_key())?;
                self.token = None;
                ChangeSet {
                    events: Vec::new(),
                    next_sync_token: self.baseline_token().await?,
                }
            }
            other => other?,
        };

        debug!("Fetched {} changed events", changes.events.len());
        self.pending = Some(changes.clone());
        Ok(changes)
    }

    /// Advance the stored token past `changes`.
    pub fn commit(&mut self, changes: &ChangeSet) -> Result<(), CalendarError> {
        self.store
            .set_property(&self.token_key(), &changes.next_sync_token)?;
        self.token = Some(changes.next_sync_token.clone());
        self.pending = None;
        debug!("Committed sync token for {}", self.calendar_id);
        Ok(())
    }

    /// Fetch and immediately commit.
    pub async fn changed_events(&mut self) -> Result<Vec<Event>, CalendarError> {
        let changes = self.fetch_changes().await?;
        self.commit(&changes)?;
        Ok(changes.events)
    }

    /// Forget the token; the next fetch starts from a new baseline.
    pub fn reset(&mut self) -> Result<(), CalendarError> {
        self.store.delete_property(&self.token_key())?;
        self.token = None;
        self.pending = None;
        info!("Reset sync state for {}", self.calendar_id);
        Ok(())
    }

    /// Add the user to a source event as accepted attendee, once.
    #[instrument(skip(self, event, name), fields(event = event.label()))]
    pub async fn add_self_as_attendee(
        &self,
        event: &Event,
        email: &str,
        name: &str,
    ) -> Result<Outcome, CalendarError> {
        if event.is_cancelled() {
            return Ok(Outcome::Skipped("cancelled"));
        }
        let marked = [ATTENDEE_MARKER, LEGACY_ATTENDEE_MARKER]
            .iter()
            .any(|key| event.private_property(key) == Some(MARKER_OK));
        if marked {
            return Ok(Outcome::Skipped("attendee already added"));
        }
        if event.private_property(SOURCE_EVENT_MARKER).is_some() {
            return Ok(Outcome::Skipped("event is a calmirror copy"));
        }
        let Some(event_id) = event.id.as_deref() else {
            return Ok(Outcome::Skipped("event has no id"));
        };

        let attended = add_attendee_and_organizer(event, email, name);
        let tagged = with_private_property(&attended, ATTENDEE_MARKER, MARKER_OK);
        self.update(&self.calendar_id, event_id, &tagged).await?;
        Ok(Outcome::Updated)
    }

    /// Mirror one source event into `target`.
    #[instrument(skip(self, event, target, busy_summary), fields(event = event.label(), target = %target.calendar_id))]
    pub async fn mirror_event(
        &self,
        event: &Event,
        target: &TargetConfig,
        busy_summary: &str,
    ) -> Result<Outcome, CalendarError> {
        if let Some(reason) = skip_reason(event) {
            debug!("Not mirroring: {}", reason);
            return Ok(Outcome::Skipped(reason));
        }
        let Some(event_id) = event.id.as_deref() else {
            return Ok(Outcome::Skipped("event has no id"));
        };

        let existing = self
            .find_copies(&target.calendar_id, event_id, KIND_MIRROR)
            .await?;

        if event.is_cancelled() {
            if existing.is_empty() {
                return Ok(Outcome::Skipped("cancelled and never mirrored"));
            }
            for copy in &existing {
                if let Some(copy_id) = copy.id.as_deref() {
                    self.delete(&target.calendar_id, copy_id).await?;
                }
            }
            return Ok(Outcome::Deleted);
        }

        let body = self.tag_copy(
            &mirror_body(event, target.mode, busy_summary),
            event_id,
            KIND_MIRROR,
        );
        self.upsert(&target.calendar_id, existing, &body).await
    }

    /// Back up one source event into `backup_calendar`.
    ///
    /// Backups are never deleted; a cancelled source only tags its backup.
    #[instrument(skip(self, event), fields(event = event.label()))]
    pub async fn backup_event(
        &self,
        event: &Event,
        backup_calendar: &str,
    ) -> Result<Outcome, CalendarError> {
        if let Some(reason) = skip_reason(event) {
            debug!("Not backing up: {}", reason);
            return Ok(Outcome::Skipped(reason));
        }
        let Some(event_id) = event.id.as_deref() else {
            return Ok(Outcome::Skipped("event has no id"));
        };

        let existing = self
            .find_copies(backup_calendar, event_id, KIND_BACKUP)
            .await?;

        if event.is_cancelled() {
            let Some(backup) = existing.first() else {
                return Ok(Outcome::Skipped("cancelled and never backed up"));
            };
            if backup.private_property(SOURCE_DELETED_MARKER) == Some("true") {
                return Ok(Outcome::Skipped("backup already tagged"));
            }
            let Some(backup_id) = backup.id.as_deref() else {
                return Ok(Outcome::Skipped("backup has no id"));
            };
            let tagged = with_private_property(backup, SOURCE_DELETED_MARKER, "true");
            self.update(backup_calendar, backup_id, &tagged).await?;
            return Ok(Outcome::Tagged);
        }

        let body = self.tag_copy(&copy_for_insert(event), event_id, KIND_BACKUP);
        self.upsert(backup_calendar, existing, &body).await
    }

    /// Propagate every change of the source calendar according to `job`.
    ///
    /// The token only advances when every event was handled; otherwise the
    /// whole batch is fetched again next time.
    #[instrument(skip(self, job), fields(calendar = %self.calendar_id))]
    pub async fn run(&mut self, job: &JobConfig) -> Result<SyncReport, CalendarError> {
        let changes = self.fetch_changes().await?;
        let mut report = SyncReport {
            changed: changes.events.len(),
            ..SyncReport::default()
        };

        for event in &changes.events {
            if let Some(attendee) = &job.attendee {
                let result = self
                    .add_self_as_attendee(event, &attendee.email, &attendee.name)
                    .await;
                Self::tally(&mut report, result, event, "attend")?;
            }
            for target in &job.targets {
                let result = self.mirror_event(event, target, &job.busy_summary).await;
                Self::tally(&mut report, result, event, &target.calendar_id)?;
            }
            if let Some(backup) = &job.backup_calendar {
                let result = self.backup_event(event, backup).await;
                Self::tally(&mut report, result, event, backup)?;
            }
        }

        if report.failed == 0 {
            self.commit(&changes)?;
            report.committed = true;
        } else {
            warn!(
                "{} operations failed, sync token for {} not advanced",
                report.failed, self.calendar_id
            );
            self.pending = None;
        }

        info!("{}: {}", self.calendar_id, report);
        Ok(report)
    }

    /// Count an outcome. Only an expired access token aborts: it would fail
    /// every remaining event too. Permission errors are per calendar or event.
    fn tally(
        report: &mut SyncReport,
        result: Result<Outcome, CalendarError>,
        event: &Event,
        direction: &str,
    ) -> Result<(), CalendarError> {
        match result {
            Ok(outcome) => {
                debug!("{} -> {}: {}", event.label(), direction, outcome);
                report.record(outcome);
                Ok(())
            }
            Err(e) if e.should_refresh_token() => {
                error!("Aborting sync: {}", e);
                Err(e)
            }
            Err(e) => {
                error!("{} -> {} failed: {}", event.label(), direction, e);
                report.failed += 1;
                Ok(())
            }
        }
    }

    fn tag_copy(&self, body: &Event, source_event_id: &str, kind: &str) -> Event {
        let tagged = with_private_property(body, SOURCE_CALENDAR_MARKER, &self.calendar_id);
        let tagged = with_private_property(&tagged, SOURCE_EVENT_MARKER, source_event_id);
        with_private_property(&tagged, KIND_MARKER, kind)
    }

    /// Live copies of `source_event_id` in `calendar_id`.
    async fn find_copies(
        &self,
        calendar_id: &str,
        source_event_id: &str,
        kind: &str,
    ) -> Result<Vec<Event>, CalendarError> {
        let filter = EventQuery::tagged(&[
            (SOURCE_CALENDAR_MARKER, self.calendar_id.as_str()),
            (SOURCE_EVENT_MARKER, source_event_id),
        ]);
        let mut copies = Vec::new();
        let mut page_token = None;

        loop {
            let query = filter.clone().page(page_token);
            let page = self.client.list_events(calendar_id, &query).await?;
            copies.extend(page.items);
            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        copies.retain(|c| !c.is_cancelled() && c.private_property(KIND_MARKER).map_or(true, |k| k == kind));
        Ok(copies)
    }

    /// Update the first existing copy or insert a new one, then drop the rest.
    async fn upsert(
        &self,
        calendar_id: &str,
        existing: Vec<Event>,
        body: &Event,
    ) -> Result<Outcome, CalendarError> {
        let mut existing = existing.into_iter().filter_map(|c| c.id);

        let outcome = match existing.next() {
            Some(copy_id) => {
                let mut replacement = body.clone();
                replacement.id = Some(copy_id.clone());
                self.update(calendar_id, &copy_id, &replacement).await?;
                Outcome::Updated
            }
            None => {
                self.insert(calendar_id, body).await?;
                Outcome::Inserted
            }
        };

        for duplicate in existing {
            warn!("Removing duplicate copy {} in {}", duplicate, calendar_id);
            self.delete(calendar_id, &duplicate).await?;
        }

        Ok(outcome)
    }

    async fn insert(&self, calendar_id: &str, event: &Event) -> Result<(), CalendarError> {
        if self.dry_run {
            info!("[dry-run] would insert {} into {}", event.label(), calendar_id);
            return Ok(());
        }
        self.client.insert_event(calendar_id, event).await?;
        Ok(())
    }

    async fn update(&self, calendar_id: &str, event_id: &str, event: &Event) -> Result<(), CalendarError> {
        if self.dry_run {
            info!("[dry-run] would update {} in {}", event.label(), calendar_id);
            return Ok(());
        }
        self.client.update_event(calendar_id, event_id, event).await?;
        Ok(())
    }

    async fn delete(&self, calendar_id: &str, event_id: &str) -> Result<(), CalendarError> {
        if self.dry_run {
            info!("[dry-run] would delete {} from {}", event_id, calendar_id);
            return Ok(());
        }
        self.client.delete_event(calendar_id, event_id).await
    }
}
