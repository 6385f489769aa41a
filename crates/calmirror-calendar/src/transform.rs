//! Pure transformations on event records.
//!
//! Every function borrows its input and returns a modified copy.

use crate::types::{Attendee, Event, ExtendedProperties, Organizer, ResponseStatus, Visibility};

/// Server-assigned or type-specific fields that cannot be written to a
/// different calendar.
const NON_PORTABLE_FIELDS: &[&str] = &[
    "created",
    "updated",
    "creator",
    "sequence",
    "originalStartTime",
    "eventType",
    "workingLocationProperties",
    "outOfOfficeProperties",
    "focusTimeProperties",
    "birthdayProperties",
];

/// Fields that reveal what an event is about beyond the typed ones.
const CONTENT_FIELDS: &[&str] = &["conferenceData", "hangoutLink", "attachments", "source", "gadget"];

/// Copy an event so it can be inserted as a new event in another calendar.
///
/// Identity (`id`, `iCalUID`, `etag`, ...) is cleared; content and extended
/// properties are kept.
pub fn copy_for_insert(event: &Event) -> Event {
    let mut copy = event.clone();
    copy.id = None;
    copy.ical_uid = None;
    copy.etag = None;
    copy.html_link = None;
    copy.recurring_event_id = None;
    for field in NON_PORTABLE_FIELDS {
        copy.extra.remove(*field);
    }
    copy
}

/// Add `email` as an accepted attendee unless already present, and make it
/// the organizer when the event has none.
pub fn add_attendee_and_organizer(event: &Event, email: &str, name: &str) -> Event {
    let mut out = event.clone();
    let display_name = (!name.is_empty()).then(|| name.to_string());

    if !out.has_attendee(email) {
        out.attendees.get_or_insert_with(Vec::new).push(Attendee {
            email: email.to_string(),
            display_name: display_name.clone(),
            response_status: Some(ResponseStatus::Accepted),
            ..Attendee::default()
        });
    }

    if out.organizer.is_none() {
        out.organizer = Some(Organizer {
            email: Some(email.to_string()),
            display_name,
            ..Organizer::default()
        });
    }

    out
}

/// Remove every attendee and the organizer.
pub fn strip_attendees_and_organizer(event: &Event) -> Event {
    let mut out = event.clone();
    out.attendees = Some(Vec::new());
    out.organizer = None;
    out
}

/// Hide everything but the time slot: private visibility, placeholder
/// summary, no description, location, guests or conference details.
pub fn anonymize(event: &Event, summary: &str) -> Event {
    let mut out = event.clone();
    out.visibility = Some(Visibility::Private);
    out.summary = Some(summary.to_string());
    out.description = Some(String::new());
    out.location = Some(String::new());
    out.organizer = Some(Organizer {
        id: Some(String::new()),
        email: Some(String::new()),
        display_name: Some(String::new()),
        is_self: Some(false),
    });
    out.attendees = Some(Vec::new());
    for field in CONTENT_FIELDS {
        out.extra.remove(*field);
    }
    if let Some(props) = out.extended_properties.as_mut() {
        props.shared = None;
    }
    out
}

/// Set a private extended property, creating the containers if needed.
pub fn with_private_property(event: &Event, key: &str, value: &str) -> Event {
    let mut out = event.clone();
    out.extended_properties
        .get_or_insert_with(ExtendedProperties::default)
        .private
        .get_or_insert_with(Default::default)
        .insert(key.to_string(), value.to_string());
    out
}
