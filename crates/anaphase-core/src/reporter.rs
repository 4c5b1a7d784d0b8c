//! Error reporting collaborator.
//!
//! [`SentryReporter`] delivers captured errors to Sentry and knows where the
//! user feedback dialog for an event lives. [`TracingReporter`] is the
//! fallback when no DSN is configured: it only logs.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use url::Url;
use uuid::Uuid;

use crate::error::AnaphaseError;

pub use sentry::types::Dsn;

/// Contextual key/value pairs attached to a captured error.
pub type Extras = BTreeMap<String, String>;

/// Identifier of a captured error event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId(Uuid);

impl EventId {
    /// Generate a fresh id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for EventId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Receives errors that should reach the error-tracking service.
pub trait ErrorReporter: Send + Sync {
    /// Record an error and return the id of the created event.
    fn capture(&self, error: &(dyn std::error::Error + 'static), extras: &Extras) -> EventId;

    /// Link to the user feedback dialog for an event, if the service has one.
    fn feedback_url(&self, event_id: Option<&EventId>) -> Option<String>;
}

/// Parse an optional DSN. `None` or a blank string means reporting is off.
pub fn parse_dsn(raw: Option<&str>) -> Result<Option<Dsn>, AnaphaseError> {
    raw.map(str::trim)
        .filter(|raw| !raw.is_empty())
        .map(|raw| {
            raw.parse::<Dsn>().map_err(|err| AnaphaseError::InvalidDsn {
                dsn: raw.to_string(),
                reason: err.to_string(),
            })
        })
        .transpose()
}

/// Feedback dialog URL for an event.
pub fn report_dialog_url(dsn: &Dsn, event_id: &str) -> Option<String> {
    let mut url = Url::parse(&format!("{}://{}", dsn.scheme(), dsn.host())).ok()?;
    url.set_port(Some(dsn.port())).ok()?;
    url.set_path("/api/embed/error-page/");
    url.query_pairs_mut()
        .append_pair("dsn", &dsn.to_string())
        .append_pair("eventId", event_id);
    Some(url.to_string())
}

/// Reporter that sends every captured error to Sentry.
///
/// Events go to the client bound to the current hub. [`SentryReporter::init`]
/// binds one for the DSN and keeps it alive as long as the reporter.
#[derive(Clone)]
pub struct SentryReporter {
    dsn: Dsn,
    guard: Option<Arc<sentry::ClientInitGuard>>,
}

impl SentryReporter {
    /// Initialize the Sentry client for `dsn`.
    pub fn init(dsn: Dsn) -> Self {
        let guard = sentry::init(sentry::ClientOptions {
            dsn: Some(dsn.clone()),
            ..Default::default()
        });
        Self {
            dsn,
            guard: Some(Arc::new(guard)),
        }
    }

    /// Reporter for an already bound client.
    pub fn new(dsn: Dsn) -> Self {
        Self { dsn, guard: None }
    }

    /// Configured DSN.
    pub fn dsn(&self) -> &Dsn {
        &self.dsn
    }

    /// Returns `true` if this reporter owns an initialized client.
    pub fn is_enabled(&self) -> bool {
        self.guard.as_ref().is_some_and(|guard| guard.is_enabled())
    }
}

impl fmt::Debug for SentryReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SentryReporter")
            .field("dsn", &self.dsn)
            .field("initialized", &self.guard.is_some())
            .finish()
    }
}

impl ErrorReporter for SentryReporter {
    fn capture(&self, error: &(dyn std::error::Error + 'static), extras: &Extras) -> EventId {
        let id = sentry::with_scope(
            |scope| {
                for (key, value) in extras {
                    scope.set_extra(key, value.clone().into());
                }
            },
            || sentry::capture_error(error),
        );
        let id = EventId::from(id);
        tracing::error!(event_id = %id, error = %error, extras = ?extras, "error captured");
        id
    }

    fn feedback_url(&self, event_id: Option<&EventId>) -> Option<String> {
        let event_id = event_id.map_or_else(|| "unknown".to_string(), ToString::to_string);
        report_dialog_url(&self.dsn, &event_id)
    }
}

/// A captured event, kept for inspection.
#[derive(Debug, Clone)]
pub struct CapturedEvent {
    /// Event id.
    pub id: EventId,
    /// Error message.
    pub message: String,
    /// Attached extras.
    pub extras: Extras,
    /// Capture time.
    pub captured_at: DateTime<Utc>,
}

/// Reporter that logs every captured error at ERROR level. Used when no DSN
/// is configured, so it has no feedback dialog.
#[derive(Debug, Default)]
pub struct TracingReporter {
    last: Mutex<Option<CapturedEvent>>,
}

impl TracingReporter {
    /// Create a reporter without a tracking service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recently captured event.
    pub fn last_event(&self) -> Option<CapturedEvent> {
        self.last.lock().clone()
    }
}

impl ErrorReporter for TracingReporter {
    fn capture(&self, error: &(dyn std::error::Error + 'static), extras: &Extras) -> EventId {
        let event = CapturedEvent {
            id: EventId::new(),
            message: error.to_string(),
            extras: extras.clone(),
            captured_at: Utc::now(),
        };
        tracing::error!(
            event_id = %event.id,
            error = %event.message,
            extras = ?event.extras,
            "error captured"
        );
        let id = event.id;
        *self.last.lock() = Some(event);
        id
    }

    fn feedback_url(&self, _event_id: Option<&EventId>) -> Option<String> {
        None
    }
}
