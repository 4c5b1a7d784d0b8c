//! Error boundary around page rendering.

use std::sync::Arc;

use crate::error::RenderError;
use crate::reporter::{ErrorReporter, EventId, Extras};
use crate::shell::escape_html;

/// Title used by the full-page fallback.
pub const FALLBACK_TITLE: &str = "Error loading page";

const FALLBACK_HEADING: &str = "Something went wrong!";
const FALLBACK_MESSAGE: &str = "Our engineers have been notified. If you would like to report \
what you were doing when this error showed up, it would help us fix things faster!";

/// Result of rendering inside a boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rendered {
    /// The children rendered.
    Content(String),
    /// The children failed and the fallback was rendered instead.
    Fallback {
        /// Fallback markup.
        html: String,
        /// Id of the reported event.
        event_id: Option<EventId>,
        /// Document title to use, set by full-page boundaries.
        title: Option<&'static str>,
    },
}

impl Rendered {
    /// Markup to emit.
    pub fn html(&self) -> &str {
        match self {
            Self::Content(html) | Self::Fallback { html, .. } => html,
        }
    }

    /// Returns `true` if the fallback was rendered.
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback { .. })
    }

    /// Title requested by the fallback, if any.
    pub fn title(&self) -> Option<&'static str> {
        match self {
            Self::Content(_) => None,
            Self::Fallback { title, .. } => *title,
        }
    }
}

/// Catches render failures, reports them once and shows a fallback.
///
/// Once failed, the boundary keeps showing the fallback for its lifetime.
pub struct ErrorBoundary {
    full_page: bool,
    reporter: Arc<dyn ErrorReporter>,
    failed: Option<EventId>,
}

impl ErrorBoundary {
    /// Boundary for a section of a page.
    pub fn new(reporter: Arc<dyn ErrorReporter>) -> Self {
        Self {
            full_page: false,
            reporter,
            failed: None,
        }
    }

    /// Boundary for a whole page. The fallback also sets the document title.
    pub fn full_page(reporter: Arc<dyn ErrorReporter>) -> Self {
        Self {
            full_page: true,
            ..Self::new(reporter)
        }
    }

    /// Whether a failure has been caught.
    pub fn has_error(&self) -> bool {
        self.failed.is_some()
    }

    /// Id of the reported event, once failed.
    pub fn event_id(&self) -> Option<EventId> {
        self.failed
    }

    /// Render the children, or the fallback if they fail or failed before.
    pub fn render<F>(&mut self, children: F) -> Rendered
    where
        F: FnOnce() -> Result<String, RenderError>,
    {
        if let Some(event_id) = self.failed {
            return self.fallback(Some(event_id));
        }

        match children() {
            Ok(html) => Rendered::Content(html),
            Err(err) => {
                let mut extras = Extras::new();
                extras.insert("boundary".to_string(), self.kind().to_string());
                if let Some(component) = &err.component {
                    extras.insert("component".to_string(), component.clone());
                }
                let event_id = self.reporter.capture(&err, &extras);
                tracing::warn!(event_id = %event_id, error = %err, "render failed, showing fallback");
                self.failed = Some(event_id);
                self.fallback(Some(event_id))
            }
        }
    }

    fn kind(&self) -> &'static str {
        if self.full_page {
            "page"
        } else {
            "section"
        }
    }

    fn fallback(&self, event_id: Option<EventId>) -> Rendered {
        let feedback = self
            .reporter
            .feedback_url(event_id.as_ref())
            .unwrap_or_else(|| "#".to_string());
        let id = event_id.map_or_else(|| "unknown".to_string(), |id| id.to_string());

        let ui = format!(
            "<h2>{FALLBACK_HEADING}</h2>\n<p>{FALLBACK_MESSAGE}</p>\n\
             <a class=\"report-feedback\" data-event-id=\"{}\" href=\"{}\">Report feedback</a>\n",
            escape_html(&id),
            escape_html(&feedback),
        );

        if self.full_page {
            Rendered::Fallback {
                html: format!("<div>\n<div>\n{ui}</div>\n</div>\n"),
                event_id,
                title: Some(FALLBACK_TITLE),
            }
        } else {
            Rendered::Fallback {
                html: ui,
                event_id,
                title: None,
            }
        }
    }
}

impl std::fmt::Debug for ErrorBoundary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorBoundary")
            .field("full_page", &self.full_page)
            .field("failed", &self.failed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    struct Counting {
        captured: AtomicUsize,
    }

    impl ErrorReporter for Counting {
        fn capture(&self, _error: &(dyn std::error::Error + 'static), _extras: &Extras) -> EventId {
            self.captured.fetch_add(1, Ordering::SeqCst);
            EventId::new()
        }

        fn feedback_url(&self, event_id: Option<&EventId>) -> Option<String> {
            event_id.map(|id| format!("https://feedback.example/?eventId={id}&a=b"))
        }
    }

    #[test]
    fn test_children_render_untouched() {
        let mut boundary = ErrorBoundary::new(Arc::new(Counting::default()));
        let rendered = boundary.render(|| Ok("<p>ok</p>".to_string()));

        assert_eq!(rendered, Rendered::Content("<p>ok</p>".to_string()));
        assert!(!boundary.has_error());
    }

    #[test]
    fn test_failure_reports_once_and_stays_failed() {
        let reporter = Arc::new(Counting::default());
        let mut boundary = ErrorBoundary::new(reporter.clone());

        let first = boundary.render(|| Err(RenderError::new("boom")));
        let second = boundary.render(|| Ok("<p>recovered</p>".to_string()));

        assert!(first.is_fallback());
        assert_eq!(first, second);
        assert_eq!(reporter.captured.load(Ordering::SeqCst), 1);
        assert!(boundary.has_error());
    }

    #[test]
    fn test_fallback_markup() {
        let mut boundary = ErrorBoundary::new(Arc::new(Counting::default()));
        let rendered = boundary.render(|| Err(RenderError::new("boom")));
        let html = rendered.html();
        let id = boundary.event_id().unwrap().to_string();

        assert!(html.contains("<h2>Something went wrong!</h2>"));
        assert!(html.contains("Report feedback"));
        assert!(html.contains(&format!("data-event-id=\"{id}\"")));
        assert!(html.contains("&amp;a=b"));
        assert_eq!(rendered.title(), None);
    }

    #[test]
    fn test_full_page_sets_title() {
        let mut boundary = ErrorBoundary::full_page(Arc::new(Counting::default()));
        let rendered = boundary.render(|| Err(RenderError::new("boom").in_component("Cart")));

        assert_eq!(rendered.title(), Some("Error loading page"));
        assert!(rendered.html().starts_with("<div>"));
    }
}
