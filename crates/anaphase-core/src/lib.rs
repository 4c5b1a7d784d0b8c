//! Anaphase application bootstrap.
//!
//! This crate wires the GraphQL client into a server-rendered application:
//! - [`init_anaphase`] configures error reporting (Sentry when a DSN is set)
//!   and the current-user fetcher; [`Anaphase::from_config`] does the same
//!   from an [`AnaphaseConfig`].
//! - [`Anaphase::client_for_request`] builds a client per request with the
//!   reporting hooks installed.
//! - [`ErrorBoundary`] turns render failures into a fallback with a feedback link.
//! - [`ProgressIndicator`] styles the navigation progress bar.
//!
//! # Example
//!
//! ```rust,no_run
//! use anaphase_core::{init_anaphase, AnaphaseArgs, AnaphaseError, RenderTarget};
//! use anaphase_client::{Client, Headers};
//!
//! # fn main() -> Result<(), AnaphaseError> {
//! let app = init_anaphase::<String, _>(AnaphaseArgs {
//!     sentry_dsn: None,
//!     fetch_user: |_client: Client| async { Ok::<_, AnaphaseError>(None) },
//! })?;
//! let client = app.client_for_request(RenderTarget::Server { port: 3000 }, Headers::new(), None)?;
//! # let _ = client;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![allow(clippy::module_name_repetitions)]

mod app;
mod boundary;
mod config;
mod error;
mod progress;
mod reporter;
mod request_client;
mod shell;

pub use app::{
    init_anaphase, use_user, Anaphase, AnaphaseArgs, AppContext, AppProps, FetchUser, Page,
    PageContext,
};
pub use boundary::{ErrorBoundary, Rendered, FALLBACK_TITLE};
pub use config::{AnaphaseConfig, ClientSettings, ReportingConfig, ServerConfig, CONFIG_FILES};
pub use error::{AnaphaseError, RenderError};
pub use progress::{
    NavigationProgress, ProgressIndicator, ProgressOptions, ProgressState, DEFAULT_COLOR,
};
pub use reporter::{
    parse_dsn, report_dialog_url, CapturedEvent, Dsn, ErrorReporter, EventId, Extras,
    SentryReporter, TracingReporter,
};
pub use request_client::{
    client_for_request, RenderTarget, RequestClient, DEFAULT_GRAPHQL_PATH, DEFAULT_PORT,
};
pub use shell::{Document, HeadContent, STATE_SCRIPT_ID};
