//! Application wrapper: current user, initial props and page rendering.

use std::collections::BTreeMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use anaphase_client::{CacheSnapshot, Client, ClientError, Headers};
use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::boundary::ErrorBoundary;
use crate::error::{AnaphaseError, RenderError};
use crate::progress::{ProgressIndicator, ProgressOptions};
use crate::config::AnaphaseConfig;
use crate::reporter::{parse_dsn, ErrorReporter, SentryReporter, TracingReporter};
use crate::request_client::{RenderTarget, RequestClient};
use crate::shell::{Document, HeadContent};

/// Resolves the current user with the request's client.
#[async_trait]
pub trait FetchUser<U>: Send + Sync {
    /// Fetch the user, `None` when signed out.
    async fn fetch_user(&self, client: &Client) -> Result<Option<U>, AnaphaseError>;
}

#[async_trait]
impl<U, F, Fut> FetchUser<U> for F
where
    U: Send + 'static,
    F: Fn(Client) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<U>, AnaphaseError>> + Send,
{
    async fn fetch_user(&self, client: &Client) -> Result<Option<U>, AnaphaseError> {
        (self)(client.clone()).await
    }
}

/// Request data available while resolving initial props.
#[derive(Debug, Clone, Default)]
pub struct PageContext {
    /// Request path.
    pub path: String,
    /// Query string parameters.
    pub query: BTreeMap<String, String>,
    /// Incoming request headers.
    pub headers: Headers,
}

impl PageContext {
    /// Create a context for a path.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Add a query parameter.
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    /// Add a request header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Client and current user handed to pages.
#[derive(Debug)]
pub struct AppContext<'a, U> {
    /// GraphQL client for this render.
    pub client: &'a Client,
    /// Signed-in user.
    pub current_user: Option<&'a U>,
}

/// The current user, if signed in.
pub fn use_user<'a, U>(ctx: &AppContext<'a, U>) -> Option<&'a U> {
    ctx.current_user
}

/// A page supplied by the embedding application.
#[async_trait]
pub trait Page<U: Sync>: Send + Sync {
    /// Resolve page props before rendering. `None` means the page has none.
    async fn initial_props(
        &self,
        _ctx: &PageContext,
        _client: &Client,
    ) -> Result<Option<Value>, AnaphaseError> {
        Ok(None)
    }

    /// Render the page body.
    fn render(&self, app: &AppContext<'_, U>, props: &Value) -> Result<String, RenderError>;
}

/// Props resolved before rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct AppProps<U> {
    /// Page props, `{}` when the page declares none.
    pub page_props: Value,
    /// Current user.
    pub current_user: Option<U>,
}

/// Arguments to [`init_anaphase`].
pub struct AnaphaseArgs<F> {
    /// Sentry-style DSN for error reporting.
    pub sentry_dsn: Option<String>,
    /// Current user resolver.
    pub fetch_user: F,
}

/// The configured application.
pub struct Anaphase<U, F> {
    reporter: Arc<dyn ErrorReporter>,
    fetch_user: F,
    progress: ProgressIndicator,
    title: Option<String>,
    graphql_path: Option<String>,
    _user: PhantomData<fn() -> U>,
}

/// Configure error reporting and the user fetcher.
pub fn init_anaphase<U, F>(args: AnaphaseArgs<F>) -> Result<Anaphase<U, F>, AnaphaseError>
where
    U: Send + Sync + 'static,
    F: FetchUser<U>,
{
    let reporter: Arc<dyn ErrorReporter> = match parse_dsn(args.sentry_dsn.as_deref())? {
        Some(dsn) => {
            tracing::info!(host = dsn.host(), "error reporting enabled");
            Arc::new(SentryReporter::init(dsn))
        }
        None => Arc::new(TracingReporter::new()),
    };
    tracing::info!("anaphase initialized");
    Ok(Anaphase {
        reporter,
        fetch_user: args.fetch_user,
        progress: ProgressIndicator::default(),
        title: None,
        graphql_path: None,
        _user: PhantomData,
    })
}

impl<U, F> Anaphase<U, F>
where
    U: Send + Sync + 'static,
    F: FetchUser<U>,
{
    /// Initialize from the `[reporting]` and `[client]` config sections.
    pub fn from_config(config: &AnaphaseConfig, fetch_user: F) -> Result<Self, AnaphaseError> {
        let app = init_anaphase(AnaphaseArgs {
            sentry_dsn: config.reporting.dsn.clone(),
            fetch_user,
        })?;
        Ok(app.with_graphql_path(config.client.graphql_path.clone()))
    }

    /// Replace the error reporter.
    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Configure the progress indicator.
    pub fn with_progress(mut self, options: ProgressOptions) -> Self {
        self.progress = ProgressIndicator::new(options);
        self
    }

    /// Default document title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Override the GraphQL path used by per-request clients.
    pub fn with_graphql_path(mut self, path: impl Into<String>) -> Self {
        self.graphql_path = Some(path.into());
        self
    }

    /// GraphQL path used by per-request clients, if overridden.
    pub fn graphql_path(&self) -> Option<&str> {
        self.graphql_path.as_deref()
    }

    /// Error reporter in use.
    pub fn reporter(&self) -> Arc<dyn ErrorReporter> {
        self.reporter.clone()
    }

    /// Progress indicator in use.
    pub fn progress(&self) -> &ProgressIndicator {
        &self.progress
    }

    /// Build the client for one request, reporting its errors.
    pub fn client_for_request(
        &self,
        target: RenderTarget,
        headers: Headers,
        initial_state: Option<CacheSnapshot>,
    ) -> Result<Client, ClientError> {
        let mut builder = RequestClient::new(target, self.reporter.clone());
        if let Some(path) = &self.graphql_path {
            builder = builder.with_graphql_path(path.clone());
        }
        builder.build(headers, initial_state)
    }

    /// Resolve page props first, then the current user.
    pub async fn initial_props<P>(
        &self,
        page: &P,
        ctx: &PageContext,
        client: &Client,
    ) -> Result<AppProps<U>, AnaphaseError>
    where
        P: Page<U> + ?Sized,
    {
        let page_props = page
            .initial_props(ctx, client)
            .await?
            .unwrap_or_else(|| Value::Object(Map::new()));
        let current_user = self.fetch_user.fetch_user(client).await?;

        Ok(AppProps {
            page_props,
            current_user,
        })
    }

    /// Render the page inside a full-page error boundary, with the progress
    /// styles and the client's cache snapshot for hydration.
    pub fn render<P>(&self, page: &P, props: &AppProps<U>, client: &Client) -> String
    where
        P: Page<U> + ?Sized,
    {
        let app = AppContext {
            client,
            current_user: props.current_user.as_ref(),
        };

        let mut boundary = ErrorBoundary::full_page(self.reporter.clone());
        let rendered = boundary.render(|| page.render(&app, &props.page_props));

        let title = rendered
            .title()
            .map(str::to_string)
            .or_else(|| self.title.clone());
        let mut head = HeadContent::default().with_style(self.progress.css());
        head.title = title;

        let state = json!({
            "cache": client.extract(),
            "pageProps": props.page_props,
        });

        Document::new(head, rendered.html())
            .with_state(state)
            .render()
    }

    /// Resolve props and render in one step.
    pub async fn render_page<P>(
        &self,
        page: &P,
        ctx: &PageContext,
        client: &Client,
    ) -> Result<String, AnaphaseError>
    where
        P: Page<U> + ?Sized,
    {
        let props = self.initial_props(page, ctx, client).await?;
        Ok(self.render(page, &props, client))
    }
}

impl<U, F> std::fmt::Debug for Anaphase<U, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Anaphase")
            .field("progress", &self.progress)
            .field("title", &self.title)
            .field("graphql_path", &self.graphql_path)
            .finish()
    }
}
