use std::fmt::{self, Write as _};
use std::io;
use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde_json::json;
use tracing_subscriber::{
    fmt::{format::Writer, FmtContext, FormatEvent, FormatFields, MakeWriter},
    layer::SubscriberExt,
    registry::LookupSpan,
    EnvFilter, Registry,
};

#[derive(Debug, thiserror::Error)]
pub enum ObsInitError {
    #[error("tracing subscriber already initialized")]
    AlreadyInitialized,
    #[error("failed to install tracing subscriber: {0}")]
    Install(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Initialize observability for a service.
pub struct ObsInit;

impl ObsInit {
    /// Install a global tracing subscriber writing JSON lines to stderr.
    pub fn init(service: &str) -> Result<(), ObsInitError> {
        let subscriber = Self::subscriber_with_writer(service, io::stderr);
        tracing::subscriber::set_global_default(subscriber).map_err(|err| {
            if tracing::dispatcher::has_been_set() {
                ObsInitError::AlreadyInitialized
            } else {
                ObsInitError::Install(err)
            }
        })?;
        tracing::debug!("observability initialised");
        Ok(())
    }

    /// Build a tracing subscriber using the provided writer.
    ///
    /// `RUST_LOG` wins over `LOG_LEVEL`; without either, debug builds log at
    /// `debug` and release builds at `info`.
    pub fn subscriber_with_writer<W>(service: &str, writer: W) -> impl tracing::Subscriber
    where
        W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
    {
        let env_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| {
            if cfg!(debug_assertions) {
                "debug".to_string()
            } else {
                "info".to_string()
            }
        });
        let env_filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(env_level))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        let json_format = tracing_subscriber::fmt::format()
            .json()
            .with_current_span(true)
            .with_span_list(false);
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_ansi(false)
            .event_format(ServiceStamp::new(service, json_format))
            .with_writer(writer);

        Registry::default()
            .with(env_filter)
            .with(fmt_layer)
    }
}

/// Prefixes every JSON line produced by `inner` with a `service` field.
struct ServiceStamp<F> {
    service: Arc<str>,
    inner: F,
}

impl<F> ServiceStamp<F> {
    fn new(service: &str, inner: F) -> Self {
        Self {
            service: Arc::from(service),
            inner,
        }
    }
}

impl<S, N, F> FormatEvent<S, N> for ServiceStamp<F>
where
    S: tracing::Subscriber + for<'span> LookupSpan<'span>,
    N: for<'writer> FormatFields<'writer> + 'static,
    F: FormatEvent<S, N>,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> fmt::Result {
        let mut line = String::new();
        self.inner.format_event(ctx, Writer::new(&mut line), event)?;
        match line.strip_prefix('{') {
            Some(rest) => write!(writer, "{{\"service\":{},{}", json!(&*self.service), rest),
            None => writer.write_str(&line),
        }
    }
}

/// Build a simple health and info router for services.
pub fn health_router(service: &'static str, version: &'static str) -> Router {
    let health_handler =
        get(move || async move { Json(json!({ "status": "ok", "service": service })) });
    let info_handler =
        get(move || async move { Json(json!({ "service": service, "version": version })) });

    Router::new()
        .route("/health", health_handler.clone())
        .route("/v1/health", health_handler)
        .route("/info", info_handler.clone())
        .route("/v1/info", info_handler)
}
