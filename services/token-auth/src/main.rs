use std::sync::Arc;

use common_auth::SystemClock;
use common_config::load;
use common_obs::ObsInit;
use tokio::net::TcpListener;
use token_auth::config::{RegistryMode, TokenAuthConfig};
use token_auth::{build_router, build_state, reload_registry, AppState, SERVICE_NAME, VERSION};

fn build_sha() -> &'static str {
    option_env!("BUILD_SHA").unwrap_or("unknown")
}

fn build_time() -> &'static str {
    option_env!("BUILD_TIME").unwrap_or("unknown")
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ObsInit::init(SERVICE_NAME).map_err(|err| -> Box<dyn std::error::Error> { Box::new(err) })?;

    let config = load::<TokenAuthConfig>()?;
    let addr = config.socket_addr()?;
    tracing::info!(
        event = "service_start",
        service = SERVICE_NAME,
        version = VERSION,
        build_sha = build_sha(),
        build_time = build_time(),
        listen_addr = %addr,
        tokens_path = %config.tokens_path.display(),
        registry_mode = %config.registry_mode,
        "starting service"
    );

    let state = Arc::new(build_state(&config, Arc::new(SystemClock)).await?);
    if config.registry_mode == RegistryMode::PerRequest {
        // Not fatal: the file may be provisioned after startup.
        if let Err(error) = state.validator.reload().await {
            tracing::warn!(
                event = "registry_startup_check",
                service = SERVICE_NAME,
                error = %error,
                "token registry not loadable yet, requests will fail until it is"
            );
        }
    }

    #[cfg(unix)]
    tokio::spawn(reload_on_hangup(state.clone()));

    let app = build_router(state);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!(event = "service_stop", service = SERVICE_NAME);

    Ok(())
}

#[cfg(unix)]
async fn reload_on_hangup(state: Arc<AppState>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(error) => {
            tracing::warn!(%error, "cannot listen for SIGHUP, reload via HTTP only");
            return;
        }
    };
    while hangup.recv().await.is_some() {
        // Failures are logged by reload_registry; the previous registry stays.
        let _ = reload_registry(&state).await;
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::warn!(%error, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(error) => {
                tracing::warn!(%error, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!(event = "shutdown_signal", service = SERVICE_NAME);
}
