use std::sync::Arc;

use anyhow::Context;

use ets_api::app::{build_app, build_services};
use ets_infra::{EtsConfig, load_dotenv};

fn main() -> anyhow::Result<()> {
    load_dotenv();
    ets_observability::init();

    let config = EtsConfig::from_env().context("reading configuration")?;

    // Built before the runtime starts: the blocking HTTP client cannot be
    // created or dropped inside one.
    let services = Arc::new(build_services(&config)?);
    let app = build_app(services.clone());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    runtime.block_on(async {
        let listener = tokio::net::TcpListener::bind(&config.bind_addr)
            .await
            .with_context(|| format!("failed to bind {}", config.bind_addr))?;
        tracing::info!("listening on {}", listener.local_addr()?);

        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("shutdown requested");
            })
            .await
            .context("server error")
    })?;

    services.shutdown();
    Ok(())
}
