//! Task wiring: store, sweep loop, nozzle and HTTP server.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{info, warn};

use firehose_core::ExporterConfig;
use firehose_metrics::{MetricsStore, Registry};
use firehose_nozzle::{Credentials, Nozzle, NozzleConfig, StaticToken, UaaTokenRefresher};

/// Run the exporter until Ctrl-C or a fatal nozzle error.
pub async fn run(config: ExporterConfig) -> anyhow::Result<()> {
    info!(
        doppler = %config.doppler.url,
        subscription_id = %config.doppler.subscription_id,
        namespace = %config.metrics.namespace,
        "firehose exporter starting"
    );

    // ── Store ──────────────────────────────────────────────────
    let store = Arc::new(
        MetricsStore::new(
            config.metrics.expiration,
            config.metrics.cleanup_interval,
            config.deployment_filter(),
            config.event_filter()?,
        )
        .with_custom_uuid_origin(config.metrics.custom_uuid_origin.as_str()),
    );
    let registry = Arc::new(Registry::for_store(
        &config.metrics.namespace,
        &config.metrics.environment,
        store.clone(),
    ));

    // ── Nozzle ─────────────────────────────────────────────────
    let credentials = credentials(&config)?;
    let nozzle = Nozzle::new(
        NozzleConfig::from_doppler(&config.doppler)?,
        credentials,
        store.clone(),
    )?;

    // ── Background tasks ───────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut server_shutdown = shutdown_rx.clone();

    let cleanup_handle = {
        let store = store.clone();
        tokio::spawn(async move { store.run_cleanup(shutdown_rx).await })
    };
    let mut nozzle_handle = tokio::spawn(async move { nozzle.start().await });

    // ── HTTP server ────────────────────────────────────────────
    let router = firehose_api::build_router(registry, &config.web.telemetry_path);
    let listener = tokio::net::TcpListener::bind(&config.web.listen_address)
        .await
        .with_context(|| format!("binding {}", config.web.listen_address))?;
    info!(
        addr = %listener.local_addr()?,
        path = %config.web.telemetry_path,
        "metrics server listening"
    );

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.changed().await;
            })
            .await
    });

    let outcome = tokio::select! {
        joined = &mut nozzle_handle => match joined {
            Ok(Err(e)) => Err(anyhow::Error::new(e).context("firehose nozzle stopped")),
            Ok(Ok(never)) => match never {},
            Err(e) => Err(anyhow::anyhow!("firehose nozzle task failed: {e}")),
        },
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!(error = %e, "failed to listen for shutdown signal");
            }
            info!("shutdown signal received");
            Ok(())
        }
    };

    // Clean up.
    let _ = shutdown_tx.send(true);
    nozzle_handle.abort();
    match server_handle.await {
        Ok(Err(e)) => warn!(error = %e, "metrics server error"),
        Err(e) => warn!(error = %e, "metrics server task failed"),
        Ok(Ok(())) => {}
    }
    let _ = cleanup_handle.await;

    info!("firehose exporter stopped");
    outcome
}

/// UAA when configured, otherwise the static token.
fn credentials(config: &ExporterConfig) -> anyhow::Result<Credentials> {
    match (&config.uaa, &config.auth.token) {
        (Some(uaa), _) => {
            let refresher = UaaTokenRefresher::new(
                &uaa.url,
                &uaa.client_id,
                &uaa.client_secret,
                config.doppler.skip_tls_verify,
            )?;
            Ok(Credentials::Uaa(refresher))
        }
        (None, Some(token)) => Ok(Credentials::Static(StaticToken::new(token.as_str()))),
        (None, None) => anyhow::bail!("no credential source: set uaa.url or auth.token"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> ExporterConfig {
        ExporterConfig::from_toml_str("[doppler]\nurl = \"ws://127.0.0.1:1\"\n").unwrap()
    }

    #[test]
    fn static_token_when_no_uaa() {
        let mut config = base_config();
        config.auth.token = Some("bearer abc".to_string());
        assert!(matches!(credentials(&config).unwrap(), Credentials::Static(_)));
    }

    #[test]
    fn uaa_preferred_over_static_token() {
        let config = ExporterConfig::from_toml_str(
            "[doppler]\nurl = \"ws://127.0.0.1:1\"\n\
             [uaa]\nurl = \"http://127.0.0.1:2\"\nclient_id = \"id\"\nclient_secret = \"s\"\n\
             [auth]\ntoken = \"bearer abc\"\n",
        )
        .unwrap();
        assert!(matches!(credentials(&config).unwrap(), Credentials::Uaa(_)));
    }

    #[test]
    fn no_credentials_is_an_error() {
        assert!(credentials(&base_config()).is_err());
    }

    #[tokio::test]
    async fn exhausted_retries_end_run() {
        // Nothing listens on port 1, so every connect is refused.
        let config = ExporterConfig::from_toml_str(
            "[doppler]\nurl = \"ws://127.0.0.1:1\"\nmin_retry_delay = \"1ms\"\n\
             max_retry_delay = \"2ms\"\nmax_retry_count = 2\n\
             [auth]\ntoken = \"bearer abc\"\n\
             [web]\nlisten_address = \"127.0.0.1:0\"\n",
        )
        .unwrap();

        let result = tokio::time::timeout(std::time::Duration::from_secs(10), run(config))
            .await
            .unwrap();
        let err = result.unwrap_err();
        assert!(format!("{err:#}").contains("gave up after 2 reconnect attempts"));
    }
}
