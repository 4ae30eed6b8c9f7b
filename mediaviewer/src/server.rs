//! Server lifecycle: plain HTTP or HTTPS with optional self-signed material,
//! graceful shutdown on SIGINT/SIGTERM.

use anyhow::{bail, Context, Result};
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{info, warn};

use mediaviewer_core::config::{Config, TlsConfig};

pub async fn serve(config: &Config, router: Router) -> Result<()> {
    let addr: SocketAddr = config
        .http_address()
        .parse()
        .context("invalid listen address")?;
    let service = router.into_make_service_with_connect_info::<SocketAddr>();

    if config.tls.use_ssl {
        let rustls = tls_config(&config.tls).await?;

        let handle = axum_server::Handle::new();
        let shutdown_handle = handle.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("Shutdown signal received, draining connections");
            shutdown_handle.graceful_shutdown(Some(Duration::from_secs(10)));
        });

        info!("HTTPS server listening on {addr}");
        axum_server::bind_rustls(addr, rustls)
            .handle(handle)
            .serve(service)
            .await?;
    } else {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;

        info!("HTTP server listening on {addr}");
        axum::serve(listener, service)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
    }

    info!("Server stopped");
    Ok(())
}

async fn tls_config(tls: &TlsConfig) -> Result<RustlsConfig> {
    if let (Some(cert), Some(key)) = (&tls.cert_path, &tls.key_path) {
        if cert.exists() && key.exists() {
            return RustlsConfig::from_pem_file(cert, key)
                .await
                .context("failed to load HTTPS_CERT_PATH/HTTPS_KEY_PATH");
        }
        warn!(
            cert = %cert.display(),
            key = %key.display(),
            "Configured TLS material not found on disk"
        );
    }

    if !tls.auto_self_signed {
        bail!("USE_SSL is on but no certificate material is available");
    }

    info!("Generating self-signed certificate for localhost");
    let certified = rcgen::generate_simple_self_signed(vec![
        "localhost".to_string(),
        "127.0.0.1".to_string(),
    ])?;
    RustlsConfig::from_pem(
        certified.cert.pem().into_bytes(),
        certified.key_pair.serialize_pem().into_bytes(),
    )
    .await
    .context("failed to build TLS config from generated material")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        _ = terminate => {},
    }
}
