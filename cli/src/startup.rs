// Copyright (c) 2026 Isprava Engineering
//! Startup plumbing factored out of `main` so it can be unit-tested
//! without spinning up a real listener.

use tracing_subscriber::EnvFilter;

/// Canonical gazetteer passed to the agent loop's location resolver:
/// the second-home destinations the sales-funnel tool family's "isprava"
/// vertical actually queries by (`spec.md` SS8's literal example,
/// `["gao", "albag"] -> ["Goa", "Alibaug"]`, only resolves against this
/// list). Anything else falls through unresolved rather than guessing
/// wrong.
pub const CANONICAL_LOCATIONS: &[&str] = &[
    "Goa",
    "Alibaug",
    "Lonavala",
    "Coonoor",
    "Nainital",
    "Kasauli",
    "Mahabaleshwar",
    "Karjat",
];

/// JSON formatting in production, pretty formatting under `DEBUG=true`
/// (`SPEC_FULL.md` SS10.2).
pub fn init_tracing(debug: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    if debug {
        subscriber.pretty().init();
    } else {
        subscriber.json().init();
    }
}

/// Resolves once either Ctrl+C or (on unix) SIGTERM fires, so the
/// listener can drain in-flight requests before exiting.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received, draining in-flight requests");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_locations_are_non_empty_and_title_cased() {
        assert!(!CANONICAL_LOCATIONS.is_empty());
        for name in CANONICAL_LOCATIONS {
            assert!(name.chars().next().unwrap().is_uppercase());
        }
    }
}
