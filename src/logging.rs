//! Logging setup, factored out of `main` so tests can init it idempotently
//! (`tracing_subscriber`'s global subscriber can only be set once).

use std::sync::Once;

use tracing::Level;

static INIT: Once = Once::new();

pub fn init() {
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("recording_gateway=info".parse().expect("valid directive"))
            .add_directive("tower_http=info".parse().expect("valid directive"));

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_max_level(Level::INFO)
            .init();
    });
}
