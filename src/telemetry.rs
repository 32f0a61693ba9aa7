//! Log output setup for binaries; the library itself only emits `tracing` events

use tracing_subscriber::EnvFilter;

use crate::error::{PgError, PgResult};

/// Install a global `fmt` subscriber. `RUST_LOG` wins over `default_filter`.
pub fn init_tracing(default_filter: &str) -> PgResult<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_filter)
            .map_err(|err| PgError::Config(format!("invalid log filter {:?}: {}", default_filter, err)))?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .try_init()
        .map_err(|err| PgError::Config(format!("tracing already initialised: {}", err)))
}
