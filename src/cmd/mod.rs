//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module    | Commands handled                          |
//! |-----------|-------------------------------------------|
//! | `archive` | `Archive`                                 |
//! | `cleanup` | `Cleanup`                                 |
//! | `compact` | `Compact Save`, `Compact Show`, `Compact Cleanup` |
//! | `config`  | `Config`                                  |
//! | `status`  | `Status`                                  |

pub mod archive;
pub mod cleanup;
pub mod compact;
pub mod config;
pub mod status;

pub use archive::cmd_archive;
pub use cleanup::cmd_cleanup;
pub use compact::{cmd_compact_cleanup, cmd_compact_save, cmd_compact_show};
pub use config::cmd_config;
pub use status::cmd_status;

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

/// Sleep between cycles after a report was processed.
pub(crate) const BUSY_SLEEP: Duration = Duration::from_secs(1);

/// Run synchronous store work on tokio's blocking pool.
pub(crate) async fn blocking<F, R>(f: F) -> Result<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .context("Blocking task panicked")
}

/// Sleep for `duration`. Returns `false` if Ctrl-C arrived first.
pub(crate) async fn sleep_or_interrupt(duration: Duration) -> bool {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, stopping");
            false
        }
        _ = tokio::time::sleep(duration) => true,
    }
}
