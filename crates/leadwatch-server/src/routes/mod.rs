pub mod actions;
pub mod health;
pub mod leads;
pub mod poll;
pub mod webhook;

use crate::error::AppError;

/// Run synchronous store work off the async runtime.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T, AppError>
where
    F: FnOnce() -> leadwatch_core::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let out = tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    Ok(out)
}
