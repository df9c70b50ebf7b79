//! Transition hooks run by an activity.

use async_trait::async_trait;

use crate::error::BoxError;

/// Hooks invoked before an activity settles into a new steady state.
///
/// At most one hook runs at a time for a given activity. Returning an error
/// still commits the transition; the error is handed to the callers that
/// requested it.
///
/// # Example
/// ```ignore
/// struct Panel;
///
/// #[async_trait]
/// impl ActivityHooks for Panel {
///     async fn before_active(&self) -> Result<(), BoxError> {
///         load_assets().await?;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait ActivityHooks: Send + Sync + 'static {
    async fn before_active(&self) -> Result<(), BoxError> {
        Ok(())
    }

    async fn before_inactive(&self) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Hooks that do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

#[async_trait]
impl ActivityHooks for NoopHooks {}
