//! Units of simulated work.
//!
//! An [`Action`] is stateless and shared by every virtual user of every archetype
//! that references it, so it may be invoked concurrently. All per-user state lives
//! in the [`SessionState`] passed to it.
use std::{fmt, sync::Arc};

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::{context::SharedContext, error::ActionError, session::SessionState};

/// One unit of work against the target system.
///
/// Implementations must not panic or propagate failures other than through the
/// returned `Result`: any failure is converted by the run-loop into a failed
/// [`Outcome`](crate::Outcome). The run-loop measures the duration, so actions only
/// report success or the [`ErrorKind`](crate::ErrorKind) of their failure.
///
/// `repeat` is the static parameter declared on the task referencing this action
/// (e.g. "view N products"). It is fixed per task and never resampled.
///
/// # Example
/// ```rust
/// use manada::{Action, ActionError, SessionState, SharedContext};
///
/// struct AddToCart;
///
/// #[async_trait::async_trait]
/// impl Action for AddToCart {
///     async fn invoke(
///         &self,
///         session: &mut SessionState,
///         _ctx: &SharedContext,
///         repeat: u32,
///     ) -> Result<(), ActionError> {
///         for i in 0..repeat {
///             session.add_to_cart(format!("SW-{i}"), 1)?;
///         }
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Action: Send + Sync {
    async fn invoke(
        &self,
        session: &mut SessionState,
        ctx: &SharedContext,
        repeat: u32,
    ) -> Result<(), ActionError>;
}

type ActionFnInner = dyn for<'a> Fn(&'a mut SessionState, &'a SharedContext, u32) -> BoxFuture<'a, Result<(), ActionError>>
    + Send
    + Sync;

/// Adapter turning a closure into an [`Action`]; see [`action_fn`].
pub struct FnAction(Box<ActionFnInner>);

/// Build an [`Action`] from a closure returning a boxed future.
///
/// ```rust
/// use futures::FutureExt;
/// use manada::action_fn;
///
/// let logout = action_fn(|session, _ctx, _repeat| {
///     async move {
///         session.logout();
///         Ok::<(), manada::ActionError>(())
///     }
///     .boxed()
/// });
/// ```
pub fn action_fn<F>(f: F) -> FnAction
where
    F: for<'a> Fn(&'a mut SessionState, &'a SharedContext, u32) -> BoxFuture<'a, Result<(), ActionError>>
        + Send
        + Sync
        + 'static,
{
    FnAction(Box::new(f))
}

#[async_trait]
impl Action for FnAction {
    async fn invoke(
        &self,
        session: &mut SessionState,
        ctx: &SharedContext,
        repeat: u32,
    ) -> Result<(), ActionError> {
        (self.0)(session, ctx, repeat).await
    }
}

/// A resolved reference to a registered action, with its static `repeat` parameter.
///
/// Cloning is cheap: the name and the action are shared.
#[derive(Clone)]
pub struct ActionRef {
    pub name: Arc<str>,
    pub action: Arc<dyn Action>,
    pub repeat: u32,
}

impl ActionRef {
    pub async fn invoke(&self, session: &mut SessionState, ctx: &SharedContext) -> Result<(), ActionError> {
        self.action.invoke(session, ctx, self.repeat).await
    }
}

impl fmt::Debug for ActionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRef")
            .field("name", &self.name)
            .field("repeat", &self.repeat)
            .finish_non_exhaustive()
    }
}
