//! Handles to acquired resources.
//!
//! [`Pooled`] is the typed handle returned by a concrete pool. [`Lease`] is
//! its type-erased form, used where pools of different resource types sit
//! behind one registry. Both go back to their pool through an explicit
//! release; dropping one without releasing returns it in the background.

use qflow_core::{ResourceId, ResourceKind};
use std::any::Any;
use std::ops::Deref;
use std::sync::Arc;
use tracing::warn;

/// How the holder's use of a resource went
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The work using the resource succeeded
    Success,
    /// The work using the resource failed
    Failure,
    /// Dropped without an explicit release
    Abandoned,
}

impl ReleaseOutcome {
    /// Outcome from a success flag
    #[must_use]
    pub const fn from_success(success: bool) -> Self {
        if success { Self::Success } else { Self::Failure }
    }
}

/// Something that can take a resource back without being awaited
pub(crate) trait ReturnResource: Send + Sync {
    fn spawn_release(self: Arc<Self>, id: ResourceId, outcome: ReleaseOutcome);
}

fn return_on_drop(home: Option<Arc<dyn ReturnResource>>, id: ResourceId) {
    let Some(home) = home else {
        return;
    };
    if tokio::runtime::Handle::try_current().is_ok() {
        home.spawn_release(id, ReleaseOutcome::Abandoned);
    } else {
        warn!(resource = %id, "resource dropped outside a runtime, it stays checked out");
    }
}

/// Typed handle to an acquired resource
pub struct Pooled<R> {
    pub(crate) id: ResourceId,
    pub(crate) resource: Arc<R>,
    pub(crate) pool: String,
    pub(crate) kind: ResourceKind,
    pub(crate) home: Option<Arc<dyn ReturnResource>>,
}

impl<R> Pooled<R> {
    /// Resource id
    #[must_use]
    pub const fn id(&self) -> ResourceId {
        self.id
    }

    /// Name of the issuing pool
    #[must_use]
    pub fn pool(&self) -> &str {
        &self.pool
    }

    /// Shared reference to the resource
    #[must_use]
    pub fn resource(&self) -> Arc<R> {
        Arc::clone(&self.resource)
    }

    pub(crate) fn disarm(&mut self) {
        self.home = None;
    }
}

impl<R: Send + Sync + 'static> Pooled<R> {
    /// Erase the resource type
    #[must_use]
    pub fn into_lease(mut self) -> Lease {
        let home = self.home.take();
        Lease {
            id: self.id,
            pool: std::mem::take(&mut self.pool),
            kind: self.kind,
            resource: Arc::clone(&self.resource) as Arc<dyn Any + Send + Sync>,
            home,
        }
    }
}

impl<R> Deref for Pooled<R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.resource
    }
}

impl<R> std::fmt::Debug for Pooled<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pooled")
            .field("id", &self.id)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl<R> Drop for Pooled<R> {
    fn drop(&mut self) {
        return_on_drop(self.home.take(), self.id);
    }
}

/// Type-erased handle to an acquired resource
pub struct Lease {
    pub(crate) id: ResourceId,
    pub(crate) pool: String,
    pub(crate) kind: ResourceKind,
    pub(crate) resource: Arc<dyn Any + Send + Sync>,
    pub(crate) home: Option<Arc<dyn ReturnResource>>,
}

impl Lease {
    /// Resource id
    #[must_use]
    pub const fn id(&self) -> ResourceId {
        self.id
    }

    /// Name of the issuing pool
    #[must_use]
    pub fn pool(&self) -> &str {
        &self.pool
    }

    /// Resource kind
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Typed access to the resource, if it is an `R`
    #[must_use]
    pub fn downcast<R: Send + Sync + 'static>(&self) -> Option<Arc<R>> {
        Arc::clone(&self.resource).downcast::<R>().ok()
    }

    pub(crate) fn disarm(&mut self) {
        self.home = None;
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("id", &self.id)
            .field("pool", &self.pool)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        return_on_drop(self.home.take(), self.id);
    }
}
