//! Per-run deployment context.
//!
//! Everything a deployment needs beyond its inputs (the stack, the provider
//! registry, run options and the cancellation signal) travels in one
//! [`DeploymentContext`] scoped to that run.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

use crate::provider::ProviderRegistry;
use crate::resource::StackRef;

/// Time a deployment lock outlives the run's timeout.
pub const DEPLOYMENT_LOCK_SECS: u64 = 3600;

/// Tunables for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentOptions {
    /// Maximum number of steps in flight.
    pub parallelism: usize,
    /// Stop starting steps after this long.
    pub timeout: Option<Duration>,
}

impl Default for DeploymentOptions {
    fn default() -> Self {
        Self {
            parallelism: 1,
            timeout: None,
        }
    }
}

impl DeploymentOptions {
    /// How long the deployment lock stays valid if the run never releases it.
    #[must_use]
    pub fn lock_ttl(&self) -> Duration {
        let grace = Duration::from_secs(DEPLOYMENT_LOCK_SECS);
        self.timeout.map_or(grace, |timeout| timeout.saturating_add(grace))
    }
}

/// Requests cancellation of a running deployment.
#[derive(Debug, Clone)]
pub struct CancellationHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl CancellationHandle {
    /// Asks the deployment to stop starting new steps.
    pub fn cancel(&self) {
        info!("Cancellation requested");
        self.sender.send_replace(true);
    }

    /// Returns true once cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }
}

/// Context shared by the components of one deployment run.
#[derive(Debug, Clone)]
pub struct DeploymentContext {
    /// Stack being deployed.
    pub stack: StackRef,
    /// Provider plugins.
    pub providers: Arc<ProviderRegistry>,
    /// Run options.
    pub options: DeploymentOptions,
    cancel: CancellationHandle,
}

impl DeploymentContext {
    /// Creates a context with default options.
    #[must_use]
    pub fn new(stack: StackRef, providers: Arc<ProviderRegistry>) -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            stack,
            providers,
            options: DeploymentOptions::default(),
            cancel: CancellationHandle {
                sender: Arc::new(sender),
            },
        }
    }

    /// Sets the run options.
    #[must_use]
    pub fn with_options(mut self, options: DeploymentOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the parallelism, clamped to at least one.
    #[must_use]
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.options.parallelism = parallelism.max(1);
        self
    }

    /// Returns a handle that cancels this run.
    #[must_use]
    pub fn cancellation_handle(&self) -> CancellationHandle {
        self.cancel.clone()
    }

    /// Subscribes to the cancellation signal.
    #[must_use]
    pub fn cancelled(&self) -> watch::Receiver<bool> {
        self.cancel.sender.subscribe()
    }

    /// Returns true once cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
