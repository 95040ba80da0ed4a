//! Provisioning core for the Kiln build daemon.
//!
//! Given a desired daemon version, the crate makes sure exactly one healthy
//! daemon of that version runs on the local container engine and hands back a
//! [`ConnectionHandle`]. Concurrent callers, in this process or others, are
//! serialised by a file lock around inspection and convergence so that the
//! daemon is built at most once per version.
//!
//! The entry point is [`ClientFactory::ensure_daemon`]. The pieces it composes
//! are public so that embedders can drive them individually:
//!
//! - [`VersionResolver`] derives the desired version.
//! - [`BackendRegistry`] selects a usable [`BackendDriver`].
//! - [`LockGuard`] provides the cross-process critical section.
//! - [`Reconciler`] applies the decision table returned by [`plan`].
//! - [`wait_ready`] polls the daemon within a [`ReadinessBudget`].

mod backend;
mod cancel;
mod command;
mod error;
mod factory;
mod handle;
mod identity;
mod inspect;
mod lock;
mod readiness;
mod reconcile;
mod registry;
mod settings;
mod version;

#[cfg(test)]
mod tests;

pub use backend::{
    BUILD_CONTEXT_FILES, BackendContext, BackendDriver, ContainerEngineDriver, EngineFlavor,
    ObservedState, image_tag, parse_inspect_output, stage_build_context,
};
pub use cancel::Cancellation;
pub use command::{CommandError, CommandRunner, ExitDescription, ExternalCommand, SystemCommandRunner};
pub use error::{Operation, ProvisionError};
pub use factory::{ClientFactory, DaemonStatus};
pub use handle::{ConnectionHandle, HandleOrigin};
pub use identity::{DEFAULT_STATE_DIR, DaemonIdentity};
pub use inspect::inspect_daemon;
pub use lock::{DEFAULT_LOCK_POLL_INTERVAL, DEFAULT_LOCK_TIMEOUT, LockGuard, LockOptions};
pub use readiness::{ReadinessBudget, wait_ready};
pub use reconcile::{Action, Convergence, InstallReason, Reconciler, plan};
pub use registry::{BackendConstructor, BackendRegistration, BackendRegistry};
pub use settings::ProvisionSettings;
pub use version::{BuildInfo, DesiredVersion, Resolution, SHORT_REVISION_LEN, VersionResolver};
