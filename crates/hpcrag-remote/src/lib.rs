//! # hpcrag-remote
//!
//! Everything that knows about the cluster: the Slurm command protocol,
//! batch script rendering, remote file naming, the OpenSSH transport, and
//! exclusive session checkout.

pub mod layout;
pub mod scheduler;
pub mod script;
pub mod session;
pub mod shell;
pub mod ssh;

pub use layout::{input_stem, ArtifactPaths, RemoteLayout};
pub use scheduler::{classify_submit, QueueState, SubmitOutcome};
pub use script::{DirectiveValue, ResourceProfile, ScriptGenerator, WorkerEnvironment};
pub use session::{SessionGuard, SessionPool};
pub use ssh::{SshConfig, SshTransport};
