//! Isolated subprocess execution for operator scripts: isolation
//! configuration, cross-platform process spawning, resource monitoring,
//! worker discovery, and the executor's spawn/handshake/poll/cancel loop.

pub mod config;
pub mod discovery;
pub mod error;
pub mod executor;
pub mod monitor;
pub mod spawner;

pub use config::{IsolationConfig, IsolationLevel};
pub use discovery::find_worker_executable;
pub use error::RunnerError;
pub use executor::IsolatedExecutor;
pub use monitor::ResourceMonitor;
pub use spawner::{PipeHandles, ProcessSpawner, SpawnedProcess};

#[cfg(unix)]
pub use spawner::PosixSpawner;
#[cfg(windows)]
pub use spawner::WindowsSpawner;
