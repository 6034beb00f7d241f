//! memscope - memory profiler capture pipeline.
//!
//! Drives an on-device profiling agent through a synchronous transport: issues
//! heap dump and allocation recording commands, follows their status events,
//! exposes the recorded timeline as range-queryable series, and loads captures
//! into navigable object trees.
//!
//! # Modules
//!
//! - [`transport`] - agent RPC surface, wire records and the in-memory agent
//! - [`series`] - timeline series over the agent's event streams
//! - [`capture`] - capture objects and their loaded contents
//! - [`loader`] - background capture loading with cancellation
//! - [`tree`] - lazily expanded object tree over a loaded capture
//! - [`stage`] - main, capture and allocation stage controllers
//! - [`profilers`] - the owning context that ticks stages and dispatches status events
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use memscope::config::ProfilerConfig;
//! use memscope::profilers::Profilers;
//! use memscope::session::{Device, Process, Session};
//! use memscope::transport::InMemoryTransport;
//!
//! let agent = Arc::new(InMemoryTransport::new());
//! let mut profilers = Profilers::new(
//!     agent,
//!     Session::new(1, 1, 42, 0),
//!     Device { device_id: 1, feature_level: 30, cpu_abi: "arm64-v8a".into() },
//!     Process { pid: 42, name: "com.example".into() },
//!     ProfilerConfig::default(),
//! );
//! profilers.start();
//! profilers.main_stage(|stage, p| stage.request_heap_dump(p));
//! profilers.settle();
//! ```

pub mod capture;
pub mod config;
pub mod executor;
pub mod loader;
pub mod profilers;
pub mod replay;
pub mod series;
pub mod session;
pub mod stage;
pub mod transport;
pub mod tree;
pub mod units;

// Re-export for convenience
pub use config::ProfilerConfig;
pub use profilers::Profilers;
pub use stage::{Stage, StageType};
