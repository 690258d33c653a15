//! dsb node runtime.
//!
//! Coordinates one node of a fixed cluster on top of `dsb-transport`:
//!
//! - the readiness state machine (`BOOTING → READY → RUNNING`),
//! - the [`Resolver`], owner of every link and the only thing modules
//!   talk to,
//! - the [`Dispatcher`] routing inbound messages to [`Module`]s by kind,
//! - the [`FaultInjector`] that makes a node misbehave on purpose,
//! - the monitoring [`api`].
//!
//! # Wiring a node
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dsb_runtime::modules::HelloWorldModule;
//! use dsb_runtime::{Dispatcher, HttpProbe, MessageKind, Resolver, RuntimeConfig};
//! use dsb_transport::{ClusterDirectory, NodeId};
//!
//! # async fn example() -> Result<(), dsb_runtime::RuntimeError> {
//! let id = NodeId::new(0);
//! let config = RuntimeConfig::new();
//! let hello = Arc::new(HelloWorldModule::new(id, config.get_run_interval()));
//! let dispatcher = Dispatcher::builder()
//!     .register(MessageKind::HelloWorld, hello)
//!     .build();
//!
//! let resolver = Resolver::new(id, ClusterDirectory::localhost(4), dispatcher, config)?;
//! let probe = HttpProbe::new(resolver.config().get_probe_timeout(), 4000)?;
//! resolver.start(Arc::new(probe));
//! resolver.start_communication().await?;
//! resolver.spawn_modules();
//! # Ok(())
//! # }
//! ```

pub mod api;
mod config;
mod dispatch;
mod error;
mod fault;
mod message;
mod module;
pub mod modules;
mod readiness;
mod resolver;
mod status;

pub use config::{
    RuntimeConfig, FD_INTERVAL, FD_TIMEOUT, INTEGRATION_RUN_INTERVAL, READINESS_BACKOFF,
    RUN_INTERVAL,
};
pub use dispatch::{Dispatcher, DispatcherBuilder};
pub use error::RuntimeError;
pub use fault::{FaultInjector, FaultProfile};
pub use message::MessageKind;
pub use module::Module;
pub use readiness::{poll_until_running, HttpProbe, StatusProbe};
pub use resolver::Resolver;
pub use status::{StatusCell, SystemStatus};
