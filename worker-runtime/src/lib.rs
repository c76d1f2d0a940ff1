#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod bus;
pub mod handler;
pub mod health;
pub mod metrics;
pub mod publisher;
pub mod runner;

pub use bus::BusClient;
pub use handler::{ConsumerOptions, Handler, Healther, Metricker};
pub use publisher::{BusPublisher, Publisher, PublisherExt};
pub use runner::{Runner, RunnerConfig};
