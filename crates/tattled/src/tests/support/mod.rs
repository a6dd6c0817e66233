//! Test harness utilities for the agent behavioural suites.

mod client;
mod config_loader;
mod reporter;
mod session_world;
mod world;

pub use client::TestClient;
pub use config_loader::{FailingConfigLoader, TestConfigLoader};
pub use reporter::{HealthEvent, RecordingHealthReporter};
pub use session_world::{SessionWorld, session_world};
pub use world::{TestWorld, world};
