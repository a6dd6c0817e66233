//! BDD world for bootstrap scenarios: the loader, the reporter, and the outcome.

use std::cell::RefCell;
use std::sync::Arc;

use crate::bootstrap::{Agent, BootstrapError, ConfigLoader, bootstrap_with};
use crate::health::HealthReporter;

use super::config_loader::{FailingConfigLoader, TestConfigLoader};
use super::reporter::RecordingHealthReporter;

/// Scenario world shared across bootstrap steps.
pub struct TestWorld {
    loader: Box<dyn ConfigLoader>,
    pub reporter: Arc<RecordingHealthReporter>,
    agent: Option<Agent>,
    bootstrap_error: Option<BootstrapError>,
}

impl TestWorld {
    /// Builds a world with a successful configuration loader.
    #[must_use]
    pub fn new() -> Self {
        Self {
            loader: Box::new(TestConfigLoader::tcp()),
            reporter: Arc::new(RecordingHealthReporter::default()),
            agent: None,
            bootstrap_error: None,
        }
    }

    /// Installs a loader that always fails.
    pub fn use_failing_loader(&mut self) {
        self.loader = Box::new(FailingConfigLoader);
        self.reset_results();
    }

    /// Installs a loader that succeeds with a unix socket endpoint.
    pub fn use_unix_loader(&mut self) {
        self.loader = Box::new(TestConfigLoader::unix());
        self.reset_results();
    }

    /// Runs the bootstrap sequence once.
    pub fn bootstrap(&mut self) {
        if self.agent.is_some() || self.bootstrap_error.is_some() {
            return;
        }

        let reporter: Arc<dyn HealthReporter> = self.reporter.clone();
        match bootstrap_with(&*self.loader, &reporter) {
            Ok(agent) => self.agent = Some(agent),
            Err(error) => self.bootstrap_error = Some(error),
        }
    }

    /// Returns whether bootstrap produced an error.
    #[must_use]
    pub fn bootstrap_error(&self) -> Option<&BootstrapError> {
        self.bootstrap_error.as_ref()
    }

    /// Returns the bootstrapped agent, if any.
    #[must_use]
    pub fn agent(&self) -> Option<&Agent> {
        self.agent.as_ref()
    }

    fn reset_results(&mut self) {
        self.agent = None;
        self.bootstrap_error = None;
    }
}

/// Fixture constructor shared by the bootstrap suite.
#[must_use]
pub fn world() -> RefCell<TestWorld> {
    RefCell::new(TestWorld::new())
}
