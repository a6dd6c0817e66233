//! Test support for tattle CLI behavioural coverage.
//!
//! Serves a real agent endpoint backed by a standalone engine so that the
//! CLI runtime is exercised over the wire, and captures its output streams.

use std::ffi::OsString;
use std::io::{self, Write};
use std::net::TcpListener;
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, ensure};
use tattle_config::{Config, SocketEndpoint};
use tattled::agent::{
    AgentControl, EventBus, LogSink, MembershipEngine, StandaloneEngine, StandaloneOptions,
};
use tattled::rpc::{self, AgentServices, RpcServerHandle, StreamLimits};

use crate::{AppError, ConfigLoader, run_with_loader};

pub(super) struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    pub(super) fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self, _args: &[OsString]) -> Result<Config, AppError> {
        Ok(self.config.clone())
    }
}

#[derive(Default)]
struct StopCounter(AtomicUsize);

impl AgentControl for StopCounter {
    fn shutdown(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Writer whose contents stay readable while a command is still running.
#[derive(Clone, Default)]
pub(super) struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub(super) fn text(&self) -> String {
        let bytes = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct Background {
    stdout: SharedBuffer,
    handle: JoinHandle<(ExitCode, String)>,
}

pub(super) struct CliWorld {
    config: Config,
    engine: Option<Arc<StandaloneEngine>>,
    server: Option<RpcServerHandle>,
    control: Arc<StopCounter>,
    background: Option<Background>,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<ExitCode>,
}

impl Default for CliWorld {
    fn default() -> Self {
        Self {
            config: Config::default(),
            engine: None,
            server: None,
            control: Arc::new(StopCounter::default()),
            background: None,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
        }
    }
}

impl Drop for CliWorld {
    fn drop(&mut self) {
        if let Some(server) = self.server.take() {
            let _ = server.shutdown();
        }
    }
}

impl CliWorld {
    pub fn start_agent(&mut self, name: &str) -> Result<()> {
        let bus = Arc::new(EventBus::new());
        let engine = Arc::new(StandaloneEngine::new(
            StandaloneOptions::named(name),
            Arc::clone(&bus),
        ));
        let services = AgentServices {
            engine: engine.clone(),
            log_sink: Arc::new(LogSink::with_backlog(0)),
            event_bus: bus,
            control: self.control.clone(),
        };
        let server = rpc::serve(
            &SocketEndpoint::tcp("127.0.0.1", 0),
            services,
            StreamLimits::default(),
        )
        .context("serve rpc endpoint")?;
        let addr = server
            .local_addr()
            .context("tcp endpoint has an address")?;
        self.config.rpc_addr = SocketEndpoint::tcp("127.0.0.1", addr.port());
        self.engine = Some(engine);
        self.server = Some(server);
        Ok(())
    }

    /// Points the CLI at a loopback port with nothing listening.
    pub fn point_at_closed_port(&mut self) -> Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0").context("bind probe port")?;
        let port = listener.local_addr().context("probe address")?.port();
        drop(listener);
        self.config.rpc_addr = SocketEndpoint::tcp("127.0.0.1", port);
        Ok(())
    }

    pub fn run(&mut self, command: &str) {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let loader = StaticConfigLoader::new(self.config.clone());
        let exit = run_with_loader(Self::build_args(command), &mut stdout, &mut stderr, &loader);
        self.exit_code = Some(exit);
        self.stdout = String::from_utf8_lossy(&stdout).into_owned();
        self.stderr = String::from_utf8_lossy(&stderr).into_owned();
    }

    /// Starts `command` on its own thread; it runs until the agent goes away.
    pub fn run_in_background(&mut self, command: &str) {
        let args = Self::build_args(command);
        let loader = StaticConfigLoader::new(self.config.clone());
        let stdout = SharedBuffer::default();
        let mut thread_stdout = stdout.clone();
        let handle = thread::spawn(move || {
            let mut stderr = Vec::new();
            let exit = run_with_loader(args, &mut thread_stdout, &mut stderr, &loader);
            (exit, String::from_utf8_lossy(&stderr).into_owned())
        });
        self.background = Some(Background { stdout, handle });
    }

    /// Fires user events until the background command has printed one.
    pub fn fire_until_printed(&self, name: &str, expected: &str) -> Result<()> {
        let engine = self.engine.as_ref().context("agent was not started")?;
        let background = self
            .background
            .as_ref()
            .context("no command is running in the background")?;
        let deadline = Instant::now() + Duration::from_secs(5);
        while !background.stdout.text().contains(expected) {
            ensure!(
                Instant::now() < deadline,
                "background command never printed '{expected}'"
            );
            engine
                .user_event(name, b"", false)
                .map_err(|error| anyhow!("user event failed: {error}"))?;
            thread::sleep(Duration::from_millis(25));
        }
        Ok(())
    }

    /// Shuts the agent down and collects the background command's outcome.
    pub fn stop_agent(&mut self) -> Result<()> {
        let server = self.server.take().context("agent was not started")?;
        server
            .shutdown()
            .map_err(|error| anyhow!("shutdown failed: {error}"))?;
        if let Some(background) = self.background.take() {
            let (exit, stderr) = background
                .handle
                .join()
                .map_err(|_| anyhow!("background command panicked"))?;
            self.exit_code = Some(exit);
            self.stdout = background.stdout.text();
            self.stderr = stderr;
        }
        Ok(())
    }

    pub fn shutdown_requests(&self) -> usize {
        self.control.0.load(Ordering::SeqCst)
    }

    pub fn member_status(&self, name: &str) -> Result<String> {
        let engine = self.engine.as_ref().context("agent was not started")?;
        engine
            .members()
            .into_iter()
            .find(|member| member.name == name)
            .map(|member| member.status.to_string())
            .context("member is not known")
    }

    pub fn assert_exit(&self, expected: ExitCode) -> Result<()> {
        let exit = self.exit_code.context("exit code recorded")?;
        ensure!(
            exit == expected,
            "expected exit code {expected:?}, got {exit:?}; stderr: {}",
            self.stderr
        );
        Ok(())
    }

    fn build_args(command: &str) -> Vec<OsString> {
        let mut args = vec![OsString::from("tattle")];
        args.extend(command.split_whitespace().map(OsString::from));
        args
    }
}
