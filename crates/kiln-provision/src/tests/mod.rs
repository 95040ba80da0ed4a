//! Crate-level test doubles, end-to-end tests and BDD scenarios.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use kiln_config::BackendKind;
use tempfile::TempDir;

use crate::backend::{BackendDriver, ObservedState};
use crate::cancel::Cancellation;
use crate::command::{CommandError, CommandRunner, ExitDescription, ExternalCommand};
use crate::error::{Operation, ProvisionError};
use crate::factory::ClientFactory;
use crate::handle::HandleOrigin;
use crate::lock::LockOptions;
use crate::readiness::ReadinessBudget;
use crate::registry::{BackendRegistration, BackendRegistry};
use crate::settings::ProvisionSettings;
use crate::version::{BuildInfo, DesiredVersion};


/// Revision embedded in test factories; resolves to `012345678`.
pub(crate) const TEST_REVISION: &str = "0123456789abcdef0123456789abcdef01234567";

/// Desired version derived from [`TEST_REVISION`].
pub(crate) const TEST_VERSION: &str = "012345678";

// ---------------------------------------------------------------------------
// Fake backend
// ---------------------------------------------------------------------------

/// Operation recorded by [`FakeBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    CheckAvailable,
    Remove,
    Install(String),
    Start,
    Inspect,
    Ping,
}

/// Result a mutating fake operation produces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) enum Outcome {
    #[default]
    Succeed,
    /// Another process got there first; the state still changes.
    Conflict,
    Fail,
}

#[derive(Debug, Clone, Copy, Default)]
enum PingMode {
    #[default]
    Ready,
    FailFirst(u32),
    Never,
}

/// In-memory backend that records every call.
pub(crate) struct FakeBackend {
    kind: BackendKind,
    available: bool,
    sticky: bool,
    install_outcome: Outcome,
    start_outcome: Outcome,
    remove_fails: bool,
    ping_mode: PingMode,
    install_delay: Duration,
    state: Mutex<ObservedState>,
    calls: Mutex<Vec<Call>>,
    pings: AtomicU32,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeBackend {
    pub(crate) fn new() -> Self {
        Self {
            kind: BackendKind::Docker,
            available: true,
            sticky: false,
            install_outcome: Outcome::Succeed,
            start_outcome: Outcome::Succeed,
            remove_fails: false,
            ping_mode: PingMode::Ready,
            install_delay: Duration::ZERO,
            state: Mutex::new(ObservedState::absent()),
            calls: Mutex::new(Vec::new()),
            pings: AtomicU32::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_kind(mut self, kind: BackendKind) -> Self {
        self.kind = kind;
        self
    }

    pub(crate) fn with_state(self, state: ObservedState) -> Self {
        *self.state.lock().expect("fake state poisoned") = state;
        self
    }

    pub(crate) fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    /// Mutations succeed but never change the observed state.
    pub(crate) fn sticky(mut self) -> Self {
        self.sticky = true;
        self
    }

    pub(crate) fn install_outcome(mut self, outcome: Outcome) -> Self {
        self.install_outcome = outcome;
        self
    }

    pub(crate) fn start_outcome(mut self, outcome: Outcome) -> Self {
        self.start_outcome = outcome;
        self
    }

    pub(crate) fn failing_remove(mut self) -> Self {
        self.remove_fails = true;
        self
    }

    pub(crate) fn failing_pings(mut self, failures: u32) -> Self {
        self.ping_mode = PingMode::FailFirst(failures);
        self
    }

    pub(crate) fn never_ready(mut self) -> Self {
        self.ping_mode = PingMode::Never;
        self
    }

    pub(crate) fn install_delay(mut self, delay: Duration) -> Self {
        self.install_delay = delay;
        self
    }

    pub(crate) fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("fake calls poisoned").clone()
    }

    pub(crate) fn count(&self, call: &Call) -> u32 {
        self.count_matching(|recorded| recorded == call)
    }

    pub(crate) fn installs(&self) -> u32 {
        self.count_matching(|recorded| matches!(recorded, Call::Install(_)))
    }

    /// Calls other than the availability probe.
    pub(crate) fn mutations(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| !matches!(call, Call::CheckAvailable | Call::Inspect | Call::Ping))
            .collect()
    }

    pub(crate) fn state(&self) -> ObservedState {
        self.state.lock().expect("fake state poisoned").clone()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn count_matching(&self, predicate: impl Fn(&Call) -> bool) -> u32 {
        let matching = self.calls().iter().filter(|call| predicate(call)).count();
        u32::try_from(matching).expect("call count fits in u32")
    }

    fn record(&self, call: Call) {
        self.calls.lock().expect("fake calls poisoned").push(call);
    }

    fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlight(&self.in_flight)
    }

    fn update_state(&self, apply: impl FnOnce(&mut ObservedState)) {
        if self.sticky {
            return;
        }
        apply(&mut self.state.lock().expect("fake state poisoned"));
    }

    fn failure(&self, operation: Operation, output: &str) -> ProvisionError {
        ProvisionError::BackendOperation {
            backend: self.kind,
            operation,
            source: CommandError::Failed {
                command: format!("fake {operation}"),
                status: ExitDescription(Some(1)),
                output: output.to_owned(),
            },
        }
    }

    fn conflict(&self, operation: Operation) -> ProvisionError {
        ProvisionError::Conflict {
            backend: self.kind,
            operation,
            output: String::from("Error response from daemon: Conflict."),
        }
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl BackendDriver for Arc<FakeBackend> {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn check_available(&self, _cancel: &Cancellation) -> Result<(), ProvisionError> {
        self.record(Call::CheckAvailable);
        if self.available {
            return Ok(());
        }
        Err(ProvisionError::BackendUnavailable {
            details: format!("{}: fake backend is offline", self.kind),
        })
    }

    fn remove(&self, _cancel: &Cancellation) -> Result<(), ProvisionError> {
        self.record(Call::Remove);
        let _in_flight = self.enter();
        if self.remove_fails {
            return Err(self.failure(Operation::Remove, "permission denied"));
        }
        self.update_state(|state| *state = ObservedState::absent());
        Ok(())
    }

    fn install(
        &self,
        version: &DesiredVersion,
        _cancel: &Cancellation,
    ) -> Result<(), ProvisionError> {
        self.record(Call::Install(version.as_str().to_owned()));
        let _in_flight = self.enter();
        thread::sleep(self.install_delay);
        match self.install_outcome {
            Outcome::Fail => Err(self.failure(Operation::Build, "build failed")),
            outcome => {
                self.update_state(|state| *state = ObservedState::present(version.as_str(), true));
                if outcome == Outcome::Conflict {
                    return Err(self.conflict(Operation::Run));
                }
                Ok(())
            }
        }
    }

    fn start(&self, _cancel: &Cancellation) -> Result<(), ProvisionError> {
        self.record(Call::Start);
        let _in_flight = self.enter();
        match self.start_outcome {
            Outcome::Fail => Err(self.failure(Operation::Start, "cannot start container")),
            outcome => {
                self.update_state(|state| state.running = true);
                if outcome == Outcome::Conflict {
                    return Err(self.conflict(Operation::Start));
                }
                Ok(())
            }
        }
    }

    fn inspect(&self, _cancel: &Cancellation) -> Result<ObservedState, ProvisionError> {
        self.record(Call::Inspect);
        let _in_flight = self.enter();
        Ok(self.state())
    }

    fn ping(&self, _cancel: &Cancellation) -> Result<(), ProvisionError> {
        self.record(Call::Ping);
        let _in_flight = self.enter();
        let attempt = self.pings.fetch_add(1, Ordering::SeqCst) + 1;
        let ready = match self.ping_mode {
            PingMode::Ready => true,
            PingMode::FailFirst(failures) => attempt > failures,
            PingMode::Never => false,
        };
        if ready {
            return Ok(());
        }
        Err(self.failure(Operation::Ping, "daemon not ready"))
    }

    fn endpoint(&self) -> String {
        String::from("fake://kiln-buildkitd")
    }
}

/// Registration that hands out clones of `fake`.
pub(crate) fn fake_registration(fake: &Arc<FakeBackend>) -> BackendRegistration {
    let shared = Arc::clone(fake);
    BackendRegistration::new(shared.kind, move |_context| {
        Box::new(Arc::clone(&shared)) as Box<dyn BackendDriver>
    })
}

/// Registry holding only `fake`.
pub(crate) fn fake_registry(fake: &Arc<FakeBackend>) -> BackendRegistry {
    let mut registry = BackendRegistry::new();
    registry
        .register(fake_registration(fake))
        .expect("register fake backend");
    registry
}

/// Settings with fast bounds and the lock inside `dir`.
pub(crate) fn fast_settings(dir: &TempDir) -> ProvisionSettings {
    let mut settings = ProvisionSettings::new(dir.path().join("locks/.kiln-buildkitd.lock"));
    settings.lock = LockOptions {
        timeout: Duration::from_secs(30),
        poll_interval: Duration::from_millis(5),
    };
    settings.readiness = ReadinessBudget {
        attempts: 100,
        interval: Duration::from_millis(1),
    };
    settings
}

/// Factory backed solely by `fake`.
pub(crate) fn fake_factory(fake: &Arc<FakeBackend>, settings: ProvisionSettings) -> ClientFactory {
    ClientFactory::new(settings, BuildInfo::new(Some(TEST_REVISION))).with_registry(fake_registry(fake))
}

// ---------------------------------------------------------------------------
// Scripted command runner
// ---------------------------------------------------------------------------

/// Canned reply for a subcommand.
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Output(String),
    Failure { code: i32, output: String },
    Cancelled,
}

impl Reply {
    pub(crate) fn output(text: &str) -> Self {
        Self::Output(text.to_owned())
    }

    pub(crate) fn failure(code: i32, text: &str) -> Self {
        Self::Failure {
            code,
            output: text.to_owned(),
        }
    }
}

/// Command runner that answers from a script keyed by subcommand.
///
/// Replies for a subcommand are consumed in order; the last one repeats.
/// Unscripted subcommands succeed with empty output.
#[derive(Default)]
pub(crate) struct ScriptedRunner {
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    commands: Mutex<Vec<ExternalCommand>>,
}

impl ScriptedRunner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn reply(self, subcommand: &str, reply: Reply) -> Self {
        self.replies
            .lock()
            .expect("script poisoned")
            .entry(subcommand.to_owned())
            .or_default()
            .push_back(reply);
        self
    }

    pub(crate) fn commands(&self) -> Vec<ExternalCommand> {
        self.commands.lock().expect("command log poisoned").clone()
    }

    pub(crate) fn subcommands(&self) -> Vec<String> {
        self.commands()
            .iter()
            .filter_map(|command| command.subcommand().map(str::to_owned))
            .collect()
    }

    fn next_reply(&self, subcommand: &str) -> Reply {
        let mut replies = self.replies.lock().expect("script poisoned");
        let Some(queue) = replies.get_mut(subcommand) else {
            return Reply::Output(String::new());
        };
        if queue.len() > 1 {
            return queue.pop_front().expect("queue is not empty");
        }
        queue.front().cloned().unwrap_or(Reply::Output(String::new()))
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, command: &ExternalCommand, _cancel: &Cancellation) -> Result<String, CommandError> {
        self.commands
            .lock()
            .expect("command log poisoned")
            .push(command.clone());
        match self.next_reply(command.subcommand().unwrap_or_default()) {
            Reply::Output(output) => Ok(output),
            Reply::Failure { code, output } => Err(CommandError::Failed {
                command: command.to_string(),
                status: ExitDescription(Some(code)),
                output,
            }),
            Reply::Cancelled => Err(CommandError::Cancelled {
                command: command.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// End-to-end tests through the built-in registry
// ---------------------------------------------------------------------------

#[test]
fn fresh_machine_builds_and_launches_the_daemon() {
    let dir = TempDir::new().expect("create temp dir");
    let runner = Arc::new(
        ScriptedRunner::new()
            .reply("inspect", Reply::failure(1, "Error: No such object: kiln-buildkitd"))
            .reply("exec", Reply::failure(1, "connection refused"))
            .reply("exec", Reply::output("ID  PLATFORMS\nabc linux/amd64\n")),
    );
    let factory = ClientFactory::new(fast_settings(&dir), BuildInfo::new(Some(TEST_REVISION)))
        .with_runner(runner.clone());

    let handle = factory.ensure_daemon(&Cancellation::new()).expect("daemon ready");

    assert_eq!(handle.endpoint(), "docker-container://kiln-buildkitd");
    assert_eq!(handle.origin(), HandleOrigin::Provisioned);
    assert_eq!(handle.backend(), Some(BackendKind::Docker));
    assert_eq!(handle.version(), Some(TEST_VERSION));
    assert_eq!(
        runner.subcommands(),
        ["info", "inspect", "rm", "build", "run", "exec", "exec"]
    );
    let launch = runner
        .commands()
        .into_iter()
        .find(|command| command.subcommand() == Some("run"))
        .expect("run command issued");
    assert_eq!(
        launch.to_string(),
        "docker run -d --restart always -v kiln-buildkitd:/var/lib/buildkit \
         --name kiln-buildkitd --privileged kiln-buildkitd:012345678"
    );
}

#[test]
fn docker_missing_falls_back_to_podman() {
    let dir = TempDir::new().expect("create temp dir");
    let runner = Arc::new(
        ScriptedRunner::new()
            .reply("info", Reply::failure(1, "Cannot connect to the Docker daemon"))
            .reply("info", Reply::output("host: podman"))
            .reply(
                "inspect",
                Reply::output("localhost/kiln-buildkitd:012345678;true;false\n"),
            ),
    );
    let factory = ClientFactory::new(fast_settings(&dir), BuildInfo::new(Some(TEST_REVISION)))
        .with_runner(runner.clone());

    let handle = factory.ensure_daemon(&Cancellation::new()).expect("daemon ready");

    assert_eq!(handle.endpoint(), "podman-container://kiln-buildkitd");
    let programs: Vec<String> = runner
        .commands()
        .iter()
        .map(|command| command.program().to_owned())
        .collect();
    assert_eq!(programs, ["docker", "podman", "podman"]);
}
