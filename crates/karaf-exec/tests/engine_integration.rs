use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use karaf_exec::credentials::{Credential, CredentialProvider, PasswordPrompt};
use karaf_exec::*;

const RED: &str = "\x1b[31m";
const DEFAULT: &str = "\x1b[39m";

#[derive(Default)]
struct State {
    opens: usize,
    offered: Vec<&'static str>,
    executed: Vec<String>,
    closes: usize,
}

/// What the mock remote does
#[derive(Clone)]
struct Remote {
    /// Connection attempts that fail before one succeeds
    failures: usize,
    /// Accepted authentication method
    accept: &'static str,
    /// Output of every exec
    result: Result<CommandResult, ExecError>,
    /// Error returned from close
    close_error: Option<ExecError>,
}

impl Remote {
    fn replying(stdout: &str, exit_status: Option<u32>) -> Self {
        Self {
            failures: 0,
            accept: "publickey",
            result: Ok(CommandResult::new(stdout.as_bytes().to_vec(), Vec::new(), exit_status)),
            close_error: None,
        }
    }
}

struct MockTransport {
    remote: Remote,
    state: Arc<Mutex<State>>,
}

struct MockSession {
    remote: Remote,
    state: Arc<Mutex<State>>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, _target: &Target) -> Result<Box<dyn RemoteSession>, ExecError> {
        let mut state = self.state.lock().unwrap();
        state.opens += 1;
        if state.opens <= self.remote.failures {
            return Err(ExecError::ConnectionFailed("connection refused".to_string()));
        }
        Ok(Box::new(MockSession {
            remote: self.remote.clone(),
            state: Arc::clone(&self.state),
        }))
    }

    fn transport_type(&self) -> &'static str {
        "mock"
    }
}

#[async_trait]
impl RemoteSession for MockSession {
    async fn authenticate(
        &mut self,
        _user: &str,
        credential: &Credential,
        prompt: &mut dyn PasswordPrompt,
    ) -> Result<bool, ExecError> {
        self.state.lock().unwrap().offered.push(credential.kind());
        match credential {
            Credential::Prompt if self.remote.accept == "keyboard-interactive" => {
                Ok(prompt.provide_password("Password: ")? == "secret")
            }
            other => Ok(other.kind() == self.remote.accept),
        }
    }

    async fn exec(&mut self, command: &str) -> Result<CommandResult, ExecError> {
        self.state.lock().unwrap().executed.push(command.to_string());
        self.remote.result.clone()
    }

    async fn close(&mut self) -> Result<(), ExecError> {
        self.state.lock().unwrap().closes += 1;
        match &self.remote.close_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}

struct CountingPrompt {
    answer: &'static str,
    calls: Arc<Mutex<usize>>,
}

impl PasswordPrompt for CountingPrompt {
    fn provide_password(&mut self, _prompt: &str) -> Result<String, ExecError> {
        *self.calls.lock().unwrap() += 1;
        Ok(self.answer.to_string())
    }
}

struct Harness {
    engine: Engine,
    state: Arc<Mutex<State>>,
    stdout: SharedBuffer,
    stderr: SharedBuffer,
}

fn harness(remote: Remote, retry: RetryPolicy, credentials: CredentialProvider) -> Harness {
    harness_with(remote, retry, credentials, |builder| builder)
}

fn harness_with(
    remote: Remote,
    retry: RetryPolicy,
    credentials: CredentialProvider,
    configure: impl FnOnce(EngineBuilder) -> EngineBuilder,
) -> Harness {
    let state = Arc::new(Mutex::new(State::default()));
    let stdout = SharedBuffer::new();
    let stderr = SharedBuffer::new();
    let transport = MockTransport {
        remote,
        state: Arc::clone(&state),
    };

    let builder = Engine::builder(Arc::new(transport), credentials)
        .retry(retry)
        .options(EngineOptions::default().with_line_separator("\n"))
        .sinks(OutputSinks::new(stdout.clone(), stderr.clone()));

    Harness {
        engine: configure(builder).build(),
        state,
        stdout,
        stderr,
    }
}

fn target() -> Target {
    Target::new("h", "u").with_port(22)
}

#[tokio::test]
async fn test_successful_command_is_echoed() {
    let mut h = harness(
        Remote::replying("feature1\nfeature2\n", Some(0)),
        RetryPolicy::none(),
        CredentialProvider::new("u"),
    );

    let result = h.engine.run(&target(), &["feature:list"]).await.unwrap();

    assert_eq!(result.exit_status, Some(0));
    assert_eq!(h.stdout.contents(), b"feature1\nfeature2\n");
    assert!(h.stderr.contents().is_empty());

    let state = h.state.lock().unwrap();
    assert_eq!(state.executed, vec!["feature:list\n\n"]);
    assert_eq!(state.closes, 1);
}

#[tokio::test]
async fn test_failed_command_reports_marker_text() {
    let stdout = format!("{RED}command not found {DEFAULT}");
    let mut h = harness(
        Remote::replying(&stdout, Some(1)),
        RetryPolicy::none(),
        CredentialProvider::new("u"),
    );

    let err = h.engine.run(&target(), &["bad-command"]).await.unwrap_err();

    match err {
        ExecError::CommandFailed { status, message } => {
            assert_eq!(status, Some(1));
            assert_eq!(message, "command not found ");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    // output is echoed even on failure, escapes intact
    assert_eq!(h.stdout.contents(), stdout.as_bytes());
    assert_eq!(h.state.lock().unwrap().closes, 1);
}

#[tokio::test(start_paused = true)]
async fn test_connect_retries_then_succeeds() {
    let mut remote = Remote::replying("ok\n", Some(0));
    remote.failures = 2;
    let mut h = harness(
        remote,
        RetryPolicy::new(2, Duration::from_secs(1)),
        CredentialProvider::new("u"),
    );
    let start = Instant::now();

    h.engine.run(&target(), &["bundle:list"]).await.unwrap();

    assert_eq!(start.elapsed(), Duration::from_secs(2));
    assert_eq!(h.state.lock().unwrap().opens, 3);
}

#[tokio::test(start_paused = true)]
async fn test_connect_gives_up() {
    let mut remote = Remote::replying("ok\n", Some(0));
    remote.failures = usize::MAX;
    let mut h = harness(
        remote,
        RetryPolicy::new(3, Duration::from_secs(2)),
        CredentialProvider::new("u"),
    );
    let start = Instant::now();

    let err = h.engine.run(&target(), &["bundle:list"]).await.unwrap_err();

    assert!(matches!(err, ExecError::ConnectionFailed(_)));
    assert_eq!(start.elapsed(), Duration::from_secs(6));
    let state = h.state.lock().unwrap();
    assert_eq!(state.opens, 4);
    assert!(state.executed.is_empty());
}

#[tokio::test]
async fn test_rejected_credentials_close_session() {
    let mut remote = Remote::replying("ok\n", Some(0));
    remote.accept = "agent";
    let mut h = harness(
        remote,
        RetryPolicy::new(5, Duration::from_secs(1)),
        CredentialProvider::new("u").with_password("wrong"),
    );

    let err = h.engine.run(&target(), &["bundle:list"]).await.unwrap_err();

    assert!(matches!(err, ExecError::AuthenticationFailed(_)));
    let state = h.state.lock().unwrap();
    assert_eq!(state.opens, 1);
    assert_eq!(state.offered, vec!["publickey", "password"]);
    assert!(state.executed.is_empty());
    assert_eq!(state.closes, 1);
}

#[tokio::test]
async fn test_password_after_bundled_key() {
    let mut remote = Remote::replying("ok\n", Some(0));
    remote.accept = "password";
    let mut h = harness(
        remote,
        RetryPolicy::none(),
        CredentialProvider::new("u").with_password("karaf"),
    );

    h.engine.run(&target(), &["bundle:list"]).await.unwrap();

    assert_eq!(h.state.lock().unwrap().offered, vec!["publickey", "password"]);
}

#[tokio::test]
async fn test_prompt_used_only_when_server_asks() {
    let mut remote = Remote::replying("ok\n", Some(0));
    remote.accept = "keyboard-interactive";
    let calls = Arc::new(Mutex::new(0));
    let prompt = CountingPrompt {
        answer: "secret",
        calls: Arc::clone(&calls),
    };
    let mut h = harness_with(remote, RetryPolicy::none(), CredentialProvider::new("u"), |b| {
        b.options(EngineOptions::default().with_line_separator("\n").with_interactive(true))
            .prompt(prompt)
    });

    h.engine.run(&target(), &["bundle:list"]).await.unwrap();

    assert_eq!(*calls.lock().unwrap(), 1);
    assert_eq!(
        h.state.lock().unwrap().offered,
        vec!["publickey", "keyboard-interactive"]
    );
}

#[tokio::test]
async fn test_prompt_not_invoked_when_key_accepted() {
    let calls = Arc::new(Mutex::new(0));
    let prompt = CountingPrompt {
        answer: "secret",
        calls: Arc::clone(&calls),
    };
    let mut h = harness_with(
        Remote::replying("ok\n", Some(0)),
        RetryPolicy::none(),
        CredentialProvider::new("u"),
        |b| {
            b.options(EngineOptions::default().with_line_separator("\n").with_interactive(true))
                .prompt(prompt)
        },
    );

    h.engine.run(&target(), &["bundle:list"]).await.unwrap();

    assert_eq!(*calls.lock().unwrap(), 0);
}

#[tokio::test]
async fn test_commands_joined_into_one_script() {
    let mut h = harness(
        Remote::replying("", Some(0)),
        RetryPolicy::none(),
        CredentialProvider::new("u"),
    );

    h.engine
        .run(&target(), &["feature:install webconsole", "bundle:list"])
        .await
        .unwrap();

    let state = h.state.lock().unwrap();
    assert_eq!(state.executed, vec!["feature:install webconsole\nbundle:list\n\n"]);
}

#[tokio::test]
async fn test_empty_command_list_rejected() {
    let mut h = harness(
        Remote::replying("", Some(0)),
        RetryPolicy::none(),
        CredentialProvider::new("u"),
    );

    let err = h.engine.run::<&str>(&target(), &[]).await.unwrap_err();

    assert!(matches!(err, ExecError::ConfigError(_)));
    assert_eq!(h.state.lock().unwrap().opens, 0);
}

#[tokio::test]
async fn test_legacy_error_text_without_status() {
    let stdout = "Error executing command: Unable to resolve root\n";
    let mut h = harness(
        Remote::replying(stdout, None),
        RetryPolicy::none(),
        CredentialProvider::new("u"),
    );

    let err = h.engine.run(&target(), &["feature:install x"]).await.unwrap_err();

    match err {
        ExecError::CommandFailed { status, message } => {
            assert_eq!(status, None);
            assert_eq!(message, "Unable to resolve root");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_missing_status_without_legacy_text_succeeds() {
    let mut h = harness(
        Remote::replying("done\n", None),
        RetryPolicy::none(),
        CredentialProvider::new("u"),
    );

    assert!(h.engine.run(&target(), &["bundle:list"]).await.is_ok());
}

#[tokio::test]
async fn test_close_failure_reported_after_success() {
    let mut remote = Remote::replying("ok\n", Some(0));
    remote.close_error = Some(ExecError::Cleanup("broken pipe".to_string()));
    let mut h = harness(remote, RetryPolicy::none(), CredentialProvider::new("u"));

    let err = h.engine.run(&target(), &["bundle:list"]).await.unwrap_err();

    assert!(matches!(err, ExecError::Cleanup(_)));
}

#[tokio::test]
async fn test_close_failure_does_not_mask_command_failure() {
    let mut remote = Remote::replying(&format!("{RED}boom{DEFAULT}"), Some(1));
    remote.close_error = Some(ExecError::Cleanup("broken pipe".to_string()));
    let mut h = harness(remote, RetryPolicy::none(), CredentialProvider::new("u"));

    let err = h.engine.run(&target(), &["bundle:list"]).await.unwrap_err();

    assert!(matches!(err, ExecError::CommandFailed { ref message, .. } if message == "boom"));
    assert_eq!(h.state.lock().unwrap().closes, 1);
}

#[tokio::test]
async fn test_channel_error_still_closes_session() {
    let mut remote = Remote::replying("", Some(0));
    remote.result = Err(ExecError::ChannelError("channel open failure".to_string()));
    let mut h = harness(remote, RetryPolicy::none(), CredentialProvider::new("u"));

    let err = h.engine.run(&target(), &["bundle:list"]).await.unwrap_err();

    assert!(matches!(err, ExecError::ChannelError(_)));
    assert_eq!(h.state.lock().unwrap().closes, 1);
}

#[tokio::test]
async fn test_custom_classifier() {
    struct AlwaysFails;

    impl OutcomeClassifier for AlwaysFails {
        fn classify(&self, _result: &CommandResult) -> ExecutionOutcome {
            ExecutionOutcome::failure("structured status says no")
        }
    }

    let mut h = harness_with(
        Remote::replying("ok\n", Some(0)),
        RetryPolicy::none(),
        CredentialProvider::new("u"),
        |b| b.classifier(AlwaysFails),
    );

    let err = h.engine.run(&target(), &["bundle:list"]).await.unwrap_err();

    assert_eq!(err.to_string(), "structured status says no");
}

/// Stdout whose reader went away, as with `karaf-client ... | head -1`
struct ClosedPipe;

impl Write for ClosedPipe {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::ErrorKind::BrokenPipe.into())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_echo_failure_does_not_mask_command_failure() {
    let mut h = harness_with(
        Remote::replying(&format!("{RED}no such bundle{DEFAULT}"), Some(1)),
        RetryPolicy::none(),
        CredentialProvider::new("u"),
        |b| b.sinks(OutputSinks::new(ClosedPipe, io::sink())),
    );

    let err = h.engine.run(&target(), &["bundle:start 999"]).await.unwrap_err();

    assert!(matches!(
        err,
        ExecError::CommandFailed { ref message, .. } if message == "no such bundle"
    ));
    assert_eq!(h.state.lock().unwrap().closes, 1);
}

#[tokio::test]
async fn test_echo_failure_reported_after_success() {
    let mut h = harness_with(
        Remote::replying("ok\n", Some(0)),
        RetryPolicy::none(),
        CredentialProvider::new("u"),
        |b| b.sinks(OutputSinks::new(ClosedPipe, io::sink())),
    );

    let err = h.engine.run(&target(), &["bundle:list"]).await.unwrap_err();

    assert!(matches!(err, ExecError::IoError(_)));
    assert_eq!(h.state.lock().unwrap().closes, 1);
}
