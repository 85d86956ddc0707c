//! Browser-driven fallback login.
//!
//! lexoffice sometimes puts its login endpoint behind a bot-detection gate
//! that a plain JSON POST cannot pass. A `ChallengeSolver` drives a real
//! browser (out of process) and hands back the resulting session cookies.
//! Every solve is bounded by a hard deadline.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use super::auth::{AuthState, Credentials};
use super::error::AuthError;
use super::provider::AuthStrategy;
use crate::util::truncate_body;

/// Upper bound for a single challenge solve.
pub const DEFAULT_CHALLENGE_TIMEOUT: Duration = Duration::from_secs(60);

/// Produces session cookies by passing the vendor's bot-detection challenge.
#[async_trait]
pub trait ChallengeSolver: Send + Sync {
    async fn solve(&self, credentials: &Credentials) -> Result<BTreeMap<String, String>, AuthError>;
}

/// `AuthStrategy` wrapping an optional solver with a deadline.
pub struct BrowserChallenge {
    solver: Option<Arc<dyn ChallengeSolver>>,
    timeout: Duration,
}

impl BrowserChallenge {
    pub fn new(solver: Arc<dyn ChallengeSolver>) -> Self {
        Self {
            solver: Some(solver),
            timeout: DEFAULT_CHALLENGE_TIMEOUT,
        }
    }

    /// A strategy that always reports the solver as missing.
    pub fn unavailable() -> Self {
        Self {
            solver: None,
            timeout: DEFAULT_CHALLENGE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl AuthStrategy for BrowserChallenge {
    fn name(&self) -> &str {
        "browser-challenge"
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<AuthState, AuthError> {
        let Some(solver) = &self.solver else {
            return Err(AuthError::ChallengeUnavailable(
                "no challenge solver configured".to_string(),
            ));
        };

        // Dropping the solve future on timeout cancels it
        let cookies = match tokio::time::timeout(self.timeout, solver.solve(credentials)).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(timeout_secs = self.timeout.as_secs(), "Challenge solve exceeded deadline");
                return Err(AuthError::ChallengeTimeout(self.timeout));
            }
        };

        AuthState::from_cookies(cookies)
            .ok_or_else(|| AuthError::Malformed("challenge solver returned no cookies".to_string()))
    }
}

/// Runs an external solver program.
///
/// The program receives `{"username": .., "password": ..}` on stdin and must
/// print the session cookies on stdout, either as a flat `{"name": "value"}`
/// object or as `{"cookies": ...}` holding such an object or a list of
/// `{"name", "value"}` entries (the browser storage-state layout). The child
/// is killed when the solve is cancelled.
#[derive(Debug, Clone)]
pub struct CommandSolver {
    program: String,
    args: Vec<String>,
}

impl CommandSolver {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Split a whitespace-separated command line. `None` when blank.
    pub fn from_command_line(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SolverOutput {
    Wrapped { cookies: CookieList },
    Flat(BTreeMap<String, String>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CookieList {
    Map(BTreeMap<String, String>),
    List(Vec<NamedCookie>),
}

#[derive(Deserialize)]
struct NamedCookie {
    name: String,
    value: String,
}

fn parse_solver_output(stdout: &[u8]) -> Result<BTreeMap<String, String>, AuthError> {
    let output: SolverOutput = serde_json::from_slice(stdout).map_err(|e| {
        AuthError::Challenge(format!(
            "unparseable solver output ({}): {}",
            e,
            truncate_body(&String::from_utf8_lossy(stdout))
        ))
    })?;

    Ok(match output {
        SolverOutput::Flat(map) | SolverOutput::Wrapped { cookies: CookieList::Map(map) } => map,
        SolverOutput::Wrapped { cookies: CookieList::List(list) } => {
            list.into_iter().map(|c| (c.name, c.value)).collect()
        }
    })
}

#[async_trait]
impl ChallengeSolver for CommandSolver {
    async fn solve(&self, credentials: &Credentials) -> Result<BTreeMap<String, String>, AuthError> {
        debug!(program = %self.program, "Starting challenge solver");

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                AuthError::ChallengeUnavailable(format!("failed to start {}: {}", self.program, e))
            })?;

        let payload = serde_json::json!({
            "username": credentials.username(),
            "password": credentials.password(),
        })
        .to_string();
        let stdin = child.stdin.take();

        // Fed while stdout and stderr are drained; stdin closes once written
        let feed = async move {
            if let Some(mut stdin) = stdin {
                // A solver that ignores stdin may already have closed it
                if let Err(e) = stdin.write_all(payload.as_bytes()).await {
                    debug!(error = %e, "Challenge solver did not accept credentials on stdin");
                }
            }
        };
        let ((), output) = tokio::join!(feed, child.wait_with_output());
        let output = output.map_err(|e| AuthError::Challenge(format!("solver did not complete: {}", e)))?;

        if !output.status.success() {
            return Err(AuthError::Challenge(format!(
                "solver exited with {}: {}",
                output.status,
                truncate_body(String::from_utf8_lossy(&output.stderr).trim())
            )));
        }

        parse_solver_output(&output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowSolver;

    #[async_trait]
    impl ChallengeSolver for SlowSolver {
        async fn solve(&self, _credentials: &Credentials) -> Result<BTreeMap<String, String>, AuthError> {
            tokio::time::sleep(Duration::from_secs(600)).await;
            Ok(BTreeMap::from([("SESSION".to_string(), "late".to_string())]))
        }
    }

    struct EmptySolver;

    #[async_trait]
    impl ChallengeSolver for EmptySolver {
        async fn solve(&self, _credentials: &Credentials) -> Result<BTreeMap<String, String>, AuthError> {
            Ok(BTreeMap::new())
        }
    }

    fn creds() -> Credentials {
        Credentials::new("bookkeeper@example.com", "secret")
    }

    #[tokio::test(start_paused = true)]
    async fn test_solve_is_bounded_by_timeout() {
        let strategy = BrowserChallenge::new(Arc::new(SlowSolver));
        let started = tokio::time::Instant::now();

        let err = strategy.authenticate(&creds()).await.unwrap_err();

        let elapsed = started.elapsed();
        assert!(matches!(err, AuthError::ChallengeTimeout(t) if t == DEFAULT_CHALLENGE_TIMEOUT));
        assert!(elapsed >= DEFAULT_CHALLENGE_TIMEOUT);
        assert!(elapsed < DEFAULT_CHALLENGE_TIMEOUT + Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_missing_solver_is_unavailable() {
        let err = BrowserChallenge::unavailable().authenticate(&creds()).await.unwrap_err();
        assert!(matches!(err, AuthError::ChallengeUnavailable(_)));
    }

    #[tokio::test]
    async fn test_empty_cookie_set_is_rejected() {
        let err = BrowserChallenge::new(Arc::new(EmptySolver))
            .authenticate(&creds())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Malformed(_)));
    }

    #[test]
    fn test_parse_flat_output() {
        let cookies = parse_solver_output(br#"{"SESSION": "abc", "XSRF-TOKEN": "def"}"#).unwrap();
        assert_eq!(cookies.get("SESSION").map(String::as_str), Some("abc"));
        assert_eq!(cookies.len(), 2);
    }

    #[test]
    fn test_parse_storage_state_output() {
        let json = br#"{"cookies": [{"name": "SESSION", "value": "abc", "domain": "app.lexware.de", "path": "/"}], "origins": []}"#;
        let cookies = parse_solver_output(json).unwrap();
        assert_eq!(cookies.get("SESSION").map(String::as_str), Some("abc"));
    }

    #[test]
    fn test_parse_wrapped_map_output() {
        let cookies = parse_solver_output(br#"{"cookies": {"SESSION": "abc"}}"#).unwrap();
        assert_eq!(cookies.get("SESSION").map(String::as_str), Some("abc"));
    }

    #[test]
    fn test_parse_garbage_output() {
        let err = parse_solver_output(b"Traceback (most recent call last)").unwrap_err();
        assert!(matches!(err, AuthError::Challenge(_)));
    }

    #[test]
    fn test_from_command_line() {
        let solver = CommandSolver::from_command_line("  node solve.js --headless ").unwrap();
        assert_eq!(solver.program(), "node");
        assert_eq!(solver.args, vec!["solve.js", "--headless"]);
        assert!(CommandSolver::from_command_line("   ").is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_solver_reads_stdout() {
        let solver = CommandSolver::new(
            "sh",
            vec!["-c".into(), r#"cat > /dev/null; echo '{"SESSION": "from-browser"}'"#.into()],
        );
        let state = BrowserChallenge::new(Arc::new(solver))
            .authenticate(&creds())
            .await
            .unwrap();
        assert_eq!(state.cookie("SESSION"), Some("from-browser"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_solver_output_before_stdin() {
        // Fills the stderr pipe before reading its credentials
        let script = r#"head -c 262144 /dev/zero >&2; read -r creds; echo "{\"SESSION\": \"${#creds}\"}""#;
        let solver = CommandSolver::new("sh", vec!["-c".into(), script.into()]);

        let cookies = tokio::time::timeout(Duration::from_secs(10), solver.solve(&creds()))
            .await
            .expect("solver should not stall")
            .unwrap();

        assert!(cookies["SESSION"].parse::<usize>().unwrap() > 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_solver_failure_exit() {
        let solver = CommandSolver::new("sh", vec!["-c".into(), "echo 'captcha unsolved' >&2; exit 3".into()]);
        let err = solver.solve(&creds()).await.unwrap_err();
        match err {
            AuthError::Challenge(msg) => assert!(msg.contains("captcha unsolved")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_solver_killed_on_timeout() {
        let solver = CommandSolver::new("sh", vec!["-c".into(), "sleep 30".into()]);
        let strategy = BrowserChallenge::new(Arc::new(solver)).with_timeout(Duration::from_millis(200));
        let started = std::time::Instant::now();

        let err = strategy.authenticate(&creds()).await.unwrap_err();

        assert!(matches!(err, AuthError::ChallengeTimeout(_)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_missing_program_is_unavailable() {
        let solver = CommandSolver::new("paperlex-no-such-solver-binary", vec![]);
        let err = solver.solve(&creds()).await.unwrap_err();
        assert!(matches!(err, AuthError::ChallengeUnavailable(_)));
    }
}
