//! Runner that executes an external program in the stage's working directory.

use super::{Artifacts, StageInput, StageResult, StageRunner};
use crate::config::PipelineConfig;
use async_trait::async_trait;
use chrono::Utc;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

type ArgBuilder = Arc<dyn Fn(&StageInput) -> Vec<String> + Send + Sync>;

/// A file the program must leave in its working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedOutput {
    /// Artifact key under which the path is published.
    pub key: String,
    /// File name relative to the working directory.
    pub file_name: PathBuf,
}

impl ExpectedOutput {
    /// Creates a new expected output.
    #[must_use]
    pub fn new(key: impl Into<String>, file_name: impl Into<PathBuf>) -> Self {
        Self {
            key: key.into(),
            file_name: file_name.into(),
        }
    }
}

/// Runs one external program per stage invocation.
///
/// The program's stdout and stderr are written to `<stage>.log` and
/// `<stage>.error.log` in the working directory. A non-zero exit, a timeout,
/// a spawn error or a missing expected output all produce a failed
/// [`StageResult`].
#[derive(Clone)]
pub struct CommandStage {
    name: String,
    program: String,
    args: Vec<String>,
    arg_builder: Option<ArgBuilder>,
    env: Vec<(String, String)>,
    timeout: Option<Duration>,
    outputs: Vec<ExpectedOutput>,
}

impl CommandStage {
    /// Creates a runner for `program`.
    #[must_use]
    pub fn new(name: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            arg_builder: None,
            env: Vec::new(),
            timeout: None,
            outputs: Vec::new(),
        }
    }

    /// Adds fixed arguments.
    #[must_use]
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Appends arguments computed from the stage input on every run.
    #[must_use]
    pub fn with_arg_builder<F>(mut self, builder: F) -> Self
    where
        F: Fn(&StageInput) -> Vec<String> + Send + Sync + 'static,
    {
        self.arg_builder = Some(Arc::new(builder));
        self
    }

    /// Sets an environment variable for the child process.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Bounds the program's run time.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Applies the configured default timeout unless one is already set.
    #[must_use]
    pub fn with_config(mut self, config: &PipelineConfig) -> Self {
        if self.timeout.is_none() {
            self.timeout = config.stage_timeout();
        }
        self
    }

    /// Declares an output file that must exist after a successful exit.
    #[must_use]
    pub fn with_output(mut self, key: impl Into<String>, file_name: impl Into<PathBuf>) -> Self {
        self.outputs.push(ExpectedOutput::new(key, file_name));
        self
    }

    fn command_args(&self, input: &StageInput) -> Vec<String> {
        let mut args = self.args.clone();
        if let Some(builder) = &self.arg_builder {
            args.extend(builder(input));
        }
        args
    }

    async fn write_log(path: PathBuf, contents: &[u8]) {
        if let Err(e) = tokio::fs::write(&path, contents).await {
            warn!(path = %path.display(), error = %e, "Could not write stage log");
        }
    }
}

impl fmt::Debug for CommandStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandStage")
            .field("name", &self.name)
            .field("program", &self.program)
            .field("args", &self.args)
            .field("timeout", &self.timeout)
            .field("outputs", &self.outputs)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl StageRunner for CommandStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, input: &StageInput) -> StageResult {
        let stage = input.stage_name();
        let started_at = Utc::now();
        let workdir = input.working_directory().to_path_buf();
        let args = self.command_args(input);

        info!(stage = %stage, program = %self.program, workdir = %workdir.display(), "Starting external program");
        debug!(stage = %stage, ?args, "Command line");

        let mut command = Command::new(&self.program);
        command
            .args(&args)
            .current_dir(&workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &self.env {
            command.env(key, value);
        }

        let run = command.output();
        let output = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(stage = %stage, timeout_secs = limit.as_secs_f64(), "External program timed out");
                    return StageResult::failed(
                        stage,
                        started_at,
                        format!("{} timed out after {:.1}s", self.program, limit.as_secs_f64()),
                    );
                }
            },
            None => run.await,
        };

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                warn!(stage = %stage, error = %e, "Could not start external program");
                return StageResult::failed(
                    stage,
                    started_at,
                    format!("failed to start {}: {e}", self.program),
                );
            }
        };

        let log_path = workdir.join(format!("{stage}.log"));
        Self::write_log(log_path.clone(), &output.stdout).await;
        Self::write_log(workdir.join(format!("{stage}.error.log")), &output.stderr).await;

        if !output.status.success() {
            let reason = match output.status.code() {
                Some(code) => format!("{} exited with status {code}", self.program),
                None => format!("{} was terminated by a signal", self.program),
            };
            let result = StageResult::failed(stage, started_at, reason);
            return match output.status.code() {
                Some(code) => result.with_exit_code(code),
                None => result,
            };
        }

        let mut artifacts = Artifacts::new();
        artifacts.insert(
            "log_path".to_string(),
            serde_json::json!(log_path.to_string_lossy()),
        );
        for expected in &self.outputs {
            let path = workdir.join(&expected.file_name);
            if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return StageResult::failed(
                    stage,
                    started_at,
                    format!("missing expected output {}", expected.file_name.display()),
                );
            }
            artifacts.insert(expected.key.clone(), serde_json::json!(path.to_string_lossy()));
        }

        StageResult::succeeded(stage, started_at, artifacts)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::stages::StageKind;
    use crate::testing::sample_request;

    fn input_in(dir: &std::path::Path) -> StageInput {
        StageInput::new(
            StageKind::Truncate,
            None,
            dir,
            Arc::new(sample_request(1, 20)),
        )
    }

    #[tokio::test]
    async fn test_successful_command_publishes_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let stage = CommandStage::new("truncate", "sh")
            .with_args(["-c", "echo done > truncate.mtz && echo ok"])
            .with_output("truncate_mtz", "truncate.mtz");

        let result = stage.execute(&input_in(dir.path())).await;

        assert!(result.is_success(), "{:?}", result.failure);
        assert!(result.artifact_str("truncate_mtz").unwrap().ends_with("truncate.mtz"));
        let log = std::fs::read_to_string(dir.path().join("truncate.log")).unwrap();
        assert_eq!(log.trim(), "ok");
    }

    #[tokio::test]
    async fn test_non_zero_exit_fails_with_code() {
        let dir = tempfile::tempdir().unwrap();
        let stage = CommandStage::new("truncate", "sh").with_args(["-c", "exit 3"]);

        let result = stage.execute(&input_in(dir.path())).await;

        assert!(!result.is_success());
        assert_eq!(result.failure.as_ref().unwrap().exit_code, Some(3));
    }

    #[tokio::test]
    async fn test_missing_output_fails() {
        let dir = tempfile::tempdir().unwrap();
        let stage = CommandStage::new("truncate", "sh")
            .with_args(["-c", "true"])
            .with_output("truncate_mtz", "truncate.mtz");

        let result = stage.execute(&input_in(dir.path())).await;

        assert!(!result.is_success());
        assert!(result.failure_reason().contains("truncate.mtz"));
    }

    #[tokio::test]
    async fn test_timeout_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let stage = CommandStage::new("truncate", "sh")
            .with_args(["-c", "sleep 5"])
            .with_timeout(Duration::from_millis(100));

        let result = stage.execute(&input_in(dir.path())).await;

        assert!(!result.is_success());
        assert!(result.failure_reason().contains("timed out"));
    }

    #[tokio::test]
    async fn test_configured_timeout_applies() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::default().with_stage_timeout(0.1);
        let stage = CommandStage::new("truncate", "sh")
            .with_args(["-c", "sleep 5"])
            .with_config(&config);

        let result = stage.execute(&input_in(dir.path())).await;

        assert!(result.failure_reason().contains("timed out"));
    }

    #[tokio::test]
    async fn test_unusable_configured_timeout_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::default().with_stage_timeout(-1.0);
        let stage = CommandStage::new("truncate", "sh")
            .with_args(["-c", "true"])
            .with_config(&config);

        assert!(stage.execute(&input_in(dir.path())).await.is_success());
    }

    #[tokio::test]
    async fn test_arg_builder_sees_params() {
        let dir = tempfile::tempdir().unwrap();
        let stage = CommandStage::new("truncate", "sh").with_arg_builder(|input| {
            let res = input.param_f64("resolution_cutoff").unwrap_or(0.0);
            vec!["-c".to_string(), format!("echo {res}")]
        });
        let input = input_in(dir.path()).with_param("resolution_cutoff", serde_json::json!(1.5));

        let result = stage.execute(&input).await;

        assert!(result.is_success());
        let log = std::fs::read_to_string(dir.path().join("truncate.log")).unwrap();
        assert_eq!(log.trim(), "1.5");
    }

    #[tokio::test]
    async fn test_unknown_program_fails() {
        let dir = tempfile::tempdir().unwrap();
        let stage = CommandStage::new("truncate", "definitely-not-a-real-program-xyz");

        let result = stage.execute(&input_in(dir.path())).await;

        assert!(!result.is_success());
        assert!(result.failure_reason().contains("failed to start"));
    }
}
