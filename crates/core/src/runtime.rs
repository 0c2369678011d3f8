//! Runtime adapter: external process execution and docker wrappers
//!
//! Every invocation of the container runtime, the compose tool, and the
//! version-control tool funnels through [`CommandSpec`]. Each call carries a
//! bounded timeout and failures are classified (not installed, daemon down,
//! not found, permission denied, conflict, timeout) instead of bubbling raw
//! process errors.

use crate::errors::{DockerError, DockertreeError, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Environment variable overriding the default per-call timeout (seconds).
pub const TIMEOUT_ENV_VAR: &str = "DOCKERTREE_TIMEOUT";

/// Timeouts for the different classes of external calls.
pub mod timeouts {
    use std::time::Duration;

    /// Small inspections (volume/network/container existence).
    pub const INSPECT: Duration = Duration::from_secs(10);
    /// Single container stop/start.
    pub const CONTAINER: Duration = Duration::from_secs(30);
    /// Compose down.
    pub const DOWN: Duration = Duration::from_secs(60);
    /// Single volume copy or tar operation inside a helper container.
    pub const COPY: Duration = Duration::from_secs(300);
    /// Compose up / image build.
    pub const UP: Duration = Duration::from_secs(600);
}

/// Captured output of a finished external process.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    /// Non-empty stdout lines.
    pub fn stdout_lines(&self) -> Vec<String> {
        self.stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Builder for one bounded external process invocation.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    envs: Vec<(String, String)>,
    stdin: Option<String>,
    timeout: Duration,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        let timeout = std::env::var(TIMEOUT_ENV_VAR)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(timeouts::DOWN);
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            envs: Vec::new(),
            stdin: None,
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The rendered command line, for logging.
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }

    /// Run the command and capture its output.
    ///
    /// Returns `(exit_code, stdout, stderr)` for any process that ran to
    /// completion, including non-zero exits; callers decide what a failure
    /// means. Spawn errors and deadline overruns are classified here.
    pub async fn output(self) -> Result<ExecOutput> {
        debug!("exec: {}", self.display());

        let mut command = tokio::process::Command::new(&self.program);
        command
            .args(&self.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if self.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }
        for (key, value) in &self.envs {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                DockertreeError::Docker(classify_missing_program(&self.program))
            }
            std::io::ErrorKind::PermissionDenied => {
                DockertreeError::Docker(DockerError::PermissionDenied {
                    message: format!("cannot execute {}", self.program),
                })
            }
            _ => DockertreeError::Io(e),
        })?;

        if let Some(input) = &self.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(input.as_bytes()).await?;
                // Drop to signal EOF.
            }
        }

        let seconds = self.timeout.as_secs();
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(DockertreeError::Docker(DockerError::Timeout {
                    seconds,
                    message: self.display(),
                }));
            }
        };

        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

fn classify_missing_program(program: &str) -> DockerError {
    if program == "docker" || program == "docker-compose" {
        DockerError::NotInstalled
    } else {
        DockerError::CommandFailed {
            message: format!("{program}: command not found"),
        }
    }
}

/// Classify a failed docker invocation by inspecting its stderr.
pub fn classify_docker_failure(output: &ExecOutput) -> DockerError {
    let stderr = output.stderr.to_lowercase();
    if stderr.contains("cannot connect to the docker daemon")
        || stderr.contains("is the docker daemon running")
    {
        DockerError::DaemonDown
    } else if stderr.contains("permission denied") {
        DockerError::PermissionDenied {
            message: output.stderr.trim().to_string(),
        }
    } else if stderr.contains("no such") || stderr.contains("not found") {
        DockerError::NotFound {
            name: output.stderr.trim().to_string(),
        }
    } else if stderr.contains("already exists")
        || stderr.contains("already in use")
        || stderr.contains("conflict")
    {
        DockerError::Conflict {
            message: output.stderr.trim().to_string(),
        }
    } else {
        DockerError::CommandFailed {
            message: output.stderr.trim().to_string(),
        }
    }
}

/// Status summary of one container, from `docker ps` formatted output.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ContainerStatus {
    pub name: String,
    pub status: String,
    pub state: String,
    pub ports: String,
    pub image: String,
}

/// Thin typed wrappers over the docker CLI.
///
/// All helper-container operations (volume copy, tar, size probes) run a
/// throwaway `alpine` container so they work for any volume type, provided
/// the owning container is stopped first.
#[derive(Debug, Clone, Default)]
pub struct DockerCli;

impl DockerCli {
    pub fn new() -> Self {
        Self
    }

    fn docker(&self) -> CommandSpec {
        CommandSpec::new("docker")
    }

    /// Health check for daemon availability.
    pub async fn ping(&self) -> Result<()> {
        let output = self
            .docker()
            .arg("info")
            .timeout(timeouts::INSPECT)
            .output()
            .await?;
        if output.success() {
            Ok(())
        } else {
            Err(classify_docker_failure(&output).into())
        }
    }

    pub async fn network_exists(&self, name: &str) -> bool {
        self.inspect_ok("network", name).await
    }

    pub async fn volume_exists(&self, name: &str) -> bool {
        self.inspect_ok("volume", name).await
    }

    async fn inspect_ok(&self, object: &str, name: &str) -> bool {
        matches!(
            self.docker()
                .args([object, "inspect", name])
                .timeout(timeouts::INSPECT)
                .output()
                .await,
            Ok(output) if output.success()
        )
    }

    /// Create the external network if absent.
    pub async fn create_network(&self, name: &str) -> Result<()> {
        if self.network_exists(name).await {
            debug!("Network {name} already exists");
            return Ok(());
        }
        let output = self
            .docker()
            .args(["network", "create", name])
            .timeout(timeouts::INSPECT)
            .output()
            .await?;
        if output.success() {
            Ok(())
        } else {
            match classify_docker_failure(&output) {
                // Lost a race with another creator; the network is there.
                DockerError::Conflict { .. } => Ok(()),
                err => Err(err.into()),
            }
        }
    }

    pub async fn create_volume(&self, name: &str) -> Result<()> {
        let output = self
            .docker()
            .args(["volume", "create", name])
            .timeout(timeouts::INSPECT)
            .output()
            .await?;
        if output.success() {
            Ok(())
        } else {
            Err(classify_docker_failure(&output).into())
        }
    }

    pub async fn remove_volume(&self, name: &str) -> Result<()> {
        let output = self
            .docker()
            .args(["volume", "rm", name])
            .timeout(timeouts::INSPECT)
            .output()
            .await?;
        if output.success() {
            Ok(())
        } else {
            Err(classify_docker_failure(&output).into())
        }
    }

    /// All volume names known to the daemon.
    pub async fn list_volumes(&self) -> Result<Vec<String>> {
        let output = self
            .docker()
            .args(["volume", "ls", "-q"])
            .timeout(timeouts::INSPECT)
            .output()
            .await?;
        if output.success() {
            Ok(output.stdout_lines())
        } else {
            Err(classify_docker_failure(&output).into())
        }
    }

    /// Names of containers (running or not) that mount the volume.
    pub async fn containers_using_volume(&self, volume: &str) -> Result<Vec<String>> {
        let output = self
            .docker()
            .args(["ps", "-a", "--filter"])
            .arg(format!("volume={volume}"))
            .args(["--format", "{{.Names}}"])
            .timeout(timeouts::INSPECT)
            .output()
            .await?;
        if output.success() {
            Ok(output.stdout_lines())
        } else {
            Err(classify_docker_failure(&output).into())
        }
    }

    /// Names of running containers that mount the volume.
    pub async fn running_containers_using_volume(&self, volume: &str) -> Result<Vec<String>> {
        let output = self
            .docker()
            .args(["ps", "--filter"])
            .arg(format!("volume={volume}"))
            .args(["--format", "{{.Names}}"])
            .timeout(timeouts::INSPECT)
            .output()
            .await?;
        if output.success() {
            Ok(output.stdout_lines())
        } else {
            Err(classify_docker_failure(&output).into())
        }
    }

    pub async fn container_running(&self, name: &str) -> bool {
        match self
            .docker()
            .args(["ps", "--filter"])
            .arg(format!("name=^/{name}$"))
            .args(["--format", "{{.Status}}"])
            .timeout(timeouts::INSPECT)
            .output()
            .await
        {
            Ok(output) => output.success() && output.stdout.contains("Up"),
            Err(_) => false,
        }
    }

    pub async fn container_exists(&self, name: &str) -> bool {
        match self
            .docker()
            .args(["ps", "-a", "--filter"])
            .arg(format!("name=^/{name}$"))
            .args(["--format", "{{.Names}}"])
            .timeout(timeouts::INSPECT)
            .output()
            .await
        {
            Ok(output) => output.success() && output.stdout_trimmed() == name,
            Err(_) => false,
        }
    }

    pub async fn start_container(&self, name: &str) -> Result<()> {
        let output = self
            .docker()
            .args(["start", name])
            .timeout(timeouts::CONTAINER)
            .output()
            .await?;
        if output.success() {
            Ok(())
        } else {
            Err(classify_docker_failure(&output).into())
        }
    }

    pub async fn stop_container(&self, name: &str) -> Result<()> {
        let output = self
            .docker()
            .args(["stop", name])
            .timeout(timeouts::CONTAINER)
            .output()
            .await?;
        if output.success() {
            Ok(())
        } else {
            Err(classify_docker_failure(&output).into())
        }
    }

    pub async fn remove_container(&self, name: &str, force: bool) -> Result<()> {
        let mut spec = self.docker().arg("rm");
        if force {
            spec = spec.arg("-f");
        }
        let output = spec.arg(name).timeout(timeouts::CONTAINER).output().await?;
        if output.success() {
            Ok(())
        } else {
            Err(classify_docker_failure(&output).into())
        }
    }

    /// Containers belonging to a compose project, via the project label.
    pub async fn compose_project_containers(
        &self,
        project: &str,
        include_stopped: bool,
    ) -> Result<Vec<ContainerStatus>> {
        let mut spec = self.docker().arg("ps");
        if include_stopped {
            spec = spec.arg("-a");
        }
        let output = spec
            .arg("--filter")
            .arg(format!("label=com.docker.compose.project={project}"))
            .args(["--format", "{{.Names}}|{{.Status}}|{{.Ports}}|{{.Image}}"])
            .timeout(timeouts::INSPECT)
            .output()
            .await?;
        if !output.success() {
            return Err(classify_docker_failure(&output).into());
        }

        let mut containers = Vec::new();
        for line in output.stdout_lines() {
            let parts: Vec<&str> = line.splitn(4, '|').collect();
            if parts.len() == 4 {
                containers.push(ContainerStatus {
                    name: parts[0].to_string(),
                    state: if parts[1].starts_with("Up") {
                        "running".to_string()
                    } else {
                        "stopped".to_string()
                    },
                    status: parts[1].to_string(),
                    ports: parts[2].to_string(),
                    image: parts[3].to_string(),
                });
            }
        }
        Ok(containers)
    }

    /// Containers whose names match a substring filter.
    pub async fn containers_matching(
        &self,
        name_filter: &str,
        include_stopped: bool,
    ) -> Result<Vec<String>> {
        let mut spec = self.docker().arg("ps");
        if include_stopped {
            spec = spec.arg("-a");
        }
        let output = spec
            .arg("--filter")
            .arg(format!("name={name_filter}"))
            .args(["--format", "{{.Names}}"])
            .timeout(timeouts::INSPECT)
            .output()
            .await?;
        if output.success() {
            Ok(output.stdout_lines())
        } else {
            Err(classify_docker_failure(&output).into())
        }
    }

    /// Exited containers whose names match a substring filter.
    pub async fn exited_containers_matching(&self, name_filter: &str) -> Result<Vec<String>> {
        let output = self
            .docker()
            .args(["ps", "-a", "--filter"])
            .arg(format!("name={name_filter}"))
            .args(["--filter", "status=exited", "--format", "{{.Names}}"])
            .timeout(timeouts::INSPECT)
            .output()
            .await?;
        if output.success() {
            Ok(output.stdout_lines())
        } else {
            Err(classify_docker_failure(&output).into())
        }
    }

    /// Copy the file tree of one volume into another through a helper
    /// container. The source is mounted read-only; the caller is responsible
    /// for stopping the owning container first.
    pub async fn copy_volume_files(&self, source: &str, target: &str) -> Result<()> {
        let output = self
            .docker()
            .args(["run", "--rm", "-v"])
            .arg(format!("{source}:/source:ro"))
            .arg("-v")
            .arg(format!("{target}:/dest"))
            .args(["alpine", "sh", "-c", "cp -a /source/. /dest/ 2>/dev/null || true"])
            .timeout(timeouts::COPY)
            .output()
            .await?;
        if output.success() {
            Ok(())
        } else {
            Err(classify_docker_failure(&output).into())
        }
    }

    /// Tar a volume's contents to `{host_dir}/{file_name}` (gzip).
    pub async fn archive_volume(&self, volume: &str, host_dir: &Path, file_name: &str) -> Result<()> {
        let output = self
            .docker()
            .args(["run", "--rm", "-v"])
            .arg(format!("{volume}:/data"))
            .arg("-v")
            .arg(format!("{}:/backup", host_dir.display()))
            .args(["alpine", "tar", "czf"])
            .arg(format!("/backup/{file_name}"))
            .args(["-C", "/data", "."])
            .timeout(timeouts::COPY)
            .output()
            .await?;
        if output.success() {
            Ok(())
        } else {
            Err(classify_docker_failure(&output).into())
        }
    }

    /// Clear a volume and unpack `{host_dir}/{file_name}` into it.
    pub async fn restore_volume_archive(
        &self,
        volume: &str,
        host_dir: &Path,
        file_name: &str,
    ) -> Result<()> {
        let script = format!(
            "cd /data && rm -rf -- * .[!.]* ..?* 2>/dev/null || true && tar xzf /backup/{file_name}"
        );
        let output = self
            .docker()
            .args(["run", "--rm", "-v"])
            .arg(format!("{volume}:/data"))
            .arg("-v")
            .arg(format!("{}:/backup", host_dir.display()))
            .args(["alpine", "sh", "-c"])
            .arg(script)
            .timeout(timeouts::COPY)
            .output()
            .await?;
        if output.success() {
            Ok(())
        } else {
            Err(classify_docker_failure(&output).into())
        }
    }

    /// Total size of a volume's contents in bytes.
    pub async fn volume_size_bytes(&self, volume: &str) -> Result<u64> {
        let output = self
            .docker()
            .args(["run", "--rm", "-v"])
            .arg(format!("{volume}:/data"))
            .args(["alpine", "sh", "-c", "du -sb /data 2>/dev/null | cut -f1 || echo 0"])
            .timeout(timeouts::INSPECT)
            .output()
            .await?;
        if !output.success() {
            return Err(classify_docker_failure(&output).into());
        }
        Ok(output.stdout_trimmed().parse().unwrap_or(0))
    }

    /// Human-readable size of a volume's contents.
    pub async fn volume_size_human(&self, volume: &str) -> Result<String> {
        let output = self
            .docker()
            .args(["run", "--rm", "-v"])
            .arg(format!("{volume}:/data"))
            .args(["alpine", "sh", "-c", "du -sh /data | cut -f1"])
            .timeout(timeouts::INSPECT)
            .output()
            .await?;
        if output.success() {
            Ok(output.stdout_trimmed().to_string())
        } else {
            Err(classify_docker_failure(&output).into())
        }
    }

    /// Whether a postgres volume holds user data beyond bare initialization.
    ///
    /// A freshly initialized cluster has `PG_VERSION` and an empty-ish
    /// `base/`; real data shows up as files nested under `base/`.
    pub async fn postgres_volume_has_data(&self, volume: &str) -> Result<bool> {
        let script = "test -f /data/PG_VERSION && test -d /data/base && \
                      find /data/base -mindepth 2 -type f 2>/dev/null | head -1 | grep -q . \
                      && echo has_data || echo empty_init";
        let output = self
            .docker()
            .args(["run", "--rm", "-v"])
            .arg(format!("{volume}:/data"))
            .args(["alpine", "sh", "-c", script])
            .timeout(timeouts::INSPECT)
            .output()
            .await?;
        Ok(output.stdout_trimmed() == "has_data")
    }

    /// Last `lines` log lines of a container.
    pub async fn logs_tail(&self, container: &str, lines: u32) -> Result<String> {
        let output = self
            .docker()
            .args(["logs", "--tail"])
            .arg(lines.to_string())
            .arg(container)
            .timeout(timeouts::INSPECT)
            .output()
            .await?;
        // docker logs writes app output to both streams.
        let mut combined = output.stdout;
        if !output.stderr.is_empty() {
            combined.push_str(&output.stderr);
        }
        Ok(combined)
    }

    /// Clear the builder's exec cache mounts. Best effort.
    pub async fn builder_prune(&self) {
        let result = self
            .docker()
            .args([
                "builder",
                "prune",
                "-f",
                "--filter",
                "type=exec.cachemount",
            ])
            .timeout(timeouts::DOWN)
            .output()
            .await;
        if let Err(e) = result {
            warn!("builder prune failed: {e}");
        }
    }
}
