//! Error types and handling
//!
//! Domain-specific error types for the worktree environment engine. Every
//! external failure is classified into an [`ErrorKind`] so orchestrator
//! operations can return structured results to programmatic callers.

use thiserror::Error;

/// Classified error kinds surfaced through operation results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotARepo,
    RuntimeUnavailable,
    ComposeUnavailable,
    NotSetUp,
    ReservedName,
    ProtectedBranch,
    InvalidBranchName,
    AlreadyExists,
    NotFound,
    CorruptedWorktree,
    ExecFailed,
    Timeout,
    PermissionDenied,
    Conflict,
    ChecksumMismatch,
    MissingEntry,
    InvalidYaml,
    InvalidJson,
    VolumeInUse,
    NoFreePort,
    NoWebService,
    ConfigMissingKey,
    Io,
    Other,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotARepo => "not_a_repo",
            Self::RuntimeUnavailable => "runtime_unavailable",
            Self::ComposeUnavailable => "compose_unavailable",
            Self::NotSetUp => "not_set_up",
            Self::ReservedName => "reserved_name",
            Self::ProtectedBranch => "protected_branch",
            Self::InvalidBranchName => "invalid_branch_name",
            Self::AlreadyExists => "already_exists",
            Self::NotFound => "not_found",
            Self::CorruptedWorktree => "corrupted_worktree",
            Self::ExecFailed => "exec_failed",
            Self::Timeout => "timeout",
            Self::PermissionDenied => "permission_denied",
            Self::Conflict => "conflict",
            Self::ChecksumMismatch => "checksum_mismatch",
            Self::MissingEntry => "missing_entry",
            Self::InvalidYaml => "invalid_yaml",
            Self::InvalidJson => "invalid_json",
            Self::VolumeInUse => "volume_in_use",
            Self::NoFreePort => "no_free_port",
            Self::NoWebService => "no_web_service",
            Self::ConfigMissingKey => "config_missing_key",
            Self::Io => "io",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    NotFound { path: String },

    #[error("Failed to parse configuration: {message}")]
    Parse { message: String },

    #[error("Configuration is missing required key: {key}")]
    MissingKey { key: String },

    #[error("Project is not set up: {message}")]
    NotSetUp { message: String },
}

/// Git and worktree errors
#[derive(Error, Debug)]
pub enum GitError {
    #[error("Not a git repository: {path}")]
    NotARepo { path: String },

    #[error("Branch '{branch}' is protected and cannot be removed")]
    ProtectedBranch { branch: String },

    #[error("Invalid branch name: '{branch}'")]
    InvalidBranchName { branch: String },

    #[error("'{name}' is a reserved name and cannot be used as a worktree name")]
    ReservedName { name: String },

    #[error("Worktree for branch '{branch}' already exists")]
    WorktreeExists { branch: String },

    #[error("Worktree for branch '{branch}' not found")]
    WorktreeNotFound { branch: String },

    #[error("Worktree for branch '{branch}' is corrupted: {message}")]
    CorruptedWorktree { branch: String, message: String },

    #[error("Permission denied: {message}")]
    PermissionDenied { message: String },

    #[error("Git command failed: {message}")]
    CommandFailed { message: String },
}

/// Docker runtime errors
#[derive(Error, Debug)]
pub enum DockerError {
    #[error("Container runtime is not installed")]
    NotInstalled,

    #[error("Container runtime daemon is not running")]
    DaemonDown,

    #[error("Docker resource not found: {name}")]
    NotFound { name: String },

    #[error("Permission denied: {message}")]
    PermissionDenied { message: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Volume '{volume}' is in use by running containers: {containers}")]
    VolumeInUse { volume: String, containers: String },

    #[error("Docker command failed: {message}")]
    CommandFailed { message: String },

    #[error("Docker command timed out after {seconds}s: {message}")]
    Timeout { seconds: u64, message: String },
}

/// Compose tool errors
#[derive(Error, Debug)]
pub enum ComposeError {
    #[error("Docker Compose is not available")]
    NotInstalled,

    #[error("Compose file not found: {path}")]
    FileNotFound { path: String },

    #[error("No web service found in compose document")]
    NoWebService,

    #[error("Compose command failed: {message}")]
    CommandFailed { message: String },

    #[error("Compose command timed out after {seconds}s")]
    Timeout { seconds: u64 },
}

/// Environment file errors
#[derive(Error, Debug)]
pub enum EnvError {
    #[error("Environment file not found: {path}")]
    NotFound { path: String },

    #[error("No free host port in range {start}-{end} for {var}")]
    NoFreePort { var: String, start: u16, end: u16 },

    #[error("Failed to write environment file {path}: {message}")]
    WriteFailed { path: String, message: String },
}

/// Package export/import errors
#[derive(Error, Debug)]
pub enum PackageError {
    #[error("Package not found: {path}")]
    NotFound { path: String },

    #[error("Invalid package: {message}")]
    Invalid { message: String },

    #[error("Package entry missing: {entry}")]
    MissingEntry { entry: String },

    #[error("Checksum mismatch for package entry: {entry}")]
    ChecksumMismatch { entry: String },

    #[error("Import cancelled: {message}")]
    Cancelled { message: String },
}

/// Top-level error for the worktree environment engine
#[derive(Error, Debug)]
pub enum DockertreeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Git error: {0}")]
    Git(#[from] GitError),

    #[error("Docker error: {0}")]
    Docker(#[from] DockerError),

    #[error("Compose error: {0}")]
    Compose(#[from] ComposeError),

    #[error("Environment error: {0}")]
    Env(#[from] EnvError),

    #[error("Package error: {0}")]
    Package(#[from] PackageError),

    #[error("Invalid YAML: {message}")]
    Yaml { message: String },

    #[error("Invalid JSON: {message}")]
    Json { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{message}")]
    Other { message: String },
}

impl DockertreeError {
    /// Build an uncategorized error from a display value.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }

    /// Map the error to its classified kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(e) => match e {
                ConfigError::NotFound { .. } => ErrorKind::NotFound,
                ConfigError::Parse { .. } => ErrorKind::InvalidYaml,
                ConfigError::MissingKey { .. } => ErrorKind::ConfigMissingKey,
                ConfigError::NotSetUp { .. } => ErrorKind::NotSetUp,
            },
            Self::Git(e) => match e {
                GitError::NotARepo { .. } => ErrorKind::NotARepo,
                GitError::ProtectedBranch { .. } => ErrorKind::ProtectedBranch,
                GitError::InvalidBranchName { .. } => ErrorKind::InvalidBranchName,
                GitError::ReservedName { .. } => ErrorKind::ReservedName,
                GitError::WorktreeExists { .. } => ErrorKind::AlreadyExists,
                GitError::WorktreeNotFound { .. } => ErrorKind::NotFound,
                GitError::CorruptedWorktree { .. } => ErrorKind::CorruptedWorktree,
                GitError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
                GitError::CommandFailed { .. } => ErrorKind::ExecFailed,
            },
            Self::Docker(e) => match e {
                DockerError::NotInstalled => ErrorKind::RuntimeUnavailable,
                DockerError::DaemonDown => ErrorKind::RuntimeUnavailable,
                DockerError::NotFound { .. } => ErrorKind::NotFound,
                DockerError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
                DockerError::Conflict { .. } => ErrorKind::Conflict,
                DockerError::VolumeInUse { .. } => ErrorKind::VolumeInUse,
                DockerError::CommandFailed { .. } => ErrorKind::ExecFailed,
                DockerError::Timeout { .. } => ErrorKind::Timeout,
            },
            Self::Compose(e) => match e {
                ComposeError::NotInstalled => ErrorKind::ComposeUnavailable,
                ComposeError::FileNotFound { .. } => ErrorKind::NotFound,
                ComposeError::NoWebService => ErrorKind::NoWebService,
                ComposeError::CommandFailed { .. } => ErrorKind::ExecFailed,
                ComposeError::Timeout { .. } => ErrorKind::Timeout,
            },
            Self::Env(e) => match e {
                EnvError::NotFound { .. } => ErrorKind::NotFound,
                EnvError::NoFreePort { .. } => ErrorKind::NoFreePort,
                EnvError::WriteFailed { .. } => ErrorKind::Io,
            },
            Self::Package(e) => match e {
                PackageError::NotFound { .. } => ErrorKind::NotFound,
                PackageError::Invalid { .. } => ErrorKind::MissingEntry,
                PackageError::MissingEntry { .. } => ErrorKind::MissingEntry,
                PackageError::ChecksumMismatch { .. } => ErrorKind::ChecksumMismatch,
                PackageError::Cancelled { .. } => ErrorKind::Conflict,
            },
            Self::Yaml { .. } => ErrorKind::InvalidYaml,
            Self::Json { .. } => ErrorKind::InvalidJson,
            Self::Io(_) => ErrorKind::Io,
            Self::Other { .. } => ErrorKind::Other,
        }
    }
}

impl From<serde_yaml::Error> for DockertreeError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Yaml {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for DockertreeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json {
            message: err.to_string(),
        }
    }
}

/// Convenience type alias for Results with DockertreeError
pub type Result<T> = std::result::Result<T, DockertreeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_mapping() {
        let err = DockertreeError::Git(GitError::ProtectedBranch {
            branch: "main".to_string(),
        });
        assert_eq!(err.kind(), ErrorKind::ProtectedBranch);

        let err = DockertreeError::Docker(DockerError::DaemonDown);
        assert_eq!(err.kind(), ErrorKind::RuntimeUnavailable);

        let err = DockertreeError::Package(PackageError::ChecksumMismatch {
            entry: "metadata.json".to_string(),
        });
        assert_eq!(err.kind(), ErrorKind::ChecksumMismatch);
    }

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let kind = serde_json::to_string(&ErrorKind::ProtectedBranch).unwrap();
        assert_eq!(kind, "\"protected_branch\"");
        assert_eq!(ErrorKind::VolumeInUse.as_str(), "volume_in_use");
    }

    #[test]
    fn test_error_display() {
        let err = DockertreeError::Git(GitError::ReservedName {
            name: "volumes".to_string(),
        });
        assert!(err.to_string().contains("reserved"));
    }
}
