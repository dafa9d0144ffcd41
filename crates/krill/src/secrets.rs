//! Secret resolution from environment variables, files, and commands.

use crate::error::{Error, ErrorKind, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

/// A reference to a secret held by an external source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretRef {
    /// `"env"`, `"file"`, or `"exec"`.
    pub source: String,
    #[serde(default)]
    pub provider: String,
    /// Key name, file path, or command, depending on `source`.
    pub id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecretsEnvConfig {
    /// When non-empty, only these environment variables may resolve.
    #[serde(default)]
    pub allowlist: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretsFileConfig {
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretsExecConfig {
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_bytes")]
    pub max_output_bytes: usize,
}

fn default_max_bytes() -> usize {
    65_536
}

fn default_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecretsConfig {
    #[serde(default)]
    pub env: Option<SecretsEnvConfig>,
    #[serde(default)]
    pub file: Option<SecretsFileConfig>,
    #[serde(default)]
    pub exec: Option<SecretsExecConfig>,
}

/// Resolves [`SecretRef`]s against the configured sources, enforcing the
/// allowlist, file-permission, size, and timeout policies.
pub struct SecretResolver {
    config: SecretsConfig,
}

impl SecretResolver {
    pub fn new(config: SecretsConfig) -> Self {
        SecretResolver { config }
    }

    pub async fn resolve(&self, secret: &SecretRef) -> Result<String> {
        match secret.source.as_str() {
            "env" => self.resolve_env(&secret.id),
            "file" => self.resolve_file(&secret.id).await,
            "exec" => {
                let args = self
                    .config
                    .exec
                    .as_ref()
                    .map(|e| e.args.clone())
                    .unwrap_or_default();
                self.resolve_exec(&secret.id, &args).await
            }
            other => Err(Error::with_detail(
                ErrorKind::InvalidArgument,
                "Unknown secret source",
                other.to_string(),
            )),
        }
    }

    pub fn resolve_env(&self, key: &str) -> Result<String> {
        if key.is_empty() {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                "Empty environment variable name",
            ));
        }

        if let Some(env) = &self.config.env {
            if !env.allowlist.is_empty() && !env.allowlist.iter().any(|k| k == key) {
                return Err(Error::with_detail(
                    ErrorKind::Forbidden,
                    "Environment variable not in allowlist",
                    key.to_string(),
                ));
            }
        }

        std::env::var(key).map_err(|_| {
            Error::with_detail(ErrorKind::NotFound, "Environment variable not set", key.to_string())
        })
    }

    /// Reads a secret file, refusing files not owned by the current user
    /// (or root) and files with group/other write or execute bits set.
    pub async fn resolve_file(&self, path: &str) -> Result<String> {
        if path.is_empty() {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                "Empty file path for secret resolution",
            ));
        }

        let meta = tokio::fs::metadata(path).await.map_err(|e| {
            Error::with_detail(ErrorKind::Io, "Cannot stat secret file", format!("{path}: {e}"))
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            let uid = unsafe { libc::getuid() };
            if meta.uid() != uid && meta.uid() != 0 {
                return Err(Error::with_detail(
                    ErrorKind::Forbidden,
                    "Secret file not owned by current user or root",
                    path.to_string(),
                ));
            }
            let perm = meta.mode() & 0o777;
            if perm & 0o133 != 0 {
                log::warn!("Secret file {path} has overly permissive permissions: {perm:o}");
                return Err(Error::with_detail(
                    ErrorKind::Forbidden,
                    "Secret file permissions too permissive (must be <= 0644)",
                    format!("{path} has {perm:o}"),
                ));
            }
        }

        let max_bytes = self
            .config
            .file
            .as_ref()
            .map(|f| f.max_bytes)
            .unwrap_or_else(default_max_bytes);

        let mut file = tokio::fs::File::open(Path::new(path)).await.map_err(|e| {
            Error::with_detail(ErrorKind::Io, "Cannot open secret file", format!("{path}: {e}"))
        })?;

        let mut content = Vec::with_capacity(max_bytes.min(4096));
        let mut handle = (&mut file).take(max_bytes as u64);
        handle.read_to_end(&mut content).await.map_err(|e| {
            Error::with_detail(ErrorKind::Io, "Cannot read secret file", format!("{path}: {e}"))
        })?;

        let mut text = String::from_utf8_lossy(&content).into_owned();
        while text.ends_with('\n') || text.ends_with('\r') {
            text.pop();
        }
        Ok(text)
    }

    /// Resolves a secret by running a command, with output-size and
    /// wall-clock caps. A non-zero exit status is an error.
    pub async fn resolve_exec(&self, cmd: &str, args: &[String]) -> Result<String> {
        if cmd.is_empty() {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                "Empty command for exec secret resolution",
            ));
        }

        let (timeout_ms, max_output) = self
            .config
            .exec
            .as_ref()
            .map(|e| (e.timeout_ms, e.max_output_bytes))
            .unwrap_or((default_timeout_ms(), default_max_bytes()));

        let output = tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            Command::new(cmd).args(args).output(),
        )
        .await
        .map_err(|_| {
            Error::with_detail(
                ErrorKind::Timeout,
                "Secret command timed out",
                format!("{cmd} ({timeout_ms} ms)"),
            )
        })?
        .map_err(|e| {
            Error::with_detail(ErrorKind::Io, "Failed to execute secret command", format!("{cmd}: {e}"))
        })?;

        if !output.status.success() {
            return Err(Error::with_detail(
                ErrorKind::Io,
                "Secret command exited with non-zero status",
                format!("{} (status {})", cmd, output.status),
            ));
        }

        let truncated = &output.stdout[..output.stdout.len().min(max_output)];
        let mut text = String::from_utf8_lossy(truncated).into_owned();
        while text.ends_with('\n') || text.ends_with('\r') {
            text.pop();
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver(config: SecretsConfig) -> SecretResolver {
        SecretResolver::new(config)
    }

    #[test]
    fn env_allowlist_is_enforced() {
        unsafe { std::env::set_var("KRILL_TEST_SECRET", "s3cr3t") };
        let r = resolver(SecretsConfig {
            env: Some(SecretsEnvConfig { allowlist: vec!["OTHER".into()] }),
            ..Default::default()
        });
        let err = r.resolve_env("KRILL_TEST_SECRET").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        let r = resolver(SecretsConfig {
            env: Some(SecretsEnvConfig { allowlist: vec!["KRILL_TEST_SECRET".into()] }),
            ..Default::default()
        });
        assert_eq!(r.resolve_env("KRILL_TEST_SECRET").unwrap(), "s3cr3t");
    }

    #[tokio::test]
    async fn file_trims_trailing_newline() {
        use std::io::Write;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "abc123").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).unwrap();
        }
        let r = resolver(SecretsConfig::default());
        let value = r.resolve_file(path.to_str().unwrap()).await.unwrap();
        assert_eq!(value, "abc123");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn world_writable_file_is_rejected() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loose");
        std::fs::write(&path, "nope").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o666)).unwrap();
        let r = resolver(SecretsConfig::default());
        let err = r.resolve_file(path.to_str().unwrap()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exec_captures_stdout() {
        let r = resolver(SecretsConfig::default());
        let value = r.resolve_exec("echo", &["hunter2".into()]).await.unwrap();
        assert_eq!(value, "hunter2");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exec_nonzero_exit_is_error() {
        let r = resolver(SecretsConfig::default());
        let err = r.resolve_exec("false", &[]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }
}
