//! SSH local port forward, run through the system `ssh` client.
//!
//! The forwarder is a child process (`ssh -N -L ...`). It lives until
//! [`stop`](TunnelOperator::stop) is called or the operator is dropped.
//!
//! A password is never placed on the command line. It is handed to `ssh`
//! through a short-lived askpass helper that reads it from the child's
//! environment.

use std::path::PathBuf;
use std::process::Stdio;

use secrecy::{ExposeSecret, SecretString};
use tempfile::TempPath;
use tokio::process::{Child, Command};
use tracing::{info, warn};

use crate::error::AppError;

/// Default SSH port.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Default port forwarded on both ends.
pub const DEFAULT_FORWARD_PORT: u16 = 5432;

const ASKPASS_PASSWORD_ENV: &str = "SFHARVEST_SSH_PASSWORD";

/// Where to connect and what to forward.
#[derive(Clone)]
pub struct TunnelConfig {
    pub server: String,
    pub port: u16,
    pub username: String,
    /// `None` relies on the user's SSH keys or agent.
    pub password: Option<SecretString>,
    /// Local address the forward listens on.
    pub local_bind: (String, u16),
    /// Address the SSH server connects to on our behalf.
    pub remote_bind: (String, u16),
}

impl std::fmt::Debug for TunnelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelConfig")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("local_bind", &self.local_bind)
            .field("remote_bind", &self.remote_bind)
            .finish()
    }
}

impl TunnelConfig {
    /// Forwards `localhost:5432` to `localhost:5432` on the far side of `server:22`.
    pub fn new(server: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            port: DEFAULT_SSH_PORT,
            username: username.into(),
            password: None,
            local_bind: ("localhost".to_string(), DEFAULT_FORWARD_PORT),
            remote_bind: ("localhost".to_string(), DEFAULT_FORWARD_PORT),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_password(mut self, password: SecretString) -> Self {
        self.password = Some(password);
        self
    }

    pub fn with_local_bind(mut self, host: impl Into<String>, port: u16) -> Self {
        self.local_bind = (host.into(), port);
        self
    }

    pub fn with_remote_bind(mut self, host: impl Into<String>, port: u16) -> Self {
        self.remote_bind = (host.into(), port);
        self
    }

    /// Arguments passed to `ssh`. Never contains the password.
    pub fn ssh_args(&self) -> Vec<String> {
        let mut args = vec![
            "-N".to_string(),
            "-o".to_string(),
            "ExitOnForwardFailure=yes".to_string(),
        ];
        if self.password.is_some() {
            args.extend([
                "-o".to_string(),
                "NumberOfPasswordPrompts=1".to_string(),
            ]);
        } else {
            args.extend(["-o".to_string(), "BatchMode=yes".to_string()]);
        }
        args.extend([
            "-p".to_string(),
            self.port.to_string(),
            "-L".to_string(),
            format!(
                "{}:{}:{}:{}",
                self.local_bind.0, self.local_bind.1, self.remote_bind.0, self.remote_bind.1
            ),
            format!("{}@{}", self.username, self.server),
        ]);
        args
    }
}

/// Owns one running forwarder at most.
#[derive(Debug)]
pub struct TunnelOperator {
    config: TunnelConfig,
    program: PathBuf,
    child: Option<Child>,
    askpass: Option<TempPath>,
}

impl TunnelOperator {
    pub fn new(config: TunnelConfig) -> Self {
        Self {
            config,
            program: PathBuf::from("ssh"),
            child: None,
            askpass: None,
        }
    }

    /// Uses another `ssh`-compatible executable.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn config(&self) -> &TunnelConfig {
        &self.config
    }

    /// Spawns the forwarder.
    ///
    /// # Errors
    ///
    /// - `AppError::Tunnel("already started")` if a forwarder is still running
    /// - `AppError::Tunnel` if the process cannot be spawned
    pub fn start(&mut self) -> Result<(), AppError> {
        if self.is_running() {
            return Err(AppError::Tunnel("already started".to_string()));
        }

        let mut command = Command::new(&self.program);
        command
            .args(self.config.ssh_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .kill_on_drop(true);

        let askpass = match &self.config.password {
            Some(password) => {
                let helper = write_askpass_helper()?;
                command
                    .env("SSH_ASKPASS", helper.to_path_buf())
                    .env("SSH_ASKPASS_REQUIRE", "force")
                    .env(ASKPASS_PASSWORD_ENV, password.expose_secret());
                Some(helper)
            }
            None => None,
        };

        let child = command
            .spawn()
            .map_err(|e| AppError::Tunnel(format!("Failed to start ssh: {}", e)))?;

        info!(
            "[TUNNEL] Forwarding {}:{} -> {}:{} via {}:{}",
            self.config.local_bind.0,
            self.config.local_bind.1,
            self.config.remote_bind.0,
            self.config.remote_bind.1,
            self.config.server,
            self.config.port
        );

        self.child = Some(child);
        self.askpass = askpass;
        Ok(())
    }

    /// Kills the forwarder and waits for it to exit. A no-op when not running.
    pub async fn stop(&mut self) -> Result<(), AppError> {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                warn!("[TUNNEL] Failed to stop forwarder: {}", e);
                return Err(AppError::Tunnel(format!("Failed to stop ssh: {}", e)));
            }
            info!("[TUNNEL] Forwarder to {} stopped", self.config.server);
        }
        self.askpass = None;
        Ok(())
    }

    /// Whether the forwarder process is alive. Reaps it if it has exited.
    pub fn is_running(&mut self) -> bool {
        let exited = match self.child.as_mut() {
            Some(child) => !matches!(child.try_wait(), Ok(None)),
            None => return false,
        };
        if exited {
            self.child = None;
            self.askpass = None;
        }
        !exited
    }
}

/// Writes an executable helper that prints the password from the environment.
#[cfg(unix)]
fn write_askpass_helper() -> Result<TempPath, AppError> {
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    let mut file = tempfile::Builder::new()
        .prefix("sfharvest-askpass-")
        .suffix(".sh")
        .tempfile()
        .map_err(|e| AppError::Tunnel(format!("Failed to create askpass helper: {}", e)))?;
    writeln!(file, "#!/bin/sh\nprintf '%s\\n' \"${}\"", ASKPASS_PASSWORD_ENV)
        .map_err(|e| AppError::Tunnel(format!("Failed to write askpass helper: {}", e)))?;

    let path = file.into_temp_path();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| AppError::Tunnel(format!("Failed to mark askpass helper executable: {}", e)))?;
    Ok(path)
}

#[cfg(not(unix))]
fn write_askpass_helper() -> Result<TempPath, AppError> {
    Err(AppError::Tunnel(
        "password authentication is only supported on unix".to_string(),
    ))
}
