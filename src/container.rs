//! Container bridge.
//!
//! Thin wrapper over the `docker` CLI. Every validation task gets a private
//! container with its own writable layer; the image itself is read-only
//! once built. Proxy URLs pointing at localhost are rewritten to the bridge
//! gateway so processes inside the container can reach them.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use uuid::Uuid;

use crate::config::ProxyConfig;
use crate::error::ContainerError;

/// Working directory of the checked-out tree inside every image.
pub const CONTAINER_WORKDIR: &str = "/testbed";
/// Where candidate patches are copied before application.
pub const CONTAINER_PATCH_PATH: &str = "/tmp/patch.diff";

/// Fixed small timeout for container starts.
const START_TIMEOUT: Duration = Duration::from_secs(60);

/// Output of one exec inside a container.
#[derive(Debug)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub output: String,
    pub timed_out: bool,
}

/// Verify the container bridge answers before any stage depends on it.
///
/// No retries: an unreachable daemon needs operator action, and retrying
/// just delays the diagnostic.
pub async fn precheck_bridge() -> Result<(), ContainerError> {
    let result = Command::new("docker")
        .args(["info", "--format", "{{.ServerVersion}}"])
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await;
    match result {
        Ok(out) if out.status.success() => Ok(()),
        Ok(out) => Err(ContainerError::BridgeUnreachable {
            endpoint: "docker daemon".to_string(),
            message: String::from_utf8_lossy(&out.stderr).trim().to_string(),
        }),
        Err(e) => Err(ContainerError::BridgeUnreachable {
            endpoint: "docker CLI".to_string(),
            message: e.to_string(),
        }),
    }
}

/// Verify a configured proxy endpoint resolves before forwarding it into
/// containers. Surfaced immediately with the endpoint in the diagnostic.
pub async fn precheck_proxy(proxy: &ProxyConfig) -> Result<(), ContainerError> {
    for url in [&proxy.http_proxy, &proxy.https_proxy].into_iter().flatten() {
        let reachable = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map(|c| c.get(url.clone()).send())
            .map_err(|e| ContainerError::ProxyUnreachable {
                endpoint: url.clone(),
                message: e.to_string(),
            })?;
        // Any HTTP answer (even an error status) proves the endpoint is up.
        if let Err(e) = reachable.await {
            if e.is_connect() || e.is_timeout() {
                return Err(ContainerError::ProxyUnreachable {
                    endpoint: url.clone(),
                    message: e.to_string(),
                });
            }
        }
    }
    Ok(())
}

/// Bridge gateway IP (e.g. 172.17.0.1), when the default network exists.
async fn bridge_gateway() -> Option<String> {
    let out = Command::new("docker")
        .args([
            "network",
            "inspect",
            "bridge",
            "--format",
            "{{(index .IPAM.Config 0).Gateway}}",
        ])
        .output()
        .await
        .ok()?;
    if !out.status.success() {
        return None;
    }
    let gateway = String::from_utf8_lossy(&out.stdout).trim().to_string();
    (!gateway.is_empty()).then_some(gateway)
}

/// Rewrite a localhost proxy URL so it resolves from inside a container.
fn rewrite_for_container(url: &str, gateway: &str) -> String {
    url.replace("127.0.0.1", gateway).replace("localhost", gateway)
}

/// Proxy environment forwarded into task containers.
pub async fn container_proxy_env(proxy: &ProxyConfig) -> Vec<(String, String)> {
    let gateway = bridge_gateway().await;
    let mut env = Vec::new();
    let mut push = |key: &str, value: &Option<String>| {
        if let Some(v) = value {
            let adapted = match &gateway {
                Some(g) => rewrite_for_container(v, g),
                None => v.clone(),
            };
            env.push((key.to_string(), adapted));
        }
    };
    push("HTTP_PROXY", &proxy.http_proxy);
    push("HTTPS_PROXY", &proxy.https_proxy);
    if let Some(no_proxy) = &proxy.no_proxy {
        env.push(("NO_PROXY".to_string(), no_proxy.clone()));
    }
    env
}

/// Check whether an image exists locally; pull it when it doesn't.
pub async fn ensure_image(image: &str) -> Result<(), ContainerError> {
    let inspect = Command::new("docker")
        .args(["image", "inspect", image])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;
    if inspect.success() {
        return Ok(());
    }
    let pull = Command::new("docker").args(["pull", image]).output().await?;
    if !pull.status.success() {
        return Err(ContainerError::PullFailed {
            image: image.to_string(),
            message: String::from_utf8_lossy(&pull.stderr).trim().to_string(),
        });
    }
    Ok(())
}

/// A running container, removed on [`Container::remove`].
pub struct Container {
    pub name: String,
    image: String,
}

impl Container {
    /// Start a private container from `image`, idling until exec'd into.
    pub async fn start(
        image: &str,
        mem_limit: &str,
        env: &[(String, String)],
    ) -> Result<Self, ContainerError> {
        let name = format!("swesmith.{}", Uuid::new_v4().simple());
        let mut cmd = Command::new("docker");
        cmd.args(["run", "-d", "--name", &name, "--memory", mem_limit]);
        for (key, value) in env {
            cmd.args(["-e", &format!("{key}={value}")]);
        }
        cmd.args([image, "tail", "-f", "/dev/null"]);
        cmd.stdout(Stdio::null()).stderr(Stdio::piped());

        let started = tokio::time::timeout(START_TIMEOUT, cmd.output())
            .await
            .map_err(|_| ContainerError::StartFailed {
                image: image.to_string(),
                message: format!("start timed out after {START_TIMEOUT:?}"),
            })??;
        if !started.status.success() {
            return Err(ContainerError::StartFailed {
                image: image.to_string(),
                message: String::from_utf8_lossy(&started.stderr).trim().to_string(),
            });
        }
        Ok(Self {
            name,
            image: image.to_string(),
        })
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    /// Run a command in the container's workdir with a wall-clock timeout.
    ///
    /// On timeout the exec is abandoned and `timed_out` is set; the caller
    /// is expected to remove the container, which also reaps the process.
    pub async fn exec(&self, shell_cmd: &str, timeout: Duration) -> Result<ExecOutput, ContainerError> {
        let mut cmd = Command::new("docker");
        cmd.args([
            "exec",
            "-w",
            CONTAINER_WORKDIR,
            &self.name,
            "/bin/bash",
            "-c",
            shell_cmd,
        ]);
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

        match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(Ok(out)) => {
                let mut output = String::from_utf8_lossy(&out.stdout).to_string();
                output.push_str(&String::from_utf8_lossy(&out.stderr));
                Ok(ExecOutput {
                    exit_code: out.status.code().unwrap_or(-1),
                    output,
                    timed_out: false,
                })
            }
            Ok(Err(e)) => Err(ContainerError::ExecFailed {
                name: self.name.clone(),
                message: e.to_string(),
            }),
            Err(_) => Ok(ExecOutput {
                exit_code: -1,
                output: String::new(),
                timed_out: true,
            }),
        }
    }

    /// Copy a host file into the container.
    pub async fn copy_in(&self, src: &Path, dest: &str) -> Result<(), ContainerError> {
        let out = Command::new("docker")
            .args([
                "cp",
                &src.to_string_lossy(),
                &format!("{}:{}", self.name, dest),
            ])
            .output()
            .await?;
        if !out.status.success() {
            return Err(ContainerError::CopyFailed {
                name: self.name.clone(),
                message: String::from_utf8_lossy(&out.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    /// Force-remove the container. Failures are logged, not propagated; a
    /// leaked container must not fail the task that already has results.
    pub async fn remove(self) {
        let result = Command::new("docker")
            .args(["rm", "-f", &self.name])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if let Err(e) = result {
            tracing::warn!(container = %self.name, error = %e, "failed to remove container");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn localhost_rewritten_to_gateway() {
        assert_eq!(
            rewrite_for_container("http://127.0.0.1:8080", "172.17.0.1"),
            "http://172.17.0.1:8080"
        );
        assert_eq!(
            rewrite_for_container("http://localhost:3128", "172.17.0.1"),
            "http://172.17.0.1:3128"
        );
        assert_eq!(
            rewrite_for_container("http://proxy.corp:3128", "172.17.0.1"),
            "http://proxy.corp:3128"
        );
    }
}
