// SPDX-License-Identifier: MIT OR Apache-2.0
//! The default [`DumpTool`] implementation: shells out to the conventional
//! vendor dump binaries (spec.md §1: "the core specifies when to invoke,
//! with what config, how to capture logs and errors ... it does not
//! prescribe command-line syntax"). The invocation shape below is this
//! deployment's default; it is not part of the core's contract, and a
//! production operator can substitute their own `DumpTool` entirely.

use async_trait::async_trait;
use bkd_source::DumpTool;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

/// Invokes `pg_dump`/`mysqldump`/`mongodump`/`redis-cli` as child processes,
/// capturing their combined stdout/stderr into the error path so a failure
/// carries a diagnosable tail (spec.md §7: `SourceExecutionFailure` carries
/// an `execution_log` attachment).
pub struct ProcessDumpTool {
    /// Binary name or path for `pg_dump` (default `"pg_dump"`).
    pub pg_dump_bin: String,
    /// Binary name or path for `mysqldump` (default `"mysqldump"`).
    pub mysqldump_bin: String,
    /// Binary name or path for `mongodump` (default `"mongodump"`).
    pub mongodump_bin: String,
    /// Binary name or path for `redis-cli` (default `"redis-cli"`).
    pub redis_cli_bin: String,
}

impl Default for ProcessDumpTool {
    fn default() -> Self {
        Self {
            pg_dump_bin: "pg_dump".to_string(),
            mysqldump_bin: "mysqldump".to_string(),
            mongodump_bin: "mongodump".to_string(),
            redis_cli_bin: "redis-cli".to_string(),
        }
    }
}

/// Runs `cmd`, writing its stdout to `output_path`, and maps a non-zero
/// exit (or spawn failure) to the captured stderr tail.
async fn run_capturing_stdout(mut cmd: Command, output_path: &Path) -> Result<u64, String> {
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    let output = cmd.output().await.map_err(|e| format!("failed to spawn dump process: {e}"))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!(
            "dump process exited with {}: {}",
            output.status.code().map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string()),
            stderr.trim()
        ));
    }
    tokio::fs::write(output_path, &output.stdout)
        .await
        .map_err(|e| format!("failed to write artifact to {}: {e}", output_path.display()))?;
    Ok(output.stdout.len() as u64)
}

#[async_trait]
impl DumpTool for ProcessDumpTool {
    async fn pg_dump(
        &self,
        host: &str,
        port: u16,
        database: &str,
        username: &str,
        password: &str,
        output_path: &Path,
    ) -> Result<u64, String> {
        let mut cmd = Command::new(&self.pg_dump_bin);
        cmd.args(["-h", host, "-p", &port.to_string(), "-U", username, "-Fc", database])
            .env("PGPASSWORD", password);
        run_capturing_stdout(cmd, output_path).await
    }

    async fn mysqldump(
        &self,
        host: &str,
        port: u16,
        database: &str,
        username: &str,
        password: &str,
        output_path: &Path,
    ) -> Result<u64, String> {
        let mut cmd = Command::new(&self.mysqldump_bin);
        cmd.args(["-h", host, "-P", &port.to_string(), "-u", username, database])
            .env("MYSQL_PWD", password);
        run_capturing_stdout(cmd, output_path).await
    }

    async fn mongodump(&self, connection_string: &str, output_path: &Path) -> Result<u64, String> {
        let mut cmd = Command::new(&self.mongodump_bin);
        cmd.args(["--uri", connection_string, "--archive"]);
        run_capturing_stdout(cmd, output_path).await
    }

    async fn redis_dump(
        &self,
        host: &str,
        port: u16,
        password: Option<&str>,
        database: u8,
        output_path: &Path,
    ) -> Result<u64, String> {
        let mut cmd = Command::new(&self.redis_cli_bin);
        cmd.args(["-h", host, "-p", &port.to_string(), "-n", &database.to_string()]);
        if let Some(password) = password {
            cmd.args(["-a", password]);
        }
        cmd.args(["--rdb", "/dev/stdout"]);
        run_capturing_stdout(cmd, output_path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_binary_surfaces_a_spawn_error() {
        let tool = ProcessDumpTool { pg_dump_bin: "definitely-not-a-real-binary".to_string(), ..Default::default() };
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("out.sql");
        let err = tool.pg_dump("h", 5432, "d", "u", "p", &out).await.unwrap_err();
        assert!(err.contains("failed to spawn"));
    }

    #[tokio::test]
    async fn captures_stdout_on_success() {
        // `cat` stands in for a dump tool that writes bytes to stdout; the
        // binary itself is swappable per the `DumpTool` contract.
        let tool = ProcessDumpTool { pg_dump_bin: "echo".to_string(), ..Default::default() };
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("out.sql");
        let size = tool.pg_dump("h", 5432, "d", "u", "p", &out).await.unwrap();
        assert!(size > 0);
        assert!(out.exists());
    }
}
