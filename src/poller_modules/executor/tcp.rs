use std::net::SocketAddr;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use super::{CheckConfig, CheckExecutor, ExecutionError, elapsed_ms};
use crate::models::CheckResult;

pub async fn check_port(executor: &CheckExecutor, config: &CheckConfig<'_>) -> Result<CheckResult, ExecutionError> {
    let hostname = config
        .str("hostname")
        .ok_or_else(|| ExecutionError::Config("Hostname is required".to_string()))?;
    let port = config
        .port()
        .ok_or_else(|| ExecutionError::Config("Port is required".to_string()))?;
    let timeout = config.timeout();

    let ip = executor.resolve_host(hostname, config).await?;
    let target = SocketAddr::new(ip, port);

    let start = Instant::now();
    let mut stream = match tokio::time::timeout(timeout, TcpStream::connect(target)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return Err(ExecutionError::Transport(format!("{target}: {e}"))),
        Err(_) => return Err(ExecutionError::Timeout("TCP timeout".to_string())),
    };
    let latency_ms = elapsed_ms(start);

    // Best-effort close; a failed shutdown does not change the verdict.
    let _ = stream.shutdown().await;
    Ok(CheckResult::up("", Some(latency_ms)))
}
