// Socket probe: TCP connect, close on success

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;

use crate::core::probes::ProbeOutcome;
use crate::core::types::FailureKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketProbe {
    pub host: String,
    pub port: u16,
}

pub async fn run(probe: &SocketProbe, timeout_ms: u64) -> ProbeOutcome {
    let start = Instant::now();
    let connect = TcpStream::connect((probe.host.as_str(), probe.port));

    match tokio::time::timeout(Duration::from_millis(timeout_ms), connect).await {
        Ok(Ok(stream)) => {
            let latency_ms = start.elapsed().as_millis() as u64;
            drop(stream);
            ProbeOutcome::success(latency_ms)
        }
        Ok(Err(e)) => {
            let latency_ms = start.elapsed().as_millis() as u64;
            // connect() resolves the hostname first; a lookup error arrives
            // as an I/O error rather than a distinct type.
            let kind = if e.to_string().contains("lookup") {
                FailureKind::NameResolution
            } else {
                FailureKind::Socket
            };
            ProbeOutcome::failure(
                kind,
                Some(latency_ms),
                format!("connect to {}:{} failed: {}", probe.host, probe.port, e),
            )
        }
        Err(_) => ProbeOutcome::failure(
            FailureKind::Timeout,
            Some(timeout_ms),
            format!("connect to {}:{} timed out", probe.host, probe.port),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connects_to_local_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let probe = SocketProbe {
            host: "127.0.0.1".to_string(),
            port,
        };
        let outcome = run(&probe, 2_000).await;
        assert!(outcome.ok);
        assert!(outcome.latency_ms.is_some());
    }

    #[tokio::test]
    async fn refused_connection_is_a_socket_failure() {
        // Bind then drop to get a port that is very likely closed.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let probe = SocketProbe {
            host: "127.0.0.1".to_string(),
            port,
        };
        let outcome = run(&probe, 2_000).await;
        assert!(!outcome.ok);
        assert_eq!(outcome.kind, Some(FailureKind::Socket));
        assert!(outcome.latency_ms.is_some());
    }
}
