// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! clamd client speaking the INSTREAM protocol over TCP

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use super::{LocalScanResult, LocalScanner};
use crate::{Result, WardenError};

const CHUNK_SIZE: usize = 64 * 1024;

/// clamd daemon client
#[derive(Debug, Clone)]
pub struct ClamdClient {
    address: String,
    timeout: Duration,
}

impl ClamdClient {
    pub fn new(host: &str, port: u16, timeout_secs: u64) -> Self {
        Self {
            address: format!("{}:{}", host, port),
            timeout: Duration::from_secs(timeout_secs.max(1)),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn connect(&self) -> Result<TcpStream> {
        match tokio::time::timeout(self.timeout, TcpStream::connect(&self.address)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(WardenError::ThreatAssessorUnavailable(format!(
                "Cannot connect to clamd at {}: {}",
                self.address, e
            ))),
            Err(_) => Err(WardenError::ThreatAssessorUnavailable(format!(
                "Timed out connecting to clamd at {}",
                self.address
            ))),
        }
    }

    /// Check that the daemon answers
    pub async fn ping(&self) -> Result<()> {
        let mut stream = self.connect().await?;
        stream.write_all(b"zPING\0").await.map_err(unavailable)?;
        let reply = read_reply(&mut stream, self.timeout).await?;
        if reply == "PONG" {
            Ok(())
        } else {
            Err(WardenError::ThreatAssessorUnavailable(format!(
                "Unexpected clamd ping reply: {}",
                reply
            )))
        }
    }

    /// The whole exchange shares one deadline, so a daemon that stops
    /// reading mid-stream cannot stall the scan
    async fn instream(&self, path: &Path) -> Result<String> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| WardenError::file_access(path, e))?;

        match tokio::time::timeout(self.timeout, self.stream_file(file, path)).await {
            Ok(result) => result,
            Err(_) => Err(WardenError::ThreatAssessorUnavailable(format!(
                "clamd at {} did not finish scanning {} within {:?}",
                self.address,
                path.display(),
                self.timeout
            ))),
        }
    }

    async fn stream_file(&self, mut file: tokio::fs::File, path: &Path) -> Result<String> {
        let mut stream = self.connect().await?;
        stream.write_all(b"zINSTREAM\0").await.map_err(unavailable)?;

        let mut buffer = vec![0u8; CHUNK_SIZE];
        loop {
            let read = file
                .read(&mut buffer)
                .await
                .map_err(|e| WardenError::file_access(path, e))?;
            if read == 0 {
                break;
            }
            stream
                .write_all(&(read as u32).to_be_bytes())
                .await
                .map_err(unavailable)?;
            stream.write_all(&buffer[..read]).await.map_err(unavailable)?;
        }
        stream.write_all(&0u32.to_be_bytes()).await.map_err(unavailable)?;
        stream.flush().await.map_err(unavailable)?;

        read_reply(&mut stream, self.timeout).await
    }
}

fn unavailable(e: std::io::Error) -> WardenError {
    WardenError::ThreatAssessorUnavailable(format!("clamd connection failed: {}", e))
}

async fn read_reply(stream: &mut TcpStream, timeout: Duration) -> Result<String> {
    let mut reply = Vec::new();
    match tokio::time::timeout(timeout, stream.read_to_end(&mut reply)).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => return Err(unavailable(e)),
        Err(_) => {
            return Err(WardenError::ThreatAssessorUnavailable(
                "Timed out waiting for clamd reply".to_string(),
            ))
        }
    }
    Ok(String::from_utf8_lossy(&reply)
        .trim_end_matches(['\0', '\n', '\r'])
        .to_string())
}

/// Interpret an INSTREAM reply such as `stream: Eicar-Test-Signature FOUND`
pub fn parse_reply(reply: &str) -> Result<LocalScanResult> {
    let body = reply.strip_prefix("stream:").unwrap_or(reply).trim();
    if body == "OK" {
        return Ok(LocalScanResult::Clean);
    }
    if let Some(name) = body.strip_suffix("FOUND") {
        return Ok(LocalScanResult::Infected(name.trim().to_string()));
    }
    Err(WardenError::ThreatAssessorUnavailable(format!(
        "clamd returned: {}",
        reply
    )))
}

#[async_trait]
impl LocalScanner for ClamdClient {
    fn name(&self) -> &'static str {
        "clamav"
    }

    async fn scan_file(&self, path: &Path) -> Result<LocalScanResult> {
        let reply = self.instream(path).await?;
        debug!("clamd reply for {:?}: {}", path, reply);
        parse_reply(&reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_reply() {
        assert_eq!(parse_reply("stream: OK").unwrap(), LocalScanResult::Clean);
        assert_eq!(
            parse_reply("stream: Eicar-Test-Signature FOUND").unwrap(),
            LocalScanResult::Infected("Eicar-Test-Signature".into())
        );
        assert!(matches!(
            parse_reply("INSTREAM size limit exceeded. ERROR"),
            Err(WardenError::ThreatAssessorUnavailable(_))
        ));
    }

    /// Minimal clamd stand-in: reads the framed stream and flags any
    /// payload containing `EVIL`.
    async fn fake_clamd() -> (u16, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut command = [0u8; 10];
            socket.read_exact(&mut command).await.unwrap();
            assert_eq!(&command, b"zINSTREAM\0");

            let mut payload = Vec::new();
            loop {
                let mut len = [0u8; 4];
                socket.read_exact(&mut len).await.unwrap();
                let len = u32::from_be_bytes(len) as usize;
                if len == 0 {
                    break;
                }
                let mut chunk = vec![0u8; len];
                socket.read_exact(&mut chunk).await.unwrap();
                payload.extend_from_slice(&chunk);
            }

            let found = payload.windows(4).any(|w| w == b"EVIL");
            let reply: &[u8] = if found {
                b"stream: Fake.Evil FOUND\0"
            } else {
                b"stream: OK\0"
            };
            socket.write_all(reply).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        (port, handle)
    }

    #[tokio::test]
    async fn test_instream_against_fake_daemon() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        let mut body = vec![b'a'; CHUNK_SIZE + 10];
        body.extend_from_slice(b"EVIL");
        std::fs::write(&path, &body).unwrap();

        let (port, server) = fake_clamd().await;
        let client = ClamdClient::new("127.0.0.1", port, 5);
        let result = client.scan_file(&path).await.unwrap();
        server.await.unwrap();

        assert_eq!(result, LocalScanResult::Infected("Fake.Evil".into()));
    }

    #[tokio::test]
    async fn test_stalled_daemon_times_out_mid_stream() {
        // Accepts, then never reads, so the socket buffers fill up
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("large.bin");
        std::fs::write(&path, vec![0x5au8; 64 * 1024 * 1024]).unwrap();

        let started = std::time::Instant::now();
        let err = ClamdClient::new("127.0.0.1", port, 1)
            .scan_file(&path)
            .await
            .unwrap_err();
        server.abort();

        assert!(matches!(err, WardenError::ThreatAssessorUnavailable(_)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_unreachable_daemon_is_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"hello").unwrap();

        let err = ClamdClient::new("127.0.0.1", port, 2)
            .scan_file(&path)
            .await
            .unwrap_err();
        assert!(matches!(err, WardenError::ThreatAssessorUnavailable(_)));
    }
}
