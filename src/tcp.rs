//! TCP bulk transfers.
//!
//! The client sends the requested size as a decimal line, the server answers
//! with exactly that many bytes and closes the connection.

use std::net::SocketAddr;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, warn};

use crate::error::{LanspeedError, Result};
use crate::params;
use crate::summary::{Protocol, TransferResult};

/// Fetch `size` bytes from the server's TCP port.
///
/// An early close or the `limit` passing ends the transfer as a short one;
/// connection errors are recorded in the result. A zero size completes at
/// once.
pub async fn run_transfer(id: usize, server: SocketAddr, size: u64, limit: Duration) -> TransferResult {
    let mut result = TransferResult::begin(id, Protocol::Tcp, size);
    if size == 0 {
        return result.finish();
    }

    let deadline = Instant::now() + limit;
    match timeout_at(deadline, fetch(server, size, &mut result.bytes_transferred)).await {
        Ok(Ok(())) => result.finish(),
        Ok(Err(e)) => {
            warn!(id, %server, "TCP transfer failed: {e}");
            result.fail(e)
        }
        Err(_) => {
            debug!(id, received = result.bytes_transferred, "TCP transfer hit its time limit");
            result.finish()
        }
    }
}

async fn fetch(server: SocketAddr, size: u64, received: &mut u64) -> Result<()> {
    let mut stream = TcpStream::connect(server).await?;
    stream.write_all(format!("{size}\n").as_bytes()).await?;

    let mut buf = vec![0u8; params::TCP_CHUNK_SIZE];
    while *received < size {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            debug!(%server, received = *received, size, "server closed early");
            break;
        }
        *received += n as u64;
    }
    Ok(())
}

/// Serve one accepted connection: read the size line, then stream the bytes.
///
/// Returns the number of bytes written. A missing or unparsable size line is
/// an error for this connection only.
pub async fn serve_connection(stream: TcpStream) -> Result<u64> {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    timeout(
        params::IO_TIMEOUT,
        (&mut reader).take(params::MAX_SIZE_LINE).read_line(&mut line),
    )
    .await??;

    let size: u64 = line
        .trim()
        .parse()
        .map_err(|_| LanspeedError::BadSizeLine(line.trim().to_string()))?;

    let mut stream = reader.into_inner();
    write_bytes(&mut stream, size).await?;
    stream.shutdown().await?;
    Ok(size)
}

async fn write_bytes(stream: &mut TcpStream, size: u64) -> Result<()> {
    let mut chunk = vec![0u8; params::TCP_CHUNK_SIZE];
    StdRng::from_os_rng().fill_bytes(&mut chunk);

    let mut sent: u64 = 0;
    while sent < size {
        let n = (size - sent).min(chunk.len() as u64) as usize;
        stream.write_all(&chunk[..n]).await?;
        sent += n as u64;
    }
    Ok(())
}
