//! Echo client that reconnects after the server drops it.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::Duration;

use tracing::debug;

const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_MAX_ATTEMPTS: u32 = 16;
const RECONNECT_BACKOFF: Duration = Duration::from_millis(1);

/// Client for one echo variant
#[derive(Debug)]
pub struct EchoClient {
    addr: SocketAddr,
    stream: Option<TcpStream>,
    read_timeout: Duration,
    max_attempts: u32,
    closures: u64,
    reconnects: u64,
}

impl EchoClient {
    pub fn connect(addr: SocketAddr) -> io::Result<Self> {
        let mut client = Self {
            addr,
            stream: None,
            read_timeout: DEFAULT_READ_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            closures: 0,
            reconnects: 0,
        };
        client.open()?;
        Ok(client)
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> io::Result<Self> {
        self.read_timeout = timeout;
        if let Some(stream) = &self.stream {
            stream.set_read_timeout(Some(timeout))?;
        }
        Ok(self)
    }

    /// Attempts per payload in [`EchoClient::echo_with_reconnect`]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Connections the server closed under us
    pub fn closures(&self) -> u64 {
        self.closures
    }

    pub fn reconnects(&self) -> u64 {
        self.reconnects
    }

    /// Send `payload` and read back exactly as many bytes.
    pub fn echo(&mut self, payload: &[u8]) -> io::Result<Vec<u8>> {
        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::NotConnected,
                    "echo client not connected",
                ))
            }
        };
        stream.write_all(payload)?;
        let mut echoed = vec![0u8; payload.len()];
        stream.read_exact(&mut echoed)?;
        Ok(echoed)
    }

    /// Like [`EchoClient::echo`], but a failed exchange drops the
    /// connection, reconnects and resends the whole payload. Bytes in flight
    /// when the server closed are lost, so callers should keep payloads
    /// self-contained.
    pub fn echo_with_reconnect(&mut self, payload: &[u8]) -> io::Result<Vec<u8>> {
        let mut last_err = None;
        for attempt in 0..self.max_attempts {
            if self.stream.is_none() {
                if attempt > 0 {
                    thread::sleep(RECONNECT_BACKOFF);
                }
                if let Err(e) = self.open() {
                    debug!(addr = %self.addr, error = %e, "reconnect failed");
                    last_err = Some(e);
                    continue;
                }
                self.reconnects += 1;
            }
            match self.echo(payload) {
                Ok(echoed) => return Ok(echoed),
                Err(e) => {
                    debug!(addr = %self.addr, error = %e, "exchange failed, dropping connection");
                    self.closures += 1;
                    self.stream = None;
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "no attempts made")))
    }

    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
    }

    fn open(&mut self) -> io::Result<()> {
        let stream = TcpStream::connect(self.addr)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(self.read_timeout))?;
        self.stream = Some(stream);
        Ok(())
    }
}
