//! Drive a connection over a byte stream.
//!
//! Frames are length-prefixed (`u32` big-endian) on the stream. [`listen`]
//! and [`dial`] open turmoil's simulated TCP, so two peers can run as
//! separate hosts. [`StreamPeer`] waits on the stream and the connection's
//! next deadline together, so a silent peer still times out.

use std::io;

use teamlink_core::{Connection, ConnectionAction, ConnectionError, ConnectionEvent, Environment, Team};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};
use turmoil::net::{TcpListener, TcpStream};

/// Largest frame accepted from the stream.
pub const MAX_FRAME_SIZE: usize = 1 << 20;

/// Failures while driving a connection over a stream.
#[derive(Debug, Error)]
pub enum NetError {
    /// Stream I/O failed
    #[error(transparent)]
    Io(#[from] io::Error),

    /// The connection rejected a call
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// The stream ended before the awaited event
    #[error("stream closed")]
    Closed,

    /// The connection ended before the awaited event
    #[error("connection ended before the awaited event")]
    Disconnected,

    /// Length prefix over [`MAX_FRAME_SIZE`]
    #[error("frame of {0} bytes exceeds limit")]
    FrameTooLarge(usize),
}

/// Accept one simulated TCP peer on `addr` (e.g. `"0.0.0.0:443"`).
pub async fn listen(addr: &str) -> Result<TcpStream, NetError> {
    let listener = TcpListener::bind(addr).await?;
    let (stream, remote) = listener.accept().await?;
    debug!(%remote, "accepted peer");
    Ok(stream)
}

/// Connect to a simulated host (e.g. `"server:443"`).
pub async fn dial(addr: &str) -> Result<TcpStream, NetError> {
    Ok(TcpStream::connect(addr).await?)
}

/// Write one length-prefixed frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, bytes: &[u8]) -> Result<(), NetError> {
    if bytes.len() > MAX_FRAME_SIZE {
        return Err(NetError::FrameTooLarge(bytes.len()));
    }
    writer.write_all(&(bytes.len() as u32).to_be_bytes()).await?;
    writer.write_all(bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame; `None` on a clean end of stream.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>, NetError> {
    let mut len = [0u8; 4];
    match reader.read_exact(&mut len).await {
        Ok(_) => {},
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(NetError::FrameTooLarge(len));
    }
    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes).await?;
    Ok(Some(bytes))
}

/// Bytes read per call while waiting for a frame.
const READ_CHUNK: usize = 4096;

/// A connection bound to a stream.
pub struct StreamPeer<S, E: Environment, T: Team> {
    stream: S,
    connection: Connection<E, T>,
    events: Vec<ConnectionEvent<T>>,
    // Bytes read but not yet framed. `read` is cancel-safe, `read_exact` is not.
    inbox: Vec<u8>,
}

impl<S, E, T> StreamPeer<S, E, T>
where
    S: AsyncRead + AsyncWrite + Unpin,
    E: Environment,
    T: Team,
{
    /// Bind `connection` to `stream`.
    pub fn new(stream: S, connection: Connection<E, T>) -> Self {
        Self { stream, connection, events: Vec::new(), inbox: Vec::new() }
    }

    /// Start the connection and flush its first frames.
    pub async fn start(&mut self) -> Result<(), NetError> {
        let actions = self.connection.start(&[]);
        self.apply(actions).await
    }

    /// Encrypt and send an application payload.
    pub async fn send(&mut self, payload: &[u8]) -> Result<(), NetError> {
        let actions = self.connection.send(payload)?;
        self.apply(actions).await
    }

    /// Stop the connection and flush the `DISCONNECT`.
    pub async fn stop(&mut self) -> Result<(), NetError> {
        let actions = self.connection.stop();
        self.apply(actions).await
    }

    /// Read frames and fire deadlines until an emitted event satisfies
    /// `done`.
    pub async fn run_until(&mut self, done: impl Fn(&ConnectionEvent<T>) -> bool) -> Result<(), NetError> {
        let mut seen = self.events.len();
        loop {
            if self.events[seen..].iter().any(&done) {
                return Ok(());
            }
            seen = self.events.len();

            if let Some(bytes) = self.take_frame()? {
                let actions = self.connection.deliver(&bytes)?;
                self.apply(actions).await?;
                continue;
            }
            if self.connection.state().is_terminal() {
                return Err(NetError::Disconnected);
            }

            let wait = self
                .connection
                .next_deadline()
                .map(|at| at.saturating_duration_since(self.connection.env().now()));
            let mut chunk = [0u8; READ_CHUNK];
            let read = match wait {
                Some(wait) if wait.is_zero() => None,
                Some(wait) => tokio::select! {
                    read = self.stream.read(&mut chunk) => Some(read?),
                    () = self.connection.env().sleep(wait) => None,
                },
                None => Some(self.stream.read(&mut chunk).await?),
            };

            match read {
                Some(0) => return Err(NetError::Closed),
                Some(n) => self.inbox.extend_from_slice(&chunk[..n]),
                None => {
                    trace!("deadline reached");
                    let actions = self.connection.tick();
                    self.apply(actions).await?;
                },
            }
        }
    }

    /// The driven connection.
    pub fn connection(&self) -> &Connection<E, T> {
        &self.connection
    }

    /// Every event emitted so far.
    pub fn events(&self) -> &[ConnectionEvent<T>] {
        &self.events
    }

    fn take_frame(&mut self) -> Result<Option<Vec<u8>>, NetError> {
        let Some(prefix) = self.inbox.first_chunk::<4>() else {
            return Ok(None);
        };
        let len = u32::from_be_bytes(*prefix) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(NetError::FrameTooLarge(len));
        }
        if self.inbox.len() < 4 + len {
            return Ok(None);
        }
        let frame = self.inbox[4..4 + len].to_vec();
        self.inbox.drain(..4 + len);
        Ok(Some(frame))
    }

    async fn apply(&mut self, actions: Vec<ConnectionAction<T>>) -> Result<(), NetError> {
        for action in actions {
            match action {
                ConnectionAction::Transmit(bytes) => {
                    trace!(bytes = bytes.len(), "writing frame");
                    write_frame(&mut self.stream, &bytes).await?;
                },
                ConnectionAction::Emit(event) => self.events.push(event),
            }
        }
        Ok(())
    }
}
