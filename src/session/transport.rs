use std::{
    io,
    time::Duration,
    };
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncReadExt, AsyncWriteExt},
    time::{Instant, timeout, timeout_at},
    };
use log::*;

use crate::{
    Error,
    command::{self, ENVELOPE, SYNC_REQUEST, SYNC_ACK},
    };
use super::Config;


/**
    ordered byte stream to the device

    implemented for serial ports, for any tokio stream wrapped in [Stream], and for the [super::Simulator]
*/
#[allow(async_fn_in_trait)]
pub trait Link {
    /// write all bytes
    async fn send(&mut self, data: &[u8]) -> io::Result<()>;
    /// read until the buffer is full or the timeout expires, returning the number of bytes read
    async fn receive(&mut self, buffer: &mut [u8], timeout: Duration) -> io::Result<usize>;
    /// drop any received byte not read yet
    async fn discard(&mut self) -> io::Result<()>;
}

/// link over any tokio byte stream, such as a pipe or a socket
pub struct Stream<S>(pub S);

impl<S: AsyncRead + AsyncWrite + Unpin> Link for Stream<S> {
    async fn send(&mut self, data: &[u8]) -> io::Result<()> {
        self.0.write_all(data).await?;
        self.0.flush().await
    }
    async fn receive(&mut self, buffer: &mut [u8], timeout: Duration) -> io::Result<usize> {
        let deadline = Instant::now() + timeout;
        let mut filled = 0;
        while filled < buffer.len() {
            match timeout_at(deadline, self.0.read(&mut buffer[filled ..])).await {
                Ok(Ok(0)) | Err(_) => break,
                Ok(Ok(received)) => filled += received,
                Ok(Err(error)) => return Err(error),
            }
        }
        Ok(filled)
    }
    async fn discard(&mut self) -> io::Result<()> {
        let mut sink = [0; 64];
        // only take what is already there
        while let Ok(received) = timeout(Duration::ZERO, self.0.read(&mut sink)).await {
            match received? {
                0 => break,
                size => debug!("discarded {} bytes", size),
            }
        }
        Ok(())
    }
}

#[cfg(feature = "serial")]
impl Link for serial2_tokio::SerialPort {
    async fn send(&mut self, data: &[u8]) -> io::Result<()> {
        serial2_tokio::SerialPort::write_all(self, data).await
    }
    async fn receive(&mut self, buffer: &mut [u8], timeout: Duration) -> io::Result<usize> {
        let deadline = Instant::now() + timeout;
        let mut filled = 0;
        while filled < buffer.len() {
            match timeout_at(deadline, serial2_tokio::SerialPort::read(self, &mut buffer[filled ..])).await {
                Ok(Ok(0)) | Err(_) => break,
                Ok(Ok(received)) => filled += received,
                Ok(Err(error)) => return Err(error),
            }
        }
        Ok(filled)
    }
    async fn discard(&mut self) -> io::Result<()> {
        self.discard_input_buffer()
    }
}


/**
    framing of requests and responses on a [Link]

    The device can only buffer a limited amount of bytes before it needs to get back in step, so the bytes sent since the last synchronization point are counted. A synchronization point is a successful response or a resynchronization attempt.
*/
pub struct Transport<L> {
    link: L,
    timeout: Duration,
    budget: usize,
    /// bytes sent since last synchronization point
    sent: usize,
}
impl<L: Link> Transport<L> {
    pub fn new(link: L, config: &Config) -> Self {
        Self {
            link,
            timeout: config.timeout,
            budget: config.budget,
            sent: 0,
        }
    }
    pub fn link(&self) -> &L  {&self.link}
    pub fn link_mut(&mut self) -> &mut L  {&mut self.link}
    pub fn into_link(self) -> L  {self.link}
    /// bytes sent since last synchronization point
    pub fn sent(&self) -> usize  {self.sent}

    /// envelope and send a request, resynchronizing first if it would exceed the budget
    pub async fn send(&mut self, content: &[u8]) -> Result<(), Error> {
        let frame = command::envelope(content)?;
        if frame.len() >= self.budget
            {return Err(Error::Oversized(frame.len()))}
        if self.sent + frame.len() >= self.budget {
            match self.resync().await {
                // alignment is still suspect, but sending remains the best option
                Err(Error::Sync) => {},
                result => result?,
            }
        }
        debug!("send {:02x?}", frame);
        self.sent += frame.len();
        self.link.send(&frame).await?;
        Ok(())
    }

    /// receive a response of exactly `size` content bytes
    pub async fn receive(&mut self, size: usize) -> Result<Vec<u8>, Error> {
        let mut frame = vec![0; size + ENVELOPE];
        let received = self.link.receive(&mut frame, self.timeout).await?;
        frame.truncate(received);
        debug!("receive {:02x?}", frame);
        match command::open_envelope(&frame, size) {
            Ok(content) => {
                self.sent = 0;
                Ok(content.to_vec())
            },
            Err(error) => {
                warn!("{}", error);
                // a frame of unexpected size leaves garbage behind
                if let Error::Framing {..} = error {
                    self.clear().await?;
                }
                Err(error)
            },
        }
    }

    /// send the synchronization marker and wait for its acknowledgement
    pub async fn resync(&mut self) -> Result<(), Error> {
        info!("resynchronizing after {} bytes", self.sent);
        self.sent = 0;
        self.link.send(&SYNC_REQUEST).await?;
        let mut ack = [0; SYNC_ACK.len()];
        let received = self.link.receive(&mut ack, self.timeout).await?;
        if received != ack.len() || ack != SYNC_ACK {
            warn!("resynchronization failed, received {:02x?}", &ack[.. received]);
            return Err(Error::Sync);
        }
        Ok(())
    }

    /// drop received bytes not read yet
    pub async fn clear(&mut self) -> Result<(), Error> {
        self.link.discard().await?;
        Ok(())
    }
}
