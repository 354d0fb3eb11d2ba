use super::capabilities::PeerCapabilities;
use super::error::PeerError;
use super::message::{Handshake, Message};
use crate::bandwidth::{acquire, RateLimit};
use crate::constants::{HANDSHAKE_LEN, MAX_MESSAGE_SIZE, PEER_READ_TIMEOUT, PEER_WRITE_TIMEOUT};
use bytes::BytesMut;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

/// Length-prefixed message framing over any byte stream.
///
/// Outgoing messages are checked against the negotiated capabilities and
/// both directions pass through the optional rate limiters before bytes
/// move.
pub struct PeerTransport<S> {
    stream: S,
    read_buf: BytesMut,
    /// The frame at the head of `read_buf` already passed the download limiter.
    frame_admitted: bool,
    capabilities: PeerCapabilities,
    download: Option<Arc<dyn RateLimit>>,
    upload: Option<Arc<dyn RateLimit>>,
}

impl<S> PeerTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            read_buf: BytesMut::with_capacity(32 * 1024),
            frame_admitted: false,
            capabilities: PeerCapabilities::default(),
            download: None,
            upload: None,
        }
    }

    pub fn with_limiters(
        mut self,
        download: Arc<dyn RateLimit>,
        upload: Arc<dyn RateLimit>,
    ) -> Self {
        self.download = Some(download);
        self.upload = Some(upload);
        self
    }

    pub fn capabilities(&self) -> PeerCapabilities {
        self.capabilities
    }

    pub async fn send_handshake(&mut self, handshake: &Handshake) -> Result<(), PeerError> {
        let data = handshake.encode();
        timeout(PEER_WRITE_TIMEOUT, self.stream.write_all(&data))
            .await
            .map_err(|_| PeerError::Timeout)??;
        Ok(())
    }

    /// Reads the remote handshake and records the features both sides support.
    pub async fn receive_handshake(&mut self, ours: &Handshake) -> Result<Handshake, PeerError> {
        self.fill(HANDSHAKE_LEN).await?;
        let data = self.read_buf.split_to(HANDSHAKE_LEN);
        let theirs = Handshake::decode(&data)?;

        if theirs.info_hash != ours.info_hash {
            return Err(PeerError::InfoHashMismatch);
        }

        self.capabilities = ours.capabilities().negotiate(theirs.capabilities());
        Ok(theirs)
    }

    pub async fn send_message(&mut self, message: &Message) -> Result<(), PeerError> {
        let data = message.encode_for(&self.capabilities)?;
        if let Some(ref upload) = self.upload {
            acquire(upload.as_ref(), data.len() as u64).await;
        }
        timeout(PEER_WRITE_TIMEOUT, self.stream.write_all(&data))
            .await
            .map_err(|_| PeerError::Timeout)??;
        Ok(())
    }

    /// Reads the next message.
    ///
    /// Cancel safe: bytes already read stay buffered and a frame is charged
    /// to the download limiter once, so the call can sit in a `select!`.
    pub async fn receive_message(&mut self) -> Result<Message, PeerError> {
        self.fill(4).await?;

        let length = u32::from_be_bytes([
            self.read_buf[0],
            self.read_buf[1],
            self.read_buf[2],
            self.read_buf[3],
        ]) as usize;

        if length > MAX_MESSAGE_SIZE {
            return Err(PeerError::InvalidMessage(format!(
                "message too large: {}",
                length
            )));
        }

        let total_len = 4 + length;
        if !self.frame_admitted {
            if let Some(ref download) = self.download {
                acquire(download.as_ref(), total_len as u64).await;
            }
            self.frame_admitted = true;
        }
        self.fill(total_len).await?;

        self.frame_admitted = false;
        let data = self.read_buf.split_to(total_len);
        Message::decode(data.freeze())
    }

    async fn fill(&mut self, len: usize) -> Result<(), PeerError> {
        while self.read_buf.len() < len {
            let n = timeout(PEER_READ_TIMEOUT, self.stream.read_buf(&mut self.read_buf))
                .await
                .map_err(|_| PeerError::Timeout)??;

            if n == 0 {
                return Err(PeerError::ConnectionClosed);
            }
        }
        Ok(())
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}
