//! Noise_XK sessions over TCP.
//!
//! Every encrypted datagram travels as `[u16 BE length][ciphertext]`; the
//! Noise layer preserves message boundaries for the framing above it. The
//! handshake prologue binds both sides to the same protocol version and
//! network genesis.

use crate::crypto::Keypair;
use crate::net::types::{NetworkId, PROTOCOL_VERSION};
use snow::params::NoiseParams;
use snow::{Builder, TransportState};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

pub const NOISE_PROTOCOL_NAME: &str = "Noise_XK_25519_ChaChaPoly_BLAKE2b";

/// Hard Noise limit per encrypted message.
pub const MAX_NOISE_MESSAGE_SIZE: usize = 65_535;

/// Handshake messages are tiny; anything bigger is not a handshake.
const MAX_HANDSHAKE_MSG_SIZE: usize = 1024;

const CHACHA_TAG_SIZE: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum NoiseError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("noise error: {0}")]
    Snow(#[from] snow::Error),

    #[error("frame of {0} bytes exceeds noise limit")]
    FrameTooLarge(usize),

    #[error("message of {0} bytes cannot be fragmented")]
    MessageTooLarge(usize),

    #[error("peer closed during handshake")]
    HandshakeEof,

    #[error("handshake did not reveal a remote static key")]
    MissingRemoteKey,
}

/// Handshake prologue: protocol version, network genesis, and a fixed tag.
pub fn prologue(network: NetworkId) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + 32 + 7);
    out.extend_from_slice(&PROTOCOL_VERSION.to_be_bytes());
    out.extend_from_slice(&network.genesis_hash());
    out.extend_from_slice(b"my_test");
    out
}

/// An established Noise session wrapping a TCP stream.
pub struct NoiseStream {
    reader: ReadHalf<TcpStream>,
    writer: WriteHalf<TcpStream>,
    transport: TransportState,
    pub peer_addr: SocketAddr,
    /// Static key the remote proved ownership of during the handshake.
    pub remote_pubkey: [u8; 32],
}

impl NoiseStream {
    /// Initiator handshake; the responder's static key must be known.
    pub async fn connect(
        stream: TcpStream,
        keypair: &Keypair,
        remote_pubkey: &[u8; 32],
        network: NetworkId,
    ) -> Result<Self, NoiseError> {
        let peer_addr = stream.peer_addr()?;
        let (mut reader, mut writer) = tokio::io::split(stream);

        debug!("starting noise handshake with {} (initiator)", peer_addr);

        let params: NoiseParams = NOISE_PROTOCOL_NAME.parse()?;
        let prologue = prologue(network);
        let secret = keypair.secret_bytes();
        let mut handshake = Builder::new(params)
            .local_private_key(&secret)
            .remote_public_key(remote_pubkey)
            .prologue(&prologue)
            .build_initiator()?;

        let mut buf = [0u8; MAX_HANDSHAKE_MSG_SIZE];

        // -> e, es
        let n = handshake.write_message(&[], &mut buf)?;
        write_frame(&mut writer, &buf[..n]).await?;

        // <- e, ee
        let msg = read_handshake_frame(&mut reader).await?;
        handshake.read_message(&msg, &mut buf)?;

        // -> s, se
        let n = handshake.write_message(&[], &mut buf)?;
        write_frame(&mut writer, &buf[..n]).await?;

        let transport = handshake.into_transport_mode()?;

        debug!("noise handshake complete with {}", peer_addr);

        Ok(Self {
            reader,
            writer,
            transport,
            peer_addr,
            remote_pubkey: *remote_pubkey,
        })
    }

    /// Responder handshake; the initiator's static key is learned here.
    pub async fn accept(
        stream: TcpStream,
        keypair: &Keypair,
        network: NetworkId,
    ) -> Result<Self, NoiseError> {
        let peer_addr = stream.peer_addr()?;
        let (mut reader, mut writer) = tokio::io::split(stream);

        debug!("starting noise handshake with {} (responder)", peer_addr);

        let params: NoiseParams = NOISE_PROTOCOL_NAME.parse()?;
        let prologue = prologue(network);
        let secret = keypair.secret_bytes();
        let mut handshake = Builder::new(params)
            .local_private_key(&secret)
            .prologue(&prologue)
            .build_responder()?;

        let mut buf = [0u8; MAX_HANDSHAKE_MSG_SIZE];

        // -> e, es
        let msg = read_handshake_frame(&mut reader).await?;
        handshake.read_message(&msg, &mut buf)?;

        // <- e, ee
        let n = handshake.write_message(&[], &mut buf)?;
        write_frame(&mut writer, &buf[..n]).await?;

        // -> s, se
        let msg = read_handshake_frame(&mut reader).await?;
        handshake.read_message(&msg, &mut buf)?;

        let remote_pubkey: [u8; 32] = handshake
            .get_remote_static()
            .and_then(|k| k.try_into().ok())
            .ok_or(NoiseError::MissingRemoteKey)?;

        let transport = handshake.into_transport_mode()?;

        debug!(
            "noise handshake complete with {} (remote {})",
            peer_addr,
            hex::encode(&remote_pubkey[..8])
        );

        Ok(Self {
            reader,
            writer,
            transport,
            peer_addr,
            remote_pubkey,
        })
    }

    /// Encrypt and send one datagram.
    pub async fn send(&mut self, msg: &[u8]) -> Result<(), NoiseError> {
        encrypt_and_write(&mut self.writer, &mut self.transport, msg).await
    }

    /// Receive and decrypt one datagram.
    pub async fn recv(&mut self) -> Result<Vec<u8>, NoiseError> {
        let ciphertext = read_raw_frame(&mut self.reader).await?;
        decrypt(&mut self.transport, &ciphertext)
    }

    /// Split into independently owned halves sharing the transport state.
    pub fn split(self) -> (NoiseReader, NoiseWriter) {
        let transport = Arc::new(Mutex::new(self.transport));
        (
            NoiseReader { reader: self.reader, transport: transport.clone() },
            NoiseWriter { writer: self.writer, transport },
        )
    }
}

pub struct NoiseReader {
    reader: ReadHalf<TcpStream>,
    transport: Arc<Mutex<TransportState>>,
}

impl NoiseReader {
    pub async fn recv(&mut self) -> Result<Vec<u8>, NoiseError> {
        let ciphertext = read_raw_frame(&mut self.reader).await?;
        let mut transport = self.transport.lock().await;
        decrypt(&mut transport, &ciphertext)
    }
}

pub struct NoiseWriter {
    writer: WriteHalf<TcpStream>,
    transport: Arc<Mutex<TransportState>>,
}

impl NoiseWriter {
    pub async fn send(&mut self, msg: &[u8]) -> Result<(), NoiseError> {
        let ciphertext = {
            let mut transport = self.transport.lock().await;
            encrypt(&mut transport, msg)?
        };
        write_frame(&mut self.writer, &ciphertext).await
    }
}

fn encrypt(transport: &mut TransportState, msg: &[u8]) -> Result<Vec<u8>, NoiseError> {
    if msg.len() + CHACHA_TAG_SIZE > MAX_NOISE_MESSAGE_SIZE {
        return Err(NoiseError::FrameTooLarge(msg.len()));
    }
    let mut out = vec![0u8; msg.len() + CHACHA_TAG_SIZE];
    let n = transport.write_message(msg, &mut out)?;
    out.truncate(n);
    Ok(out)
}

fn decrypt(transport: &mut TransportState, ciphertext: &[u8]) -> Result<Vec<u8>, NoiseError> {
    let mut out = vec![0u8; ciphertext.len()];
    let n = transport.read_message(ciphertext, &mut out)?;
    out.truncate(n);
    Ok(out)
}

async fn encrypt_and_write(
    writer: &mut WriteHalf<TcpStream>,
    transport: &mut TransportState,
    msg: &[u8],
) -> Result<(), NoiseError> {
    let ciphertext = encrypt(transport, msg)?;
    write_frame(writer, &ciphertext).await
}

async fn write_frame(
    writer: &mut WriteHalf<TcpStream>,
    data: &[u8],
) -> Result<(), NoiseError> {
    if data.len() > MAX_NOISE_MESSAGE_SIZE {
        return Err(NoiseError::FrameTooLarge(data.len()));
    }
    writer.write_all(&(data.len() as u16).to_be_bytes()).await?;
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}

async fn read_raw_frame(reader: &mut ReadHalf<TcpStream>) -> Result<Vec<u8>, NoiseError> {
    let mut len_bytes = [0u8; 2];
    reader.read_exact(&mut len_bytes).await?;
    let len = u16::from_be_bytes(len_bytes) as usize;
    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).await?;
    Ok(data)
}

async fn read_handshake_frame(
    reader: &mut ReadHalf<TcpStream>,
) -> Result<Vec<u8>, NoiseError> {
    let data = read_raw_frame(reader).await.map_err(|e| match e {
        NoiseError::Io(ref io_err) if io_err.kind() == io::ErrorKind::UnexpectedEof => {
            NoiseError::HandshakeEof
        }
        other => other,
    })?;
    if data.len() > MAX_HANDSHAKE_MSG_SIZE {
        return Err(NoiseError::FrameTooLarge(data.len()));
    }
    Ok(data)
}
