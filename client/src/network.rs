use crate::error::ClientError;
use bytes::{Buf, BytesMut};
use log::{debug, info, warn};
use shared::messages::{CryptKeyRequest, LoginRequest, PingRequest, PositionUpdate, UdpInitRequest};
use shared::{
    CipherContext, CipherKey, ClientBuild, ClientCode, DecodeOutcome, Frame, FrameCodec, FrameHeader, OutPacket,
    ServerCode, DEFAULT_MAX_PAYLOAD,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;

/// Builds from this one on announce their version as a length-prefixed string
const STRING_VERSION_BUILD: u16 = 1125;

/// Headless protocol client
///
/// Speaks the same framing and encryption as the server and walks through
/// the handshake, login and world entry the way a game client does.
pub struct Client {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    udp: Option<UdpSocket>,
    server_udp: Option<SocketAddr>,
    build: ClientBuild,
    session: Option<u16>,
    stream_tx: FrameCodec,
    stream_rx: FrameCodec,
    datagram_tx: FrameCodec,
    datagram_rx: FrameCodec,
    accumulator: BytesMut,
    sequence: u16,
    reply_timeout: Duration,
}

impl Client {
    pub async fn connect(server_addr: SocketAddr, build: ClientBuild) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(server_addr).await?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        info!("Connected to {} as build {}", server_addr, build);

        Ok(Client {
            reader,
            writer,
            udp: None,
            server_udp: None,
            build,
            session: None,
            stream_tx: FrameCodec::stream(DEFAULT_MAX_PAYLOAD),
            stream_rx: FrameCodec::stream(u16::MAX as usize),
            datagram_tx: FrameCodec::datagram(DEFAULT_MAX_PAYLOAD),
            datagram_rx: FrameCodec::datagram(u16::MAX as usize),
            accumulator: BytesMut::with_capacity(4096),
            sequence: 0,
            reply_timeout: Duration::from_secs(5),
        })
    }

    pub fn set_reply_timeout(&mut self, reply_timeout: Duration) {
        self.reply_timeout = reply_timeout;
    }

    pub fn session(&self) -> Option<u16> {
        self.session
    }

    pub fn build(&self) -> ClientBuild {
        self.build
    }

    /// Sends a packet over the stream transport
    pub async fn send(&mut self, packet: &OutPacket) -> Result<(), ClientError> {
        let header = FrameHeader {
            code: packet.code,
            session: self.session.unwrap_or(0),
            sequence: None,
        };
        let bytes = self.stream_tx.encode(header, &packet.payload)?;
        self.writer.write_all(&bytes).await?;
        Ok(())
    }

    /// Writes raw bytes to the stream, bypassing the codec
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<(), ClientError> {
        self.writer.write_all(bytes).await?;
        Ok(())
    }

    /// Next stream frame from the server
    pub async fn recv(&mut self) -> Result<Frame, ClientError> {
        loop {
            if let DecodeOutcome::Frame { frame, consumed } = self.stream_rx.decode(&self.accumulator)? {
                self.accumulator.advance(consumed);
                debug!("Received 0x{:02X} ({} bytes)", frame.code(), frame.payload().len());
                return Ok(frame);
            }
            let read = timeout(self.reply_timeout, self.reader.read_buf(&mut self.accumulator))
                .await
                .map_err(|_| ClientError::Timeout(self.reply_timeout))??;
            if read == 0 {
                return Err(ClientError::Closed);
            }
        }
    }

    /// Skips stream frames until one with `code` arrives
    pub async fn expect(&mut self, code: ServerCode) -> Result<Frame, ClientError> {
        loop {
            let frame = self.recv().await?;
            if frame.code() == code.as_u8() {
                return Ok(frame);
            }
            debug!("Skipping 0x{:02X} while waiting for {:?}", frame.code(), code);
        }
    }

    /// Announces the build, installs the keys from the reply and waits for
    /// the session id
    pub async fn handshake(&mut self, expansion: u8) -> Result<u16, ClientError> {
        let request = CryptKeyRequest {
            client_type: 1,
            build: self.build,
            expansion,
        };
        self.send(&request.encode()).await?;

        let mut reply = self.recv().await?;
        if reply.code() == ServerCode::LoginDenied.as_u8() {
            return Err(ClientError::Denied(reply.read_u8()?));
        }
        if reply.code() != ServerCode::CryptKey.as_u8() {
            return Err(ClientError::Malformed {
                code: reply.code(),
                reason: "expected the crypt key",
            });
        }

        let (stream_key, datagram_key) = parse_crypt_key(self.build, &mut reply)?;
        self.stream_tx.set_cipher(CipherContext::Keyed(stream_key.clone()));
        self.stream_rx.set_cipher(CipherContext::Keyed(stream_key));
        self.datagram_tx.set_cipher(CipherContext::Keyed(datagram_key.clone()));
        self.datagram_rx.set_cipher(CipherContext::Keyed(datagram_key));

        let mut session = self.expect(ServerCode::SessionId).await?;
        let id = session.read_u16_le()?;
        self.session = Some(id);
        info!("Handshake complete, session {}", id);
        Ok(id)
    }

    /// Logs in, returning the account name the server echoed
    pub async fn login(&mut self, account: &str, password: &str) -> Result<String, ClientError> {
        let request = LoginRequest {
            account: account.to_string(),
            password: password.to_string(),
        };
        self.send(&request.encode()).await?;

        let mut reply = self.recv().await?;
        if reply.code() == ServerCode::LoginDenied.as_u8() {
            let code = reply.read_u8()?;
            warn!("Login for {} denied with 0x{:02X}", account, code);
            return Err(ClientError::Denied(code));
        }
        if reply.code() != ServerCode::LoginGranted.as_u8() {
            return Err(ClientError::Malformed {
                code: reply.code(),
                reason: "expected a login reply",
            });
        }
        if self.build.number() < STRING_VERSION_BUILD {
            reply.skip(4)?;
        }
        Ok(reply.read_pascal_string()?)
    }

    /// Requests world entry and returns the position-and-object-id frame
    pub async fn enter_world(&mut self) -> Result<Frame, ClientError> {
        self.send(&empty(ClientCode::WorldInitRequest)).await?;
        self.expect(ServerCode::PositionAndObjectId).await
    }

    /// Round-trips a ping and returns the sequence the server answered with
    pub async fn ping(&mut self, timestamp: u32, sequence: u16) -> Result<u16, ClientError> {
        self.send(&PingRequest { timestamp, sequence }.encode()).await?;
        let mut reply = self.expect(ServerCode::PingReply).await?;
        let echoed = reply.read_u32()?;
        if echoed != timestamp {
            return Err(ClientError::Malformed {
                code: reply.code(),
                reason: "ping timestamp not echoed",
            });
        }
        reply.skip(4)?;
        Ok(reply.read_u16()?)
    }

    /// Opens the datagram path: binds a local socket, announces its port
    /// and waits for the server's datagram reply
    pub async fn init_udp(&mut self, server_udp: SocketAddr) -> Result<Frame, ClientError> {
        let local_ip = self.writer.local_addr()?.ip();
        let socket = UdpSocket::bind(SocketAddr::new(local_ip, 0)).await?;
        let port = socket.local_addr()?.port();
        self.udp = Some(socket);
        self.server_udp = Some(server_udp);

        self.send(&UdpInitRequest { port }.encode()).await?;
        let reply = self.recv_datagram().await?;
        if reply.code() != ServerCode::UdpInitReply.as_u8() {
            return Err(ClientError::Malformed {
                code: reply.code(),
                reason: "expected the datagram init reply",
            });
        }
        Ok(reply)
    }

    /// Sends a packet over the datagram transport
    pub async fn send_datagram(&mut self, packet: &OutPacket) -> Result<(), ClientError> {
        let (Some(socket), Some(server)) = (&self.udp, self.server_udp) else {
            return Err(ClientError::NoDatagramPath);
        };
        let header = FrameHeader {
            code: packet.code,
            session: self.session.unwrap_or(0),
            sequence: Some(self.sequence),
        };
        self.sequence = self.sequence.wrapping_add(1);
        let bytes = self.datagram_tx.encode(header, &packet.payload)?;
        socket.send_to(&bytes, server).await?;
        Ok(())
    }

    /// Next datagram frame from the server
    pub async fn recv_datagram(&mut self) -> Result<Frame, ClientError> {
        let Some(socket) = &self.udp else {
            return Err(ClientError::NoDatagramPath);
        };
        let mut buffer = vec![0u8; u16::MAX as usize];
        loop {
            let (len, _) = timeout(self.reply_timeout, socket.recv_from(&mut buffer))
                .await
                .map_err(|_| ClientError::Timeout(self.reply_timeout))??;
            match self.datagram_rx.decode(&buffer[..len])? {
                DecodeOutcome::Frame { frame, .. } => return Ok(frame),
                DecodeOutcome::NeedMoreData => warn!("Truncated datagram of {} bytes", len),
            }
        }
    }

    /// Confirms the datagram path to the server
    pub async fn udp_ping(&mut self) -> Result<(), ClientError> {
        self.send_datagram(&empty(ClientCode::UdpPing)).await
    }

    pub async fn send_position(&mut self, update: &PositionUpdate) -> Result<(), ClientError> {
        let packet = update.encode(self.build.family());
        self.send(&packet).await
    }

    /// Says goodbye and waits for the server's quit reply
    pub async fn quit(&mut self) -> Result<(), ClientError> {
        self.send(&empty(ClientCode::QuitRequest)).await?;
        self.expect(ServerCode::Quit).await?;
        Ok(())
    }
}

fn empty(code: ClientCode) -> OutPacket {
    OutPacket {
        code: code.as_u8(),
        payload: bytes::Bytes::new(),
    }
}

/// Extracts the stream and datagram keys from a crypt key reply
///
/// Builds from 1.125 on receive the version as a length-prefixed string,
/// older builds a fixed five-byte header.
pub fn parse_crypt_key(build: ClientBuild, reply: &mut Frame) -> Result<(CipherKey, CipherKey), ClientError> {
    if build.number() >= STRING_VERSION_BUILD {
        let len = reply.read_u32_le()? as usize;
        reply.skip(len + 2)?;
    } else {
        reply.skip(5)?;
    }
    let stream = read_key(reply)?;
    let datagram = read_key(reply)?;
    Ok((stream, datagram))
}

fn read_key(reply: &mut Frame) -> Result<CipherKey, ClientError> {
    let len = reply.read_u16()? as usize;
    let bytes = reply.read_bytes(len)?;
    CipherKey::new(bytes.to_vec()).ok_or(ClientError::Malformed {
        code: reply.code(),
        reason: "empty cipher key",
    })
}
