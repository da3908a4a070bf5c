//! Typed layouts of the client-to-server messages both peers need to agree on

use crate::codec::CodecError;
use crate::frame::{Frame, OutPacket, PacketWriter};
use crate::opcode::ClientCode;
use crate::version::{ClientBuild, ProtocolFamily};

/// First frame of every connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CryptKeyRequest {
    pub client_type: u8,
    pub build: ClientBuild,
    pub expansion: u8,
}

impl CryptKeyRequest {
    pub fn decode(frame: &mut Frame) -> Result<Self, CodecError> {
        Ok(Self {
            client_type: frame.read_u8()?,
            build: ClientBuild(frame.read_u16()?),
            expansion: frame.read_u8()?,
        })
    }

    pub fn encode(&self) -> OutPacket {
        let mut w = PacketWriter::new(ClientCode::CryptKeyRequest.as_u8());
        w.write_u8(self.client_type)
            .write_u16(self.build.number())
            .write_u8(self.expansion);
        w.finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRequest {
    pub account: String,
    pub password: String,
}

impl LoginRequest {
    pub fn decode(frame: &mut Frame) -> Result<Self, CodecError> {
        Ok(Self {
            account: frame.read_pascal_string()?,
            password: frame.read_pascal_string()?,
        })
    }

    pub fn encode(&self) -> OutPacket {
        let mut w = PacketWriter::new(ClientCode::LoginRequest.as_u8());
        w.write_pascal_string(&self.account)
            .write_pascal_string(&self.password);
        w.finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingRequest {
    pub timestamp: u32,
    pub sequence: u16,
}

impl PingRequest {
    pub fn decode(frame: &mut Frame) -> Result<Self, CodecError> {
        let timestamp = frame.read_u32()?;
        frame.skip(4)?;
        let sequence = frame.read_u16()?;
        Ok(Self {
            timestamp,
            sequence,
        })
    }

    pub fn encode(&self) -> OutPacket {
        let mut w = PacketWriter::new(ClientCode::PingRequest.as_u8());
        w.write_u32(self.timestamp).fill(0, 4).write_u16(self.sequence);
        w.finish()
    }
}

/// Announces the local port the client receives datagrams on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpInitRequest {
    pub port: u16,
}

impl UdpInitRequest {
    pub fn decode(frame: &mut Frame) -> Result<Self, CodecError> {
        Ok(Self {
            port: frame.read_u16()?,
        })
    }

    pub fn encode(&self) -> OutPacket {
        let mut w = PacketWriter::new(ClientCode::UdpInitRequest.as_u8());
        w.write_u16(self.port);
        w.finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashReport {
    pub dll_name: String,
    pub uptime_secs: u32,
}

impl CrashReport {
    pub fn decode(frame: &mut Frame) -> Result<Self, CodecError> {
        Ok(Self {
            dll_name: frame.read_pascal_string()?,
            uptime_secs: frame.read_u32()?,
        })
    }

    pub fn encode(&self) -> OutPacket {
        let mut w = PacketWriter::new(ClientCode::ClientCrash.as_u8());
        w.write_pascal_string(&self.dll_name)
            .write_u32(self.uptime_secs);
        w.finish()
    }
}

/// Size of the position update body
pub const POSITION_UPDATE_SIZE: usize = 18;

/// Client position update
///
/// The 18-byte body carries speed and motion bits, zone-relative coordinates,
/// the zone id, heading, a vertical-motion word and two flag bytes. Builds
/// before 1.72 send the zone as a single byte followed by padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PositionUpdate {
    pub session: u16,
    /// Speed in the low 9 bits, sign in bit 9, motion state in bits 10-12,
    /// strafing in bits 13-15
    pub speed_data: u16,
    pub z: u16,
    pub x_offset: u16,
    pub y_offset: u16,
    pub zone: u16,
    /// Heading in the low 12 bits, upper bits are client flags
    pub heading_data: u16,
    /// Descent speed in the low 12 bits, bit 15 set on the landing frame
    pub fly_data: u16,
    pub flags: u8,
    pub health_byte: u8,
}

pub const FLAG_TARGET_IN_VIEW: u8 = 0x10;
pub const FLAG_GROUND_TARGET: u8 = 0x08;
pub const FLAG_WIREFRAME: u8 = 0x04;
pub const FLAG_STEALTH: u8 = 0x02;
pub const FLAG_DIVING: u8 = 0x02;

impl PositionUpdate {
    pub fn decode(frame: &mut Frame, family: ProtocolFamily) -> Result<Self, CodecError> {
        let session = frame.read_u16()?;
        let speed_data = frame.read_u16()?;
        let z = frame.read_u16()?;
        let x_offset = frame.read_u16()?;
        let y_offset = frame.read_u16()?;
        let zone = match family {
            ProtocolFamily::V168 => {
                let zone = frame.read_u8()?;
                frame.skip(1)?;
                u16::from(zone)
            }
            ProtocolFamily::V172 => frame.read_u16()?,
        };
        Ok(Self {
            session,
            speed_data,
            z,
            x_offset,
            y_offset,
            zone,
            heading_data: frame.read_u16()?,
            fly_data: frame.read_u16()?,
            flags: frame.read_u8()?,
            health_byte: frame.read_u8()?,
        })
    }

    /// Writes the 18-byte body in the layout of `family`
    pub fn write_body(&self, w: &mut PacketWriter, family: ProtocolFamily) {
        w.write_u16(self.session)
            .write_u16(self.speed_data)
            .write_u16(self.z)
            .write_u16(self.x_offset)
            .write_u16(self.y_offset);
        match family {
            ProtocolFamily::V168 => {
                w.write_u8(self.zone as u8).write_u8(0);
            }
            ProtocolFamily::V172 => {
                w.write_u16(self.zone);
            }
        }
        w.write_u16(self.heading_data)
            .write_u16(self.fly_data)
            .write_u8(self.flags)
            .write_u8(self.health_byte);
    }

    pub fn encode(&self, family: ProtocolFamily) -> OutPacket {
        let mut w = PacketWriter::new(ClientCode::PlayerPositionUpdate.as_u8());
        self.write_body(&mut w, family);
        w.finish()
    }

    /// Signed speed
    pub fn speed(&self) -> i16 {
        let magnitude = (self.speed_data & 0x1FF) as i16;
        if self.speed_data & 0x200 != 0 {
            -magnitude
        } else {
            magnitude
        }
    }

    /// Motion state bits
    pub fn motion_bits(&self) -> u8 {
        ((self.speed_data >> 10) & 0x7) as u8
    }

    pub fn strafing(&self) -> bool {
        self.speed_data & 0xE000 != 0
    }

    pub fn heading(&self) -> u16 {
        self.heading_data & 0xFFF
    }

    /// True on the frame where a falling client touches ground
    pub fn is_landing(&self) -> bool {
        self.fly_data & 0x8000 != 0
    }

    pub fn descent_speed(&self) -> u16 {
        self.fly_data & 0xFFF
    }

    pub fn is_diving(&self) -> bool {
        self.flags & FLAG_DIVING != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn to_frame(packet: OutPacket) -> Frame {
        Frame::new(packet.code, 0, None, packet.payload)
    }

    fn sample() -> PositionUpdate {
        PositionUpdate {
            session: 3,
            speed_data: 0x200 | 150 | (1 << 10),
            z: 2000,
            x_offset: 1234,
            y_offset: 4321,
            zone: 26,
            heading_data: 0xF123,
            fly_data: 0x8000 | 450,
            flags: FLAG_DIVING,
            health_byte: 0x80 | 77,
        }
    }

    #[test]
    fn test_position_update_both_families() {
        for family in ProtocolFamily::ALL {
            let packet = sample().encode(family);
            assert_eq!(packet.payload.len(), POSITION_UPDATE_SIZE);
            let decoded = PositionUpdate::decode(&mut to_frame(packet), family).unwrap();
            assert_eq!(decoded, sample());
        }
    }

    #[test]
    fn test_zone_field_placement_differs_by_family() {
        let v168 = sample().encode(ProtocolFamily::V168).payload;
        let v172 = sample().encode(ProtocolFamily::V172).payload;
        assert_eq!(&v168[10..12], &[26, 0]);
        assert_eq!(&v172[10..12], &[0, 26]);
    }

    #[test]
    fn test_position_bit_fields() {
        let update = sample();
        assert_eq!(update.speed(), -150);
        assert_eq!(update.motion_bits(), 1);
        assert!(!update.strafing());
        assert_eq!(update.heading(), 0x123);
        assert!(update.is_landing());
        assert_eq!(update.descent_speed(), 450);
        assert!(update.is_diving());
    }

    #[test]
    fn test_short_position_update_is_truncated() {
        let mut frame = Frame::new(0xA9, 0, None, Bytes::from_static(&[0; 10]));
        assert!(PositionUpdate::decode(&mut frame, ProtocolFamily::V172).is_err());
    }

    #[test]
    fn test_handshake_and_ping_layouts() {
        let request = CryptKeyRequest {
            client_type: 1,
            build: ClientBuild(1109),
            expansion: 3,
        };
        let packet = request.encode();
        assert_eq!(&packet.payload[..], &[1, 0x04, 0x55, 3]);
        assert_eq!(CryptKeyRequest::decode(&mut to_frame(packet)).unwrap(), request);

        let ping = PingRequest {
            timestamp: 77,
            sequence: 9,
        };
        let packet = ping.encode();
        assert_eq!(packet.payload.len(), 10);
        assert_eq!(PingRequest::decode(&mut to_frame(packet)).unwrap(), ping);
    }

    #[test]
    fn test_login_and_crash_report() {
        let login = LoginRequest {
            account: "arthur".into(),
            password: "excalibur".into(),
        };
        assert_eq!(LoginRequest::decode(&mut to_frame(login.encode())).unwrap(), login);

        let crash = CrashReport {
            dll_name: "game.dll".into(),
            uptime_secs: 3600,
        };
        assert_eq!(CrashReport::decode(&mut to_frame(crash.encode())).unwrap(), crash);
    }
}
