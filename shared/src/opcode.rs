//! Opcode tables for both directions of the protocol
//!
//! Values follow the codes the legacy client builds put on the wire. Unknown
//! inbound codes are not an error at this level: the pipeline logs and drops
//! them.

/// Messages sent by clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum ClientCode {
    UdpInitRequest = 0x14,
    SkillListRequest = 0x18,
    TrainerWindowRequest = 0xD0,
    ClientCrash = 0x9F,
    PingRequest = 0xA3,
    LoginRequest = 0xA7,
    PlayerPositionUpdate = 0xA9,
    QuitRequest = 0xAB,
    WorldInitRequest = 0xD4,
    UdpPing = 0xF2,
    CryptKeyRequest = 0xF4,
}

impl ClientCode {
    pub const ALL: [ClientCode; 11] = [
        ClientCode::UdpInitRequest,
        ClientCode::SkillListRequest,
        ClientCode::TrainerWindowRequest,
        ClientCode::ClientCrash,
        ClientCode::PingRequest,
        ClientCode::LoginRequest,
        ClientCode::PlayerPositionUpdate,
        ClientCode::QuitRequest,
        ClientCode::WorldInitRequest,
        ClientCode::UdpPing,
        ClientCode::CryptKeyRequest,
    ];

    pub fn from_u8(code: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| *c as u8 == code)
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Messages sent by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ServerCode {
    InventoryUpdate = 0x02,
    EquipmentUpdate = 0x15,
    VariousUpdate = 0x16,
    PositionAndObjectId = 0x20,
    CryptKey = 0x22,
    SessionId = 0x28,
    PingReply = 0x29,
    LoginGranted = 0x2A,
    LoginDenied = 0x2C,
    UdpInitReply = 0x2F,
    PlayerCreate172 = 0x4B,
    TrainerWindow = 0x7B,
    Quit = 0xA4,
    PlayerPosition = 0xA9,
    Message = 0xAF,
    PlayerCreate = 0xD4,
    ObjectDelete = 0xE1,
}

impl ServerCode {
    pub const ALL: [ServerCode; 17] = [
        ServerCode::InventoryUpdate,
        ServerCode::EquipmentUpdate,
        ServerCode::VariousUpdate,
        ServerCode::PositionAndObjectId,
        ServerCode::CryptKey,
        ServerCode::SessionId,
        ServerCode::PingReply,
        ServerCode::LoginGranted,
        ServerCode::LoginDenied,
        ServerCode::UdpInitReply,
        ServerCode::PlayerCreate172,
        ServerCode::TrainerWindow,
        ServerCode::Quit,
        ServerCode::PlayerPosition,
        ServerCode::Message,
        ServerCode::PlayerCreate,
        ServerCode::ObjectDelete,
    ];

    pub fn from_u8(code: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| *c as u8 == code)
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Reasons carried by a login-denied reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LoginError {
    WrongPassword = 0x01,
    AccountInvalid = 0x02,
    ClientVersionTooLow = 0x05,
    AccountAlreadyLoggedIn = 0x0B,
    TooManyPlayersLoggedIn = 0x0C,
    GameCurrentlyClosed = 0x0D,
    ExpansionPacketNotAllowed = 0x12,
    NotAuthorizedToUseExpansionVersion = 0x17,
    ServiceNotAvailable = 0xAA,
}

impl LoginError {
    pub fn from_u8(code: u8) -> Option<Self> {
        use LoginError::*;
        [
            WrongPassword,
            AccountInvalid,
            ClientVersionTooLow,
            AccountAlreadyLoggedIn,
            TooManyPlayersLoggedIn,
            GameCurrentlyClosed,
            ExpansionPacketNotAllowed,
            NotAuthorizedToUseExpansionVersion,
            ServiceNotAvailable,
        ]
        .into_iter()
        .find(|e| *e as u8 == code)
    }
}

/// Chat channel of a message frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChatType {
    System = 0x00,
    Say = 0x01,
    Important = 0x1C,
}

/// Where the client shows a message frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatLocation {
    ChatWindow,
    PopupWindow,
    SystemWindow,
}

impl ChatLocation {
    /// Text prefix the client uses to route the message
    pub fn prefix(self) -> &'static str {
        match self {
            ChatLocation::ChatWindow => "@@",
            ChatLocation::PopupWindow => "##",
            ChatLocation::SystemWindow => "",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_client_codes_round_trip_and_are_unique() {
        let mut seen = HashSet::new();
        for code in ClientCode::ALL {
            assert!(seen.insert(code.as_u8()), "duplicate {:?}", code);
            assert_eq!(ClientCode::from_u8(code.as_u8()), Some(code));
        }
        assert_eq!(ClientCode::from_u8(0x00), None);
    }

    #[test]
    fn test_server_codes_round_trip_and_are_unique() {
        let mut seen = HashSet::new();
        for code in ServerCode::ALL {
            assert!(seen.insert(code.as_u8()), "duplicate {:?}", code);
            assert_eq!(ServerCode::from_u8(code.as_u8()), Some(code));
        }
    }

    #[test]
    fn test_login_error_lookup() {
        assert_eq!(LoginError::from_u8(0x05), Some(LoginError::ClientVersionTooLow));
        assert_eq!(LoginError::from_u8(0x04), None);
    }

    #[test]
    fn test_chat_prefixes() {
        assert_eq!(ChatLocation::ChatWindow.prefix(), "@@");
        assert_eq!(ChatLocation::PopupWindow.prefix(), "##");
        assert_eq!(ChatLocation::SystemWindow.prefix(), "");
    }
}
