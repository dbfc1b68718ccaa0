use anyhow::{ensure, Result};
use bytes::Bytes;

use crate::network::{ByteFrame, ClientContext, MhfPacket};

pub const MSG_SYS_CASTED_BINARY: u16 = 0x001B;

/// Server-wide scope carried in MsgSysCastedBinary
pub const BROADCAST_TYPE_SERVER: u8 = 0x06;

pub const BINARY_MESSAGE_TYPE_CHAT: u8 = 1;

/// Sender id meaning "no particular character".
pub const CHAR_ID_BROADCAST: u32 = 0xFFFF_FFFF;

/// Binary payload relayed to clients (chat, notices, state sync).
#[derive(Debug, Clone)]
pub struct MsgSysCastedBinary {
    pub char_id: u32,
    pub broadcast_type: u8,
    pub message_type: u8,
    pub raw_data_payload: Bytes,
}

impl MhfPacket for MsgSysCastedBinary {
    fn opcode(&self) -> u16 {
        MSG_SYS_CASTED_BINARY
    }

    fn build(&self, bf: &mut ByteFrame, _ctx: &ClientContext) -> Result<()> {
        ensure!(
            self.raw_data_payload.len() <= u16::MAX as usize,
            "casted binary payload too large: {} bytes",
            self.raw_data_payload.len()
        );
        bf.write_u32(self.char_id);
        bf.write_u8(self.broadcast_type);
        bf.write_u8(self.message_type);
        bf.write_u16(self.raw_data_payload.len() as u16);
        bf.write_bytes(&self.raw_data_payload);
        Ok(())
    }
}

/// Chat body carried inside a casted binary.
#[derive(Debug, Clone)]
pub struct MsgBinChat {
    pub unk0: u8,
    pub chat_type: u8,
    pub flags: u16,
    pub message: String,
    pub sender_name: String,
}

pub const CHAT_TYPE_SYSTEM: u8 = 5;
pub const CHAT_FLAGS_SYSTEM: u16 = 0x80;

impl MsgBinChat {
    /// Caller picks the frame endianness.
    pub fn build(&self, bf: &mut ByteFrame) -> Result<()> {
        let sender = self.sender_name.as_bytes();
        let message = self.message.as_bytes();
        ensure!(sender.len() < u16::MAX as usize, "sender name too long");
        ensure!(message.len() < u16::MAX as usize, "chat message too long");

        bf.write_u8(self.unk0);
        bf.write_u8(self.chat_type);
        bf.write_u16(self.flags);
        bf.write_u16(sender.len() as u16 + 1);
        bf.write_u16(message.len() as u16 + 1);
        bf.write_null_terminated_bytes(message);
        bf.write_null_terminated_bytes(sender);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::encode_packet;

    #[test]
    fn test_casted_binary_layout() {
        let pkt = MsgSysCastedBinary {
            char_id: 0x01020304,
            broadcast_type: BROADCAST_TYPE_SERVER,
            message_type: BINARY_MESSAGE_TYPE_CHAT,
            raw_data_payload: Bytes::from_static(&[0xAA, 0xBB]),
        };
        let out = encode_packet(&pkt, &ClientContext::default()).unwrap();
        assert_eq!(
            &out[..],
            &[0x00, 0x1B, 0x01, 0x02, 0x03, 0x04, 0x06, 0x01, 0x00, 0x02, 0xAA, 0xBB]
        );
    }

    #[test]
    fn test_bin_chat_layout() {
        let chat = MsgBinChat {
            unk0: 0,
            chat_type: CHAT_TYPE_SYSTEM,
            flags: CHAT_FLAGS_SYSTEM,
            message: "hey".to_string(),
            sender_name: "ch1".to_string(),
        };
        let mut bf = ByteFrame::new();
        bf.set_le();
        chat.build(&mut bf).unwrap();
        assert_eq!(
            bf.data(),
            &[0, 5, 0x80, 0x00, 4, 0, 4, 0, b'h', b'e', b'y', 0, b'c', b'h', b'1', 0]
        );
    }
}
