pub mod byteframe;

use anyhow::Result;

pub use byteframe::{ByteFrame, ByteFrameError};

/// Per-session protocol context handed to packet builders. Filled in by the
/// login handler; the channel core passes it through untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientContext {
    pub locale: String,
}

impl Default for ClientContext {
    fn default() -> Self {
        Self {
            locale: "en".to_string(),
        }
    }
}

/// An outbound application message.
///
/// `build` writes the body only; the caller writes the opcode header first.
pub trait MhfPacket: Send + Sync {
    fn opcode(&self) -> u16;

    fn build(&self, bf: &mut ByteFrame, ctx: &ClientContext) -> Result<()>;
}

/// Encode `pkt` for one recipient: u16 opcode header followed by the body.
pub fn encode_packet(pkt: &dyn MhfPacket, ctx: &ClientContext) -> Result<bytes::Bytes> {
    let mut bf = ByteFrame::new();
    bf.write_u16(pkt.opcode());
    pkt.build(&mut bf, ctx)?;
    Ok(bf.freeze())
}
