//! Fan-out of packets to every session of a channel, or of the whole world.
//!
//! Delivery is best-effort: each recipient gets a non-blocking enqueue and a
//! full queue drops the packet for that recipient only.

use bytes::Bytes;

use super::packet::{
    MsgBinChat, MsgSysCastedBinary, BINARY_MESSAGE_TYPE_CHAT, BROADCAST_TYPE_SERVER,
    CHAR_ID_BROADCAST, CHAT_FLAGS_SYSTEM, CHAT_TYPE_SYSTEM,
};
use super::session::SessionId;
use super::ChannelServer;
use crate::network::{encode_packet, ByteFrame, MhfPacket};

/// Raviente event variants that have an announcement string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RavienteKind {
    Berserk,
    Extreme,
    ExtremeLimited,
    BerserkSmall,
}

impl RavienteKind {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            2 => Some(Self::Berserk),
            3 => Some(Self::Extreme),
            4 => Some(Self::ExtremeLimited),
            5 => Some(Self::BerserkSmall),
            _ => None,
        }
    }

    pub fn lang_key(self) -> &'static str {
        match self {
            Self::Berserk => "ravienteBerserk",
            Self::Extreme => "ravienteExtreme",
            Self::ExtremeLimited => "ravienteExtremeLimited",
            Self::BerserkSmall => "ravienteBerserkSmall",
        }
    }
}

impl ChannelServer {
    /// Queue `pkt` to every session except `ignored`. The session set stays
    /// locked for the whole pass, so a concurrent connect or disconnect is
    /// either fully in or fully out. Returns how many sessions accepted it.
    pub async fn broadcast_mhf(&self, pkt: &dyn MhfPacket, ignored: Option<SessionId>) -> usize {
        let state = self.state.lock().await;
        let mut delivered = 0;
        for session in state.sessions.values() {
            if Some(session.id()) == ignored {
                continue;
            }
            let data = match encode_packet(pkt, session.client_context()) {
                Ok(data) => data,
                Err(e) => {
                    tracing::error!(
                        "[channel] [broadcast_build_failed] id={} opcode={:04X} session={} err={}",
                        self.id, pkt.opcode(), session.id(), e
                    );
                    continue;
                }
            };
            if session.queue_send_non_blocking(data) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Broadcast on every channel of the world except `ignored_channel`.
    /// Each channel is atomic on its own; the world as a whole is not.
    pub async fn worldcast_mhf(
        &self,
        pkt: &dyn MhfPacket,
        ignored_session: Option<SessionId>,
        ignored_channel: Option<&ChannelServer>,
    ) -> usize {
        let mut delivered = 0;
        for channel in self.channels() {
            if ignored_channel.is_some_and(|c| std::ptr::eq(c, channel.as_ref())) {
                continue;
            }
            delivered += channel.broadcast_mhf(pkt, ignored_session).await;
        }
        delivered
    }

    /// Send a system chat line, signed with the channel name, to every
    /// session except `ignored`.
    pub async fn broadcast_chat_message(&self, message: &str, ignored: Option<SessionId>) -> usize {
        let chat = MsgBinChat {
            unk0: 0,
            chat_type: CHAT_TYPE_SYSTEM,
            flags: CHAT_FLAGS_SYSTEM,
            message: message.to_string(),
            sender_name: self.name.clone(),
        };
        let mut bf = ByteFrame::new();
        bf.set_le();
        if let Err(e) = chat.build(&mut bf) {
            tracing::error!("[channel] [chat_build_failed] id={} err={}", self.id, e);
            return 0;
        }

        let pkt = MsgSysCastedBinary {
            char_id: CHAR_ID_BROADCAST,
            broadcast_type: 0,
            message_type: BINARY_MESSAGE_TYPE_CHAT,
            raw_data_payload: bf.freeze(),
        };
        self.broadcast_mhf(&pkt, ignored).await
    }

    /// Announce a Raviente event to the other channels of the world. Unknown
    /// type codes are logged and announced with an empty text.
    pub async fn broadcast_raviente(&self, ip: u32, port: u16, stage: &[u8], raviente_type: u8) -> usize {
        let text = match RavienteKind::from_code(raviente_type) {
            Some(kind) => self.lang(kind.lang_key()).unwrap_or_default(),
            None => {
                tracing::error!(
                    "[channel] [raviente_unknown_type] id={} type={}",
                    self.id, raviente_type
                );
                ""
            }
        };
        let payload = match build_raviente_notice(text, ip, port, stage) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!("[channel] [raviente_build_failed] id={} err={}", self.id, e);
                return 0;
            }
        };

        let pkt = MsgSysCastedBinary {
            char_id: 0,
            broadcast_type: BROADCAST_TYPE_SERVER,
            message_type: BINARY_MESSAGE_TYPE_CHAT,
            raw_data_payload: payload,
        };
        self.worldcast_mhf(&pkt, None, Some(self)).await
    }
}

fn build_raviente_notice(text: &str, ip: u32, port: u16, stage: &[u8]) -> anyhow::Result<Bytes> {
    let mut bf = ByteFrame::new();
    bf.set_le();
    bf.write_u16(0);
    bf.write_u16(0x43); // data len
    bf.write_u16(3);
    bf.write_pascal_u16(text)?;
    bf.write_bytes(&[0x5F, 0x53, 0x00]);
    bf.write_u32(ip);
    bf.write_u16(port);
    bf.write_u16(0);
    bf.write_bytes(stage);
    Ok(bf.freeze())
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;
    use crate::network::ClientContext;
    use crate::servers::channel::packet::MSG_SYS_CASTED_BINARY;
    use crate::servers::channel::session::Session;
    use crate::servers::channel::ChannelSettings;

    async fn add_session(
        server: &ChannelServer,
        capacity: usize,
    ) -> (Arc<Session>, mpsc::Receiver<Bytes>) {
        let (s, rx) = Session::new(SessionId::next(), None, ClientContext::default(), capacity);
        server.insert_session(Arc::clone(&s)).await;
        (s, rx)
    }

    fn named(id: u16, name: &str) -> Arc<ChannelServer> {
        ChannelServer::new(ChannelSettings {
            id,
            name: name.to_string(),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_chat_skips_ignored_session() {
        let server = named(1, "Ch1");
        let (a, mut rx_a) = add_session(&server, 4).await;
        let (_b, mut rx_b) = add_session(&server, 4).await;

        let delivered = server.broadcast_chat_message("hello", Some(a.id())).await;
        assert_eq!(delivered, 1);
        assert!(rx_a.try_recv().is_err());

        let pkt = rx_b.try_recv().unwrap();
        assert_eq!(u16::from_be_bytes([pkt[0], pkt[1]]), MSG_SYS_CASTED_BINARY);
        assert_eq!(&pkt[2..6], &CHAR_ID_BROADCAST.to_be_bytes());
        assert_eq!(pkt[7], BINARY_MESSAGE_TYPE_CHAT);
        let body = &pkt[10..];
        assert!(body.windows(6).any(|w| w == b"hello\0"));
        assert!(body.ends_with(b"Ch1\0"));
    }

    #[tokio::test]
    async fn test_full_queue_does_not_block_others() {
        let server = named(1, "Ch1");
        let (slow, _rx_slow) = add_session(&server, 1).await;
        assert!(slow.queue_send_non_blocking(Bytes::from_static(b"x")));
        let (_fast, mut rx_fast) = add_session(&server, 4).await;

        let delivered = tokio::time::timeout(
            Duration::from_secs(1),
            server.broadcast_chat_message("hi", None),
        )
        .await
        .expect("broadcast must not wait on a full queue");
        assert_eq!(delivered, 1);
        assert!(rx_fast.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_worldcast_skips_ignored_channel() {
        let a = named(1, "A");
        let b = named(2, "B");
        let c = named(3, "C");
        let all = vec![Arc::clone(&a), Arc::clone(&b), Arc::clone(&c)];
        for ch in &all {
            ch.set_channels(&all);
        }
        let (_sa, mut rx_a) = add_session(&a, 4).await;
        let (_sb, mut rx_b) = add_session(&b, 4).await;
        let (_sc, mut rx_c) = add_session(&c, 4).await;

        let pkt = MsgSysCastedBinary {
            char_id: 1,
            broadcast_type: BROADCAST_TYPE_SERVER,
            message_type: BINARY_MESSAGE_TYPE_CHAT,
            raw_data_payload: Bytes::from_static(b"z"),
        };
        assert_eq!(a.worldcast_mhf(&pkt, None, Some(b.as_ref())).await, 2);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
        assert!(rx_c.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_raviente_goes_to_other_channels() {
        let a = named(1, "A");
        let b = named(2, "B");
        let all = vec![Arc::clone(&a), Arc::clone(&b)];
        a.set_channels(&all);
        b.set_channels(&all);
        let (_sa, mut rx_a) = add_session(&a, 4).await;
        let (_sb, mut rx_b) = add_session(&b, 4).await;

        assert_eq!(a.broadcast_raviente(0x7F000001, 54001, b"stage", 2).await, 1);
        assert!(rx_a.try_recv().is_err());

        let pkt = rx_b.try_recv().unwrap();
        assert_eq!(&pkt[2..6], &0u32.to_be_bytes());
        assert_eq!(pkt[6], BROADCAST_TYPE_SERVER);
        let text = a.lang("ravienteBerserk").unwrap().as_bytes();
        assert!(pkt.windows(text.len()).any(|w| w == text));
        assert!(pkt.ends_with(b"stage"));
    }

    #[tokio::test]
    async fn test_raviente_unknown_type_sends_empty_text() {
        let a = named(1, "A");
        let b = named(2, "B");
        let all = vec![Arc::clone(&a), Arc::clone(&b)];
        a.set_channels(&all);
        let (_sb, mut rx_b) = add_session(&b, 4).await;

        assert_eq!(a.broadcast_raviente(0, 0, &[], 9).await, 1);
        let pkt = rx_b.try_recv().unwrap();
        // header (10) + u16 x3 + pascal len 1 + NUL
        assert_eq!(&pkt[16..19], &[0x01, 0x00, 0x00]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_broadcast_matches_live_sessions_under_churn() {
        const ROUNDS: u32 = 200;
        let server = named(1, "Ch1");

        let churn = {
            let server = Arc::clone(&server);
            tokio::spawn(async move {
                let mut receivers = Vec::new();
                for i in 0..ROUNDS {
                    let (s, rx) = Session::new(
                        SessionId::next(),
                        None,
                        ClientContext::default(),
                        ROUNDS as usize,
                    );
                    server.insert_session(Arc::clone(&s)).await;
                    receivers.push(rx);
                    if i % 3 == 0 {
                        tokio::task::yield_now().await;
                        server.unregister_session(s.id()).await;
                    }
                    tokio::task::yield_now().await;
                }
                receivers
            })
        };

        let caster = {
            let server = Arc::clone(&server);
            tokio::spawn(async move {
                let mut delivered = Vec::new();
                for k in 0..ROUNDS {
                    let pkt = MsgSysCastedBinary {
                        char_id: k,
                        broadcast_type: BROADCAST_TYPE_SERVER,
                        message_type: BINARY_MESSAGE_TYPE_CHAT,
                        raw_data_payload: Bytes::new(),
                    };
                    delivered.push(server.broadcast_mhf(&pkt, None).await);
                    tokio::task::yield_now().await;
                }
                delivered
            })
        };

        let mut receivers = churn.await.unwrap();
        let delivered = caster.await.unwrap();

        let mut received = vec![0usize; ROUNDS as usize];
        for rx in &mut receivers {
            let mut seen = Vec::new();
            while let Ok(pkt) = rx.try_recv() {
                seen.push(u32::from_be_bytes([pkt[2], pkt[3], pkt[4], pkt[5]]));
            }
            let unique: HashSet<u32> = seen.iter().copied().collect();
            assert_eq!(unique.len(), seen.len(), "a broadcast reached one session twice");
            // A session sees one unbroken run: everything sent while it was in the set.
            if let (Some(first), Some(last)) = (seen.first(), seen.last()) {
                assert_eq!((last - first + 1) as usize, seen.len());
            }
            for k in seen {
                received[k as usize] += 1;
            }
        }
        assert_eq!(received, delivered);
    }

    #[test]
    fn test_raviente_kind_codes() {
        assert_eq!(RavienteKind::from_code(2), Some(RavienteKind::Berserk));
        assert_eq!(RavienteKind::from_code(5), Some(RavienteKind::BerserkSmall));
        assert_eq!(RavienteKind::from_code(1), None);
    }
}
