//! Scripted in-memory peer
//!
//! Implements [`Transport`]/[`Connector`] as a miniature signaling
//! gateway driven by the real codecs, so the whole bring-up, heartbeat,
//! and submission path can be exercised without a network. Available to
//! downstream crates through the `test-util` feature.

use crate::errors::SctpError;
use crate::m3ua::{self, M3uaMessage, ProtocolData};
use crate::map;
use crate::sccp::SccpMessage;
use crate::sctp::{Connector, Transport};
use crate::types::ProtocolClass;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// How a scripted peer responds to the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerBehavior {
    /// Handshake, heartbeat, and submissions all succeed
    Compliant,
    /// The association cannot be opened at all
    RefuseConnection,
    /// Replies to ASPUP with an M3UA ERR
    RejectAspUp,
    /// Establishes but never acknowledges submissions
    SilentOnSubmit,
    /// Establishes but never answers BEAT
    SilentOnBeat,
    /// Acknowledges submissions with a returnError component
    RejectSubmit,
}

/// One scripted peer transport
pub struct ScriptedPeer {
    behavior: PeerBehavior,
    inbox: VecDeque<(u16, Bytes)>,
}

impl ScriptedPeer {
    pub fn new(behavior: PeerBehavior) -> Self {
        Self {
            behavior,
            inbox: VecDeque::new(),
        }
    }

    fn reply(&mut self, msg: &M3uaMessage) {
        let encoded = m3ua::encode_message(msg).freeze();
        self.inbox.push_back((0, encoded));
    }

    fn answer(&mut self, msg: M3uaMessage) {
        match msg {
            M3uaMessage::AspUp { .. } => {
                if self.behavior == PeerBehavior::RejectAspUp {
                    self.reply(&M3uaMessage::Error {
                        error_code: 0x11, // refused, management blocking
                        diagnostic_info: None,
                    });
                } else {
                    self.reply(&M3uaMessage::AspUpAck { info_string: None });
                }
            }
            M3uaMessage::AspActive { traffic_mode_type, routing_context, .. } => {
                self.reply(&M3uaMessage::AspActiveAck {
                    traffic_mode_type,
                    routing_context,
                    info_string: None,
                });
            }
            M3uaMessage::AspDown { .. } => {
                self.reply(&M3uaMessage::AspDownAck { info_string: None });
            }
            M3uaMessage::Beat { data } => {
                if self.behavior != PeerBehavior::SilentOnBeat {
                    self.reply(&M3uaMessage::BeatAck { data });
                }
            }
            M3uaMessage::Data { protocol_data, .. } => {
                if self.behavior == PeerBehavior::SilentOnSubmit {
                    return;
                }
                self.answer_submission(protocol_data);
            }
            _ => {}
        }
    }

    fn answer_submission(&mut self, incoming: ProtocolData) {
        // Decode the UDT so the reply swaps called/calling parties the
        // way a real peer would.
        let Ok(SccpMessage::Udt { called_party, calling_party, .. }) =
            SccpMessage::decode(&incoming.data)
        else {
            return;
        };

        let ack = if self.behavior == PeerBehavior::RejectSubmit {
            map::encode_forward_sm_error(34) // systemFailure
        } else {
            map::encode_forward_sm_ack()
        };

        let reply_udt = SccpMessage::Udt {
            protocol_class: ProtocolClass::CLASS_0,
            called_party: calling_party,
            calling_party: called_party,
            data: Bytes::from(ack),
        };

        let reply_pd = ProtocolData {
            opc: incoming.dpc,
            dpc: incoming.opc,
            si: incoming.si,
            ni: incoming.ni,
            mp: 0,
            sls: 0,
            data: reply_udt.encode().freeze(),
        };

        self.reply(&M3uaMessage::Data {
            network_appearance: None,
            routing_context: None,
            protocol_data: reply_pd,
            correlation_id: None,
        });
    }
}

#[async_trait]
impl Transport for ScriptedPeer {
    async fn send_frame(&mut self, _stream_id: u16, payload: &[u8]) -> std::io::Result<()> {
        let msg = m3ua::decode_message(payload).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })?;
        self.answer(msg);
        Ok(())
    }

    async fn recv_frame(&mut self) -> std::io::Result<(u16, Bytes)> {
        match self.inbox.pop_front() {
            Some(frame) => Ok(frame),
            // nothing scripted: hang until the caller's timeout fires
            None => std::future::pending().await,
        }
    }

    async fn shutdown(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Connector producing one scripted peer per connection attempt.
///
/// Behaviors are consumed in order; once the script runs out, further
/// connections get compliant peers.
pub struct ScriptedConnector {
    behaviors: Mutex<VecDeque<PeerBehavior>>,
    connects: AtomicUsize,
}

impl ScriptedConnector {
    pub fn new(behaviors: Vec<PeerBehavior>) -> Self {
        Self {
            behaviors: Mutex::new(behaviors.into()),
            connects: AtomicUsize::new(0),
        }
    }

    /// Every connection gets a compliant peer
    pub fn compliant() -> Self {
        Self::new(Vec::new())
    }

    /// Number of connection attempts made against this connector
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, _host: &str, _port: u16) -> Result<Box<dyn Transport>, SctpError> {
        self.connects.fetch_add(1, Ordering::SeqCst);

        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(PeerBehavior::Compliant);

        if behavior == PeerBehavior::RefuseConnection {
            return Err(SctpError::AssociationFailed("connection refused".to_string()));
        }

        Ok(Box::new(ScriptedPeer::new(behavior)))
    }
}
