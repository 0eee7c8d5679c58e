//! In-process switch for tests: drives a real [`DeviceConnection`] over the
//! JSON codec, records every frame it receives and answers per a responder.

use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use ofsb_core::DeviceId;

use crate::codec::{JsonCodec, WireCodec};
use crate::config::PipelineConfig;
use crate::channel::DeviceConnection;
use crate::protocol::{Envelope, FlowMod, GroupMod, OfMessage};

/// Answers every request successfully.
pub fn ack_all(envelope: &Envelope) -> Option<OfMessage> {
    match envelope.message {
        OfMessage::BarrierRequest => Some(OfMessage::BarrierReply),
        _ => Some(OfMessage::Ack),
    }
}

pub struct SimulatedSwitch {
    received: Arc<Mutex<Vec<Envelope>>>,
}

impl SimulatedSwitch {
    pub fn start<F>(device: &str, responder: F) -> (DeviceConnection, SimulatedSwitch)
    where
        F: Fn(&Envelope) -> Option<OfMessage> + Send + 'static,
    {
        Self::start_with_config(device, &PipelineConfig::default(), responder)
    }

    pub fn start_with_config<F>(
        device: &str,
        config: &PipelineConfig,
        responder: F,
    ) -> (DeviceConnection, SimulatedSwitch)
    where
        F: Fn(&Envelope) -> Option<OfMessage> + Send + 'static,
    {
        let (wire_tx, mut wire_rx) = mpsc::channel::<Vec<u8>>(64);
        let conn = DeviceConnection::open(DeviceId::new(device), Arc::new(JsonCodec), wire_tx, config);
        let received = Arc::new(Mutex::new(Vec::new()));

        let device_side = conn.clone();
        let log = received.clone();
        tokio::spawn(async move {
            while let Some(frame) = wire_rx.recv().await {
                let envelope = JsonCodec.decode(&frame).expect("controller sent undecodable frame");
                log.lock().unwrap().push(envelope.clone());
                if let Some(reply) = responder(&envelope) {
                    let frame = JsonCodec
                        .encode(&Envelope::new(envelope.xid, reply))
                        .expect("reply encodes");
                    device_side.handle_inbound(&frame);
                }
            }
        });

        (conn, SimulatedSwitch { received })
    }

    pub fn received(&self) -> Vec<Envelope> {
        self.received.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.received().iter().map(|e| e.message.kind()).collect()
    }

    pub fn flow_mods(&self) -> Vec<FlowMod> {
        self.received()
            .into_iter()
            .filter_map(|e| match e.message {
                OfMessage::FlowMod(fm) => Some(fm),
                _ => None,
            })
            .collect()
    }

    pub fn group_mods(&self) -> Vec<GroupMod> {
        self.received()
            .into_iter()
            .filter_map(|e| match e.message {
                OfMessage::GroupMod(gm) => Some(gm),
                _ => None,
            })
            .collect()
    }
}
