// Mesh service — the single task that owns the router
//
// Radio sightings, handle commands and the housekeeping tick all funnel
// into one `select!` loop, so the router sees inputs strictly one at a
// time. Radio writes are spawned and never block the loop.

use crate::message::{encode_presence, MessageEnvelope, MessageType, Recipient};
use crate::routing::{FloodRouter, RouteOutcome};
use crate::store::PeerRecord;
use crate::transport::{RadioTransport, ScanObservation};
use crate::{current_timestamp_ms, FloodError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Commands that can be sent to the service task
#[derive(Debug)]
pub enum MeshCommand {
    SendMessage {
        content: String,
        receiver: Recipient,
        message_type: MessageType,
        reply: oneshot::Sender<Result<MessageEnvelope, FloodError>>,
    },
    GetMessages {
        reply: oneshot::Sender<Result<Vec<MessageEnvelope>, FloodError>>,
    },
    GetPeers {
        reply: oneshot::Sender<Vec<PeerRecord>>,
    },
    RenamePeer {
        id: String,
        name: String,
        reply: oneshot::Sender<Result<PeerRecord, FloodError>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to communicate with the running service task
#[derive(Clone)]
pub struct MeshHandle {
    device_id: String,
    command_tx: mpsc::Sender<MeshCommand>,
}

impl MeshHandle {
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Author a message. Resolves once it has been persisted.
    pub async fn send_message(
        &self,
        content: &str,
        receiver: Recipient,
        message_type: MessageType,
    ) -> Result<MessageEnvelope, FloodError> {
        self.request(|reply| MeshCommand::SendMessage {
            content: content.to_string(),
            receiver,
            message_type,
            reply,
        })
        .await?
    }

    /// Stored messages, newest first
    pub async fn messages(&self) -> Result<Vec<MessageEnvelope>, FloodError> {
        self.request(|reply| MeshCommand::GetMessages { reply }).await?
    }

    pub async fn peers(&self) -> Result<Vec<PeerRecord>, FloodError> {
        self.request(|reply| MeshCommand::GetPeers { reply }).await
    }

    pub async fn rename_peer(&self, id: &str, name: &str) -> Result<PeerRecord, FloodError> {
        self.request(|reply| MeshCommand::RenamePeer {
            id: id.to_string(),
            name: name.to_string(),
            reply,
        })
        .await?
    }

    /// Stop scanning and end the service task
    pub async fn shutdown(&self) -> Result<(), FloodError> {
        self.request(|reply| MeshCommand::Shutdown { reply }).await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> MeshCommand,
    ) -> Result<T, FloodError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(command(reply_tx))
            .await
            .map_err(|_| FloodError::NotRunning)?;
        reply_rx.await.map_err(|_| FloodError::NotRunning)
    }
}

pub struct MeshService;

impl MeshService {
    /// Start scanning, advertise presence and spawn the service loop.
    ///
    /// Timing and channel sizes come from the router's config. Radio
    /// failures here are logged; the service still runs so local sends
    /// keep working.
    pub async fn start(
        router: FloodRouter,
        radio: Arc<dyn RadioTransport>,
    ) -> Result<MeshHandle, FloodError> {
        let config = router.config().clone();
        let device_id = router.device_id().to_string();
        let presence = encode_presence(&device_id)?;

        let (observation_tx, observation_rx) = mpsc::channel(config.observation_buffer);
        if let Err(e) = radio.start_scan(observation_tx).await {
            warn!("Failed to start scanning: {}", e);
        }
        if let Err(e) = radio.advertise_presence(presence.clone()).await {
            warn!("Failed to advertise presence: {}", e);
        }

        let (command_tx, command_rx) = mpsc::channel(config.command_buffer);
        let housekeeping = Duration::from_millis(config.housekeeping_interval_ms);

        tokio::spawn(run(
            router,
            radio,
            presence,
            observation_rx,
            command_rx,
            housekeeping,
        ));

        info!("Mesh service started for {}", device_id);
        Ok(MeshHandle {
            device_id,
            command_tx,
        })
    }
}

async fn run(
    mut router: FloodRouter,
    radio: Arc<dyn RadioTransport>,
    presence: Vec<u8>,
    mut observation_rx: mpsc::Receiver<ScanObservation>,
    mut command_rx: mpsc::Receiver<MeshCommand>,
    housekeeping: Duration,
) {
    let mut tick = tokio::time::interval(housekeeping);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately
    tick.tick().await;

    let mut shutdown_reply = None;
    loop {
        tokio::select! {
            Some(observation) = observation_rx.recv() => {
                let now = current_timestamp_ms();
                let outcome = router.on_raw_advertisement(&observation.payload, now);
                if let Some(payload) = outcome.relay_payload() {
                    spawn_broadcast(&radio, payload.to_vec());
                }
            }

            command = command_rx.recv() => {
                let Some(command) = command else {
                    debug!("All mesh handles dropped");
                    break;
                };
                if let MeshCommand::Shutdown { reply } = command {
                    shutdown_reply = Some(reply);
                    break;
                }
                handle_command(&mut router, &radio, command);
            }

            _ = tick.tick() => {
                router.housekeeping(current_timestamp_ms());
                spawn_presence(&radio, presence.clone());
            }
        }
    }

    if let Err(e) = radio.stop_scan().await {
        warn!("Failed to stop scanning: {}", e);
    }
    info!("Mesh service for {} shutting down", router.device_id());
    if let Some(reply) = shutdown_reply {
        let _ = reply.send(());
    }
}

fn handle_command(router: &mut FloodRouter, radio: &Arc<dyn RadioTransport>, command: MeshCommand) {
    match command {
        MeshCommand::SendMessage {
            content,
            receiver,
            message_type,
            reply,
        } => {
            let result = router
                .send_message(&content, receiver, message_type, current_timestamp_ms())
                .and_then(|outcome| {
                    if let Some(payload) = outcome.relay_payload() {
                        spawn_broadcast(radio, payload.to_vec());
                    }
                    match outcome {
                        RouteOutcome::Accepted { envelope, .. } => Ok(envelope),
                        other => Err(FloodError::InvalidInput(format!(
                            "message was not accepted: {:?}",
                            other
                        ))),
                    }
                });
            let _ = reply.send(result);
        }

        MeshCommand::GetMessages { reply } => {
            let _ = reply.send(router.messages().all().map_err(FloodError::from));
        }

        MeshCommand::GetPeers { reply } => {
            let _ = reply.send(router.peers());
        }

        MeshCommand::RenamePeer { id, name, reply } => {
            let _ = reply.send(router.rename_peer(&id, &name));
        }

        MeshCommand::Shutdown { reply } => {
            let _ = reply.send(());
        }
    }
}

fn spawn_broadcast(radio: &Arc<dyn RadioTransport>, payload: Vec<u8>) {
    let radio = radio.clone();
    tokio::spawn(async move {
        if let Err(e) = radio.broadcast(payload).await {
            warn!("Broadcast failed: {}", e);
        }
    });
}

fn spawn_presence(radio: &Arc<dyn RadioTransport>, payload: Vec<u8>) {
    let radio = radio.clone();
    tokio::spawn(async move {
        if let Err(e) = radio.advertise_presence(payload).await {
            debug!("Presence advertisement failed: {}", e);
        }
    });
}
