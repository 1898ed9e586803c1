use super::messages::{AudioFrameMessage, ControlAction, ControlMessage, EventMessage, StartMessage};
use crate::audio::AudioEncoding;
use crate::error::{TransportError, TransportResult};
use crate::transport::{ConnectionMode, EventSink, StartParams, Transport, TransportHandle};
use anyhow::{Context, Result};
use async_nats::Client;
use async_trait::async_trait;
use base64::Engine;
use futures::stream::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const START_SUBJECT: &str = "asr.control.start";

/// One NATS connection carrying audio and events for its sessions
struct Connection {
    client: Client,
    session_id: Option<String>,
    sequence: u32,
    /// Event forwarders keyed by session id
    forwarders: HashMap<String, JoinHandle<()>>,
}

/// Recognition service reached over NATS.
///
/// Control requests go over the shared connection; every handle opens its
/// own connection for audio frames and event subscriptions.
pub struct NatsTransport {
    url: String,
    control: Client,
    sink: EventSink,
    connections: Mutex<HashMap<u64, Connection>>,
    next_id: AtomicU64,
}

impl NatsTransport {
    /// Connect to NATS server
    pub async fn connect(url: &str, sink: EventSink) -> Result<Self> {
        info!("Connecting to NATS at {}", url);

        let control = async_nats::connect(url)
            .await
            .context("Failed to connect to NATS")?;

        info!("Connected to NATS successfully");

        Ok(Self {
            url: url.to_string(),
            control,
            sink,
            connections: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, Connection>> {
        self.connections.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn client(&self, handle: &TransportHandle) -> TransportResult<Client> {
        self.lock()
            .get(&handle.id)
            .map(|connection| connection.client.clone())
            .ok_or(TransportError::UnknownHandle(handle.id))
    }

    async fn publish<T: serde::Serialize>(&self, client: &Client, subject: String, message: &T) -> TransportResult<()> {
        let payload = serde_json::to_vec(message)?;
        client
            .publish(subject, payload.into())
            .await
            .map_err(|e| TransportError::Nats(e.to_string()))
    }

    async fn control(&self, handle: &TransportHandle, action: ControlAction) -> TransportResult<String> {
        let session_id = self
            .lock()
            .get(&handle.id)
            .ok_or(TransportError::UnknownHandle(handle.id))?
            .session_id
            .clone()
            .ok_or(TransportError::Closed)?;

        let message = ControlMessage::new(&session_id, action);
        self.publish(&self.control, action.subject().to_string(), &message)
            .await?;
        Ok(session_id)
    }

    /// Forward `asr.event.<session>` messages to the dispatcher
    fn spawn_forwarder(&self, mut subscriber: async_nats::Subscriber, session_id: String) -> JoinHandle<()> {
        let sink = self.sink.clone();

        tokio::spawn(async move {
            while let Some(msg) = subscriber.next().await {
                match serde_json::from_slice::<EventMessage>(&msg.payload) {
                    Ok(event) => {
                        if sink.send(event.into_event()).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Failed to parse event for {}: {}", session_id, e),
                }
            }
            debug!("Event forwarder for {} stopped", session_id);
        })
    }
}

#[async_trait]
impl Transport for NatsTransport {
    async fn create(&self, session_id: &str, mode: ConnectionMode) -> TransportResult<TransportHandle> {
        let client = async_nats::connect(self.url.as_str())
            .await
            .map_err(|e| TransportError::Create(format!("{}: {}", session_id, e)))?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.lock().insert(
            id,
            Connection {
                client,
                session_id: None,
                sequence: 0,
                forwarders: HashMap::new(),
            },
        );

        debug!("Opened NATS connection {} for {}", id, session_id);
        Ok(TransportHandle { id, mode })
    }

    async fn start(&self, handle: &TransportHandle, session_id: &str, params: &StartParams) -> TransportResult<()> {
        let client = self.client(handle)?;

        // Subscribe before publishing so the acknowledgment cannot be missed
        let subject = format!("asr.event.{}", session_id);
        let subscriber = client
            .subscribe(subject.clone())
            .await
            .map_err(|e| TransportError::Rejected(e.to_string()))?;
        let forwarder = self.spawn_forwarder(subscriber, session_id.to_string());

        {
            let mut connections = self.lock();
            let Some(connection) = connections.get_mut(&handle.id) else {
                forwarder.abort();
                return Err(TransportError::UnknownHandle(handle.id));
            };
            connection.session_id = Some(session_id.to_string());
            connection.sequence = 0;
            connection.forwarders.insert(session_id.to_string(), forwarder);
        }

        let message = StartMessage::new(session_id, params);
        self.publish(&self.control, START_SUBJECT.to_string(), &message)
            .await
            .map_err(|e| TransportError::Rejected(e.to_string()))?;

        debug!("Requested start of {} (events on {})", session_id, subject);
        Ok(())
    }

    async fn send_frame(&self, handle: &TransportHandle, frame: &[u8], encoding: AudioEncoding) -> TransportResult<usize> {
        let (client, session_id, sequence) = {
            let mut connections = self.lock();
            let connection = connections
                .get_mut(&handle.id)
                .ok_or(TransportError::UnknownHandle(handle.id))?;
            let session_id = connection.session_id.clone().ok_or(TransportError::Closed)?;
            let sequence = connection.sequence;
            connection.sequence += 1;
            (connection.client.clone(), session_id, sequence)
        };

        let message = AudioFrameMessage {
            session_id: session_id.clone(),
            sequence,
            encoding: encoding.as_str().to_string(),
            audio: base64::engine::general_purpose::STANDARD.encode(frame),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        self.publish(&client, format!("asr.audio.{}", session_id), &message)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;

        Ok(sequence as usize)
    }

    async fn stop(&self, handle: &TransportHandle) -> TransportResult<()> {
        let session_id = self.control(handle, ControlAction::Stop).await?;
        debug!("Requested stop of {}", session_id);
        Ok(())
    }

    async fn cancel(&self, handle: &TransportHandle) -> TransportResult<()> {
        let session_id = self.control(handle, ControlAction::Cancel).await?;

        // No further events for a cancelled session
        if let Some(forwarder) = self
            .lock()
            .get_mut(&handle.id)
            .and_then(|connection| connection.forwarders.remove(&session_id))
        {
            forwarder.abort();
        }
        Ok(())
    }

    async fn finish(&self, handle: &TransportHandle, session_id: &str) {
        let mut connections = self.lock();
        let Some(connection) = connections.get_mut(&handle.id) else {
            return;
        };
        if let Some(forwarder) = connection.forwarders.remove(session_id) {
            forwarder.abort();
            debug!("Dropped event subscription for {}", session_id);
        }
        if connection.session_id.as_deref() == Some(session_id) {
            connection.session_id = None;
        }
    }

    async fn release(&self, handle: TransportHandle) {
        let connection = self.lock().remove(&handle.id);
        if let Some(connection) = connection {
            for forwarder in connection.forwarders.into_values() {
                forwarder.abort();
            }
            // async-nats closes the connection once the last client clone drops
            debug!("Released NATS connection {}", handle.id);
        }
    }

    fn name(&self) -> &str {
        "nats"
    }
}
