//! GatewayActor - Translates between machines and the internal topics
//!
//! ```text
//!   uplink (native units) ──► standardize ──► persist ──► machine_data (canonical units)
//!   control_commands ───────► persist ──► destandardize ──► encode ──► push_actuator
//!   side-channel alert ─────► persist ──► encode ──► push_alert
//! ```
//!
//! One inbound message is handled at a time, in arrival order. Every failure is logged and the
//! message dropped; persistence failures never stop forwarding.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, instrument, trace, warn};

use super::messages::{
    ControlCommand, CriticalAlert, DownlinkEnvelope, GatewayCommand, GatewayStats,
    MachineDataMessage, UplinkMessage,
};
use super::storage::StorageHandle;
use crate::codec::{self, DownlinkFrame};
use crate::error::{LoopError, LoopResult};
use crate::storage::{AlertRow, AuditRecord, ControlRow, MachineDataRow};
use crate::topics::{DownlinkKind, Route, Topics};
use crate::transport::{InboundMessage, Publisher, publish_json};
use crate::units::MachineCatalog;

pub struct GatewayActor {
    topics: Topics,
    catalog: MachineCatalog,
    publisher: Arc<dyn Publisher>,
    storage: StorageHandle,

    /// Messages from the subscribed topics
    inbound_rx: mpsc::Receiver<InboundMessage>,

    /// Alerts from the side-channel listener
    alert_rx: mpsc::Receiver<CriticalAlert>,

    command_rx: mpsc::Receiver<GatewayCommand>,

    stats: GatewayStats,
}

impl GatewayActor {
    /// Topic filters the gateway must be subscribed to
    pub fn subscriptions(topics: &Topics) -> Vec<String> {
        vec![topics.uplink_filter(), topics.control_commands()]
    }

    pub fn new(
        topics: Topics,
        catalog: MachineCatalog,
        publisher: Arc<dyn Publisher>,
        storage: StorageHandle,
        inbound_rx: mpsc::Receiver<InboundMessage>,
        alert_rx: mpsc::Receiver<CriticalAlert>,
        command_rx: mpsc::Receiver<GatewayCommand>,
    ) -> Self {
        Self {
            topics,
            catalog,
            publisher,
            storage,
            inbound_rx,
            alert_rx,
            command_rx,
            stats: GatewayStats::default(),
        }
    }

    #[instrument(skip(self), fields(group = %self.topics.group_id()))]
    pub async fn run(mut self) {
        debug!(
            "starting gateway actor with {} machine types",
            self.catalog.len()
        );

        loop {
            tokio::select! {
                Some(message) = self.inbound_rx.recv() => {
                    if let Err(e) = self.dispatch(message).await {
                        self.stats.dropped += 1;
                        e.log();
                    }
                }

                Some(alert) = self.alert_rx.recv() => {
                    if let Err(e) = self.handle_critical_alert(alert).await {
                        self.stats.dropped += 1;
                        e.log();
                    }
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(GatewayCommand::GetStats { respond_to }) => {
                            let _ = respond_to.send(self.stats.clone());
                        }
                        Some(GatewayCommand::Shutdown) => {
                            debug!("received shutdown command");
                            break;
                        }
                        None => {
                            warn!("command channel closed, shutting down");
                            break;
                        }
                    }
                }
            }
        }

        debug!("gateway actor stopped");
    }

    async fn dispatch(&mut self, message: InboundMessage) -> LoopResult<()> {
        match self.topics.classify(&message.topic) {
            Route::Uplink { machine_id } => {
                self.handle_uplink(&machine_id, &message.topic, &message.payload)
                    .await
            }
            Route::ControlCommands => {
                self.handle_control_command(&message.topic, &message.payload)
                    .await
            }
            Route::MachineData | Route::Unknown => {
                trace!("ignoring message on {}", message.topic);
                Ok(())
            }
        }
    }

    #[instrument(skip(self, payload))]
    async fn handle_uplink(
        &mut self,
        topic_machine_id: &str,
        topic: &str,
        payload: &[u8],
    ) -> LoopResult<()> {
        self.stats.uplinks_received += 1;

        let uplink: UplinkMessage =
            serde_json::from_slice(payload).map_err(|e| LoopError::malformed(topic, e))?;
        let raw = uplink
            .into_raw()
            .map_err(|reason| LoopError::malformed(topic, reason))?;

        if raw.machine_id != topic_machine_id {
            debug!(
                "uplink on {topic} carries machine id {}, using the payload's",
                raw.machine_id
            );
        }

        let standardized = self.catalog.standardize(&raw)?;
        let received_at = Utc::now();

        self.persist(AuditRecord::MachineData(MachineDataRow::new(
            &raw.machine_id,
            &standardized,
            &raw.radio_metadata,
            received_at,
        )));

        if raw.is_idle() {
            self.stats.idle_suppressed += 1;
            debug!("{} reports all-zero rpm, battery and consumption, not forwarding", raw.machine_id);
            return Ok(());
        }

        let message = MachineDataMessage {
            machine_id: raw.machine_id,
            timestamp: received_at,
            sensor_data: standardized,
        };
        publish_json(
            self.publisher.as_ref(),
            &self.topics.machine_data(),
            &message,
        )
        .await?;

        self.stats.telemetry_forwarded += 1;
        trace!("forwarded telemetry for {}", message.machine_id);
        Ok(())
    }

    #[instrument(skip(self, payload))]
    async fn handle_control_command(&mut self, topic: &str, payload: &[u8]) -> LoopResult<()> {
        let command: ControlCommand =
            serde_json::from_slice(payload).map_err(|e| LoopError::malformed(topic, e))?;

        self.persist(AuditRecord::Control(ControlRow::from_command(
            &command,
            Utc::now(),
        )));

        let frame = self.encode_command(&command)?;
        let downlink = self
            .topics
            .downlink(&command.machine_id, DownlinkKind::Actuator);

        publish_json(
            self.publisher.as_ref(),
            &downlink,
            &DownlinkEnvelope::single(frame.to_string()),
        )
        .await?;

        self.stats.commands_encoded += 1;
        debug!("sent {frame} to {}", command.machine_id);
        Ok(())
    }

    /// Convert the canonical adjustment to the machine's units and frame it.
    ///
    /// The adjustment goes through the same conversion as an absolute value. A result that
    /// rounds outside one signed byte is rejected by the codec and the command dropped.
    fn encode_command(&self, command: &ControlCommand) -> LoopResult<DownlinkFrame> {
        let native = match command.modify_param.quantity() {
            Some(quantity) => {
                self.catalog
                    .destandardize(&command.machine_id, command.adjustment, quantity)?
            }
            None => command.adjustment,
        };

        Ok(codec::encode_command(
            command.modify_param,
            native.round() as i64,
        )?)
    }

    #[instrument(skip(self, alert), fields(machine_id = %alert.machine_id))]
    async fn handle_critical_alert(&mut self, alert: CriticalAlert) -> LoopResult<()> {
        self.persist(AuditRecord::Alert(AlertRow::from_alert(&alert, Utc::now())));

        let frame = codec::encode_alert(alert.reason);
        let downlink = self.topics.downlink(&alert.machine_id, DownlinkKind::Alert);

        publish_json(
            self.publisher.as_ref(),
            &downlink,
            &DownlinkEnvelope::single(frame.to_string()),
        )
        .await?;

        self.stats.alerts_encoded += 1;
        debug!("sent alert {frame} to {}", alert.machine_id);
        Ok(())
    }

    /// Hand a record to storage; failures are logged, never propagated
    fn persist(&self, record: AuditRecord) {
        if let Err(e) = self.storage.record(record) {
            LoopError::from(e).log();
        }
    }
}

/// Handle for controlling the GatewayActor
#[derive(Clone)]
pub struct GatewayHandle {
    sender: mpsc::Sender<GatewayCommand>,
}

impl GatewayHandle {
    pub fn spawn(
        topics: Topics,
        catalog: MachineCatalog,
        publisher: Arc<dyn Publisher>,
        storage: StorageHandle,
        inbound_rx: mpsc::Receiver<InboundMessage>,
        alert_rx: mpsc::Receiver<CriticalAlert>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = GatewayActor::new(
            topics, catalog, publisher, storage, inbound_rx, alert_rx, cmd_rx,
        );
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    pub async fn get_stats(&self) -> Option<GatewayStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(GatewayCommand::GetStats { respond_to: tx })
            .await
            .ok()?;

        rx.await.ok()
    }

    pub async fn shutdown(&self) {
        let _ = self.sender.send(GatewayCommand::Shutdown).await;
    }
}
