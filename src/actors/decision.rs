//! DecisionActor - Compares standardized telemetry against the healthy ranges
//!
//! Every reading on the machine_data topic is evaluated independently. Each out-of-range
//! parameter produces one ControlCommand on the control_commands topic.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, instrument, trace, warn};

use super::messages::{ControlCommand, DecisionCommand, DecisionStats, MachineDataMessage};
use crate::error::{LoopError, LoopResult};
use crate::policy::Policy;
use crate::topics::{Route, Topics};
use crate::transport::{InboundMessage, Publisher, publish_json};

pub struct DecisionActor {
    topics: Topics,
    policy: Policy,
    publisher: Arc<dyn Publisher>,
    inbound_rx: mpsc::Receiver<InboundMessage>,
    command_rx: mpsc::Receiver<DecisionCommand>,
    stats: DecisionStats,
}

impl DecisionActor {
    pub fn subscriptions(topics: &Topics) -> Vec<String> {
        vec![topics.machine_data()]
    }

    pub fn new(
        topics: Topics,
        policy: Policy,
        publisher: Arc<dyn Publisher>,
        inbound_rx: mpsc::Receiver<InboundMessage>,
        command_rx: mpsc::Receiver<DecisionCommand>,
    ) -> Self {
        Self {
            topics,
            policy,
            publisher,
            inbound_rx,
            command_rx,
            stats: DecisionStats::default(),
        }
    }

    #[instrument(skip(self), fields(group = %self.topics.group_id()))]
    pub async fn run(mut self) {
        if self.policy.is_empty() {
            warn!("no healthy ranges configured, no commands will be issued");
        }
        debug!("starting decision actor with {} ranges", self.policy.len());

        loop {
            tokio::select! {
                Some(message) = self.inbound_rx.recv() => {
                    if let Err(e) = self.handle_message(message).await {
                        self.stats.dropped += 1;
                        e.log();
                    }
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(DecisionCommand::GetStats { respond_to }) => {
                            let _ = respond_to.send(self.stats.clone());
                        }
                        Some(DecisionCommand::Shutdown) => {
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

        debug!("decision actor stopped");
    }

    async fn handle_message(&mut self, message: InboundMessage) -> LoopResult<()> {
        if self.topics.classify(&message.topic) != Route::MachineData {
            trace!("ignoring message on {}", message.topic);
            return Ok(());
        }

        let reading: MachineDataMessage = serde_json::from_slice(&message.payload)
            .map_err(|e| LoopError::malformed(&message.topic, e))?;

        self.evaluate(reading).await
    }

    #[instrument(skip(self, reading), fields(machine_id = %reading.machine_id))]
    async fn evaluate(&mut self, reading: MachineDataMessage) -> LoopResult<()> {
        if reading.sensor_data.is_idle() {
            trace!("skipping idle reading");
            return Ok(());
        }

        self.stats.readings_evaluated += 1;
        let topic = self.topics.control_commands();

        for correction in self.policy.evaluate(&reading.sensor_data) {
            debug!(
                "{} = {} out of range, adjusting by {}",
                correction.param,
                reading.sensor_data.value(correction.param),
                correction.adjustment
            );

            let command = ControlCommand {
                machine_id: reading.machine_id.clone(),
                modify_param: correction.param,
                adjustment: correction.adjustment,
                timestamp: Utc::now(),
            };
            publish_json(self.publisher.as_ref(), &topic, &command).await?;
            self.stats.commands_emitted += 1;
        }

        Ok(())
    }
}

/// Handle for controlling the DecisionActor
#[derive(Clone)]
pub struct DecisionHandle {
    sender: mpsc::Sender<DecisionCommand>,
}

impl DecisionHandle {
    pub fn spawn(
        topics: Topics,
        policy: Policy,
        publisher: Arc<dyn Publisher>,
        inbound_rx: mpsc::Receiver<InboundMessage>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = DecisionActor::new(topics, policy, publisher, inbound_rx, cmd_rx);
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    pub async fn get_stats(&self) -> Option<DecisionStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(DecisionCommand::GetStats { respond_to: tx })
            .await
            .ok()?;

        rx.await.ok()
    }

    pub async fn shutdown(&self) {
        let _ = self.sender.send(DecisionCommand::Shutdown).await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::policy::HealthyRange;
    use crate::transport::MemoryBus;
    use crate::{Parameter, StandardizedTelemetry};
    use pretty_assertions::assert_eq;

    fn policy() -> Policy {
        Policy::new([
            (
                Parameter::CoolantTemp,
                HealthyRange {
                    low: 90.0,
                    high: 105.0,
                    ideal: 97.0,
                },
            ),
            (
                Parameter::OilPressure,
                HealthyRange {
                    low: 2.5,
                    high: 5.0,
                    ideal: 3.5,
                },
            ),
        ])
    }

    fn reading(coolant_temp: f64, oil_pressure: f64, rpm: f64) -> Vec<u8> {
        serde_json::to_vec(&MachineDataMessage {
            machine_id: "M1".to_string(),
            timestamp: Utc::now(),
            sensor_data: StandardizedTelemetry {
                machine_type: "A23X".to_string(),
                rpm,
                coolant_temp,
                oil_pressure,
                battery_potential: if rpm == 0.0 { 0.0 } else { 12.8 },
                consumption: if rpm == 0.0 { 0.0 } else { 25.0 },
            },
        })
        .unwrap()
    }

    fn spawn(bus: &MemoryBus, topics: &Topics) -> DecisionHandle {
        let inbound_rx = bus.subscribe(DecisionActor::subscriptions(topics));
        DecisionHandle::spawn(topics.clone(), policy(), Arc::new(bus.clone()), inbound_rx)
    }

    fn commands(bus: &MemoryBus, topics: &Topics) -> Vec<ControlCommand> {
        bus.published_on(&topics.control_commands())
            .iter()
            .map(|payload| serde_json::from_slice(payload).unwrap())
            .collect()
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_in_range_reading_issues_nothing() {
        let bus = MemoryBus::new();
        let topics = Topics::new("19");
        let decision = spawn(&bus, &topics);

        bus.publish(&topics.machine_data(), reading(97.0, 3.0, 1100.0))
            .await
            .unwrap();
        settle().await;

        assert!(commands(&bus, &topics).is_empty());
        assert_eq!(decision.get_stats().await.unwrap().readings_evaluated, 1);
    }

    #[tokio::test]
    async fn test_one_command_per_out_of_range_parameter() {
        let bus = MemoryBus::new();
        let topics = Topics::new("19");
        let decision = spawn(&bus, &topics);

        bus.publish(&topics.machine_data(), reading(110.0, 1.2, 1100.0))
            .await
            .unwrap();
        settle().await;

        let issued = commands(&bus, &topics);
        assert_eq!(issued.len(), 2);

        assert_eq!(issued[0].machine_id, "M1");
        assert_eq!(issued[0].modify_param, Parameter::CoolantTemp);
        assert_eq!(issued[0].adjustment, -10.0);
        assert_eq!(issued[1].modify_param, Parameter::OilPressure);
        assert_eq!(issued[1].adjustment, 2.0);

        assert_eq!(decision.get_stats().await.unwrap().commands_emitted, 2);
    }

    #[tokio::test]
    async fn test_idle_reading_is_not_evaluated() {
        let bus = MemoryBus::new();
        let topics = Topics::new("19");
        let decision = spawn(&bus, &topics);

        bus.publish(&topics.machine_data(), reading(20.0, 0.0, 0.0))
            .await
            .unwrap();
        settle().await;

        assert!(commands(&bus, &topics).is_empty());
        assert_eq!(decision.get_stats().await.unwrap().readings_evaluated, 0);
    }

    #[tokio::test]
    async fn test_reading_with_extra_fields_is_rejected() {
        let bus = MemoryBus::new();
        let topics = Topics::new("19");
        let decision = spawn(&bus, &topics);

        let payload = serde_json::json!({
            "machine_id": "M1",
            "timestamp": "2025-03-01T10:00:00",
            "sensor_data": {
                "machine_type": "A23X", "rpm": 1100.0, "coolant_temp": 120.0,
                "oil_pressure": 3.0, "battery_potential": 12.8, "consumption": 25.0,
                "fuel_level": 0.5
            }
        });
        bus.publish(&topics.machine_data(), serde_json::to_vec(&payload).unwrap())
            .await
            .unwrap();
        settle().await;

        assert!(commands(&bus, &topics).is_empty());
        assert_eq!(decision.get_stats().await.unwrap().dropped, 1);
    }

    #[tokio::test]
    async fn test_naive_timestamp_is_accepted() {
        let bus = MemoryBus::new();
        let topics = Topics::new("19");
        let _decision = spawn(&bus, &topics);

        let payload = serde_json::json!({
            "machine_id": "M7",
            "timestamp": "2025-03-01T10:00:00.123456",
            "sensor_data": {
                "machine_type": "A23X", "rpm": 1100.0, "coolant_temp": 85.0,
                "oil_pressure": 3.0, "battery_potential": 12.8, "consumption": 25.0
            }
        });
        bus.publish(&topics.machine_data(), serde_json::to_vec(&payload).unwrap())
            .await
            .unwrap();
        settle().await;

        let issued = commands(&bus, &topics);
        assert_eq!(issued.len(), 1);
        assert_eq!(issued[0].machine_id, "M7");
        assert_eq!(issued[0].adjustment, 10.0);
    }
}
