//! AlarmActor - Detects machines that keep needing corrections
//!
//! Each machine has a sliding window of recent control commands and a phase:
//!
//! ```text
//!   NORMAL ──(window reaches threshold)──► COOLDOWN ──(timer fires)──► NORMAL
//!             emit CriticalAlert                       clear window
//! ```
//!
//! While cooling down, commands are logged but not counted. All per-machine state and the
//! cooldown timer callbacks are serviced by this one task, so no locking is involved.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant};
use tracing::{debug, info, instrument, trace, warn};

use super::messages::{AlarmCommand, AlarmState, ControlCommand, CriticalAlert};
use crate::codec::AlertReason;
use crate::config::AlarmConfig;
use crate::error::{LoopError, LoopResult};
use crate::topics::{Route, Topics};
use crate::transport::{AlertSink, InboundMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Normal,
    Cooldown,
}

#[derive(Debug)]
struct MachineAlarm {
    window: VecDeque<Instant>,
    phase: Phase,

    /// Bumped every time a cooldown is armed; a timer only applies to its own generation
    generation: u64,

    alerts_raised: u64,
}

impl MachineAlarm {
    fn new() -> Self {
        Self {
            window: VecDeque::new(),
            phase: Phase::Normal,
            generation: 0,
            alerts_raised: 0,
        }
    }

    /// Drop every entry older than `window` relative to `now`
    fn evict(&mut self, now: Instant, window: time::Duration) {
        while let Some(&oldest) = self.window.front() {
            if now.duration_since(oldest) > window {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }
}

pub struct AlarmActor {
    topics: Topics,
    config: AlarmConfig,
    sink: Arc<dyn AlertSink>,
    machines: HashMap<String, MachineAlarm>,

    inbound_rx: mpsc::Receiver<InboundMessage>,
    command_rx: mpsc::Receiver<AlarmCommand>,

    /// Cooldown timers report back through here
    timer_tx: mpsc::Sender<AlarmCommand>,
    timer_rx: mpsc::Receiver<AlarmCommand>,
}

impl AlarmActor {
    pub fn subscriptions(topics: &Topics) -> Vec<String> {
        vec![topics.control_commands()]
    }

    pub fn new(
        topics: Topics,
        config: AlarmConfig,
        sink: Arc<dyn AlertSink>,
        inbound_rx: mpsc::Receiver<InboundMessage>,
        command_rx: mpsc::Receiver<AlarmCommand>,
    ) -> Self {
        let (timer_tx, timer_rx) = mpsc::channel(32);

        Self {
            topics,
            config,
            sink,
            machines: HashMap::new(),
            inbound_rx,
            command_rx,
            timer_tx,
            timer_rx,
        }
    }

    #[instrument(skip(self), fields(group = %self.topics.group_id()))]
    pub async fn run(mut self) {
        debug!(
            "starting alarm actor: {} commands in {}s, {}s cooldown",
            self.config.threshold_count, self.config.window_seconds, self.config.cooldown_seconds
        );

        loop {
            tokio::select! {
                Some(message) = self.inbound_rx.recv() => {
                    if let Err(e) = self.handle_message(message) {
                        e.log();
                    }
                }

                Some(cmd) = self.timer_rx.recv() => {
                    self.handle_command(cmd);
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(AlarmCommand::Shutdown) => {
                            debug!("received shutdown command");
                            break;
                        }
                        Some(cmd) => self.handle_command(cmd),
                        None => {
                            warn!("command channel closed, shutting down");
                            break;
                        }
                    }
                }
            }
        }

        debug!("alarm actor stopped");
    }

    fn handle_message(&mut self, message: InboundMessage) -> LoopResult<()> {
        if self.topics.classify(&message.topic) != Route::ControlCommands {
            trace!("ignoring message on {}", message.topic);
            return Ok(());
        }

        let command: ControlCommand = serde_json::from_slice(&message.payload)
            .map_err(|e| LoopError::malformed(&message.topic, e))?;

        self.record_command(&command.machine_id, Instant::now());
        Ok(())
    }

    fn handle_command(&mut self, cmd: AlarmCommand) {
        match cmd {
            AlarmCommand::GetState {
                machine_id,
                respond_to,
            } => {
                let state = self.machines.get(&machine_id).map(|alarm| AlarmState {
                    machine_id: machine_id.clone(),
                    window_len: alarm.window.len(),
                    cooling_down: alarm.phase == Phase::Cooldown,
                    alerts_raised: alarm.alerts_raised,
                });
                let _ = respond_to.send(state);
            }
            AlarmCommand::CooldownExpired {
                machine_id,
                generation,
            } => self.end_cooldown(&machine_id, generation),
            AlarmCommand::Shutdown => {}
        }
    }

    #[instrument(skip(self, now))]
    fn record_command(&mut self, machine_id: &str, now: Instant) {
        let window = self.config.window();
        let threshold = self.config.threshold_count;

        let alarm = self
            .machines
            .entry(machine_id.to_string())
            .or_insert_with(MachineAlarm::new);

        if alarm.phase == Phase::Cooldown {
            debug!("command during cooldown, not counted");
            return;
        }

        alarm.window.push_back(now);
        alarm.evict(now, window);
        trace!("{} commands in window", alarm.window.len());

        if alarm.window.len() < threshold {
            return;
        }

        alarm.phase = Phase::Cooldown;
        alarm.generation += 1;
        alarm.alerts_raised += 1;
        let generation = alarm.generation;

        info!(
            "{} commands within {}s, raising critical alert",
            alarm.window.len(),
            self.config.window_seconds
        );

        self.send_alert(CriticalAlert::new(
            machine_id,
            AlertReason::HighControlAlarmRate,
        ));
        self.arm_cooldown(machine_id.to_string(), generation);
    }

    /// Delivery runs detached: a failure is logged, never retried, and never holds up the
    /// phase change.
    fn send_alert(&self, alert: CriticalAlert) {
        let sink = Arc::clone(&self.sink);

        tokio::spawn(async move {
            if let Err(e) = sink.send_alert(&alert).await {
                warn!("failed to deliver alert for {}: {e}", alert.machine_id);
            }
        });
    }

    fn arm_cooldown(&self, machine_id: String, generation: u64) {
        let cooldown = self.config.cooldown();
        let timer_tx = self.timer_tx.clone();

        tokio::spawn(async move {
            time::sleep(cooldown).await;
            let _ = timer_tx
                .send(AlarmCommand::CooldownExpired {
                    machine_id,
                    generation,
                })
                .await;
        });
    }

    fn end_cooldown(&mut self, machine_id: &str, generation: u64) {
        let Some(alarm) = self.machines.get_mut(machine_id) else {
            return;
        };

        if alarm.phase != Phase::Cooldown || alarm.generation != generation {
            trace!("stale cooldown timer for {machine_id}");
            return;
        }

        alarm.window.clear();
        alarm.phase = Phase::Normal;
        debug!("cooldown over for {machine_id}, window cleared");
    }
}

/// Handle for controlling the AlarmActor
#[derive(Clone)]
pub struct AlarmHandle {
    sender: mpsc::Sender<AlarmCommand>,
}

impl AlarmHandle {
    pub fn spawn(
        topics: Topics,
        config: AlarmConfig,
        sink: Arc<dyn AlertSink>,
        inbound_rx: mpsc::Receiver<InboundMessage>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = AlarmActor::new(topics, config, sink, inbound_rx, cmd_rx);
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Current window and phase for a machine, `None` if it has never been seen
    pub async fn get_state(&self, machine_id: &str) -> Option<AlarmState> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(AlarmCommand::GetState {
                machine_id: machine_id.to_string(),
                respond_to: tx,
            })
            .await
            .ok()?;

        rx.await.ok().flatten()
    }

    pub async fn shutdown(&self) {
        let _ = self.sender.send(AlarmCommand::Shutdown).await;
    }
}
