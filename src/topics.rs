//! Topic layout for one fleet group
//!
//! ```text
//! v3/<group>@ttn/devices/<machine>/up                    raw uplink (TTN envelope)
//! <group>/internal/machine_data                          standardized telemetry
//! <group>/internal/control_commands                      control commands
//! v3/<group>@ttn/devices/<machine>/down/push_actuator    encoded control frame
//! v3/<group>@ttn/devices/<machine>/down/push_alert       encoded alert frame
//! ```

/// Which downlink a frame is pushed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownlinkKind {
    Actuator,
    Alert,
}

impl DownlinkKind {
    fn suffix(&self) -> &'static str {
        match self {
            DownlinkKind::Actuator => "push_actuator",
            DownlinkKind::Alert => "push_alert",
        }
    }
}

/// Where an inbound message belongs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Uplink { machine_id: String },
    MachineData,
    ControlCommands,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct Topics {
    group_id: String,
}

impl Topics {
    pub fn new(group_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
        }
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    fn device_prefix(&self) -> String {
        format!("v3/{}@ttn/devices/", self.group_id)
    }

    /// Wildcard filter matching every machine's uplink
    pub fn uplink_filter(&self) -> String {
        format!("{}+/up", self.device_prefix())
    }

    pub fn uplink(&self, machine_id: &str) -> String {
        format!("{}{machine_id}/up", self.device_prefix())
    }

    pub fn machine_data(&self) -> String {
        format!("{}/internal/machine_data", self.group_id)
    }

    pub fn control_commands(&self) -> String {
        format!("{}/internal/control_commands", self.group_id)
    }

    pub fn downlink(&self, machine_id: &str, kind: DownlinkKind) -> String {
        format!("{}{machine_id}/down/{}", self.device_prefix(), kind.suffix())
    }

    pub fn classify(&self, topic: &str) -> Route {
        if topic == self.machine_data() {
            return Route::MachineData;
        }
        if topic == self.control_commands() {
            return Route::ControlCommands;
        }

        let device_prefix = self.device_prefix();
        if let Some(machine_id) = topic
            .strip_prefix(device_prefix.as_str())
            .and_then(|rest| rest.strip_suffix("/up"))
            && !machine_id.is_empty()
            && !machine_id.contains('/')
        {
            return Route::Uplink {
                machine_id: machine_id.to_string(),
            };
        }

        Route::Unknown
    }
}

/// MQTT topic filter matching with `+` (one level) and `#` (remaining levels)
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(expected), Some(actual)) if expected == actual => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
