pub const DEFAULT_TOPIC_ROOT: &str = "jacuzzi";

pub const PATH_ACTIVE: &str = "active";
pub const PATH_CLEAN: &str = "clean";
pub const PATH_BUBBLES: &str = "bubbles";
pub const PATH_HEATER: &str = "heater";
pub const PATH_TEMP_TARGET: &str = "temp_target";

pub const DESIRED_PATHS: [&str; 5] = [
    PATH_ACTIVE,
    PATH_CLEAN,
    PATH_BUBBLES,
    PATH_HEATER,
    PATH_TEMP_TARGET,
];

pub const PATH_LEVEL_SENSOR: &str = "level_sensor";
pub const PATH_MILLIS: &str = "millis";
pub const PATH_COUNTER: &str = "counter";
pub const PATH_TEMP: &str = "temp";
pub const PATH_CAN_ACTIVE_BUBBLES: &str = "can_active_bubbles";
pub const PATH_CAN_ACTIVE_HEATER: &str = "can_active_heater";

pub const SIM_PATH_WATER: &str = "water";
pub const SIM_PATH_PROBE: &str = "probe";

pub const STATUS_ONLINE: &str = "online";
pub const STATUS_OFFLINE: &str = "offline";

/// Topic layout for one tub: `{root}/{device}/{channel}/{path}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicLayout {
    root: String,
    device_id: String,
}

impl TopicLayout {
    pub fn new(root: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            device_id: device_id.into(),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn desired(&self, path: &str) -> String {
        format!("{}/{}/desired/{path}", self.root, self.device_id)
    }

    pub fn desired_wildcard(&self) -> String {
        self.desired("+")
    }

    pub fn state(&self, path: &str) -> String {
        format!("{}/{}/state/{path}", self.root, self.device_id)
    }

    pub fn state_wildcard(&self) -> String {
        self.state("+")
    }

    pub fn error_log(&self) -> String {
        format!("{}/{}/log/error", self.root, self.device_id)
    }

    pub fn status(&self) -> String {
        format!("{}/{}/status", self.root, self.device_id)
    }

    pub fn sim(&self, path: &str) -> String {
        format!("{}/{}/sim/{path}", self.root, self.device_id)
    }

    pub fn sim_wildcard(&self) -> String {
        self.sim("+")
    }

    /// Extract the desired-state path from "{root}/{device}/desired/{path}".
    pub fn desired_path<'a>(&self, topic: &'a str) -> Option<&'a str> {
        self.channel_path(topic, "desired")
    }

    pub fn state_path<'a>(&self, topic: &'a str) -> Option<&'a str> {
        self.channel_path(topic, "state")
    }

    /// Extract the simulation path from "{root}/{device}/sim/{path}".
    pub fn sim_path<'a>(&self, topic: &'a str) -> Option<&'a str> {
        self.channel_path(topic, "sim")
    }

    fn channel_path<'a>(&self, topic: &'a str, channel: &str) -> Option<&'a str> {
        let parts: Vec<&str> = topic.split('/').collect();
        if parts.len() == 4
            && parts[0] == self.root
            && parts[1] == self.device_id
            && parts[2] == channel
            && !parts[3].is_empty()
        {
            Some(parts[3])
        } else {
            None
        }
    }
}
