const FLEET_BROKER_HOST: &str = "FLEET_BROKER_HOST";

pub fn get_broker_host() -> Option<String> {
    std::env::var(FLEET_BROKER_HOST)
        .ok()
        .filter(|host| !host.is_empty())
}

const FLEET_BROKER_PORT: &str = "FLEET_BROKER_PORT";

pub fn get_broker_port() -> Option<u16> {
    let port_from_env = std::env::var(FLEET_BROKER_PORT);
    port_from_env.ok().and_then(|res| res.parse().ok())
}

const FLEET_GROUP_ID: &str = "FLEET_GROUP_ID";

pub fn get_group_id() -> Option<String> {
    std::env::var(FLEET_GROUP_ID)
        .ok()
        .filter(|group| !group.is_empty())
}
