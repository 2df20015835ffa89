//! Config file handling – reads `~/.rosmqtt/config.toml` (or an explicit
//! path) into a [`BridgeConfig`].

use std::fs;
use std::path::{Path, PathBuf};

use rosmqtt_bridge::{BridgeConfig, Mqtt2RosConfig, Qos, Ros2MqttConfig};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "ROSMQTT_CONFIG";

/// Config file to use: `explicit`, else `$ROSMQTT_CONFIG`, else
/// `~/.rosmqtt/config.toml`.
pub fn config_path(explicit: Option<&str>) -> PathBuf {
    if let Some(path) = explicit {
        return PathBuf::from(path);
    }
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        return PathBuf::from(path);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Extracted for testability without mutating environment variables.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".rosmqtt").join("config.toml")
}

/// Load, apply env overrides, resolve relative paths and validate.
pub fn load(path: &Path) -> Result<BridgeConfig, String> {
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg = parse(&raw)?;
    apply_env_overrides(&mut cfg);
    cfg.resolve_paths();
    cfg.validate().map_err(|e| e.to_string())?;
    Ok(cfg)
}

pub(crate) fn parse(raw: &str) -> Result<BridgeConfig, String> {
    toml::from_str(raw).map_err(|e| format!("Failed to parse config: {}", e))
}

/// Apply `ROSMQTT_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `ROSMQTT_BROKER_HOST` | `broker.host` |
/// | `ROSMQTT_BROKER_PORT` | `broker.port` |
/// | `ROSMQTT_BROKER_USER` | `broker.user` |
/// | `ROSMQTT_BROKER_PASS` | `broker.pass` |
/// | `ROSMQTT_CLIENT_ID` | `client.id` |
pub fn apply_env_overrides(cfg: &mut BridgeConfig) {
    if let Ok(v) = std::env::var("ROSMQTT_BROKER_HOST") {
        cfg.broker.host = v;
    }
    if let Ok(v) = std::env::var("ROSMQTT_BROKER_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.broker.port = port;
    }
    if let Ok(v) = std::env::var("ROSMQTT_BROKER_USER") {
        cfg.broker.user = v;
    }
    if let Ok(v) = std::env::var("ROSMQTT_BROKER_PASS") {
        cfg.broker.pass = v;
    }
    if let Ok(v) = std::env::var("ROSMQTT_CLIENT_ID") {
        cfg.client.id = v;
    }
}

/// A starting point for a new config file: one route each way.
pub fn starter_config() -> BridgeConfig {
    let mut cfg = BridgeConfig::default();
    cfg.bridge.ros2mqtt.push(Ros2MqttConfig {
        ros_topic: "/ping/ros".to_string(),
        mqtt_topic: "pingpong/ros".to_string(),
        queue_size: 1,
        qos: Qos::AtMostOnce,
        retained: false,
        inject_timestamp: true,
    });
    cfg.bridge.mqtt2ros.push(Mqtt2RosConfig {
        mqtt_topic: "pingpong/ros".to_string(),
        ros_topic: "/pong/ros".to_string(),
        qos: Qos::AtMostOnce,
        queue_size: 1,
        latched: false,
    });
    cfg
}

/// Write `cfg` to `path`, creating parent directories.  The file may hold
/// broker credentials, so on Unix it is readable by the owner only.
pub fn save_to(cfg: &BridgeConfig, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}
