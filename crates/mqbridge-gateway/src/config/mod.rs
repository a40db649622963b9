//! Bridge config loader (strict parsing + environment overrides).

pub mod schema;

use std::fs;
use std::io::ErrorKind;

use mqbridge_core::error::{BridgeError, Result};

pub use schema::{BridgeConfig, BrokerSection, ControlSection, GatewaySection, TopicSection};

/// Default config file name, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "mqbridge.yaml";

/// Env var holding an alternate config path.
pub const CONFIG_PATH_ENV: &str = "MQBRIDGE_CONFIG";

pub fn load_from_file(path: &str) -> Result<BridgeConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| BridgeError::BadConfig(format!("read config {path} failed: {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<BridgeConfig> {
    let cfg: BridgeConfig = serde_yaml::from_str(s)
        .map_err(|e| BridgeError::BadConfig(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Process configuration: file (or built-in defaults when the default file is
/// absent), then environment overrides, then validation.
pub fn load_from_env() -> Result<BridgeConfig> {
    let explicit = std::env::var(CONFIG_PATH_ENV).ok();
    let path = explicit.as_deref().unwrap_or(DEFAULT_CONFIG_PATH);

    let mut cfg = match fs::read_to_string(path) {
        Ok(s) => load_from_str(&s)?,
        Err(e) if e.kind() == ErrorKind::NotFound && explicit.is_none() => {
            tracing::info!(path, "no config file, using defaults");
            BridgeConfig::default()
        }
        Err(e) => {
            return Err(BridgeError::BadConfig(format!("read config {path} failed: {e}")));
        }
    };

    apply_env(&mut cfg, |k| std::env::var(k).ok())?;
    cfg.validate()?;
    Ok(cfg)
}

/// Apply environment overrides through `lookup` (injected for tests).
///
/// - `PORT`: listen on `0.0.0.0:<PORT>`
/// - `MQBRIDGE_LISTEN`: full listen address (wins over `PORT`)
/// - `MQBRIDGE_BROKER_HOST`, `MQBRIDGE_BROKER_PORT`
pub fn apply_env(cfg: &mut BridgeConfig, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
    if let Some(port) = lookup("PORT") {
        let port: u16 = port
            .trim()
            .parse()
            .map_err(|e| BridgeError::BadConfig(format!("PORT must be a port number: {e}")))?;
        cfg.gateway.listen = format!("0.0.0.0:{port}");
    }
    if let Some(listen) = lookup("MQBRIDGE_LISTEN") {
        cfg.gateway.listen = listen;
    }
    if let Some(host) = lookup("MQBRIDGE_BROKER_HOST") {
        cfg.broker.host = host;
    }
    if let Some(port) = lookup("MQBRIDGE_BROKER_PORT") {
        cfg.broker.port = port.trim().parse().map_err(|e| {
            BridgeError::BadConfig(format!("MQBRIDGE_BROKER_PORT must be a port number: {e}"))
        })?;
    }
    Ok(())
}
