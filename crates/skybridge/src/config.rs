//! Gateway configuration file.
//!
//! Every field is optional in the file; missing values take the library
//! defaults. Durations are given in milliseconds.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use skybridge_bridge::BridgeConfig;
use skybridge_stream::{FrameBufferConfig, PublishPolicy, StreamConfig};
use skybridge_transport::SerialConfig;

use crate::exit::{io_error, CliError, CliResult, DATA_INVALID};

/// Replay rate used for a frame directory when none is configured.
pub const DEFAULT_CAPTURE_FPS: u32 = 15;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    pub serial: SerialSection,
    pub telemetry: TelemetrySection,
    pub stream: StreamSection,
    pub capture: CaptureSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SerialSection {
    /// Device path; the bridge is not started without one.
    pub path: Option<String>,
    pub baud_rate: u32,
    pub read_timeout_ms: u64,
}

impl Default for SerialSection {
    fn default() -> Self {
        let defaults = SerialConfig::default();
        Self {
            path: None,
            baud_rate: defaults.baud_rate,
            read_timeout_ms: millis(defaults.read_timeout),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TelemetrySection {
    pub bind: SocketAddr,
    pub max_endpoints: usize,
    pub endpoint_timeout_ms: u64,
    pub vehicle_timeout_ms: u64,
    pub sweep_interval_ms: u64,
}

impl Default for TelemetrySection {
    fn default() -> Self {
        let defaults = BridgeConfig::default();
        Self {
            bind: defaults.bind_addr,
            max_endpoints: defaults.max_endpoints,
            endpoint_timeout_ms: millis(defaults.endpoint_timeout),
            vehicle_timeout_ms: millis(defaults.vehicle_timeout),
            sweep_interval_ms: millis(defaults.sweep_interval),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StreamSection {
    pub enabled: bool,
    pub bind: SocketAddr,
    pub max_clients: usize,
    pub poll_interval_ms: u64,
    pub frame_capacity: usize,
    pub policy: PublishPolicy,
}

impl Default for StreamSection {
    fn default() -> Self {
        let server = StreamConfig::default();
        let buffer = FrameBufferConfig::default();
        Self {
            enabled: true,
            bind: server.bind_addr,
            max_clients: server.max_clients,
            poll_interval_ms: millis(server.poll_interval),
            frame_capacity: buffer.capacity,
            policy: buffer.policy,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CaptureSection {
    /// Directory of JPEG files replayed as the camera feed.
    pub dir: Option<PathBuf>,
    pub fps: u32,
}

impl Default for CaptureSection {
    fn default() -> Self {
        Self {
            dir: None,
            fps: DEFAULT_CAPTURE_FPS,
        }
    }
}

impl GatewayConfig {
    pub fn load(path: &Path) -> CliResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| io_error(&format!("failed to read {}", path.display()), err))?;
        Self::parse(&text).map_err(|err| {
            CliError::new(
                DATA_INVALID,
                format!("invalid config {}: {}", path.display(), err.message),
            )
        })
    }

    pub fn parse(text: &str) -> CliResult<Self> {
        serde_json::from_str(text).map_err(|err| CliError::new(DATA_INVALID, err.to_string()))
    }

    pub fn serial_config(&self) -> Option<SerialConfig> {
        self.serial.path.as_ref().map(|path| SerialConfig {
            path: path.clone(),
            baud_rate: self.serial.baud_rate,
            read_timeout: Duration::from_millis(self.serial.read_timeout_ms),
        })
    }

    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            bind_addr: self.telemetry.bind,
            max_endpoints: self.telemetry.max_endpoints,
            endpoint_timeout: Duration::from_millis(self.telemetry.endpoint_timeout_ms),
            vehicle_timeout: Duration::from_millis(self.telemetry.vehicle_timeout_ms),
            sweep_interval: Duration::from_millis(self.telemetry.sweep_interval_ms),
            ..BridgeConfig::default()
        }
    }

    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            bind_addr: self.stream.bind,
            max_clients: self.stream.max_clients,
            poll_interval: Duration::from_millis(self.stream.poll_interval_ms),
            ..StreamConfig::default()
        }
    }

    pub fn frame_buffer_config(&self) -> FrameBufferConfig {
        FrameBufferConfig {
            capacity: self.stream.frame_capacity,
            policy: self.stream.policy,
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_matches_library_defaults() {
        let config = GatewayConfig::parse("{}").unwrap();
        assert_eq!(config, GatewayConfig::default());
        assert_eq!(config.bridge_config(), BridgeConfig::default());
        assert_eq!(config.stream_config(), StreamConfig::default());
        assert_eq!(config.frame_buffer_config(), FrameBufferConfig::default());
        assert!(config.serial_config().is_none());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = GatewayConfig::parse(
            r#"{
                "serial": { "path": "/dev/ttyACM0", "baud_rate": 921600 },
                "telemetry": { "bind": "0.0.0.0:14555", "max_endpoints": 8 },
                "stream": { "policy": { "wait_up_to": 20 } }
            }"#,
        )
        .unwrap();

        let serial = config.serial_config().unwrap();
        assert_eq!(serial.path, "/dev/ttyACM0");
        assert_eq!(serial.baud_rate, 921_600);
        assert_eq!(serial.read_timeout, SerialConfig::default().read_timeout);

        let bridge = config.bridge_config();
        assert_eq!(bridge.bind_addr.port(), 14555);
        assert_eq!(bridge.max_endpoints, 8);
        assert_eq!(bridge.endpoint_timeout, Duration::from_secs(30));

        assert_eq!(
            config.frame_buffer_config().policy,
            PublishPolicy::WaitUpTo(Duration::from_millis(20))
        );
        assert!(config.stream.enabled);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = GatewayConfig::parse(r#"{ "telemetry": { "port": 14550 } }"#).unwrap_err();
        assert_eq!(err.code, DATA_INVALID);
    }

    #[test]
    fn missing_file_is_reported() {
        let err = GatewayConfig::load(Path::new("/nonexistent/skybridge.json")).unwrap_err();
        assert!(err.message.contains("/nonexistent/skybridge.json"));
    }
}
