//! Session and flashing configuration.
//!
//! Both structures can be deserialized from YAML; every field has a default,
//! so a configuration file only needs to name the values it changes.
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::probe::WireProtocol;

/// Settings for one probe connection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    pub protocol: WireProtocol,
    /// SWJ clock in kHz.
    pub speed_khz: u32,
    /// Timeout for a single packet exchange, in ms.
    #[serde(with = "duration_ms")]
    pub packet_timeout: Duration,
    /// WAIT retries done by the probe firmware before it reports WAIT.
    pub probe_wait_retry: u16,
    /// WAIT retries done by the host for a batch that made no progress.
    pub wait_retries: u32,
    /// First backoff between host WAIT retries, in µs.
    #[serde(with = "duration_us")]
    pub wait_backoff: Duration,
    /// Upper bound of the doubling backoff, in µs.
    #[serde(with = "duration_us")]
    pub wait_backoff_max: Duration,
    /// Timeout for a halt request to be confirmed, in ms.
    #[serde(with = "duration_ms")]
    pub halt_timeout: Duration,
    /// Timeout for a single step, in ms.
    #[serde(with = "duration_ms")]
    pub step_timeout: Duration,
    /// Timeout for a core register transfer, in ms.
    #[serde(with = "duration_ms")]
    pub register_timeout: Duration,
    /// Timeout for the core to come out of reset, in ms.
    #[serde(with = "duration_ms")]
    pub reset_timeout: Duration,
    /// Timeout for debug and system power-up acknowledges, in ms.
    #[serde(with = "duration_ms")]
    pub power_up_timeout: Duration,
    /// Caps the number of hardware breakpoints below what the FPB offers.
    pub hw_breakpoint_limit: Option<usize>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            protocol: WireProtocol::Swd,
            speed_khz: 1_000,
            packet_timeout: Duration::from_millis(1_000),
            probe_wait_retry: 0x80,
            wait_retries: 8,
            wait_backoff: Duration::from_micros(100),
            wait_backoff_max: Duration::from_millis(10),
            halt_timeout: Duration::from_millis(500),
            step_timeout: Duration::from_millis(100),
            register_timeout: Duration::from_millis(100),
            reset_timeout: Duration::from_millis(500),
            power_up_timeout: Duration::from_millis(1_000),
            hw_breakpoint_limit: None,
        }
    }
}

impl SessionConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }
}

/// Settings for [`Flasher::program`](crate::flashing::Flasher::program).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct FlashConfig {
    /// Additional attempts for a sector after its first failure.
    pub sector_retries: u32,
    /// Timeout for the init and uninit routines, in ms.
    #[serde(with = "duration_ms")]
    pub init_timeout: Duration,
    /// Overrides the algorithm's erase sector timeout, in ms.
    #[serde(with = "duration_ms_option")]
    pub erase_timeout: Option<Duration>,
    /// Overrides the algorithm's program page timeout, in ms.
    #[serde(with = "duration_ms_option")]
    pub program_timeout: Option<Duration>,
    /// Read back every sector after programming.
    pub verify: bool,
    /// Skip sectors which already hold the planned contents.
    pub skip_unchanged: bool,
    /// Resume the core when done instead of leaving it halted.
    pub run_after: bool,
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self {
            sector_retries: 2,
            init_timeout: Duration::from_millis(1_000),
            erase_timeout: None,
            program_timeout: None,
            verify: true,
            skip_unchanged: true,
            run_after: false,
        }
    }
}

impl FlashConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod duration_ms_option {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}

mod duration_us {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_micros() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_micros)
    }
}
