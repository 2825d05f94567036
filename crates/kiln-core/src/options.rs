//! The normalised build configuration. The fields this core actually reads
//! are concrete and typed; everything a real bundler configuration would
//! additionally carry (module rules, resolve aliases, optimisation knobs)
//! is deliberately left as an opaque bag this core never interprets.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputOptions {
    pub path: PathBuf,
    #[serde(default)]
    pub compare_before_emit: bool,
    #[serde(default)]
    pub clean: bool,
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/dist"),
            compare_before_emit: false,
            clean: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchOptions {
    #[serde(default = "default_poll_interval_ms", with = "duration_millis")]
    pub poll_interval: Duration,
    #[serde(default = "default_aggregate_timeout_ms", with = "duration_millis")]
    pub aggregate_timeout: Duration,
}

fn default_poll_interval_ms() -> Duration {
    Duration::from_millis(100)
}

fn default_aggregate_timeout_ms() -> Duration {
    Duration::from_millis(5)
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval_ms(),
            aggregate_timeout: default_aggregate_timeout_ms(),
        }
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CompilerOptions {
    pub context: PathBuf,
    #[serde(default)]
    pub output: OutputOptions,
    pub records_input_path: Option<PathBuf>,
    pub records_output_path: Option<PathBuf>,
    #[serde(default)]
    pub watch_options: WatchOptions,
    /// Everything this core doesn't interpret: module rules, resolve
    /// aliases, optimisation knobs, and so on.
    #[serde(default)]
    pub extra: serde_json::Value,
}

impl CompilerOptions {
    pub fn output_path(&self) -> &std::path::Path {
        &self.output.path
    }
}
