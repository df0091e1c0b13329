//! Types for use when configuring kestrel modules.

use crate::*;

/// helper transcode function
fn tc<S: serde::Serialize, D: serde::de::DeserializeOwned>(
    s: &S,
) -> FetchResult<D> {
    serde_json::from_str(
        &serde_json::to_string(s)
            .map_err(|e| FetchError::other_src("encode", e))?,
    )
    .map_err(|e| FetchError::other_src("decode", e))
}

/// Denotes a type used to configure a specific kestrel module.
///
/// These types hold configuration that cannot change at runtime, the likes
/// of which would be loaded from an options file at startup: cache sizes,
/// timeouts, proxy settings. The wrapper struct's single field name is the
/// key the section is stored under, so a module config round trips as one
/// named object in the file.
///
/// Config files are edited by humans; deserialization must tolerate
/// missing properties by falling back to sane defaults (mark the structs
/// `#[serde(default)]`).
pub trait ModConfig:
    'static
    + Sized
    + Default
    + std::fmt::Debug
    + serde::Serialize
    + serde::de::DeserializeOwned
{
}

/// Kestrel configuration.
#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct Config(serde_json::Map<String, serde_json::Value>);

impl Config {
    /// When kestrel is generating a default or example configuration, it
    /// passes a mutable reference of this struct to every configured
    /// module factory, which calls this to contribute its own section.
    /// Refuses to overwrite a section that already exists.
    pub fn set_module_config<M: ModConfig>(
        &mut self,
        m: &M,
    ) -> FetchResult<()> {
        let value: serde_json::Value = tc(m)?;
        let serde_json::Value::Object(map) = value else {
            return Err(FetchError::other(
                "module config must serialize to an object",
            ));
        };
        for (key, value) in map {
            if self.0.contains_key(&key) {
                return Err(FetchError::other(format!(
                    "refusing to overwrite conflicting module config: {key}"
                )));
            }
            self.0.insert(key, value);
        }
        Ok(())
    }

    /// When kestrel is initializing, every module extracts its section
    /// through this. A section missing from the loaded config yields the
    /// module's defaults; extraneous properties are ignored.
    pub fn get_module_config<M: ModConfig>(&self) -> FetchResult<M> {
        tc(&self.0)
    }
}
