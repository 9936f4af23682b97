//! Engine settings and concurrency-cap resolution

use serde::{Deserialize, Serialize};

/// Environment variable overriding the persisted `max_active` setting
pub const MAX_ACTIVE_ENV: &str = "FILAMENT_MAX_ACTIVE";

/// Persisted engine settings
///
/// The engine never writes these; the host persists them however it
/// likes (they round-trip through serde).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineSettings {
    /// Concurrency cap; `None` defers to the default of 1
    pub max_active: Option<i32>,
}

/// Resolve the effective concurrency cap
///
/// Precedence: explicit override, then the `FILAMENT_MAX_ACTIVE`
/// environment variable, then the persisted setting, then 1. A negative
/// value means "available parallelism plus the value", floored at 1.
pub fn max_active(explicit: Option<i32>, settings: &EngineSettings) -> usize {
    let env = std::env::var(MAX_ACTIVE_ENV).ok().and_then(|raw| {
        raw.parse::<i32>()
            .map_err(|_| log::warn!("ignoring unparsable {MAX_ACTIVE_ENV}='{raw}'"))
            .ok()
    });
    resolve_max_active(explicit, env, settings)
}

fn resolve_max_active(explicit: Option<i32>, env: Option<i32>, settings: &EngineSettings) -> usize {
    let value = explicit.or(env).or(settings.max_active).unwrap_or(1);
    normalize(value)
}

fn normalize(value: i32) -> usize {
    if value < 0 {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get() as i32)
            .unwrap_or(1);
        (cores + value).max(1) as usize
    } else {
        value.max(1) as usize
    }
}
