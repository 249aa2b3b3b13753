//! Shared memory sizing for `run`.

use holoscan_core::paths::DEFAULT_SHM_SIZE;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// `pkg.json` resource key holding the shared memory requirement.
pub const SHARED_MEMORY_KEY: &str = "sharedMemory";

/// `--shm-size` value that defers to the package resources.
pub const FROM_CONFIG: &str = "config";

#[derive(Error, Debug)]
pub enum ResourceError {
    #[error(
        "Invalid shared memory value '{0}': supported units are MiB, Mi, GiB, Gi, MB, m, GB and g"
    )]
    InvalidSharedMemoryValue(String),
}

/// Converts a size such as `5.5Gi` or `512 MB` to bytes.
///
/// `Mi`/`MiB` and `Gi`/`GiB` are binary; `MB`/`m` and `GB`/`g` are decimal;
/// a bare number is bytes.
pub fn convert_to_bytes(raw: &str) -> Result<u64, ResourceError> {
    let invalid = || ResourceError::InvalidSharedMemoryValue(raw.to_string());
    let trimmed = raw.trim();
    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);
    let value: f64 = number.parse().map_err(|_| invalid())?;

    let multiplier: f64 = match unit.trim() {
        "" => 1.0,
        "Mi" | "MiB" => 1024.0 * 1024.0,
        "Gi" | "GiB" => 1024.0 * 1024.0 * 1024.0,
        "MB" | "m" => 1_000_000.0,
        "GB" | "g" => 1_000_000_000.0,
        _ => return Err(invalid()),
    };
    Ok((value * multiplier).round() as u64)
}

fn to_bytes(value: &Value) -> Result<Option<u64>, ResourceError> {
    match value {
        Value::Number(n) => Ok(n.as_f64().map(|f| f.round() as u64)),
        Value::String(s) => convert_to_bytes(s).map(Some),
        _ => Ok(None),
    }
}

/// Shared memory size for the container.
///
/// An explicit `user_value` wins. Otherwise the size comes from the package
/// `resources`: selected fragments for a worker, the global value for a
/// driver, all fragments otherwise. Each falls back to the global value and
/// then to 1 GiB.
pub fn shared_memory_size(
    resources: Option<&Value>,
    worker: bool,
    driver: bool,
    fragments: Option<&str>,
    user_value: Option<&str>,
) -> Result<u64, ResourceError> {
    if let Some(value) = user_value.filter(|v| *v != FROM_CONFIG) {
        return convert_to_bytes(value);
    }

    let resources = resources.filter(|r| r.is_object());
    let global = match resources.and_then(|r| r.get(SHARED_MEMORY_KEY)) {
        Some(value) => to_bytes(value)?,
        None => None,
    };
    let all_fragments = resources
        .and_then(|r| r.get("fragments"))
        .and_then(Value::as_object);

    let from_fragments = match all_fragments {
        Some(map) if worker || !driver => {
            let selected: Option<Vec<&str>> = match fragments.map(str::trim) {
                Some(list) if worker && !list.is_empty() && list != "all" => {
                    Some(list.split(',').map(str::trim).collect())
                }
                _ => None,
            };
            let mut max: Option<u64> = None;
            for (name, fragment) in map {
                if selected.as_ref().is_some_and(|s| !s.contains(&name.as_str())) {
                    continue;
                }
                if let Some(value) = fragment.get(SHARED_MEMORY_KEY) {
                    let bytes = to_bytes(value)?;
                    max = max.max(bytes);
                }
            }
            max
        }
        _ => None,
    };

    let size = from_fragments.or(global).unwrap_or(DEFAULT_SHM_SIZE);
    debug!("Shared memory size: {size} bytes");
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fragments() -> Value {
        json!({
            "sharedMemory": "1Mi",
            "fragments": {
                "fragment-a": {"sharedMemory": "5Mi"},
                "fragment-b": {"sharedMemory": "0.5Gi"},
                "fragment-c": {"memory": "5Gi"}
            }
        })
    }

    #[test]
    fn defaults_without_resources() {
        assert_eq!(shared_memory_size(None, false, false, None, None).unwrap(), DEFAULT_SHM_SIZE);
        let empty = json!({});
        assert_eq!(
            shared_memory_size(Some(&empty), false, false, None, Some("config")).unwrap(),
            DEFAULT_SHM_SIZE
        );
        let no_shm = json!({"memory": "1Gi"});
        assert_eq!(
            shared_memory_size(Some(&no_shm), false, false, None, None).unwrap(),
            DEFAULT_SHM_SIZE
        );
        let list = json!(["x", "y"]);
        assert_eq!(
            shared_memory_size(Some(&list), false, false, None, None).unwrap(),
            DEFAULT_SHM_SIZE
        );
    }

    #[test]
    fn global_value() {
        let resources = json!({"sharedMemory": "5Gi"});
        assert_eq!(
            shared_memory_size(Some(&resources), false, false, None, None).unwrap(),
            5_368_709_120
        );
    }

    #[test]
    fn worker_uses_max_of_selected_fragments() {
        let resources = fragments();
        assert_eq!(
            shared_memory_size(Some(&resources), true, false, None, None).unwrap(),
            536_870_912
        );
        assert_eq!(
            shared_memory_size(Some(&resources), true, false, Some("all"), None).unwrap(),
            536_870_912
        );
        assert_eq!(
            shared_memory_size(Some(&resources), true, false, Some("fragment-a,fragment-c"), None)
                .unwrap(),
            5_242_880
        );
    }

    #[test]
    fn worker_without_fragments_uses_global() {
        let resources = json!({"sharedMemory": "1Mi"});
        for fragments in [None, Some("all"), Some("fragment-a,fragment-c")] {
            assert_eq!(
                shared_memory_size(Some(&resources), true, false, fragments, None).unwrap(),
                1_048_576
            );
        }
    }

    #[test]
    fn driver_uses_global() {
        let resources = fragments();
        assert_eq!(
            shared_memory_size(Some(&resources), false, true, Some("fragment-a,fragment-c"), None)
                .unwrap(),
            1_048_576
        );
    }

    #[test]
    fn neither_uses_max_of_all_fragments() {
        let resources = fragments();
        assert_eq!(
            shared_memory_size(Some(&resources), false, false, Some("fragment-a,fragment-c"), None)
                .unwrap(),
            536_870_912
        );
    }

    #[test]
    fn user_values() {
        for (value, expected) in [
            ("100", 100),
            ("100.0", 100),
            ("5.5Mi", 5_767_168),
            ("5.5GB", 5_500_000_000),
            ("5.5MiB", 5_767_168),
        ] {
            assert_eq!(shared_memory_size(None, false, false, None, Some(value)).unwrap(), expected);
        }
    }

    #[test]
    fn unit_conversion() {
        assert_eq!(convert_to_bytes("5.5 MiB").unwrap(), 5_767_168);
        assert_eq!(convert_to_bytes("5.5Gi").unwrap(), 5_905_580_032);
        assert_eq!(convert_to_bytes("5.5 GiB").unwrap(), 5_905_580_032);
        assert_eq!(convert_to_bytes("5.5 MB").unwrap(), 5_500_000);
        assert_eq!(convert_to_bytes("5.5m").unwrap(), 5_500_000);
        assert_eq!(convert_to_bytes("5.5 g").unwrap(), 5_500_000_000);
        assert!(matches!(
            convert_to_bytes("5.5 KB"),
            Err(ResourceError::InvalidSharedMemoryValue(_))
        ));
        assert!(convert_to_bytes("lots").is_err());
    }
}
