use std::path::{Path, PathBuf};

/// Read `sec.key`, falling back to `$or` with a notice when the key is absent. A key that is
/// present but of the wrong type is a [`ConfigError::Type`](crate::configs::ConfigError).
macro_rules! tomlget_or {
    ($cfg:ident, $sec:expr, $key:expr, as_str, $or:expr) => {
        match $cfg.get($sec).and_then(|sec| sec.get($key)) {
            Some(val) => val.as_str().ok_or_else(|| crate::configs::ConfigError::Type {
                section: $sec.to_string(),
                key: $key.to_string(),
                expected: "string",
            })?,
            None => {
                let default: &str = $or;
                log::info!(
                    "failed to find {}:{} in config; proceeding with default {:?}",
                    $sec,
                    $key,
                    default
                );
                default
            }
        }
    };
    ($cfg:ident, $sec:expr, $key:expr, as_bool, $or:expr) => {
        match $cfg.get($sec).and_then(|sec| sec.get($key)) {
            Some(val) => val.as_bool().ok_or_else(|| crate::configs::ConfigError::Type {
                section: $sec.to_string(),
                key: $key.to_string(),
                expected: "bool",
            })?,
            None => {
                let default: bool = $or;
                log::info!(
                    "failed to find {}:{} in config; proceeding with default {:?}",
                    $sec,
                    $key,
                    default
                );
                default
            }
        }
    };
    ($cfg:ident, $sec:expr, $key:expr, $conv:ident, $as:ty, $or:expr) => {
        match $cfg.get($sec).and_then(|sec| sec.get($key)) {
            Some(val) => val.$conv().ok_or_else(|| crate::configs::ConfigError::Type {
                section: $sec.to_string(),
                key: $key.to_string(),
                expected: stringify!($as),
            })? as $as,
            None => {
                let default: $as = $or;
                log::info!(
                    "failed to find {}:{} in config; proceeding with default {:?}",
                    $sec,
                    $key,
                    default
                );
                default
            }
        }
    };
}

/// `Some` only if `sec.key` is present; wrong types are still errors.
macro_rules! tomlget_opt {
    ($cfg:ident, $sec:expr, $key:expr, as_str) => {
        match $cfg.get($sec).and_then(|sec| sec.get($key)) {
            Some(val) => Some(val.as_str().ok_or_else(|| crate::configs::ConfigError::Type {
                section: $sec.to_string(),
                key: $key.to_string(),
                expected: "string",
            })?),
            None => None,
        }
    };
    ($cfg:ident, $sec:expr, $key:expr, $conv:ident, $as:ty) => {
        match $cfg.get($sec).and_then(|sec| sec.get($key)) {
            Some(val) => Some(val.$conv().ok_or_else(|| crate::configs::ConfigError::Type {
                section: $sec.to_string(),
                key: $key.to_string(),
                expected: stringify!($as),
            })? as $as),
            None => None,
        }
    };
}

macro_rules! tomlget {
    ($cfg:ident, $sec:expr, $key:expr, $conv:ident, $as:ty) => {
        $cfg.get($sec)
            .and_then(|sec| sec.get($key))
            .ok_or_else(|| crate::configs::ConfigError::Missing {
                section: $sec.to_string(),
                key: $key.to_string(),
            })?
            .$conv()
            .ok_or_else(|| crate::configs::ConfigError::Type {
                section: $sec.to_string(),
                key: $key.to_string(),
                expected: stringify!($as),
            })? as $as
    };
}

/// Look for `file_name` as given if absolute, else in the working directory, then beside the
/// executable.
pub fn find_file(file_name: &Path) -> Option<PathBuf> {
    if file_name.is_absolute() {
        return file_name.exists().then(|| file_name.into());
    }
    if let Ok(cwd) = std::env::current_dir() {
        if cwd.join(file_name).exists() {
            return Some(cwd.join(file_name));
        }
    }
    if let Ok(exe) = std::env::current_exe() {
        if exe.parent()?.join(file_name).exists() {
            return Some(exe.parent()?.join(file_name));
        }
    }
    None
}

pub(crate) use {tomlget, tomlget_opt, tomlget_or};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        assert_eq!(find_file(&path), None);
        std::fs::write(&path, "").unwrap();
        assert_eq!(find_file(&path), Some(path));
    }

    fn read_defaults(cfg: &toml::Value) -> Result<(i64, f64, &str, bool), crate::configs::ConfigError> {
        Ok((
            tomlget_or!(cfg, "scan", "freq_base", as_integer, i64, 6_834_682_610),
            tomlget_or!(cfg, "scan", "gain", as_float, f64, 0.5),
            tomlget_or!(cfg, "general", "mode", as_str, "single"),
            tomlget_or!(cfg, "general", "mocking", as_bool, false),
        ))
    }

    #[test]
    fn defaults_keep_their_type() {
        let empty: toml::Value = toml::from_str("").unwrap();
        assert_eq!(
            read_defaults(&empty).unwrap(),
            (6_834_682_610, 0.5, "single", false)
        );

        let set: toml::Value =
            toml::from_str("[scan]\nfreq_base = 10\ngain = 2.0\n[general]\nmocking = true\n")
                .unwrap();
        assert_eq!(read_defaults(&set).unwrap(), (10, 2.0, "single", true));
    }
}
