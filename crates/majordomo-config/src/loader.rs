//! Config file loading and fleet discovery.

use std::fs;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::error::{ConfigError, ConfigResult};
use crate::types::{ButlerConfig, ButlerDeclaration};
use crate::validate;

/// Load and validate one `butler.toml`.
///
/// # Errors
///
/// Returns a [`ConfigError`] when the file cannot be read, does not parse,
/// or fails validation.
pub fn load_butler(path: &Path) -> ConfigResult<ButlerConfig> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let cfg: ButlerConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    validate::validate(&cfg)?;
    info!(butler = %cfg.butler.name, path = %path.display(), "loaded butler config");
    Ok(cfg)
}

/// Scan a fleet config root for butler declarations.
///
/// Every immediate subdirectory containing a `butler.toml` contributes one
/// declaration. Files that fail to parse or validate are skipped with a
/// warning so one broken butler cannot take discovery down.
///
/// # Errors
///
/// Returns a [`ConfigError::Io`] only when the root itself is unreadable.
pub fn discover_fleet(root: &Path) -> ConfigResult<Vec<ButlerDeclaration>> {
    let entries = fs::read_dir(root).map_err(|source| ConfigError::Io {
        path: root.to_path_buf(),
        source,
    })?;

    let mut found = Vec::new();
    for entry in entries.flatten() {
        let candidate = entry.path().join("butler.toml");
        if !candidate.is_file() {
            continue;
        }
        match load_butler(&candidate) {
            Ok(cfg) => {
                debug!(butler = %cfg.butler.name, "discovered butler");
                found.push(cfg.butler);
            },
            Err(e) => {
                warn!(path = %candidate.display(), error = %e, "skipping unparseable butler config");
            },
        }
    }
    // Deterministic order for registry upserts and tests.
    found.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn write_butler(root: &Path, name: &str, port: u16) {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        let mut f = fs::File::create(dir.join("butler.toml")).unwrap();
        writeln!(
            f,
            "[butler]\nname = \"{name}\"\nport = {port}\ndescription = \"{name} butler\""
        )
        .unwrap();
    }

    #[test]
    fn load_butler_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        write_butler(tmp.path(), "health", 7821);
        let cfg = load_butler(&tmp.path().join("health/butler.toml")).unwrap();
        assert_eq!(cfg.butler.name, "health");
    }

    #[test]
    fn discover_finds_all_butlers_sorted() {
        let tmp = tempfile::tempdir().unwrap();
        write_butler(tmp.path(), "relationship", 7823);
        write_butler(tmp.path(), "health", 7821);
        write_butler(tmp.path(), "general", 7820);

        let fleet = discover_fleet(tmp.path()).unwrap();
        let names: Vec<_> = fleet.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, ["general", "health", "relationship"]);
    }

    #[test]
    fn discover_skips_broken_configs() {
        let tmp = tempfile::tempdir().unwrap();
        write_butler(tmp.path(), "health", 7821);
        let broken = tmp.path().join("broken");
        fs::create_dir_all(&broken).unwrap();
        fs::write(broken.join("butler.toml"), "not = [valid").unwrap();

        let fleet = discover_fleet(tmp.path()).unwrap();
        assert_eq!(fleet.len(), 1);
        assert_eq!(fleet[0].name, "health");
    }

    #[test]
    fn discover_empty_root() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(discover_fleet(tmp.path()).unwrap().is_empty());
    }
}
