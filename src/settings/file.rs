//! Env-file persistence
//!
//! The backing store is a plain KEY=value file. Writes go through a
//! temp file followed by a rename; the rename is the durability
//! boundary.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::path::Path;

/// Parse the env file into a raw key/value map.
///
/// A missing file is not an error: the daemon starts on defaults.
pub fn parse_env_file(path: &Path) -> Result<HashMap<String, String>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }

    let mut map = HashMap::new();
    for item in dotenvy::from_path_iter(path)
        .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?
    {
        let (key, value) =
            item.map_err(|e| Error::Config(format!("bad line in {}: {}", path.display(), e)))?;
        map.insert(key, value);
    }
    Ok(map)
}

/// Write the map back as an env file, atomically (temp file + rename).
///
/// Keys are written in sorted order so diffs stay readable. Unknown
/// keys already present in the file are preserved by the caller
/// passing the full map.
pub async fn write_env_file(path: &Path, map: &HashMap<String, String>) -> Result<()> {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();

    let mut body = String::new();
    for key in keys {
        let value = &map[key];
        if value.chars().any(|c| c.is_whitespace() || c == '#' || c == '"') {
            body.push_str(&format!("{}=\"{}\"\n", key, value.replace('"', "\\\"")));
        } else {
            body.push_str(&format!("{}={}\n", key, value));
        }
    }

    let tmp = std::path::PathBuf::from(format!("{}.tmp", path.display()));
    tokio::fs::write(&tmp, body.as_bytes()).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trip_preserves_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");

        let mut map = HashMap::new();
        map.insert("BIND_PORT".to_string(), "9000".to_string());
        map.insert("CAMERA_1_ENABLED".to_string(), "false".to_string());
        map.insert(
            "UPLOAD_ENDPOINT".to_string(),
            "https://intake.example/upload?module=anpr".to_string(),
        );

        write_env_file(&path, &map).await.unwrap();
        let parsed = parse_env_file(&path).unwrap();
        assert_eq!(parsed, map);
    }

    #[tokio::test]
    async fn values_with_spaces_are_quoted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");

        let mut map = HashMap::new();
        map.insert("CAMERA_PASSWORD".to_string(), "p4ss word".to_string());
        write_env_file(&path, &map).await.unwrap();

        let parsed = parse_env_file(&path).unwrap();
        assert_eq!(parsed.get("CAMERA_PASSWORD").unwrap(), "p4ss word");
    }

    #[test]
    fn missing_file_yields_empty_map() {
        let map = parse_env_file(Path::new("/nonexistent/.env")).unwrap();
        assert!(map.is_empty());
    }
}
