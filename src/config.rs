use std::path::Path;

use anyhow::Context as _;
use serde_json::Value;

use crate::error::SeqResult;

/// Settings shared by the processor, the saver and the video encoder.
///
/// Every field has a default, so a partial JSON file is valid.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SeqConfig {
    pub ffmpeg: FfmpegConfig,
    pub encoding: EncodingConfig,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct FfmpegConfig {
    /// Executable to run.
    pub path: String,
    /// Argument template; `%FPS%`, `%FRAMES%` and `%OUTPUT%` are substituted per call.
    pub arguments: Vec<String>,
    pub file_extension: String,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct EncodingConfig {
    pub jpeg_quality: u8,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        let arguments = [
            "-r", "%FPS%", "-f", "concat", "-safe", "0", "-i", "%FRAMES%", "-c:v", "libx265",
            "-pix_fmt", "yuv420p", "%OUTPUT%",
        ];
        Self {
            path: "ffmpeg".to_string(),
            arguments: arguments.iter().map(|s| s.to_string()).collect(),
            file_extension: "mp4".to_string(),
        }
    }
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self { jpeg_quality: 95 }
    }
}

impl SeqConfig {
    /// Read a config file; missing keys fall back to defaults.
    pub fn load(path: &Path) -> SeqResult<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config '{}'", path.display()))?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Read a config file, creating it with defaults if it does not exist.
    ///
    /// Keys missing from an existing file are filled in from the defaults and the file
    /// is rewritten, but only when something was added.
    pub fn load_or_init(path: &Path) -> SeqResult<Self> {
        let defaults = serde_json::to_value(Self::default())?;
        if !path.is_file() {
            tracing::info!(path = %path.display(), "writing default config");
            write_json(path, &defaults)?;
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config '{}'", path.display()))?;
        let mut data: Value = serde_json::from_str(&text)?;
        if merge_with_defaults(&mut data, &defaults) {
            tracing::info!(path = %path.display(), "adding missing keys to config");
            write_json(path, &data)?;
        }
        Ok(serde_json::from_value(data)?)
    }

    pub fn save(&self, path: &Path) -> SeqResult<()> {
        write_json(path, &serde_json::to_value(self)?)
    }
}

fn write_json(path: &Path, value: &Value) -> SeqResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create config directory '{}'", parent.display()))?;
    }
    let text = serde_json::to_string_pretty(value)?;
    std::fs::write(path, text).with_context(|| format!("write config '{}'", path.display()))?;
    Ok(())
}

/// Recursively add keys of `defaults` missing from `config`. Returns whether anything changed.
fn merge_with_defaults(config: &mut Value, defaults: &Value) -> bool {
    let (Value::Object(cfg), Value::Object(def)) = (config, defaults) else {
        return false;
    };
    let mut changed = false;
    for (key, default_value) in def {
        match cfg.get_mut(key) {
            None => {
                cfg.insert(key.clone(), default_value.clone());
                changed = true;
            }
            Some(existing) => {
                if merge_with_defaults(existing, default_value) {
                    changed = true;
                }
            }
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!(
            "animseq_{name}_{}_{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ))
    }

    #[test]
    fn partial_json_uses_defaults() {
        let cfg: SeqConfig = serde_json::from_str(r#"{"encoding":{"jpeg_quality":80}}"#).unwrap();
        assert_eq!(cfg.encoding.jpeg_quality, 80);
        assert_eq!(cfg.ffmpeg, FfmpegConfig::default());
    }

    #[test]
    fn load_or_init_writes_defaults() {
        let dir = temp_dir("config_init");
        let path = dir.join("config.json");
        let cfg = SeqConfig::load_or_init(&path).unwrap();
        assert_eq!(cfg, SeqConfig::default());
        assert_eq!(SeqConfig::load(&path).unwrap(), cfg);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn load_or_init_merges_missing_keys_and_keeps_user_values() {
        let dir = temp_dir("config_merge");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");
        std::fs::write(&path, r#"{"ffmpeg":{"path":"/opt/ffmpeg"}}"#).unwrap();

        let cfg = SeqConfig::load_or_init(&path).unwrap();
        assert_eq!(cfg.ffmpeg.path, "/opt/ffmpeg");
        assert_eq!(cfg.encoding.jpeg_quality, 95);

        let on_disk: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk["ffmpeg"]["file_extension"], "mp4");
        assert_eq!(on_disk["encoding"]["jpeg_quality"], 95);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn merge_reports_no_change_for_complete_config() {
        let defaults = serde_json::to_value(SeqConfig::default()).unwrap();
        let mut full = defaults.clone();
        assert!(!merge_with_defaults(&mut full, &defaults));
    }

    #[test]
    fn malformed_file_is_a_serde_error() {
        let dir = temp_dir("config_bad");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            SeqConfig::load(&path).unwrap_err(),
            crate::SeqError::Serde(_)
        ));
        std::fs::remove_dir_all(&dir).ok();
    }
}
