use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::world::players::{SpawnArea, MAX_PLAYERS};

pub const CONFIG_FILE_NAME: &str = "plaza.yaml";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:7575";
const DEFAULT_WINDOW_W: i32 = 500;
const DEFAULT_WINDOW_H: i32 = 500;

#[derive(Debug)]
pub struct AppConfig {
    pub root: PathBuf,
    pub bind_addr: String,
    pub max_clients: usize,
    pub window_w: i32,
    pub window_h: i32,
    pub spawn_area: SpawnArea,
}

/// Optional `plaza.yaml` under the data root. Anything absent falls back to
/// the built-in defaults; the bind address can still be overridden by the
/// second positional argument or PLAZA_BIND_ADDR.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    bind_addr: Option<String>,
    max_clients: Option<usize>,
    window: Option<WindowSection>,
    spawn: Option<SpawnSection>,
}

#[derive(Debug, Deserialize)]
struct WindowSection {
    width: i32,
    height: i32,
}

#[derive(Debug, Deserialize)]
struct SpawnSection {
    min_x: i32,
    min_y: i32,
    max_x: i32,
    max_y: i32,
}

impl AppConfig {
    pub fn from_args(args: &[String]) -> Result<Self, String> {
        if args.len() < 2 {
            return Err("usage: plaza <data-root> [bind_addr]".to_string());
        }

        let root = Path::new(&args[1]).to_path_buf();
        let file = load_config_file(&root.join(CONFIG_FILE_NAME))?;

        let bind_addr = if args.len() > 2 {
            args[2].clone()
        } else {
            std::env::var("PLAZA_BIND_ADDR")
                .ok()
                .and_then(|value| {
                    let trimmed = value.trim();
                    if trimmed.is_empty() {
                        None
                    } else {
                        Some(trimmed.to_string())
                    }
                })
                .or(file.bind_addr)
                .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
        };

        let max_clients = file.max_clients.unwrap_or(MAX_PLAYERS);
        let (window_w, window_h) = match file.window {
            Some(window) => (window.width, window.height),
            None => (DEFAULT_WINDOW_W, DEFAULT_WINDOW_H),
        };
        let spawn_area = match file.spawn {
            Some(spawn) => SpawnArea {
                min_x: spawn.min_x,
                min_y: spawn.min_y,
                max_x: spawn.max_x,
                max_y: spawn.max_y,
            },
            None => SpawnArea::default(),
        };

        let config = Self {
            root,
            bind_addr,
            max_clients,
            window_w,
            window_h,
            spawn_area,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        if self.max_clients == 0 {
            return Err("max_clients must be at least 1".to_string());
        }
        if self.window_w <= 0 || self.window_h <= 0 {
            return Err("window dimensions must be positive".to_string());
        }
        let spawn = &self.spawn_area;
        if spawn.min_x > spawn.max_x || spawn.min_y > spawn.max_y {
            return Err("spawn area bounds are inverted".to_string());
        }
        if spawn.min_x < 0
            || spawn.min_y < 0
            || spawn.max_x >= self.window_w
            || spawn.max_y >= self.window_h
        {
            return Err("spawn area must lie inside the window".to_string());
        }
        Ok(())
    }
}

fn load_config_file(path: &Path) -> Result<ConfigFile, String> {
    match std::fs::read_to_string(path) {
        Ok(text) => serde_yaml::from_str(&text)
            .map_err(|err| format!("config parse {} failed: {}", path.display(), err)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(err) => Err(format!("config read {} failed: {}", path.display(), err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_file_parses_all_sections() {
        let text = "\
bind_addr: 127.0.0.1:9000
max_clients: 8
window:
  width: 640
  height: 480
spawn:
  min_x: 50
  min_y: 60
  max_x: 600
  max_y: 400
";
        let file: ConfigFile = serde_yaml::from_str(text).expect("parse yaml");
        assert_eq!(file.bind_addr.as_deref(), Some("127.0.0.1:9000"));
        assert_eq!(file.max_clients, Some(8));
        let window = file.window.expect("window section");
        assert_eq!((window.width, window.height), (640, 480));
        let spawn = file.spawn.expect("spawn section");
        assert_eq!(spawn.max_y, 400);
    }

    #[test]
    fn empty_config_file_uses_defaults() {
        let file: ConfigFile = serde_yaml::from_str("{}").expect("parse yaml");
        assert!(file.bind_addr.is_none());
        assert!(file.window.is_none());
    }

    #[test]
    fn validation_rejects_bad_geometry() {
        let mut config = AppConfig {
            root: PathBuf::from("."),
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            max_clients: MAX_PLAYERS,
            window_w: DEFAULT_WINDOW_W,
            window_h: DEFAULT_WINDOW_H,
            spawn_area: SpawnArea::default(),
        };
        assert!(config.validate().is_ok());

        config.spawn_area.max_x = config.window_w;
        assert!(config.validate().is_err());

        config.spawn_area = SpawnArea {
            min_x: 200,
            min_y: 100,
            max_x: 100,
            max_y: 400,
        };
        assert!(config.validate().is_err());

        config.spawn_area = SpawnArea::default();
        config.max_clients = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_is_not_an_error() {
        let file =
            load_config_file(Path::new("/nonexistent/plaza.yaml")).expect("default config");
        assert!(file.bind_addr.is_none());
    }
}
