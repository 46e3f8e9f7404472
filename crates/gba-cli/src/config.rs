use log::warn;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Persistent defaults, overridden by command-line flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub bios_path: Option<PathBuf>,
    /// Directory for `.sav` files; next to the ROM when unset.
    pub save_dir: Option<PathBuf>,
    /// Start at the cartridge entry point instead of the firmware intro.
    pub skip_bios: bool,
    pub frames: Option<u32>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bios_path: None,
            save_dir: None,
            skip_bios: true,
            frames: None,
        }
    }
}

pub fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Some(appdata) = std::env::var_os("APPDATA") {
            return PathBuf::from(appdata).join("gba-cli").join("settings.toml");
        }
    }

    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("gba-cli").join("settings.toml");
    }

    if let Some(home) = std::env::var_os("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join("gba-cli")
            .join("settings.toml");
    }

    PathBuf::from("settings.toml")
}

pub fn load_from_file(path: &Path) -> Settings {
    let text = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(_) => return Settings::default(),
    };

    match toml::from_str::<Settings>(&text) {
        Ok(settings) => settings,
        Err(e) => {
            warn!(
                "Failed to parse settings {}: {e}; using defaults",
                path.display()
            );
            Settings::default()
        }
    }
}

/// Where the save for `rom` lives: `<save_dir>/<stem>.sav` or `<rom>.sav`.
pub fn save_path(rom: &Path, save_dir: Option<&Path>) -> PathBuf {
    match (save_dir, rom.file_stem()) {
        (Some(dir), Some(stem)) => dir.join(stem).with_extension("sav"),
        _ => rom.with_extension("sav"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_from_file(&dir.path().join("absent.toml"));
        assert_eq!(settings, Settings::default());
        assert!(settings.skip_bios);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "save_dir = \"saves\"\nframes = 120\n").unwrap();
        let settings = load_from_file(&path);
        assert_eq!(settings.save_dir, Some(PathBuf::from("saves")));
        assert_eq!(settings.frames, Some(120));
        assert!(settings.skip_bios);
        assert_eq!(settings.bios_path, None);
    }

    #[test]
    fn malformed_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "frames = \"many\"").unwrap();
        assert_eq!(load_from_file(&path), Settings::default());
    }

    #[test]
    fn settings_round_trip_through_toml() {
        let settings = Settings {
            bios_path: Some(PathBuf::from("/roms/gba_bios.bin")),
            save_dir: None,
            skip_bios: false,
            frames: Some(30),
        };
        let text = toml::to_string_pretty(&settings).unwrap();
        assert_eq!(toml::from_str::<Settings>(&text).unwrap(), settings);
    }

    #[test]
    fn save_lands_next_to_rom_or_in_save_dir() {
        let rom = Path::new("/roms/game.gba");
        assert_eq!(save_path(rom, None), PathBuf::from("/roms/game.sav"));
        assert_eq!(
            save_path(rom, Some(Path::new("/saves"))),
            PathBuf::from("/saves/game.sav")
        );
    }
}
