use std::{path::Path, path::PathBuf, str::FromStr};

pub const MAX_BOUNCES: u32 = 8;
pub const MAX_SAMPLES: u32 = 64;
pub const MAX_QUALITY: u32 = 4;
pub const MAX_DENOISE: u32 = 2;
pub const MAX_DLSS: u32 = 4;
pub const MAX_HYBRID_INTENSITY: f32 = 8.0;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown parameter `{0}`")]
    UnknownParameter(String),
    #[error("invalid value `{value}` for `{name}`")]
    InvalidValue { name: String, value: String },
    #[error("unable to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("unable to parse config: {0}")]
    Parse(#[from] ron::error::SpannedError),
}

#[derive(
    Clone, Copy, Debug, Default, Hash, PartialEq, Eq, serde::Deserialize, strum::EnumString, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BackendPolicy {
    #[default]
    Auto,
    Hardware,
    Software,
}

/// Which lights feed the unified scene-light list.
#[derive(
    Clone, Copy, Debug, Default, Hash, PartialEq, Eq, serde::Deserialize, strum::EnumString, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LightMode {
    Off,
    #[default]
    Dynamic,
    All,
}

#[derive(
    Clone, Copy, Debug, Default, Hash, PartialEq, Eq, serde::Deserialize, strum::EnumString, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Composite {
    /// The ray traced image replaces the raster target.
    #[default]
    Replace,
    /// The ray traced image is added on top of the raster target.
    Hybrid,
}

fn default_validate_maps() -> Vec<String> {
    ["q3dm1", "q3dm17", "q3tourney2"]
        .iter()
        .map(|name| name.to_string())
        .collect()
}

#[derive(Clone, Debug, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    pub enable: bool,
    pub backend: BackendPolicy,
    pub mode: LightMode,
    pub bounces: u32,
    pub samples: u32,
    pub quality: u32,
    pub denoise: u32,
    pub dlss: u32,
    pub reflex: bool,
    pub gi_bounces: u32,
    pub hybrid_intensity: f32,
    pub debug: u32,
    pub surface_debug: u32,
    pub probes: bool,
    pub cache: bool,
    pub temporal: bool,
    pub gpu_validate: u32,
    pub shader_path: PathBuf,
    pub composite: Composite,
    pub validate_maps: Vec<String>,
    pub probe_grid: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enable: true,
            backend: BackendPolicy::default(),
            mode: LightMode::default(),
            bounces: 2,
            samples: 1,
            quality: 2,
            denoise: 2,
            dlss: 0,
            reflex: false,
            gi_bounces: 1,
            hybrid_intensity: 1.0,
            debug: 0,
            surface_debug: 0,
            probes: false,
            cache: false,
            temporal: true,
            gpu_validate: 0,
            shader_path: PathBuf::from("shaders"),
            composite: Composite::default(),
            validate_maps: default_validate_maps(),
            probe_grid: 8,
        }
    }
}

fn parse_value<T: FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        name: name.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim() {
        "1" | "true" | "on" => Ok(true),
        "0" | "false" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            name: name.to_string(),
            value: value.to_string(),
        }),
    }
}

/// Clamp a composite gain into `[0, MAX_HYBRID_INTENSITY]`, mapping NaN to zero.
pub fn clamp_hybrid_intensity(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, MAX_HYBRID_INTENSITY)
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path)?;
        let mut config: Self = ron::de::from_bytes(&bytes)?;
        config.sanitize();
        log::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Bring every numeric parameter into its documented range.
    pub fn sanitize(&mut self) {
        self.bounces = self.bounces.clamp(1, MAX_BOUNCES);
        self.samples = self.samples.clamp(1, MAX_SAMPLES);
        self.quality = self.quality.min(MAX_QUALITY);
        self.denoise = self.denoise.min(MAX_DENOISE);
        self.dlss = self.dlss.min(MAX_DLSS);
        self.gi_bounces = self.gi_bounces.min(MAX_BOUNCES);
        self.hybrid_intensity = clamp_hybrid_intensity(self.hybrid_intensity);
        self.probe_grid = self.probe_grid.clamp(1, 32);
    }

    /// Update one parameter by its console name.
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), ConfigError> {
        match name {
            "enable" => self.enable = parse_bool(name, value)?,
            "backend" => self.backend = parse_value(name, value)?,
            "mode" => self.mode = parse_value(name, value)?,
            "bounces" => self.bounces = parse_value(name, value)?,
            "samples" => self.samples = parse_value(name, value)?,
            "quality" => self.quality = parse_value(name, value)?,
            "denoise" => self.denoise = parse_value(name, value)?,
            "dlss" => self.dlss = parse_value(name, value)?,
            "reflex" => self.reflex = parse_bool(name, value)?,
            "gi_bounces" => self.gi_bounces = parse_value(name, value)?,
            "hybrid_intensity" => self.hybrid_intensity = parse_value(name, value)?,
            "debug" => self.debug = parse_value(name, value)?,
            "surface_debug" => self.surface_debug = parse_value(name, value)?,
            "probes" => self.probes = parse_bool(name, value)?,
            "cache" => self.cache = parse_bool(name, value)?,
            "temporal" => self.temporal = parse_bool(name, value)?,
            "gpu_validate" => self.gpu_validate = parse_value(name, value)?,
            "composite" => self.composite = parse_value(name, value)?,
            "probe_grid" => self.probe_grid = parse_value(name, value)?,
            "shader_path" => self.shader_path = PathBuf::from(value.trim()),
            _ => return Err(ConfigError::UnknownParameter(name.to_string())),
        }
        self.sanitize();
        log::debug!("Set {} = {}", name, value);
        Ok(())
    }

    pub fn is_validate_map(&self, map: &str) -> bool {
        self.validate_maps.iter().any(|name| name.eq_ignore_ascii_case(map))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_clamps_numeric_ranges() {
        let mut config = Config::default();
        config.set("hybrid_intensity", "12.5").unwrap();
        assert_eq!(config.hybrid_intensity, 8.0);
        config.set("hybrid_intensity", "-3").unwrap();
        assert_eq!(config.hybrid_intensity, 0.0);
        config.set("hybrid_intensity", "NaN").unwrap();
        assert_eq!(config.hybrid_intensity, 0.0);
        config.set("denoise", "7").unwrap();
        assert_eq!(config.denoise, 2);
        config.set("bounces", "0").unwrap();
        assert_eq!(config.bounces, 1);
    }

    #[test]
    fn set_parses_enumerations() {
        let mut config = Config::default();
        config.set("backend", "software").unwrap();
        assert_eq!(config.backend, BackendPolicy::Software);
        config.set("mode", "all").unwrap();
        assert_eq!(config.mode, LightMode::All);
        config.set("temporal", "0").unwrap();
        assert!(!config.temporal);
        assert!(matches!(
            config.set("backend", "quantum"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            config.set("nonsense", "1"),
            Err(ConfigError::UnknownParameter(_))
        ));
    }

    #[test]
    fn partial_document_keeps_defaults() {
        let config: Config = ron::de::from_str("(bounces: 4, backend: hardware)").unwrap();
        assert_eq!(config.bounces, 4);
        assert_eq!(config.backend, BackendPolicy::Hardware);
        assert_eq!(config.samples, 1);
        assert!(config.is_validate_map("Q3DM17"));
    }
}
