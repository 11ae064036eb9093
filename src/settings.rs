use log::{info, warn};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderSettings {
    #[serde(default)]
    pub resolution: Resolution,
    #[serde(default = "RenderSettings::default_true")]
    pub shadow_mapping_enabled: bool,
    #[serde(default = "RenderSettings::default_true")]
    pub depth_prepass_enabled: bool,
    /// Lets a settled progressive layer skip re-rendering until it is dirty.
    #[serde(default = "RenderSettings::default_true")]
    pub layer_caching_enabled: bool,
    /// Push light data through one shared constant buffer when the device
    /// supports it instead of setting every light field separately.
    #[serde(default = "RenderSettings::default_true")]
    pub prefer_constant_buffers: bool,
    #[serde(default = "RenderSettings::default_ssaa_multiplier")]
    pub ssaa_multiplier: f32,
    #[serde(default = "RenderSettings::default_shadow_map_size")]
    pub default_shadow_map_size: u32,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            resolution: Resolution::default(),
            shadow_mapping_enabled: true,
            depth_prepass_enabled: true,
            layer_caching_enabled: true,
            prefer_constant_buffers: true,
            ssaa_multiplier: Self::default_ssaa_multiplier(),
            default_shadow_map_size: Self::default_shadow_map_size(),
        }
    }
}

impl RenderSettings {
    pub fn load() -> Self {
        Self::load_from_path("render_settings.json")
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Self {
        use std::fs;

        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|err| {
                warn!(
                    "Failed to parse {:?} ({}). Falling back to default render settings.",
                    path, err
                );
                RenderSettings::default()
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(
                    "Render settings file {:?} not found. Using default settings.",
                    path
                );
                RenderSettings::default()
            }
            Err(err) => {
                warn!(
                    "Failed to read {:?} ({}). Falling back to default render settings.",
                    path, err
                );
                RenderSettings::default()
            }
        }
    }

    pub fn from_json(contents: &str) -> Result<Self, serde_json::Error> {
        let settings = serde_json::from_str::<RenderSettings>(contents)?;
        info!("Loaded render settings");
        Ok(settings.validate())
    }

    pub fn validate(mut self) -> Self {
        if self.resolution.width == 0 || self.resolution.height == 0 {
            warn!("Resolution must be greater than zero. Using default resolution.");
            self.resolution = Resolution::default();
        }

        if !self.ssaa_multiplier.is_finite() || self.ssaa_multiplier < 1.0 {
            warn!(
                "SSAA multiplier {} is invalid. Using {}.",
                self.ssaa_multiplier,
                Self::default_ssaa_multiplier()
            );
            self.ssaa_multiplier = Self::default_ssaa_multiplier();
        }

        if self.default_shadow_map_size == 0 || !self.default_shadow_map_size.is_power_of_two() {
            warn!("Shadow map size must be a power of two. Using default value.");
            self.default_shadow_map_size = Self::default_shadow_map_size();
        }

        self
    }

    const fn default_true() -> bool {
        true
    }

    const fn default_ssaa_multiplier() -> f32 {
        1.5
    }

    const fn default_shadow_map_size() -> u32 {
        1024
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Default for Resolution {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invalid_settings() -> RenderSettings {
        RenderSettings {
            resolution: Resolution {
                width: 0,
                height: 0,
            },
            ssaa_multiplier: 0.5,
            default_shadow_map_size: 1000,
            ..RenderSettings::default()
        }
    }

    #[test]
    fn validate_replaces_invalid_values_with_defaults() {
        let validated = invalid_settings().validate();
        let defaults = RenderSettings::default();

        assert_eq!(validated.resolution, defaults.resolution);
        assert_eq!(validated.ssaa_multiplier, defaults.ssaa_multiplier);
        assert_eq!(
            validated.default_shadow_map_size,
            defaults.default_shadow_map_size
        );
    }

    #[test]
    fn validate_preserves_valid_values() {
        let valid = RenderSettings {
            resolution: Resolution {
                width: 1920,
                height: 1080,
            },
            ssaa_multiplier: 2.0,
            default_shadow_map_size: 2048,
            layer_caching_enabled: false,
            ..RenderSettings::default()
        };

        let validated = valid.clone().validate();

        assert_eq!(validated.resolution, valid.resolution);
        assert_eq!(validated.ssaa_multiplier, 2.0);
        assert_eq!(validated.default_shadow_map_size, 2048);
        assert!(!validated.layer_caching_enabled);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let settings = RenderSettings::from_json(r#"{ "depth_prepass_enabled": false }"#).unwrap();

        assert!(!settings.depth_prepass_enabled);
        assert!(settings.shadow_mapping_enabled);
        assert_eq!(settings.ssaa_multiplier, 1.5);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let settings = RenderSettings::load_from_path("does/not/exist/render_settings.json");
        assert_eq!(settings.resolution, Resolution::default());
    }
}
