use std::path::Path;
use ash::vk;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use crate::renderer::contexts::device_ctx::features::DeviceFeature;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Unknown device feature: {0}")]
    UnknownFeature(String),

    #[error("Unknown surface format: {0}")]
    UnknownSurfaceFormat(String),

    #[error("Unknown present mode: {0}")]
    UnknownPresentMode(String),

    #[error("frames_in_flight must be at least 1")]
    NoFramesInFlight,

    #[error("descriptor_alloc_count must be at least 1")]
    NoDescriptorAllocations,
}

const SURFACE_FORMATS: &[(&str, vk::Format)] = &[
    ("B8G8R8A8_SRGB", vk::Format::B8G8R8A8_SRGB),
    ("B8G8R8A8_UNORM", vk::Format::B8G8R8A8_UNORM),
    ("R8G8B8A8_SRGB", vk::Format::R8G8B8A8_SRGB),
    ("R8G8B8A8_UNORM", vk::Format::R8G8B8A8_UNORM),
    ("A2B10G10R10_UNORM_PACK32", vk::Format::A2B10G10R10_UNORM_PACK32),
    ("A2R10G10B10_UNORM_PACK32", vk::Format::A2R10G10B10_UNORM_PACK32),
    ("R16G16B16A16_SFLOAT", vk::Format::R16G16B16A16_SFLOAT),
];

const PRESENT_MODES: &[(&str, vk::PresentModeKHR)] = &[
    ("IMMEDIATE", vk::PresentModeKHR::IMMEDIATE),
    ("MAILBOX", vk::PresentModeKHR::MAILBOX),
    ("FIFO", vk::PresentModeKHR::FIFO),
    ("FIFO_RELAXED", vk::PresentModeKHR::FIFO_RELAXED),
];

/// Contains configuration options for the renderer like the frames in flight, vsync, and other settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub validation: bool,
    pub vsync: bool,
    pub frames_in_flight: u32,
    /// Upload through a dedicated transfer queue when the device exposes one
    pub prefer_transfer_queue: bool,
    /// Sets of each per-frame descriptor layout one frame's descriptor pool holds
    pub descriptor_alloc_count: u32,
    pub required_features: Vec<String>,
    pub optional_features: Vec<String>,
    pub surface_format: Option<String>,
    pub present_mode: Option<String>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            validation: cfg!(debug_assertions),
            vsync: true,
            frames_in_flight: 3,
            prefer_transfer_queue: true,
            descriptor_alloc_count: 100,
            required_features: Vec::new(),
            optional_features: vec!["samplerAnisotropy".into()],
            surface_format: None,
            present_mode: None,
        }
    }
}

impl RenderConfig {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frames_in_flight == 0 {
            return Err(ConfigError::NoFramesInFlight);
        }
        if self.descriptor_alloc_count == 0 {
            return Err(ConfigError::NoDescriptorAllocations);
        }
        self.required_device_features()?;
        self.optional_device_features()?;
        self.surface_format_preference()?;
        self.present_mode_preference()?;
        Ok(())
    }

    /// Swapchain format named by `surface_format`, matched case-insensitively.
    pub fn surface_format_preference(&self) -> Result<Option<vk::Format>, ConfigError> {
        self.surface_format
            .as_deref()
            .map(|name| {
                lookup(SURFACE_FORMATS, name)
                    .ok_or_else(|| ConfigError::UnknownSurfaceFormat(name.to_string()))
            })
            .transpose()
    }

    pub fn present_mode_preference(&self) -> Result<Option<vk::PresentModeKHR>, ConfigError> {
        self.present_mode
            .as_deref()
            .map(|name| {
                lookup(PRESENT_MODES, name)
                    .ok_or_else(|| ConfigError::UnknownPresentMode(name.to_string()))
            })
            .transpose()
    }

    pub fn required_device_features(&self) -> Result<Vec<DeviceFeature>, ConfigError> {
        parse_features(&self.required_features)
    }

    pub fn optional_device_features(&self) -> Result<Vec<DeviceFeature>, ConfigError> {
        parse_features(&self.optional_features)
    }
}

fn lookup<T: Copy>(table: &[(&str, T)], name: &str) -> Option<T> {
    table
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| *value)
}

fn parse_features(names: &[String]) -> Result<Vec<DeviceFeature>, ConfigError> {
    names
        .iter()
        .map(|name| {
            name.parse::<DeviceFeature>()
                .map_err(|_| ConfigError::UnknownFeature(name.clone()))
        })
        .collect()
}
