use std::str::FromStr;
use ash::vk;

/// Core device features that can be requested by name from the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceFeature {
    SamplerAnisotropy,
    FillModeNonSolid,
    WideLines,
    LargePoints,
    DepthClamp,
    DepthBiasClamp,
    DepthBounds,
    GeometryShader,
    TessellationShader,
    SampleRateShading,
    MultiDrawIndirect,
    LogicOp,
    IndependentBlend,
}

impl DeviceFeature {
    pub fn name(&self) -> &'static str {
        match self {
            DeviceFeature::SamplerAnisotropy => "samplerAnisotropy",
            DeviceFeature::FillModeNonSolid => "fillModeNonSolid",
            DeviceFeature::WideLines => "wideLines",
            DeviceFeature::LargePoints => "largePoints",
            DeviceFeature::DepthClamp => "depthClamp",
            DeviceFeature::DepthBiasClamp => "depthBiasClamp",
            DeviceFeature::DepthBounds => "depthBounds",
            DeviceFeature::GeometryShader => "geometryShader",
            DeviceFeature::TessellationShader => "tessellationShader",
            DeviceFeature::SampleRateShading => "sampleRateShading",
            DeviceFeature::MultiDrawIndirect => "multiDrawIndirect",
            DeviceFeature::LogicOp => "logicOp",
            DeviceFeature::IndependentBlend => "independentBlend",
        }
    }

    fn field<'a>(&self, features: &'a mut vk::PhysicalDeviceFeatures) -> &'a mut vk::Bool32 {
        match self {
            DeviceFeature::SamplerAnisotropy => &mut features.sampler_anisotropy,
            DeviceFeature::FillModeNonSolid => &mut features.fill_mode_non_solid,
            DeviceFeature::WideLines => &mut features.wide_lines,
            DeviceFeature::LargePoints => &mut features.large_points,
            DeviceFeature::DepthClamp => &mut features.depth_clamp,
            DeviceFeature::DepthBiasClamp => &mut features.depth_bias_clamp,
            DeviceFeature::DepthBounds => &mut features.depth_bounds,
            DeviceFeature::GeometryShader => &mut features.geometry_shader,
            DeviceFeature::TessellationShader => &mut features.tessellation_shader,
            DeviceFeature::SampleRateShading => &mut features.sample_rate_shading,
            DeviceFeature::MultiDrawIndirect => &mut features.multi_draw_indirect,
            DeviceFeature::LogicOp => &mut features.logic_op,
            DeviceFeature::IndependentBlend => &mut features.independent_blend,
        }
    }

    pub fn is_supported(&self, supported: &vk::PhysicalDeviceFeatures) -> bool {
        let mut copy = *supported;
        *self.field(&mut copy) == vk::TRUE
    }

    pub fn enable(&self, features: &mut vk::PhysicalDeviceFeatures) {
        *self.field(features) = vk::TRUE;
    }
}

impl FromStr for DeviceFeature {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        const ALL: [DeviceFeature; 13] = [
            DeviceFeature::SamplerAnisotropy,
            DeviceFeature::FillModeNonSolid,
            DeviceFeature::WideLines,
            DeviceFeature::LargePoints,
            DeviceFeature::DepthClamp,
            DeviceFeature::DepthBiasClamp,
            DeviceFeature::DepthBounds,
            DeviceFeature::GeometryShader,
            DeviceFeature::TessellationShader,
            DeviceFeature::SampleRateShading,
            DeviceFeature::MultiDrawIndirect,
            DeviceFeature::LogicOp,
            DeviceFeature::IndependentBlend,
        ];
        ALL.into_iter().find(|f| f.name() == s).ok_or(())
    }
}

/// Builds the feature set to enable: every required feature plus the supported optional ones.
/// Returns the first unsupported required feature on failure.
pub fn resolve_features(
    supported: &vk::PhysicalDeviceFeatures,
    required: &[DeviceFeature],
    optional: &[DeviceFeature],
) -> Result<vk::PhysicalDeviceFeatures, DeviceFeature> {
    let mut enabled = vk::PhysicalDeviceFeatures::default();
    for feature in required {
        if !feature.is_supported(supported) {
            return Err(*feature);
        }
        feature.enable(&mut enabled);
    }
    for feature in optional {
        if feature.is_supported(supported) {
            feature.enable(&mut enabled);
        } else {
            log::warn!("Optional device feature not supported: {}", feature.name());
        }
    }
    Ok(enabled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_from_str() {
        assert_eq!("wideLines".parse::<DeviceFeature>(), Ok(DeviceFeature::WideLines));
        assert!("wide_lines".parse::<DeviceFeature>().is_err());
    }

    #[test]
    fn optional_features_are_skipped_when_unsupported() {
        let supported = vk::PhysicalDeviceFeatures {
            fill_mode_non_solid: vk::TRUE,
            ..Default::default()
        };
        let enabled = resolve_features(
            &supported,
            &[DeviceFeature::FillModeNonSolid],
            &[DeviceFeature::SamplerAnisotropy],
        )
        .unwrap();
        assert_eq!(enabled.fill_mode_non_solid, vk::TRUE);
        assert_eq!(enabled.sampler_anisotropy, vk::FALSE);
    }

    #[test]
    fn missing_required_feature_is_reported() {
        let supported = vk::PhysicalDeviceFeatures::default();
        let missing = resolve_features(&supported, &[DeviceFeature::GeometryShader], &[])
            .unwrap_err();
        assert_eq!(missing, DeviceFeature::GeometryShader);
    }
}
