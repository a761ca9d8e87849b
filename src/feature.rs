use std::fmt;

use serde::{Deserialize, Serialize};

/// Optional kernel features a scene needs.
///
/// Produced by scene compilation, consumed by kernel specialization. This is a
/// flat pass-through value: no validation happens here, invalid combinations
/// are the kernel collaborator's concern.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureRequest {
    /// Experimental kernel features enabled.
    pub experimental: bool,
    /// Maximum shader node group nesting.
    pub max_nodes_group: u32,
    /// Bitmask of required shader node features.
    pub nodes_features: u32,
    pub use_hair: bool,
    pub use_object_motion: bool,
    pub use_camera_motion: bool,
    pub use_baking: bool,
    pub use_subsurface: bool,
    pub use_volume: bool,
    pub use_integrator_branched: bool,
    pub use_patch_evaluation: bool,
    pub use_transparent: bool,
    pub use_principled: bool,
    pub use_denoising: bool,
}

fn bool_str(v: bool) -> &'static str {
    if v { "true" } else { "false" }
}

impl fmt::Display for FeatureRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Experimental features: {}",
            if self.experimental { "On" } else { "Off" }
        )?;
        writeln!(f, "Max nodes group: {}", self.max_nodes_group)?;
        writeln!(f, "Nodes features: {}", self.nodes_features)?;
        writeln!(f, "Use Hair: {}", bool_str(self.use_hair))?;
        writeln!(f, "Use Object Motion: {}", bool_str(self.use_object_motion))?;
        writeln!(f, "Use Camera Motion: {}", bool_str(self.use_camera_motion))?;
        writeln!(f, "Use Baking: {}", bool_str(self.use_baking))?;
        writeln!(f, "Use Subsurface: {}", bool_str(self.use_subsurface))?;
        writeln!(f, "Use Volume: {}", bool_str(self.use_volume))?;
        writeln!(
            f,
            "Use Branched Integrator: {}",
            bool_str(self.use_integrator_branched)
        )?;
        writeln!(
            f,
            "Use Patch Evaluation: {}",
            bool_str(self.use_patch_evaluation)
        )?;
        writeln!(
            f,
            "Use Transparent Shadows: {}",
            bool_str(self.use_transparent)
        )?;
        writeln!(f, "Use Principled BSDF: {}", bool_str(self.use_principled))?;
        writeln!(f, "Use Denoising: {}", bool_str(self.use_denoising))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_lists_every_flag_once() {
        let req = FeatureRequest {
            use_hair: true,
            max_nodes_group: 3,
            ..FeatureRequest::default()
        };
        let text = req.to_string();
        assert_labels(&text);
        assert!(text.contains("Use Hair: true"));
        assert!(text.contains("Max nodes group: 3"));
        assert!(text.contains("Experimental features: Off"));
    }

    fn assert_labels(text: &str) {
        for label in [
            "Experimental features:",
            "Max nodes group:",
            "Nodes features:",
            "Use Hair:",
            "Use Object Motion:",
            "Use Camera Motion:",
            "Use Baking:",
            "Use Subsurface:",
            "Use Volume:",
            "Use Branched Integrator:",
            "Use Patch Evaluation:",
            "Use Transparent Shadows:",
            "Use Principled BSDF:",
            "Use Denoising:",
        ] {
            assert_eq!(text.matches(label).count(), 1, "label {label:?}");
        }
    }

    #[test]
    fn default_is_all_off() {
        let req = FeatureRequest::default();
        assert!(!req.experimental);
        assert_eq!(req.max_nodes_group, 0);
        assert!(!req.use_denoising);
    }
}
