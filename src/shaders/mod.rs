// SPDX-License-Identifier: GPL-3.0-only
//! Shader sources and shared GPU helpers
//!
//! The grid splat shader is the only shader of the crate; the wgpu backend
//! builds one pipeline per blend binding from it.

mod gpu_processor;

pub use gpu_processor::{
    CachedDimensions, padded_bytes_per_row, read_buffer_async, strip_row_padding,
};

/// Point splat shader (WGSL)
/// Entry points: vs_main, fs_main
/// Used by: wgpu backend
pub const GRID_SPLAT_SHADER: &str = include_str!("grid_splat.wgsl");

#[cfg(test)]
mod tests {
    use super::*;

    /// Validate that a WGSL shader compiles successfully using naga
    fn validate_shader(name: &str, source: &str) -> naga::Module {
        let module = match naga::front::wgsl::parse_str(source) {
            Ok(module) => module,
            Err(e) => panic!("Shader '{}' parse failed: {:?}", name, e),
        };
        let info = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        )
        .validate(&module);
        if let Err(e) = info {
            panic!("Shader '{}' validation failed: {:?}", name, e);
        }
        module
    }

    #[test]
    fn test_grid_splat_shader_validates() {
        validate_shader("grid_splat", GRID_SPLAT_SHADER);
    }

    #[test]
    fn test_grid_splat_entry_points() {
        let module = validate_shader("grid_splat", GRID_SPLAT_SHADER);
        let names: Vec<&str> = module.entry_points.iter().map(|e| e.name.as_str()).collect();
        assert!(names.contains(&"vs_main"));
        assert!(names.contains(&"fs_main"));
    }

    #[test]
    fn test_grid_uniform_layout_matches_shader() {
        let module = validate_shader("grid_splat", GRID_SPLAT_SHADER);
        let grid = module
            .types
            .iter()
            .find(|(_, ty)| ty.name.as_deref() == Some("Grid"))
            .map(|(_, ty)| ty.inner.size(module.to_ctx()))
            .unwrap();
        assert_eq!(
            grid as usize,
            std::mem::size_of::<crate::aggregation::geometry::GridUniforms>()
        );
    }
}
