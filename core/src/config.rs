//! Optimizer policy knobs.
//!
//! The size budgets are soft policy: exceeding them only sends an allocation
//! to the heap.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ast::extension;
use crate::error::Error;
use crate::escape::ObjectType;

/// Largest single object that may be placed in a stack frame.
pub const MAX_STACK_OBJECT_SIZE: u32 = 256;
/// Stack bytes one optimization pass may hand out in total.
pub const MAX_STACK_FRAME_SIZE: u32 = 4096;

/// Size assumed for an allocation whose size the analyzer could not estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultSizes {
    pub object: u32,
    pub array: u32,
    pub string: u32,
    pub closure: u32,
}

impl Default for DefaultSizes {
    fn default() -> Self {
        Self {
            object: 64,
            array: 128,
            string: 32,
            closure: 64,
        }
    }
}

impl DefaultSizes {
    /// `None` for [`ObjectType::Unknown`], which has no sensible default.
    pub fn for_type(&self, ty: ObjectType) -> Option<u32> {
        match ty {
            ObjectType::Object => Some(self.object),
            ObjectType::Array => Some(self.array),
            ObjectType::String => Some(self.string),
            ObjectType::Closure => Some(self.closure),
            ObjectType::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub max_object_size: u32,
    pub max_frame_size: u32,
    /// Treat `Unknown` as the bottom of the escape lattice when merging.
    /// `false` ranks it above `GlobalEscape`, which makes it absorbing.
    pub unknown_is_bottom: bool,
    pub enable_scalar_replacement: bool,
    pub default_sizes: DefaultSizes,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_object_size: MAX_STACK_OBJECT_SIZE,
            max_frame_size: MAX_STACK_FRAME_SIZE,
            unknown_is_bottom: true,
            enable_scalar_replacement: true,
            default_sizes: DefaultSizes::default(),
        }
    }
}

impl OptimizerConfig {
    pub fn from_toml_str(src: &str) -> Result<Self, Error> {
        toml::from_str(src).map_err(|e| Error::format("<toml>", e))
    }

    /// Load from `.toml`, `.yaml`/`.yml` or `.json`.
    pub fn from_path(path: &Path) -> Result<Self, Error> {
        let src = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let display = path.display().to_string();
        match extension(path).as_deref() {
            Some("toml") => toml::from_str(&src).map_err(|e| Error::format(&display, e)),
            Some("yaml") | Some("yml") => serde_yaml::from_str(&src).map_err(|e| Error::format(&display, e)),
            Some("json") => serde_json::from_str(&src).map_err(|e| Error::format(&display, e)),
            other => Err(Error::UnsupportedFormat {
                path: display,
                extension: other.map(str::to_string),
            }),
        }
    }

    pub fn to_toml_string(&self) -> Result<String, Error> {
        toml::to_string_pretty(self).map_err(|e| Error::format("<toml>", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_budgets() {
        let cfg = OptimizerConfig::default();
        assert_eq!(cfg.max_object_size, 256);
        assert_eq!(cfg.max_frame_size, 4096);
        assert_eq!(cfg.default_sizes.for_type(ObjectType::Object), Some(64));
        assert_eq!(cfg.default_sizes.for_type(ObjectType::Array), Some(128));
        assert_eq!(cfg.default_sizes.for_type(ObjectType::String), Some(32));
        assert_eq!(cfg.default_sizes.for_type(ObjectType::Closure), Some(64));
        assert_eq!(cfg.default_sizes.for_type(ObjectType::Unknown), None);
        assert!(cfg.unknown_is_bottom);
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let cfg = OptimizerConfig::from_toml_str(
            r#"
            max_frame_size = 128

            [default_sizes]
            object = 48
            "#,
        )
        .expect("parse toml");
        assert_eq!(cfg.max_frame_size, 128);
        assert_eq!(cfg.max_object_size, 256);
        assert_eq!(cfg.default_sizes.object, 48);
        assert_eq!(cfg.default_sizes.array, 128);
    }

    #[test]
    fn toml_round_trips_through_pretty_output() {
        let cfg = OptimizerConfig::default();
        let text = cfg.to_toml_string().expect("serialize");
        assert_eq!(OptimizerConfig::from_toml_str(&text).expect("reparse"), cfg);
    }

    #[test]
    fn from_path_dispatches_on_extension() {
        let dir = tempfile::tempdir().expect("tempdir");
        let yaml = dir.path().join("opt.yaml");
        let mut file = std::fs::File::create(&yaml).expect("create yaml");
        writeln!(file, "max_object_size: 32").expect("write yaml");
        let cfg = OptimizerConfig::from_path(&yaml).expect("load yaml");
        assert_eq!(cfg.max_object_size, 32);

        let txt = dir.path().join("opt.txt");
        std::fs::write(&txt, "max_object_size = 1").expect("write txt");
        let err = OptimizerConfig::from_path(&txt).expect_err("txt is not a config format");
        assert!(err.to_string().contains("unsupported file extension"), "{err}");
    }
}
