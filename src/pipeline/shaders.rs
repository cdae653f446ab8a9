use crate::{config::MAX_QUALITY, Error};
use prism_graphics as gpu;
use rustc_hash::FxHashMap;
use std::{fs, path::Path};

const SPIRV_MAGIC: u32 = 0x0723_0203;

pub const RAYGEN: &str = "raygen";
pub const MISS: &str = "miss";
pub const SHADOW_MISS: &str = "shadow_miss";
pub const CLOSEST_HIT: &str = "closest_hit";
pub const LINEARIZE_DEPTH: &str = "linearize_depth";
pub const RECONSTRUCT_NORMAL: &str = "reconstruct_normal";
pub const SHADOW_QUERY: &str = "shadow_query";
pub const COMPOSITE: &str = "composite";
pub const DEBUG_OVERLAY: &str = "debug_overlay";

/// Modules without which the hardware backend can't start.
pub const REQUIRED: &[&str] = &[
    RAYGEN,
    MISS,
    SHADOW_MISS,
    CLOSEST_HIT,
    LINEARIZE_DEPTH,
    RECONSTRUCT_NORMAL,
];
pub const OPTIONAL: &[&str] = &[SHADOW_QUERY, COMPOSITE, DEBUG_OVERLAY];

pub fn quality_variant(quality: u32) -> String {
    format!("{RAYGEN}_q{quality}")
}

/// Decode a SPIR-V binary into words, checking the magic number.
pub fn parse_spirv(bytes: &[u8]) -> Option<Vec<u32>> {
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return None;
    }
    let words = bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect::<Vec<_>>();
    (words[0] == SPIRV_MAGIC).then_some(words)
}

/// SPIR-V modules by name.
#[derive(Clone, Debug, Default)]
pub struct ShaderLibrary {
    modules: FxHashMap<String, Vec<u32>>,
}

impl ShaderLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `<name>.spv` files from `dir`. Every required module must be
    /// present and valid; optional ones are skipped with a warning.
    pub fn load(dir: &Path) -> Result<Self, Error> {
        let mut library = Self::default();
        for &name in REQUIRED {
            let path = dir.join(format!("{name}.spv"));
            let words = fs::read(&path)
                .ok()
                .and_then(|bytes| parse_spirv(&bytes))
                .ok_or_else(|| {
                    log::warn!("Unable to load shader {}", path.display());
                    Error::ShaderMissing(name.to_string())
                })?;
            library.insert(name, words);
        }

        let variants = (0..=MAX_QUALITY).map(quality_variant);
        for name in OPTIONAL.iter().map(|s| s.to_string()).chain(variants) {
            let path = dir.join(format!("{name}.spv"));
            if !path.exists() {
                continue;
            }
            match fs::read(&path).ok().and_then(|bytes| parse_spirv(&bytes)) {
                Some(words) => library.insert(&name, words),
                None => log::warn!("Ignoring malformed shader {}", path.display()),
            }
        }
        log::info!(
            "Loaded {} shader modules from {}",
            library.modules.len(),
            dir.display()
        );
        Ok(library)
    }

    pub fn insert(&mut self, name: &str, words: Vec<u32>) {
        self.modules.insert(name.to_string(), words);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<gpu::ShaderSource> {
        let (name, words) = self.modules.get_key_value(name)?;
        Some(gpu::ShaderSource {
            name,
            spirv: words,
        })
    }

    pub fn require(&self, name: &str) -> Result<gpu::ShaderSource, Error> {
        self.get(name)
            .ok_or_else(|| Error::ShaderMissing(name.to_string()))
    }

    /// The ray generation module for a quality level, falling back to the
    /// base module.
    pub fn raygen_for_quality(&self, quality: u32) -> Result<gpu::ShaderSource, Error> {
        match self.get(&quality_variant(quality)) {
            Some(source) => Ok(source),
            None => self.require(RAYGEN),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module_bytes() -> Vec<u8> {
        [SPIRV_MAGIC, 0x0001_0000, 0, 1, 0]
            .iter()
            .flat_map(|w| w.to_le_bytes())
            .collect()
    }

    #[test]
    fn spirv_needs_magic_and_alignment() {
        assert!(parse_spirv(&module_bytes()).is_some());
        assert!(parse_spirv(&module_bytes()[..7]).is_none());
        assert!(parse_spirv(&[0; 8]).is_none());
        assert!(parse_spirv(&[]).is_none());
    }

    #[test]
    fn load_reports_first_missing_module() {
        let dir = tempfile::tempdir().unwrap();
        for &name in &REQUIRED[..3] {
            fs::write(dir.path().join(format!("{name}.spv")), module_bytes()).unwrap();
        }
        match ShaderLibrary::load(dir.path()) {
            Err(Error::ShaderMissing(name)) => assert_eq!(name, CLOSEST_HIT),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn load_picks_up_optional_variants() {
        let dir = tempfile::tempdir().unwrap();
        for &name in REQUIRED {
            fs::write(dir.path().join(format!("{name}.spv")), module_bytes()).unwrap();
        }
        fs::write(dir.path().join("raygen_q2.spv"), module_bytes()).unwrap();
        fs::write(dir.path().join("composite.spv"), b"junk").unwrap();
        let library = ShaderLibrary::load(dir.path()).unwrap();
        assert!(!library.contains(COMPOSITE));
        assert_eq!(library.raygen_for_quality(2).unwrap().name, "raygen_q2");
        assert_eq!(library.raygen_for_quality(1).unwrap().name, RAYGEN);
    }
}
