use indexmap::IndexMap;

use crate::job::{Capability, Resolution};

/// What a backend adapter can do, independent of how it talks to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterSpec {
    pub name: String,
    pub capability: Capability,
    pub backend: String,
    pub resolutions: Vec<Resolution>,
}

impl AdapterSpec {
    pub fn supports(&self, capability: Capability) -> bool {
        self.capability == capability
    }

    /// Non-image adapters ignore resolution entirely.
    pub fn supports_resolution(&self, resolution: Resolution) -> bool {
        self.capability != Capability::Image || self.resolutions.contains(&resolution)
    }
}

#[derive(Debug, Clone)]
pub struct AdapterCatalog {
    adapters: IndexMap<String, AdapterSpec>,
}

impl Default for AdapterCatalog {
    fn default() -> Self {
        Self::new(None)
    }
}

impl AdapterCatalog {
    pub fn new(adapters: Option<IndexMap<String, AdapterSpec>>) -> Self {
        Self {
            adapters: adapters.unwrap_or_else(default_adapters),
        }
    }

    pub fn get(&self, name: &str) -> Option<&AdapterSpec> {
        self.adapters.get(name).or_else(|| {
            self.adapters
                .values()
                .find(|spec| spec.name.eq_ignore_ascii_case(name.trim()))
        })
    }

    pub fn list(&self) -> impl Iterator<Item = &AdapterSpec> {
        self.adapters.values()
    }

    pub fn by_capability(&self, capability: Capability) -> Vec<AdapterSpec> {
        self.adapters
            .values()
            .filter(|spec| spec.supports(capability))
            .cloned()
            .collect()
    }

    pub fn ensure(&self, name: &str, capability: Capability) -> Option<AdapterSpec> {
        let spec = self.get(name)?;
        if spec.supports(capability) {
            return Some(spec.clone());
        }
        None
    }
}

const ALL_SIZES: &[Resolution] = &Resolution::ALL;
const SQUARE_ONLY: &[Resolution] = &[Resolution::Square];

fn default_adapters() -> IndexMap<String, AdapterSpec> {
    let mut map = IndexMap::new();

    let mut insert =
        |name: &str, capability: Capability, backend: &str, resolutions: &[Resolution]| {
            map.insert(
                name.to_string(),
                AdapterSpec {
                    name: name.to_string(),
                    capability,
                    backend: backend.to_string(),
                    resolutions: resolutions.to_vec(),
                },
            );
        };

    // First entry per capability is that capability's default.
    insert(
        "DallE-XL",
        Capability::Image,
        "ehristoforu-dalle-3-xl-lora-v2.hf.space",
        ALL_SIZES,
    );
    insert(
        "SD-XL-Alt",
        Capability::Image,
        "ap123-sdxl-lightning.hf.space",
        SQUARE_ONLY,
    );
    insert(
        "SD-XL-Alt2",
        Capability::Image,
        "h1t-tcd.hf.space",
        SQUARE_ONLY,
    );
    insert(
        "Kandinsky",
        Capability::Image,
        "ehristoforu-kandinsky-api.hf.space",
        ALL_SIZES,
    );
    insert(
        "Anime",
        Capability::Image,
        "cagliostrolab-animagine-xl-3-1.hf.space",
        ALL_SIZES,
    );
    insert(
        "Stable-Cascade",
        Capability::Image,
        "multimodalart-stable-cascade.hf.space",
        ALL_SIZES,
    );
    insert(
        "PixArt-Sigma",
        Capability::Image,
        "pixart-alpha-pixart-sigma.hf.space",
        ALL_SIZES,
    );
    insert("DallE-3", Capability::Image, "api.openai.com", ALL_SIZES);
    insert(
        "Replicate-SDXL",
        Capability::Image,
        "api.replicate.com",
        ALL_SIZES,
    );
    insert(
        "MeloTTS",
        Capability::Speech,
        "mrfakename-melotts.hf.space",
        &[],
    );
    insert(
        "MusicGen",
        Capability::Music,
        "surn-unlimitedmusicgen.hf.space",
        &[],
    );
    insert(
        "AnimateDiff",
        Capability::Video,
        "bytedance-animatediff-lightning.hf.space",
        &[],
    );

    map
}
