use super::catalog::{AdapterCatalog, AdapterSpec};
use crate::error::GenerationError;
use crate::job::{Capability, Resolution};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterSelection {
    pub adapter: AdapterSpec,
    pub requested: Option<String>,
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AdapterSelector {
    pub catalog: AdapterCatalog,
}

impl AdapterSelector {
    pub fn new(catalog: Option<AdapterCatalog>) -> Self {
        Self {
            catalog: catalog.unwrap_or_default(),
        }
    }

    /// Picks the requested adapter, or the capability default with a reason.
    pub fn select(
        &self,
        requested: Option<&str>,
        capability: Capability,
    ) -> Result<AdapterSelection, GenerationError> {
        let (fallback_reason, requested_text) = if let Some(requested_value) = requested {
            if let Some(adapter) = self.catalog.ensure(requested_value, capability) {
                return Ok(AdapterSelection {
                    adapter,
                    requested: Some(requested_value.to_string()),
                    fallback_reason: None,
                });
            }
            (
                Some(format!(
                    "Requested adapter '{requested_value}' unavailable for capability '{capability}'."
                )),
                Some(requested_value.to_string()),
            )
        } else {
            (Some("No adapter specified; using default.".to_string()), None)
        };

        let candidates = self.catalog.by_capability(capability);
        let Some(adapter) = candidates.first().cloned() else {
            return Err(GenerationError::UnsupportedSelection(format!(
                "no adapters available for capability '{capability}'"
            )));
        };
        Ok(AdapterSelection {
            adapter,
            requested: requested_text,
            fallback_reason,
        })
    }

    /// Like [`select`](Self::select), but refuses a resolution the adapter cannot render.
    pub fn select_for(
        &self,
        requested: Option<&str>,
        capability: Capability,
        resolution: Resolution,
    ) -> Result<AdapterSelection, GenerationError> {
        let selection = self.select(requested, capability)?;
        if !selection.adapter.supports_resolution(resolution) {
            let supported = selection
                .adapter
                .resolutions
                .iter()
                .map(|value| value.label())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(GenerationError::UnsupportedSelection(format!(
                "{} does not support {resolution} (supported: {supported})",
                selection.adapter.name
            )));
        }
        Ok(selection)
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::*;

    fn image_adapter(name: &str) -> AdapterSpec {
        AdapterSpec {
            name: name.to_string(),
            capability: Capability::Image,
            backend: "test".to_string(),
            resolutions: vec![Resolution::Square],
        }
    }

    fn selector_with(specs: Vec<AdapterSpec>) -> AdapterSelector {
        let map = specs
            .into_iter()
            .map(|spec| (spec.name.clone(), spec))
            .collect::<IndexMap<_, _>>();
        AdapterSelector::new(Some(AdapterCatalog::new(Some(map))))
    }

    #[test]
    fn falls_back_when_requested_adapter_unavailable() {
        let selection = selector_with(vec![image_adapter("fallback")])
            .select(Some("missing"), Capability::Image)
            .unwrap();
        assert_eq!(selection.adapter.name, "fallback");
        assert_eq!(selection.requested.as_deref(), Some("missing"));
        assert_eq!(
            selection.fallback_reason.as_deref(),
            Some("Requested adapter 'missing' unavailable for capability 'image'.")
        );
    }

    #[test]
    fn no_request_uses_default_with_explanation() {
        let selection = AdapterSelector::default()
            .select(None, Capability::Speech)
            .unwrap();
        assert_eq!(selection.adapter.name, "MeloTTS");
        assert_eq!(
            selection.fallback_reason.as_deref(),
            Some("No adapter specified; using default.")
        );
    }

    #[test]
    fn errors_when_no_adapter_has_capability() {
        let err = selector_with(vec![image_adapter("only-image")])
            .select(Some("x"), Capability::Music)
            .unwrap_err();
        assert!(matches!(err, GenerationError::UnsupportedSelection(_)));
    }

    #[test]
    fn unsupported_resolution_is_rejected() {
        let err = AdapterSelector::default()
            .select_for(Some("SD-XL-Alt2"), Capability::Image, Resolution::Wide)
            .unwrap_err();
        assert_eq!(
            err,
            GenerationError::UnsupportedSelection(
                "SD-XL-Alt2 does not support Wide (supported: Square)".to_string()
            )
        );
        assert!(AdapterSelector::default()
            .select_for(Some("DallE-XL"), Capability::Image, Resolution::Wide)
            .is_ok());
    }
}
