use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;

use crate::job::Resolution;

pub const DEFAULT_IMAGE_ADAPTER: &str = "DallE-XL";
pub const DEFAULT_SPEECH_ADAPTER: &str = "MeloTTS";
pub const PLAIN_CHAR_BUDGET: usize = 1900;
pub const RICH_CHAR_BUDGET: usize = 3900;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStyle {
    Plain,
    #[default]
    Rich,
}

impl ResponseStyle {
    /// Characters a single rendered message may hold.
    pub fn char_budget(self) -> usize {
        match self {
            ResponseStyle::Plain => PLAIN_CHAR_BUDGET,
            ResponseStyle::Rich => RICH_CHAR_BUDGET,
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            ResponseStyle::Plain => ResponseStyle::Rich,
            ResponseStyle::Rich => ResponseStyle::Plain,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UrlMode {
    #[default]
    On,
    Off,
}

impl UrlMode {
    pub fn toggled(self) -> Self {
        match self {
            UrlMode::On => UrlMode::Off,
            UrlMode::Off => UrlMode::On,
        }
    }

    pub fn is_on(self) -> bool {
        self == UrlMode::On
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserPreferences {
    pub image_adapter: String,
    pub resolution: Resolution,
    pub speech_adapter: String,
    pub style: ResponseStyle,
    pub url_mode: UrlMode,
    pub instructions: Option<String>,
    pub enhance_prompts: bool,
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            image_adapter: DEFAULT_IMAGE_ADAPTER.to_string(),
            resolution: Resolution::Square,
            speech_adapter: DEFAULT_SPEECH_ADAPTER.to_string(),
            style: ResponseStyle::Rich,
            url_mode: UrlMode::On,
            instructions: None,
            enhance_prompts: false,
        }
    }
}

/// Per-actor settings for the lifetime of the process.
#[derive(Debug, Clone, Default)]
pub struct PreferencesStore {
    defaults: UserPreferences,
    entries: Arc<Mutex<HashMap<String, UserPreferences>>>,
}

impl PreferencesStore {
    pub fn new(defaults: UserPreferences) -> Self {
        Self {
            defaults,
            entries: Arc::default(),
        }
    }

    pub fn get(&self, actor: &str) -> UserPreferences {
        self.lock()
            .get(actor)
            .cloned()
            .unwrap_or_else(|| self.defaults.clone())
    }

    /// Applies `change` to the actor's settings and returns the result.
    pub fn update(&self, actor: &str, change: impl FnOnce(&mut UserPreferences)) -> UserPreferences {
        let mut entries = self.lock();
        let prefs = entries
            .entry(actor.to_string())
            .or_insert_with(|| self.defaults.clone());
        change(prefs);
        prefs.clone()
    }

    pub fn set_image_adapter(&self, actor: &str, adapter: &str) -> UserPreferences {
        self.update(actor, |prefs| prefs.image_adapter = adapter.to_string())
    }

    pub fn set_speech_adapter(&self, actor: &str, adapter: &str) -> UserPreferences {
        self.update(actor, |prefs| prefs.speech_adapter = adapter.to_string())
    }

    pub fn set_resolution(&self, actor: &str, resolution: Resolution) -> UserPreferences {
        self.update(actor, |prefs| prefs.resolution = resolution)
    }

    pub fn toggle_style(&self, actor: &str) -> ResponseStyle {
        self.update(actor, |prefs| prefs.style = prefs.style.toggled())
            .style
    }

    pub fn toggle_url_mode(&self, actor: &str) -> UrlMode {
        self.update(actor, |prefs| prefs.url_mode = prefs.url_mode.toggled())
            .url_mode
    }

    pub fn toggle_prompt_enhancement(&self, actor: &str) -> bool {
        self.update(actor, |prefs| prefs.enhance_prompts = !prefs.enhance_prompts)
            .enhance_prompts
    }

    /// Blank text clears the instructions.
    pub fn set_instructions(&self, actor: &str, text: Option<&str>) -> Option<String> {
        let cleaned = text
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        self.update(actor, |prefs| prefs.instructions = cleaned)
            .instructions
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, UserPreferences>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_actor_gets_defaults() {
        let store = PreferencesStore::default();
        let prefs = store.get("nobody");
        assert_eq!(prefs.image_adapter, "DallE-XL");
        assert_eq!(prefs.speech_adapter, "MeloTTS");
        assert_eq!(prefs.style, ResponseStyle::Rich);
        assert!(prefs.url_mode.is_on());
        assert_eq!(prefs.style.char_budget(), 3900);
    }

    #[test]
    fn toggles_flip_and_persist() {
        let store = PreferencesStore::default();
        assert_eq!(store.toggle_style("u1"), ResponseStyle::Plain);
        assert_eq!(store.get("u1").style.char_budget(), 1900);
        assert_eq!(store.toggle_url_mode("u1"), UrlMode::Off);
        assert!(store.toggle_prompt_enhancement("u1"));
        assert_eq!(store.toggle_style("u1"), ResponseStyle::Rich);
        assert_eq!(store.get("u2"), UserPreferences::default());
    }

    #[test]
    fn blank_instructions_clear_previous_value() {
        let store = PreferencesStore::default();
        assert_eq!(
            store.set_instructions("u1", Some("  answer like a pirate ")),
            Some("answer like a pirate".to_string())
        );
        assert_eq!(store.set_instructions("u1", Some("   ")), None);
        assert_eq!(store.get("u1").instructions, None);
    }

    #[test]
    fn custom_defaults_apply_to_new_actors() {
        let store = PreferencesStore::new(UserPreferences {
            image_adapter: "Anime".to_string(),
            ..UserPreferences::default()
        });
        store.set_resolution("u1", Resolution::Wide);
        assert_eq!(store.get("u1").image_adapter, "Anime");
        assert_eq!(store.get("u1").resolution, Resolution::Wide);
    }
}
