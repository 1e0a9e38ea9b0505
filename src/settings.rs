//! Per-device tile settings: the quick-send grid a lead carries between
//! sessions, plus a few global display knobs. Persisted on every change and
//! merged over the defaults on load.

use serde::{Deserialize, Serialize};

use crate::error::CueResult;
use crate::local::{LocalStore, APP_SETTINGS_KEY};
use crate::model::{default_local_tiles, new_tile_id, FontWeight, TileConfig, TilePatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    #[default]
    Dark,
    Auto,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppSettings {
    pub tiles: Vec<TileConfig>,
    pub global_text_size: u32,
    pub global_font_weight: FontWeight,
    pub theme: Theme,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            tiles: default_local_tiles(),
            global_text_size: 20,
            global_font_weight: FontWeight::Bold,
            theme: Theme::Dark,
        }
    }
}

pub struct TileSettings {
    store: LocalStore,
    settings: AppSettings,
}

impl TileSettings {
    pub async fn load(store: LocalStore) -> CueResult<Self> {
        let settings = match store.get(APP_SETTINGS_KEY).await? {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!("unreadable settings, falling back to defaults: {e}");
                AppSettings::default()
            }),
            None => AppSettings::default(),
        };
        Ok(Self { store, settings })
    }

    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    /// Active tiles in grid order.
    pub fn active_tiles(&self) -> Vec<TileConfig> {
        self.settings
            .tiles
            .iter()
            .filter(|t| t.is_active)
            .cloned()
            .collect()
    }

    /// Adds a tile, assigning it a fresh id; returns the id.
    pub async fn add_tile(&mut self, tile: TileConfig) -> CueResult<String> {
        let mut tile = tile;
        tile.id = new_tile_id();
        let id = tile.id.clone();
        self.settings.tiles.push(tile);
        self.save().await?;
        Ok(id)
    }

    /// Applies a partial update; false when no tile has that id.
    pub async fn update_tile(&mut self, id: &str, patch: TilePatch) -> CueResult<bool> {
        let Some(tile) = self.settings.tiles.iter_mut().find(|t| t.id == id) else {
            return Ok(false);
        };
        patch.apply(tile);
        self.save().await?;
        Ok(true)
    }

    pub async fn remove_tile(&mut self, id: &str) -> CueResult<bool> {
        let before = self.settings.tiles.len();
        self.settings.tiles.retain(|t| t.id != id);
        if self.settings.tiles.len() == before {
            return Ok(false);
        }
        self.save().await?;
        Ok(true)
    }

    pub async fn set_global_text_size(&mut self, size: u32) -> CueResult<()> {
        self.settings.global_text_size = size;
        self.save().await
    }

    pub async fn set_global_font_weight(&mut self, weight: FontWeight) -> CueResult<()> {
        self.settings.global_font_weight = weight;
        self.save().await
    }

    pub async fn set_theme(&mut self, theme: Theme) -> CueResult<()> {
        self.settings.theme = theme;
        self.save().await
    }

    pub async fn reset_to_defaults(&mut self) -> CueResult<()> {
        self.settings = AppSettings::default();
        self.save().await
    }

    async fn save(&self) -> CueResult<()> {
        let raw = serde_json::to_string(&self.settings)?;
        self.store.set(APP_SETTINGS_KEY, &raw).await
    }
}
