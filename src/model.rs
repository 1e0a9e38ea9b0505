//! Shared data model: the session record and everything that lives under it.
//!
//! Every struct here serializes to the camelCase JSON layout stored under
//! `sessions/{sessionId}` in the remote store, so a record written by one
//! device deserializes unchanged on every other.

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

pub const SESSION_CODE_LEN: usize = 6;
const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Wall-clock milliseconds; all timestamps in the store use this.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Short join code shown to the band. Uppercase alphanumeric, client
/// generated, not globally unique on its own (the creator re-reads before
/// writing to dodge collisions).
pub fn new_session_code() -> String {
    let mut rng = rand::thread_rng();
    (0..SESSION_CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Opaque per-installation device identity. Created once, never rotated.
pub fn new_device_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn new_tile_id() -> String {
    nanoid::nanoid!(8)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Lead,
    Band,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Lead => "lead",
            Role::Band => "band",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "lead" => Some(Role::Lead),
            "band" => Some(Role::Band),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FontWeight {
    #[serde(rename = "normal")]
    Normal,
    #[default]
    #[serde(rename = "bold")]
    Bold,
    #[serde(rename = "900")]
    Black,
}

/// A device's participation record under `members/{deviceId}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMember {
    pub role: Role,
    pub joined_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<i64>,
}

/// The single current broadcast cue. Last write wins; an empty `text` is the
/// idiom for "clear the display".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cue {
    pub text: String,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_weight: Option<FontWeight>,
    /// Milliseconds the cue stays visible on followers. Zero or absent means
    /// the follower's configured default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
}

/// A cue as handed to `send_cue`; the timestamp is stamped at send time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CueDraft {
    pub text: String,
    pub color: Option<String>,
    pub font_size: Option<u32>,
    pub font_weight: Option<FontWeight>,
    pub duration: Option<u64>,
}

impl CueDraft {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn into_cue(self, timestamp: i64) -> Cue {
        Cue {
            text: self.text,
            timestamp,
            color: self.color,
            font_size: self.font_size,
            font_weight: self.font_weight,
            duration: self.duration,
        }
    }
}

impl From<&TileConfig> for CueDraft {
    fn from(tile: &TileConfig) -> Self {
        Self {
            text: tile.text.clone(),
            color: Some(tile.color.clone()),
            font_size: Some(tile.font_size),
            font_weight: Some(tile.font_weight),
            duration: Some(tile.duration),
        }
    }
}

/// A reusable cue definition shown as a quick-send button on the lead screen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileConfig {
    pub id: String,
    pub text: String,
    pub color: String,
    pub duration: u64,
    pub font_size: u32,
    pub font_weight: FontWeight,
    pub is_active: bool,
}

impl Default for TileConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            text: String::new(),
            color: "#FFFFFF".into(),
            duration: 0,
            font_size: 20,
            font_weight: FontWeight::Bold,
            is_active: true,
        }
    }
}

/// Partial tile update; only the present fields are applied.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TilePatch {
    pub text: Option<String>,
    pub color: Option<String>,
    pub duration: Option<u64>,
    pub font_size: Option<u32>,
    pub font_weight: Option<FontWeight>,
    pub is_active: Option<bool>,
}

impl TilePatch {
    pub fn apply(&self, tile: &mut TileConfig) {
        if let Some(text) = &self.text {
            tile.text = text.clone();
        }
        if let Some(color) = &self.color {
            tile.color = color.clone();
        }
        if let Some(duration) = self.duration {
            tile.duration = duration;
        }
        if let Some(font_size) = self.font_size {
            tile.font_size = font_size;
        }
        if let Some(font_weight) = self.font_weight {
            tile.font_weight = font_weight;
        }
        if let Some(is_active) = self.is_active {
            tile.is_active = is_active;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSettings {
    #[serde(default)]
    pub tiles: Vec<TileConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeadActionKind {
    Scroll,
    Tap,
    Zoom,
    Highlight,
    Annotate,
    PageChange,
    PdfUpload,
    PdfSelect,
}

/// An entry in the append-only `leadActions` log. Unknown fields survive a
/// round trip through `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadAction {
    #[serde(rename = "type")]
    pub kind: LeadActionKind,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl LeadAction {
    pub fn new(kind: LeadActionKind) -> Self {
        Self {
            kind,
            timestamp: 0,
            x: None,
            y: None,
            scale: None,
            color: None,
            text: None,
            page: None,
            extra: Map::new(),
        }
    }
}

/// One live performance session. The `id` is the store path key, not part of
/// the stored record; it is filled in after a read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    #[serde(skip)]
    pub id: String,
    pub role_lead: String,
    pub active: bool,
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<i64>,
    #[serde(default)]
    pub member_count: u32,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub members: HashMap<String, SessionMember>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cue: Option<Cue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_settings: Option<SessionSettings>,
}

fn tile(id: &str, text: &str, color: &str, duration: u64, font_size: u32, font_weight: FontWeight, is_active: bool) -> TileConfig {
    TileConfig {
        id: id.into(),
        text: text.into(),
        color: color.into(),
        duration,
        font_size,
        font_weight,
        is_active,
    }
}

/// Tile grid written under a freshly created session.
pub fn default_session_tiles() -> Vec<TileConfig> {
    vec![
        tile("1", "—", "#FFFFFF", 0, 36, FontWeight::Black, true),
        tile("2", "Pauză Instrumental", "#FFA500", 15000, 20, FontWeight::Bold, true),
        tile("3", "X2 Ref", "#FF0000", 15000, 20, FontWeight::Bold, true),
        tile("4", "Încă 1 str", "#007AFF", 15000, 20, FontWeight::Bold, true),
        tile("5", "Finalul Rărit", "#34C759", 15000, 20, FontWeight::Bold, true),
        tile("6", "Fara Pauza", "#FF3B30", 15000, 20, FontWeight::Bold, true),
        tile("7", "", "#FFFFFF", 0, 20, FontWeight::Bold, false),
        tile("8", "", "#FFFFFF", 0, 20, FontWeight::Bold, false),
    ]
}

/// Per-device tile grid used before any session exists. Shorter durations
/// than the session grid; both sets are kept as shipped.
pub fn default_local_tiles() -> Vec<TileConfig> {
    vec![
        tile("1", "—", "#FFFFFF", 0, 36, FontWeight::Black, true),
        tile("2", "Pauză Instrumental", "#FF9500", 6000, 20, FontWeight::Bold, true),
        tile("3", "X2 Ref", "#FF3B30", 6000, 20, FontWeight::Bold, true),
        tile("4", "Încă 1 str", "#0A84FF", 6000, 20, FontWeight::Bold, true),
        tile("5", "Finalul Rărit", "#5E5CE6", 6000, 20, FontWeight::Bold, true),
        tile("6", "", "#FFFFFF", 0, 20, FontWeight::Bold, false),
        tile("7", "", "#FFFFFF", 0, 20, FontWeight::Bold, false),
        tile("8", "", "#FFFFFF", 0, 20, FontWeight::Bold, false),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_code_shape() {
        for _ in 0..50 {
            let code = new_session_code();
            assert_eq!(code.len(), SESSION_CODE_LEN);
            assert!(code.bytes().all(|b| CODE_ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn cue_wire_format() {
        let cue = Cue {
            text: "X2 Ref".into(),
            timestamp: 42,
            color: Some("#FF0000".into()),
            font_size: Some(20),
            font_weight: Some(FontWeight::Black),
            duration: Some(6000),
        };
        let v = serde_json::to_value(&cue).unwrap();
        assert_eq!(v["fontSize"], 20);
        assert_eq!(v["fontWeight"], "900");
        assert_eq!(v["duration"], 6000);

        let back: Cue = serde_json::from_value(v).unwrap();
        assert_eq!(back, cue);
    }

    #[test]
    fn session_record_skips_id() {
        let session = Session {
            id: "ABC123".into(),
            role_lead: "dev-1".into(),
            active: true,
            created_at: 1,
            ended_at: None,
            member_count: 1,
            members: HashMap::new(),
            cue: None,
            session_settings: None,
        };
        let v = serde_json::to_value(&session).unwrap();
        assert!(v.get("id").is_none());
        assert_eq!(v["roleLead"], "dev-1");

        let back: Session = serde_json::from_value(v).unwrap();
        assert_eq!(back.id, ""); // filled from the path key by callers
        assert!(back.active);
    }

    #[test]
    fn default_tile_sets() {
        let session = default_session_tiles();
        assert_eq!(session.len(), 8);
        assert_eq!(session.iter().filter(|t| t.is_active).count(), 6);
        assert!(session.iter().filter(|t| t.duration > 0).all(|t| t.duration == 15000));

        let local = default_local_tiles();
        assert_eq!(local.len(), 8);
        assert!(local.iter().filter(|t| t.duration > 0).all(|t| t.duration == 6000));
    }

    #[test]
    fn lead_action_keeps_unknown_fields() {
        let raw = serde_json::json!({
            "type": "PAGE_CHANGE",
            "timestamp": 7,
            "page": 3,
            "songId": "intro"
        });
        let action: LeadAction = serde_json::from_value(raw).unwrap();
        assert_eq!(action.kind, LeadActionKind::PageChange);
        assert_eq!(action.extra["songId"], "intro");

        let v = serde_json::to_value(&action).unwrap();
        assert_eq!(v["songId"], "intro");
        assert_eq!(v["type"], "PAGE_CHANGE");
    }
}
