//! Per-user feature toggles, addressed by name from chat commands.

use crate::error::TavernError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatSettings {
    #[serde(default = "default_true")]
    pub voice_replies: bool,
    #[serde(default = "default_true")]
    pub image_descriptions: bool,
    #[serde(default = "default_true")]
    pub game_reminders: bool,
    #[serde(default)]
    pub profile_memory: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            voice_replies: true,
            image_descriptions: true,
            game_reminders: true,
            profile_memory: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingToggle {
    VoiceReplies,
    ImageDescriptions,
    GameReminders,
    ProfileMemory,
}

const TOGGLES: &[(&str, SettingToggle)] = &[
    ("voice_replies", SettingToggle::VoiceReplies),
    ("image_descriptions", SettingToggle::ImageDescriptions),
    ("game_reminders", SettingToggle::GameReminders),
    ("profile_memory", SettingToggle::ProfileMemory),
];

impl SettingToggle {
    pub fn all() -> impl Iterator<Item = SettingToggle> {
        TOGGLES.iter().map(|(_, toggle)| *toggle)
    }

    pub fn name(self) -> &'static str {
        match self {
            SettingToggle::VoiceReplies => "voice_replies",
            SettingToggle::ImageDescriptions => "image_descriptions",
            SettingToggle::GameReminders => "game_reminders",
            SettingToggle::ProfileMemory => "profile_memory",
        }
    }
}

impl FromStr for SettingToggle {
    type Err = TavernError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        TOGGLES
            .iter()
            .find(|(name, _)| *name == wanted)
            .map(|(_, toggle)| *toggle)
            .ok_or_else(|| TavernError::UnknownSetting(s.to_string()))
    }
}

impl fmt::Display for SettingToggle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl ChatSettings {
    fn field_mut(&mut self, toggle: SettingToggle) -> &mut bool {
        match toggle {
            SettingToggle::VoiceReplies => &mut self.voice_replies,
            SettingToggle::ImageDescriptions => &mut self.image_descriptions,
            SettingToggle::GameReminders => &mut self.game_reminders,
            SettingToggle::ProfileMemory => &mut self.profile_memory,
        }
    }

    pub fn get(&self, toggle: SettingToggle) -> bool {
        match toggle {
            SettingToggle::VoiceReplies => self.voice_replies,
            SettingToggle::ImageDescriptions => self.image_descriptions,
            SettingToggle::GameReminders => self.game_reminders,
            SettingToggle::ProfileMemory => self.profile_memory,
        }
    }

    pub fn set(&mut self, toggle: SettingToggle, value: bool) {
        *self.field_mut(toggle) = value;
    }

    /// Flip a toggle and return its new value.
    pub fn toggle(&mut self, toggle: SettingToggle) -> bool {
        let field = self.field_mut(toggle);
        *field = !*field;
        *field
    }
}
