//! Generation request parameters
//!
//! A request names its media with one of three reference kinds per slot
//! (`*_path`, `*_url`, `*_base64`). When several are present the first in
//! that order wins.

use serde::{Deserialize, Deserializer, Serialize};

/// Prompt used when the request carries none
pub const DEFAULT_PROMPT: &str = "A person talking naturally";

/// Source media type driving the animation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    /// Still image animated from audio
    #[default]
    Image,
    /// Existing video re-synchronized to audio
    Video,
}

/// Number of speakers in the scene
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersonCount {
    #[default]
    Single,
    /// Two speakers, each driven by its own audio track
    Multi,
}

/// How a media reference must be materialized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceKind {
    Path,
    Url,
    Base64,
}

impl ReferenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceKind::Path => "path",
            ReferenceKind::Url => "url",
            ReferenceKind::Base64 => "base64",
        }
    }
}

/// One media reference taken from a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaReference {
    pub kind: ReferenceKind,
    pub value: String,
}

/// Generation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    #[serde(default)]
    pub input_type: InputType,

    #[serde(default)]
    pub person_count: PersonCount,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_base64: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_base64: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wav_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wav_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wav_base64: Option<String>,

    /// Second speaker's audio (multi-person only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wav_path_2: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wav_url_2: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wav_base64_2: Option<String>,

    #[serde(default = "default_prompt")]
    pub prompt: String,

    #[serde(default = "default_dimension")]
    pub width: u32,

    #[serde(default = "default_dimension")]
    pub height: u32,

    /// Output frame rate (default 25)
    #[serde(default)]
    pub fps: Option<u32>,

    /// Requested video length; takes precedence over `max_frame`
    #[serde(default)]
    pub duration_seconds: Option<f64>,

    #[serde(default)]
    pub max_frame: Option<u32>,

    #[serde(default)]
    pub motion_frame: Option<u32>,

    /// Cut the final video to the audio length
    #[serde(default, deserialize_with = "flexible_bool")]
    pub trim_to_audio: bool,

    /// Copy the result to durable shared storage and return its path
    #[serde(default, deserialize_with = "flexible_bool")]
    pub network_volume: bool,
}

fn default_prompt() -> String {
    DEFAULT_PROMPT.to_string()
}

fn default_dimension() -> u32 {
    512
}

impl Default for GenerationRequest {
    fn default() -> Self {
        Self {
            input_type: InputType::default(),
            person_count: PersonCount::default(),
            image_path: None,
            image_url: None,
            image_base64: None,
            video_path: None,
            video_url: None,
            video_base64: None,
            wav_path: None,
            wav_url: None,
            wav_base64: None,
            wav_path_2: None,
            wav_url_2: None,
            wav_base64_2: None,
            prompt: default_prompt(),
            width: default_dimension(),
            height: default_dimension(),
            fps: None,
            duration_seconds: None,
            max_frame: None,
            motion_frame: None,
            trim_to_audio: false,
            network_volume: false,
        }
    }
}

impl GenerationRequest {
    /// Media reference for the request's input type
    pub fn media_reference(&self) -> Option<MediaReference> {
        match self.input_type {
            InputType::Image => first_reference(&self.image_path, &self.image_url, &self.image_base64),
            InputType::Video => first_reference(&self.video_path, &self.video_url, &self.video_base64),
        }
    }

    /// Primary audio reference
    pub fn audio_reference(&self) -> Option<MediaReference> {
        first_reference(&self.wav_path, &self.wav_url, &self.wav_base64)
    }

    /// Second speaker's audio reference
    pub fn secondary_audio_reference(&self) -> Option<MediaReference> {
        first_reference(&self.wav_path_2, &self.wav_url_2, &self.wav_base64_2)
    }

    /// Requested duration, treating zero or negative values as absent
    pub fn requested_duration(&self) -> Option<f64> {
        self.duration_seconds.filter(|d| *d > 0.0)
    }

    pub fn is_multi_person(&self) -> bool {
        self.person_count == PersonCount::Multi
    }
}

fn first_reference(
    path: &Option<String>,
    url: &Option<String>,
    base64: &Option<String>,
) -> Option<MediaReference> {
    [
        (ReferenceKind::Path, path),
        (ReferenceKind::Url, url),
        (ReferenceKind::Base64, base64),
    ]
    .into_iter()
    .find_map(|(kind, value)| {
        value.as_ref().map(|value| MediaReference {
            kind,
            value: value.clone(),
        })
    })
}

/// Accept JSON booleans as well as the string and integer spellings
/// clients send (`"true"`, `"false"`, `"1"`, `0`, `"yes"`).
fn flexible_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Bool(bool),
        Int(i64),
        Text(String),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        None => false,
        Some(Raw::Bool(b)) => b,
        Some(Raw::Int(i)) => i != 0,
        Some(Raw::Text(s)) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "true" | "1" | "yes" | "y" | "on"
        ),
    })
}
