//! Workflow graph templates and slot parameterization
//!
//! A template is a map of node id → node definition (`class_type` plus an
//! `inputs` map). Each (input type × person count) combination has its own
//! template file. Jobs always receive a private copy.
//!
//! Values are injected through a typed slot table rather than ad-hoc writes,
//! so every node id the service depends on is listed in one place and can be
//! checked against the loaded templates at startup.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::{InputType, PersonCount};
use crate::services::parameter_deriver::DerivedTiming;

/// Node ids referenced by the service
pub mod nodes {
    pub const IMAGE_LOADER: &str = "284";
    pub const VIDEO_LOADER: &str = "228";
    pub const PRIMARY_AUDIO: &str = "125";
    pub const SECONDARY_AUDIO_IMAGE: &str = "307";
    pub const SECONDARY_AUDIO_VIDEO: &str = "313";
    pub const PROMPT: &str = "241";
    pub const WIDTH: &str = "245";
    pub const HEIGHT: &str = "246";
    pub const MAX_FRAME: &str = "270";
    pub const WINDOWING: &str = "192";
    pub const VIDEO_ASSEMBLY: &str = "194";
    pub const VIDEO_COMBINE: &str = "131";
    pub const FRAME_LIMIT: &str = "301";
}

/// Audio influence used when no audio was supplied
pub const SILENT_AUDIO_SCALE: f64 = 0.1;

/// Container format requested from the combine node
pub const OUTPUT_FORMAT: &str = "video/h264-mp4";

/// Template errors
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Template not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Template {} is invalid: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One node of a workflow graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    #[serde(default)]
    pub class_type: String,

    #[serde(default)]
    pub inputs: Map<String, Value>,

    /// Fields the service does not interpret (`_meta`, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Workflow graph (node id → node)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Graph {
    nodes: BTreeMap<String, GraphNode>,
}

impl Graph {
    pub fn from_json(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.nodes.contains_key(node_id)
    }

    pub fn node(&self, node_id: &str) -> Option<&GraphNode> {
        self.nodes.get(node_id)
    }

    pub fn input(&self, node_id: &str, slot: &str) -> Option<&Value> {
        self.nodes.get(node_id).and_then(|n| n.inputs.get(slot))
    }

    /// Write a slot value; returns false when the node is absent
    pub fn set_input(&mut self, node_id: &str, slot: &str, value: Value) -> bool {
        match self.nodes.get_mut(node_id) {
            Some(node) => {
                node.inputs.insert(slot.to_string(), value);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Template variant selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TemplateKey {
    pub input_type: InputType,
    pub person_count: PersonCount,
}

impl TemplateKey {
    pub fn new(input_type: InputType, person_count: PersonCount) -> Self {
        Self {
            input_type,
            person_count,
        }
    }

    /// All known variants
    pub fn all() -> [TemplateKey; 4] {
        [
            Self::new(InputType::Image, PersonCount::Single),
            Self::new(InputType::Image, PersonCount::Multi),
            Self::new(InputType::Video, PersonCount::Single),
            Self::new(InputType::Video, PersonCount::Multi),
        ]
    }

    pub fn file_name(&self) -> &'static str {
        match (self.input_type, self.person_count) {
            (InputType::Image, PersonCount::Single) => "I2V_single.json",
            (InputType::Image, PersonCount::Multi) => "I2V_multi.json",
            (InputType::Video, PersonCount::Single) => "V2V_single.json",
            (InputType::Video, PersonCount::Multi) => "V2V_multi.json",
        }
    }
}

// ============================================================================
// Slot table
// ============================================================================

/// Address of one node input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotPath {
    pub node: &'static str,
    pub slot: &'static str,
}

impl std::fmt::Display for SlotPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.inputs.{}", self.node, self.slot)
    }
}

/// What a slot receives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotRole {
    Media,
    PrimaryAudio,
    SecondaryAudio,
    Prompt,
    Width,
    Height,
    MaxFrame,
    WindowSize,
    MotionFrame,
    AssemblyFps,
    AudioScale,
    CombineFrameRate,
    TrimToAudio,
    SaveOutput,
    OutputFormat,
    /// Link the frame limit to the max-frame value node instead of the
    /// audio-embedding frame count, which under-counts for short audio
    FrameCountLink,
}

/// Slot table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotSpec {
    pub path: SlotPath,
    pub role: SlotRole,
    /// Drift in a required slot is reported at startup
    pub required: bool,
}

const fn slot(node: &'static str, name: &'static str, role: SlotRole, required: bool) -> SlotSpec {
    SlotSpec {
        path: SlotPath { node, slot: name },
        role,
        required,
    }
}

/// Slot table for one template variant
pub fn slot_table(key: TemplateKey) -> Vec<SlotSpec> {
    use SlotRole::*;

    let mut table = Vec::with_capacity(17);
    table.push(match key.input_type {
        InputType::Image => slot(nodes::IMAGE_LOADER, "image", Media, true),
        InputType::Video => slot(nodes::VIDEO_LOADER, "video", Media, true),
    });
    table.extend([
        slot(nodes::PRIMARY_AUDIO, "audio", PrimaryAudio, true),
        slot(nodes::PROMPT, "positive_prompt", Prompt, true),
        slot(nodes::WIDTH, "value", Width, true),
        slot(nodes::HEIGHT, "value", Height, true),
        slot(nodes::MAX_FRAME, "value", MaxFrame, true),
    ]);
    if key.person_count == PersonCount::Multi {
        table.push(match key.input_type {
            InputType::Image => slot(nodes::SECONDARY_AUDIO_IMAGE, "audio", SecondaryAudio, false),
            InputType::Video => slot(nodes::SECONDARY_AUDIO_VIDEO, "audio", SecondaryAudio, false),
        });
    }
    table.extend([
        slot(nodes::WINDOWING, "frame_window_size", WindowSize, false),
        slot(nodes::WINDOWING, "motion_frame", MotionFrame, false),
        slot(nodes::VIDEO_ASSEMBLY, "fps", AssemblyFps, false),
        slot(nodes::VIDEO_ASSEMBLY, "audio_scale", AudioScale, false),
        slot(nodes::VIDEO_COMBINE, "frame_rate", CombineFrameRate, false),
        slot(nodes::VIDEO_COMBINE, "trim_to_audio", TrimToAudio, false),
        slot(nodes::VIDEO_COMBINE, "save_output", SaveOutput, false),
        slot(nodes::VIDEO_COMBINE, "format", OutputFormat, false),
        slot(nodes::FRAME_LIMIT, "num_frames", FrameCountLink, false),
    ]);
    table
}

/// Values injected into a job's graph
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateParams {
    pub media_path: PathBuf,
    pub audio_path: PathBuf,
    pub secondary_audio_path: Option<PathBuf>,
    pub prompt: String,
    pub width: u32,
    pub height: u32,
    pub timing: DerivedTiming,
    /// Caller supplied real audio
    pub audio_provided: bool,
    pub trim_to_audio: bool,
}

fn path_value(path: &Path) -> Value {
    Value::String(path.to_string_lossy().into_owned())
}

/// Value for a slot role, or `None` when the slot is left untouched
fn value_for(role: SlotRole, params: &TemplateParams) -> Option<Value> {
    use SlotRole::*;

    let value = match role {
        Media => path_value(&params.media_path),
        PrimaryAudio => path_value(&params.audio_path),
        SecondaryAudio => path_value(params.secondary_audio_path.as_deref()?),
        Prompt => Value::String(params.prompt.clone()),
        Width => json!(params.width),
        Height => json!(params.height),
        MaxFrame | WindowSize => json!(params.timing.max_frame),
        MotionFrame => json!(params.timing.motion_frame),
        AssemblyFps | CombineFrameRate => json!(params.timing.fps),
        AudioScale if params.audio_provided => return None,
        AudioScale => json!(SILENT_AUDIO_SCALE),
        TrimToAudio => Value::Bool(params.trim_to_audio),
        SaveOutput => Value::Bool(true),
        OutputFormat => Value::String(OUTPUT_FORMAT.to_string()),
        FrameCountLink => json!([nodes::MAX_FRAME, 0]),
    };
    Some(value)
}

/// Outcome of parameterizing one graph
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub written: Vec<SlotPath>,
    /// Slots whose node is absent in this variant
    pub skipped: Vec<SlotPath>,
}

/// Write request values into a job's graph copy
///
/// Slots whose node is absent are skipped; variants legitimately differ in
/// which optional nodes they carry.
pub fn apply(graph: &mut Graph, key: TemplateKey, params: &TemplateParams) -> ApplyReport {
    let mut report = ApplyReport::default();

    for spec in slot_table(key) {
        let Some(value) = value_for(spec.role, params) else {
            continue;
        };
        if graph.set_input(spec.path.node, spec.path.slot, value) {
            report.written.push(spec.path);
        } else {
            debug!(slot = %spec.path, "Template node absent, slot skipped");
            report.skipped.push(spec.path);
        }
    }

    report
}

/// Required slots whose node is missing from `graph`
pub fn validate(graph: &Graph, key: TemplateKey) -> Vec<SlotPath> {
    slot_table(key)
        .into_iter()
        .filter(|spec| spec.required && !graph.contains(spec.path.node))
        .map(|spec| spec.path)
        .collect()
}

// ============================================================================
// Catalog
// ============================================================================

/// Required slot missing from a loaded template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateDrift {
    pub key: TemplateKey,
    pub missing: Vec<SlotPath>,
}

/// Loaded templates, cloned per job
#[derive(Debug, Clone, Default)]
pub struct TemplateCatalog {
    dir: PathBuf,
    templates: HashMap<TemplateKey, Graph>,
}

impl TemplateCatalog {
    /// Load every variant present in `dir`
    ///
    /// Missing or unreadable variants are logged and left to be loaded on
    /// first use.
    pub fn load(dir: &Path) -> Self {
        let mut templates = HashMap::new();
        for key in TemplateKey::all() {
            let path = dir.join(key.file_name());
            match read_template(&path) {
                Ok(graph) => {
                    info!(template = %path.display(), nodes = graph.len(), "Loaded workflow template");
                    templates.insert(key, graph);
                }
                Err(e) => warn!(template = %path.display(), error = %e, "Workflow template unavailable"),
            }
        }

        let catalog = Self {
            dir: dir.to_path_buf(),
            templates,
        };
        for drift in catalog.drift() {
            for slot in &drift.missing {
                warn!(
                    template = drift.key.file_name(),
                    slot = %slot,
                    "Template is missing a required node"
                );
            }
        }
        catalog
    }

    /// Catalog over in-memory templates
    pub fn from_templates(dir: PathBuf, templates: HashMap<TemplateKey, Graph>) -> Self {
        Self { dir, templates }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_loaded(&self, key: TemplateKey) -> bool {
        self.templates.contains_key(&key)
    }

    /// Required-slot drift across loaded variants
    pub fn drift(&self) -> Vec<TemplateDrift> {
        TemplateKey::all()
            .into_iter()
            .filter_map(|key| {
                let graph = self.templates.get(&key)?;
                let missing = validate(graph, key);
                (!missing.is_empty()).then_some(TemplateDrift { key, missing })
            })
            .collect()
    }

    /// Fresh copy of the template for `key`
    pub async fn instantiate(&self, key: TemplateKey) -> Result<Graph, TemplateError> {
        if let Some(graph) = self.templates.get(&key) {
            return Ok(graph.clone());
        }

        let path = self.dir.join(key.file_name());
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TemplateError::NotFound(path))
            }
            Err(e) => return Err(e.into()),
        };
        parse_template(&path, &content)
    }
}

fn read_template(path: &Path) -> Result<Graph, TemplateError> {
    let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => TemplateError::NotFound(path.to_path_buf()),
        _ => TemplateError::Io(e),
    })?;
    parse_template(path, &content)
}

fn parse_template(path: &Path, content: &str) -> Result<Graph, TemplateError> {
    serde_json::from_str(content).map_err(|e| TemplateError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}
