//! Animation timing derivation
//!
//! Turns request fields plus measured audio durations into the concrete
//! frame counts handed to the backend. Pure: measurement happens before this
//! module is called.
//!
//! Rules, in order:
//! 1. `fps` defaults to 25, also when given as 0
//! 2. `duration_seconds` given → `floor(fps * d) + 81`
//! 3. else explicit `max_frame`
//! 4. else longest measured audio track → `floor(fps * d) + 81`
//! 5. `motion_frame` explicit, else `max_frame - 9` without audio,
//!    else `max_frame - 72`
//!
//! Both frame counts are clamped to at least 9.

use serde::Serialize;

use crate::models::GenerationRequest;

/// Frame rate used when the request specifies none
pub const DEFAULT_FPS: u32 = 25;

/// Fixed padding added for the backend's windowing algorithm
pub const FRAME_PADDING: u32 = 81;

/// Lower bound for both frame counts
pub const MIN_FRAMES: u32 = 9;

/// Overlap reserved for window continuity when audio drives the pacing
pub const MOTION_OVERLAP: u32 = 72;

/// Overlap used when no audio was supplied (more aggressive motion)
pub const SILENT_MOTION_OVERLAP: u32 = 9;

/// Audio facts gathered before derivation
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AudioMeasurements {
    /// Caller supplied an audio reference (not a fallback or synthetic track)
    pub provided: bool,
    pub primary_seconds: Option<f64>,
    /// Second speaker's track, measured only for multi-person requests
    pub secondary_seconds: Option<f64>,
}

/// Where `max_frame` came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameSource {
    RequestedDuration,
    Explicit,
    AudioDuration,
    /// No duration could be measured
    Fallback,
}

/// Audio shorter than the requested video span
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AudioShortfall {
    pub audio_seconds: f64,
    pub requested_seconds: f64,
}

/// Derived timing parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DerivedTiming {
    pub fps: u32,
    pub max_frame: u32,
    pub motion_frame: u32,
    pub frame_source: FrameSource,
    /// Animation will not cover the whole requested span
    pub audio_shortfall: Option<AudioShortfall>,
}

/// Frames covering `seconds` at `fps`, plus the windowing padding
pub fn frames_for_duration(seconds: f64, fps: u32) -> u32 {
    let frames = (f64::from(fps) * seconds.max(0.0)).floor() as u32;
    frames.saturating_add(FRAME_PADDING)
}

/// Frame count for the longest measured track
///
/// Returns `None` when neither track could be measured.
pub fn frames_from_audio(audio: &AudioMeasurements, fps: u32) -> Option<u32> {
    [audio.primary_seconds, audio.secondary_seconds]
        .into_iter()
        .flatten()
        .reduce(f64::max)
        .map(|longest| frames_for_duration(longest, fps))
}

/// Derive timing parameters for one request
pub fn derive(request: &GenerationRequest, audio: &AudioMeasurements) -> DerivedTiming {
    let fps = request.fps.filter(|f| *f > 0).unwrap_or(DEFAULT_FPS);

    let mut audio_shortfall = None;
    let (max_frame, frame_source) = if let Some(requested) = request.requested_duration() {
        if let Some(measured) = audio.primary_seconds {
            if measured < requested {
                audio_shortfall = Some(AudioShortfall {
                    audio_seconds: measured,
                    requested_seconds: requested,
                });
            }
        }
        (frames_for_duration(requested, fps), FrameSource::RequestedDuration)
    } else if let Some(explicit) = request.max_frame {
        (explicit, FrameSource::Explicit)
    } else {
        match frames_from_audio(audio, fps) {
            Some(frames) => (frames, FrameSource::AudioDuration),
            None => (FRAME_PADDING, FrameSource::Fallback),
        }
    };
    let max_frame = max_frame.max(MIN_FRAMES);

    let motion_frame = match request.motion_frame {
        Some(explicit) => explicit,
        None if !audio.provided => max_frame.saturating_sub(SILENT_MOTION_OVERLAP),
        None => max_frame.saturating_sub(MOTION_OVERLAP),
    }
    .max(MIN_FRAMES);

    DerivedTiming {
        fps,
        max_frame,
        motion_frame,
        frame_source,
        audio_shortfall,
    }
}
