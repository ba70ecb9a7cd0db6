//! Stroke input tracker.
//!
//! Turns raw pointer/stylus events into a time-ordered, normalized path of
//! [`InputPoint`]s: jitter filtering, exponential speed smoothing, and
//! device-signal fallbacks. One tracker handles one concurrent pointer; the
//! one-active-stroke invariant is enforced by the `Idle`/`Active` state
//! machine, not by flags scattered across handlers.

use model::{InputPoint, PointerKind, StrokePhase};

/// A raw event as delivered by the platform layer. Missing device signals
/// (`pressure`, `tilt`, `heading`) are `None` and resolved by the tracker's
/// fallback rules.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawPointerEvent {
    pub pointer_id: u64,
    pub kind: PointerKind,
    pub phase: StrokePhase,
    pub x: f32,
    pub y: f32,
    pub time_ms: f64,
    pub pressure: Option<f32>,
    /// Normalized altitude, 1 fully upright.
    pub tilt: Option<f32>,
    /// Azimuth in degrees.
    pub heading: Option<f32>,
    pub buttons_down: bool,
    /// Device-coalesced high-resolution sub-event.
    pub coalesced: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerConfig {
    /// Minimum displacement (surface units) below which a move sample may be
    /// dropped as jitter.
    pub min_distance: f32,
    /// Minimum elapsed time (ms) below which a move sample may be dropped.
    pub min_interval_ms: f64,
    /// Time constant (ms) of the speed moving average; 0 disables smoothing.
    pub speed_smoothing_ms: f64,
    /// Speed (surface units per ms) mapping to a normalized speed of 1.
    pub max_speed: f32,
    /// Positional epsilon below which a terminal point is not appended.
    pub end_epsilon: f32,
    /// Whether coalesced sub-events bypass the jitter filter. Tunable policy:
    /// high-frequency device samples are usually genuine, not noise.
    pub coalesced_bypass: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            min_distance: 0.3,
            min_interval_ms: 8.0,
            speed_smoothing_ms: 30.0,
            max_speed: 1.2,
            end_epsilon: 0.01,
            coalesced_bypass: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerConfigError {
    MinDistanceInvalid,
    MinIntervalInvalid,
    SpeedSmoothingInvalid,
    MaxSpeedInvalid,
    EndEpsilonInvalid,
}

impl TrackerConfig {
    fn validate(&self) -> Result<(), TrackerConfigError> {
        if !self.min_distance.is_finite() || self.min_distance < 0.0 {
            return Err(TrackerConfigError::MinDistanceInvalid);
        }
        if !self.min_interval_ms.is_finite() || self.min_interval_ms < 0.0 {
            return Err(TrackerConfigError::MinIntervalInvalid);
        }
        if !self.speed_smoothing_ms.is_finite() || self.speed_smoothing_ms < 0.0 {
            return Err(TrackerConfigError::SpeedSmoothingInvalid);
        }
        if !self.max_speed.is_finite() || self.max_speed <= 0.0 {
            return Err(TrackerConfigError::MaxSpeedInvalid);
        }
        if !self.end_epsilon.is_finite() || self.end_epsilon < 0.0 {
            return Err(TrackerConfigError::EndEpsilonInvalid);
        }
        Ok(())
    }
}

/// Emitted once per accepted event. Terminal events carry the whole recorded
/// path by value and leave the tracker `Idle`.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    Started {
        pointer_kind: PointerKind,
        point: InputPoint,
    },
    Sampled {
        pointer_kind: PointerKind,
        point: InputPoint,
        coalesced: bool,
    },
    Finished {
        pointer_kind: PointerKind,
        path: Vec<InputPoint>,
    },
    Cancelled {
        pointer_kind: PointerKind,
        path: Vec<InputPoint>,
    },
}

#[derive(Debug)]
enum TrackerState {
    Idle,
    Active(ActiveStroke),
}

#[derive(Debug)]
struct ActiveStroke {
    pointer_id: u64,
    pointer_kind: PointerKind,
    points: Vec<InputPoint>,
    /// Smoothed speed in surface units per ms, before normalization.
    smoothed_speed: f64,
}

impl ActiveStroke {
    fn last_point(&self) -> InputPoint {
        *self
            .points
            .last()
            .expect("active stroke always holds at least the start point")
    }
}

#[derive(Debug)]
pub struct StrokeTracker {
    config: TrackerConfig,
    state: TrackerState,
}

impl StrokeTracker {
    pub fn new(config: TrackerConfig) -> Result<Self, TrackerConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            state: TrackerState::Idle,
        })
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, TrackerState::Active(_))
    }

    /// The path recorded so far for the active stroke, oldest first.
    pub fn points(&self) -> &[InputPoint] {
        match &self.state {
            TrackerState::Idle => &[],
            TrackerState::Active(stroke) => &stroke.points,
        }
    }

    /// Feed one raw event. Returns `None` when the event is a no-op for the
    /// current state (second `start`, filtered jitter sample, foreign
    /// pointer while captured, or any non-start event while idle).
    pub fn handle(&mut self, raw: RawPointerEvent) -> Option<TrackerEvent> {
        match raw.phase {
            StrokePhase::Start => self.handle_start(raw),
            StrokePhase::Move => self.handle_move(raw),
            StrokePhase::End => self.handle_terminal(raw, false),
            StrokePhase::Cancel => self.handle_terminal(raw, true),
        }
    }

    fn handle_start(&mut self, raw: RawPointerEvent) -> Option<TrackerEvent> {
        if self.is_active() {
            // Guarded transition: a second concurrent start is ignored.
            return None;
        }

        let point = InputPoint {
            x: raw.x,
            y: raw.y,
            time_ms: raw.time_ms,
            pressure: resolve_pressure(&raw),
            tilt: resolve_tilt(&raw),
            heading: resolve_heading(&raw),
            speed: 0.0,
        };
        self.state = TrackerState::Active(ActiveStroke {
            pointer_id: raw.pointer_id,
            pointer_kind: raw.kind,
            points: vec![point],
            smoothed_speed: 0.0,
        });
        Some(TrackerEvent::Started {
            pointer_kind: raw.kind,
            point,
        })
    }

    fn handle_move(&mut self, raw: RawPointerEvent) -> Option<TrackerEvent> {
        let config = self.config;
        let TrackerState::Active(stroke) = &mut self.state else {
            return None;
        };
        if stroke.pointer_id != raw.pointer_id {
            // Capture semantics: only the starting pointer drives the stroke.
            return None;
        }

        let previous = stroke.last_point();
        if raw.time_ms <= previous.time_ms {
            // Strict time ordering: a stalled or backwards clock sample is
            // dropped no matter how far it moved.
            return None;
        }
        let distance = hypot(raw.x - previous.x, raw.y - previous.y);
        let elapsed_ms = raw.time_ms - previous.time_ms;

        let bypass_filter = raw.coalesced && config.coalesced_bypass;
        if !bypass_filter
            && distance < config.min_distance
            && elapsed_ms < config.min_interval_ms
        {
            return None;
        }

        let instantaneous_speed = if elapsed_ms > 0.0 {
            distance as f64 / elapsed_ms
        } else {
            0.0
        };
        stroke.smoothed_speed = if config.speed_smoothing_ms == 0.0 {
            instantaneous_speed
        } else {
            let alpha = 1.0 - (-elapsed_ms / config.speed_smoothing_ms).exp();
            stroke.smoothed_speed + alpha * (instantaneous_speed - stroke.smoothed_speed)
        };
        let normalized_speed =
            ((stroke.smoothed_speed / config.max_speed as f64).clamp(0.0, 1.0)) as f32;

        let point = InputPoint {
            x: raw.x,
            y: raw.y,
            time_ms: raw.time_ms,
            pressure: resolve_pressure(&raw),
            tilt: resolve_tilt(&raw),
            heading: resolve_heading(&raw),
            speed: normalized_speed,
        };
        stroke.points.push(point);
        Some(TrackerEvent::Sampled {
            pointer_kind: stroke.pointer_kind,
            point,
            coalesced: raw.coalesced,
        })
    }

    fn handle_terminal(&mut self, raw: RawPointerEvent, cancelled: bool) -> Option<TrackerEvent> {
        let config = self.config;
        let TrackerState::Active(stroke) = &mut self.state else {
            return None;
        };
        if stroke.pointer_id != raw.pointer_id {
            return None;
        }

        let previous = stroke.last_point();
        let distance = hypot(raw.x - previous.x, raw.y - previous.y);
        if distance > config.end_epsilon && raw.time_ms > previous.time_ms {
            let normalized_speed =
                ((stroke.smoothed_speed / config.max_speed as f64).clamp(0.0, 1.0)) as f32;
            stroke.points.push(InputPoint {
                x: raw.x,
                y: raw.y,
                time_ms: raw.time_ms,
                pressure: resolve_pressure(&raw),
                tilt: resolve_tilt(&raw),
                heading: resolve_heading(&raw),
                speed: normalized_speed,
            });
        }

        let TrackerState::Active(stroke) = std::mem::replace(&mut self.state, TrackerState::Idle)
        else {
            unreachable!("state checked active above");
        };
        if cancelled {
            Some(TrackerEvent::Cancelled {
                pointer_kind: stroke.pointer_kind,
                path: stroke.points,
            })
        } else {
            Some(TrackerEvent::Finished {
                pointer_kind: stroke.pointer_kind,
                path: stroke.points,
            })
        }
    }
}

fn resolve_pressure(raw: &RawPointerEvent) -> f32 {
    match raw.pressure {
        Some(pressure) => pressure.clamp(0.0, 1.0),
        None if raw.buttons_down => 1.0,
        None => 0.0,
    }
}

fn resolve_tilt(raw: &RawPointerEvent) -> f32 {
    match raw.tilt {
        Some(tilt) => tilt.clamp(0.0, 1.0),
        None => 1.0,
    }
}

fn resolve_heading(raw: &RawPointerEvent) -> f32 {
    match raw.heading {
        Some(heading) => heading.rem_euclid(360.0),
        None => 0.0,
    }
}

fn hypot(dx: f32, dy: f32) -> f32 {
    (dx * dx + dy * dy).sqrt()
}
