use smallvec::SmallVec;

const ROUND_TRIP_WINDOW: usize = 32;

/// Client-side session counters for the debug HUD.
#[derive(Debug, Default)]
pub struct SessionMetrics {
    round_trips_ms: SmallVec<[f32; ROUND_TRIP_WINDOW]>,
    strokes_rendered: u64,
    requests_sent: u64,
}

impl SessionMetrics {
    pub(crate) fn record_request(&mut self) {
        self.requests_sent = self
            .requests_sent
            .checked_add(1)
            .expect("request counter overflow");
    }

    pub(crate) fn record_stroke_round_trip(&mut self, elapsed_ms: f32) {
        if self.round_trips_ms.len() == ROUND_TRIP_WINDOW {
            self.round_trips_ms.remove(0);
        }
        self.round_trips_ms.push(elapsed_ms);
        self.strokes_rendered = self
            .strokes_rendered
            .checked_add(1)
            .expect("stroke counter overflow");
    }

    pub fn strokes_rendered(&self) -> u64 {
        self.strokes_rendered
    }

    pub fn requests_sent(&self) -> u64 {
        self.requests_sent
    }

    pub fn last_round_trip_ms(&self) -> Option<f32> {
        self.round_trips_ms.last().copied()
    }

    /// Mean over the most recent stroke round trips.
    pub fn average_round_trip_ms(&self) -> Option<f32> {
        if self.round_trips_ms.is_empty() {
            return None;
        }
        let total: f32 = self.round_trips_ms.iter().sum();
        Some(total / self.round_trips_ms.len() as f32)
    }

    /// One-line debug HUD summary.
    pub fn hud_line(&self) -> String {
        match (self.last_round_trip_ms(), self.average_round_trip_ms()) {
            (Some(last), Some(average)) => format!(
                "strokes {} | last {last:.2} ms | avg {average:.2} ms",
                self.strokes_rendered
            ),
            _ => format!("strokes {} | no samples", self.strokes_rendered),
        }
    }
}
