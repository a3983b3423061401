/// Position within a fixed-length, fixed-rate frame timeline.
///
/// Constructor inputs are clamped rather than rejected: `current_frame` is floored at 0,
/// `total_frames` at 1 and `frames_per_second` at 1.0.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FrameCounter {
    current_frame: u64,
    total_frames: u64,
    frames_per_second: f64,
}

impl Default for FrameCounter {
    fn default() -> Self {
        Self::new(0, 1, 25.0)
    }
}

impl FrameCounter {
    pub fn new(current_frame: i64, total_frames: i64, frames_per_second: f64) -> Self {
        let fps = if frames_per_second.is_finite() {
            frames_per_second.max(1.0)
        } else {
            1.0
        };
        Self {
            current_frame: current_frame.max(0) as u64,
            total_frames: total_frames.max(1) as u64,
            frames_per_second: fps,
        }
    }

    pub fn current_frame(&self) -> u64 {
        self.current_frame
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    pub fn frames_per_second(&self) -> f64 {
        self.frames_per_second
    }

    /// Same timeline, `amount` frames further along (clamped at frame 0).
    pub fn incremented(&self, amount: i64) -> Self {
        let current = (self.current_frame as i64).saturating_add(amount);
        Self::new(current, self.total_frames as i64, self.frames_per_second)
    }

    /// Shift by a duration; the frame offset is `seconds * fps` rounded to the nearest frame.
    pub fn time_offset(&self, seconds: f64) -> Self {
        let frames = (seconds * self.frames_per_second).round();
        let frames = if frames.is_finite() { frames as i64 } else { 0 };
        self.incremented(frames)
    }

    pub fn is_first_frame(&self) -> bool {
        self.current_frame == 0
    }

    pub fn is_final_frame(&self) -> bool {
        self.current_frame + 1 == self.total_frames
    }

    pub fn is_after_last_frame(&self) -> bool {
        self.current_frame >= self.total_frames
    }

    pub fn current_time_in_seconds(&self) -> f64 {
        self.current_frame as f64 / self.frames_per_second
    }

    pub fn total_time_in_seconds(&self) -> f64 {
        self.total_frames as f64 / self.frames_per_second
    }

    pub fn remaining_time_in_seconds(&self) -> f64 {
        self.total_time_in_seconds() - self.current_time_in_seconds()
    }

    /// `current / max(2, total - 1)`; 1- and 2-frame timelines share the denominator 2.
    pub fn progress(&self) -> f64 {
        let denom = self.total_frames.saturating_sub(1).max(2);
        self.current_frame as f64 / denom as f64
    }
}

/// Frames needed to fill a wall-clock duration at `frames_per_second`.
///
/// Halfway cases round to the even frame count. `frames_per_second` is clamped like
/// [`FrameCounter::new`] clamps it.
pub fn frame_count_for_duration(
    hours: u32,
    minutes: u32,
    seconds: u32,
    milliseconds: u32,
    frames_per_second: f64,
) -> u64 {
    let fps = FrameCounter::new(0, 1, frames_per_second).frames_per_second();
    let total_seconds = f64::from(hours) * 3600.0
        + f64::from(minutes) * 60.0
        + f64::from(seconds)
        + f64::from(milliseconds) / 1000.0;
    (total_seconds * fps).round_ties_even() as u64
}
