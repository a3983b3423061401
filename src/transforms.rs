use crate::{
    error::{SeqError, SeqResult},
    frame::Frame,
    processor::{WindowOutput, WindowPosition, WindowTransform, WindowedProcessor},
    sequence::AnimationSequence,
};

pub const MIN_TWEEN_MULTIPLIER: usize = 2;
pub const MAX_TWEEN_MULTIPLIER: usize = 10;
pub const MAX_BLEND_ITERATIONS: usize = 10;

/// Frame interpolation: every input frame becomes `multiplier` output frames.
///
/// Output `i * m + k` blends frame `i` towards frame `i + 1` by `(k + 1) / m`; the last input
/// frame is repeated `m` times. Length and fps both scale by `m`, duration is unchanged.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tween {
    multiplier: usize,
}

impl Tween {
    const OFFSETS: [i64; 2] = [0, 1];

    pub fn new(multiplier: usize) -> SeqResult<Self> {
        if !(MIN_TWEEN_MULTIPLIER..=MAX_TWEEN_MULTIPLIER).contains(&multiplier) {
            return Err(SeqError::validation(format!(
                "tween multiplier must be in {MIN_TWEEN_MULTIPLIER}..={MAX_TWEEN_MULTIPLIER}, got {multiplier}"
            )));
        }
        Ok(Self { multiplier })
    }

    pub fn multiplier(&self) -> usize {
        self.multiplier
    }

    pub fn apply_to(
        &self,
        processor: &WindowedProcessor,
        sequence: &AnimationSequence,
    ) -> SeqResult<AnimationSequence> {
        if !sequence.is_defined() {
            return Ok(sequence.clone());
        }
        processor.run(sequence, &mut self.clone())
    }
}

impl WindowTransform for Tween {
    fn offsets(&self) -> &[i64] {
        &Self::OFFSETS
    }

    fn apply(&mut self, position: WindowPosition, frames: &[&Frame]) -> SeqResult<WindowOutput> {
        let m = self.multiplier;
        let base = position.index * m;
        let current = frames[0];

        if position.is_last() {
            return Ok((0..m).map(|k| (base + k, current.clone())).collect());
        }

        let next = frames[1];
        (0..m)
            .map(|k| {
                let alpha = (k + 1) as f32 / m as f32;
                Ok((base + k, current.blend(next, 1.0 - alpha, alpha)?))
            })
            .collect()
    }
}

/// Temporal smoothing: each frame is cross-blended with its previous and next neighbour.
///
/// `pre = blend(prev, cur, fade_in, 1)`, `post = blend(next, cur, fade_out, 1)`, and the
/// output is the even blend of the two. The pass runs `iterations` times, each one
/// consuming the sequence the previous pass committed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BlendSmoothing {
    fade_in: f32,
    fade_out: f32,
    iterations: usize,
}

impl BlendSmoothing {
    const OFFSETS: [i64; 3] = [-1, 0, 1];

    pub fn new(fade_in: f32, fade_out: f32, iterations: usize) -> SeqResult<Self> {
        for (name, v) in [("fade_in", fade_in), ("fade_out", fade_out)] {
            let in_range = v > 0.0 && v <= 0.5;
            if !in_range {
                return Err(SeqError::validation(format!(
                    "{name} must be in (0, 0.5], got {v}"
                )));
            }
        }
        if !(1..=MAX_BLEND_ITERATIONS).contains(&iterations) {
            return Err(SeqError::validation(format!(
                "iterations must be in 1..={MAX_BLEND_ITERATIONS}, got {iterations}"
            )));
        }
        Ok(Self {
            fade_in,
            fade_out,
            iterations,
        })
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn apply_to(
        &self,
        processor: &WindowedProcessor,
        sequence: &AnimationSequence,
    ) -> SeqResult<AnimationSequence> {
        if !sequence.is_defined() {
            return Ok(sequence.clone());
        }
        let mut current = sequence.clone();
        for iteration in 0..self.iterations {
            tracing::debug!(iteration, "blend pass");
            current = processor.run(&current, &mut self.clone())?;
        }
        Ok(current)
    }
}

impl WindowTransform for BlendSmoothing {
    fn offsets(&self) -> &[i64] {
        &Self::OFFSETS
    }

    fn apply(&mut self, position: WindowPosition, frames: &[&Frame]) -> SeqResult<WindowOutput> {
        let (prev, current, next) = (frames[0], frames[1], frames[2]);
        let pre = prev.blend(current, self.fade_in, 1.0)?;
        let post = next.blend(current, self.fade_out, 1.0)?;
        Ok(WindowOutput::from([(position.index, pre.blend_even(&post)?)]))
    }
}
