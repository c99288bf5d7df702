use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Cells of the 3x2 icon sprite sheet, as CSS-style background positions.
pub const SPRITE_CELLS: [&str; 6] = [
    "0% 0%", "50% 0%", "100% 0%", "0% 100%", "50% 100%", "100% 100%",
];

const MIN_SIZE: f32 = 100.0;
const MAX_SIZE: f32 = 250.0;
const MAX_BATCH: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: f32,
    pub height: f32,
}

/// One decorative icon placed on the background.
#[derive(Debug, Clone, PartialEq)]
pub struct SpritePlacement {
    pub id: u64,
    pub size: f32,
    /// Degrees.
    pub rotation: f32,
    pub x: f32,
    pub y: f32,
    /// Index into [`SPRITE_CELLS`].
    pub cell: usize,
}

impl SpritePlacement {
    pub fn background_position(&self) -> &'static str {
        SPRITE_CELLS[self.cell % SPRITE_CELLS.len()]
    }
}

/// Append-only display list that grows by a random batch every time the step counter rises.
pub struct MotifAccumulator<R: Rng = StdRng> {
    rng: R,
    viewport: Viewport,
    last_step: u32,
    next_id: u64,
    placements: Vec<SpritePlacement>,
}

impl MotifAccumulator<StdRng> {
    pub fn new(viewport: Viewport) -> Self {
        Self::with_rng(viewport, StdRng::from_entropy())
    }

    pub fn seeded(viewport: Viewport, seed: u64) -> Self {
        Self::with_rng(viewport, StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng> MotifAccumulator<R> {
    pub fn with_rng(viewport: Viewport, rng: R) -> Self {
        Self {
            rng,
            viewport,
            last_step: 0,
            next_id: 0,
            placements: Vec::new(),
        }
    }

    pub fn placements(&self) -> &[SpritePlacement] {
        &self.placements
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    /// Feed the session's current step count. Returns how many sprites were added.
    ///
    /// Step 0 clears the list; repeated or lower counts add nothing.
    pub fn observe_step(&mut self, step: u32) -> usize {
        if step == 0 {
            self.placements.clear();
            self.last_step = 0;
            return 0;
        }
        if step <= self.last_step {
            return 0;
        }
        self.last_step = step;

        let count = self.rng.gen_range(1..=MAX_BATCH);
        for _ in 0..count {
            let placement = self.place();
            self.placements.push(placement);
        }
        debug!(
            "Motif grew by {count} at step {step} ({} total)",
            self.placements.len()
        );
        count
    }

    fn place(&mut self) -> SpritePlacement {
        let size = self.rng.gen_range(MIN_SIZE..MAX_SIZE);
        let x_room = (self.viewport.width - size).max(0.0);
        let y_room = (self.viewport.height - size).max(0.0);
        let id = self.next_id;
        self.next_id += 1;
        SpritePlacement {
            id,
            size,
            rotation: self.rng.gen_range(0.0..360.0),
            x: self.rng.gen::<f32>() * x_room,
            y: self.rng.gen::<f32>() * y_room,
            cell: self.rng.gen_range(0..SPRITE_CELLS.len()),
        }
    }
}
