//! Hand-position dwell confirmation.
//!
//! A hand-landmark detector reports one set of normalized points per camera frame. The
//! [`GestureTracker`] turns that noisy stream into at most one commit per dwell: holding the
//! tracked point in the left or right zone charges `progress`, the neutral band drains it
//! faster than it charges, and losing the hand resets it outright.

use log::{debug, info, trace};

use crate::error::{Result, StoryError};
use crate::story::node::Choice;

pub const MAX_PROGRESS: u32 = 100;

/// Index fingertip in the 21-point hand model.
pub const INDEX_FINGERTIP: usize = 8;

// ---------------------------------------------------------------------------
// Signal types
// ---------------------------------------------------------------------------

/// A detector point, both coordinates normalized to `[0, 1]` in camera space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
    Left,
    Right,
    Neutral,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct GestureConfig {
    /// User-space x below which the hand is in the left zone.
    pub left_threshold: f32,
    /// User-space x above which the hand is in the right zone.
    pub right_threshold: f32,
    /// Progress gained per frame inside a choice zone.
    pub increment: u32,
    /// Progress lost per frame in the neutral band.
    pub decrement: u32,
    /// Which landmark of the detected hand is tracked.
    pub tracked_landmark: usize,
    /// Flip camera-space x so the on-screen left control follows the user's left hand.
    pub mirror: bool,
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            left_threshold: 0.4,
            right_threshold: 0.6,
            increment: 2,
            decrement: 5,
            tracked_landmark: INDEX_FINGERTIP,
            mirror: true,
        }
    }
}

impl GestureConfig {
    /// The narrower 0.3/0.7 zones from the first release.
    pub fn legacy() -> Self {
        Self {
            left_threshold: 0.3,
            right_threshold: 0.7,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        let in_unit = |v: f32| (0.0..=1.0).contains(&v);
        if !in_unit(self.left_threshold) || !in_unit(self.right_threshold) {
            return Err(StoryError::InvalidInput(
                "gesture thresholds must lie in [0, 1]".into(),
            ));
        }
        if self.left_threshold > self.right_threshold {
            return Err(StoryError::InvalidInput(format!(
                "left threshold {} exceeds right threshold {}",
                self.left_threshold, self.right_threshold
            )));
        }
        if self.increment == 0 {
            return Err(StoryError::InvalidInput(
                "gesture increment must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Frames of uninterrupted dwell needed to commit from zero.
    pub fn frames_to_commit(&self) -> u32 {
        MAX_PROGRESS.div_ceil(self.increment.max(1))
    }

    pub fn classify(&self, user_x: f32) -> Zone {
        if user_x < self.left_threshold {
            Zone::Left
        } else if user_x > self.right_threshold {
            Zone::Right
        } else {
            Zone::Neutral
        }
    }
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// Per-frame leaky integrator over the zone signal.
#[derive(Debug, Clone)]
pub struct GestureTracker {
    config: GestureConfig,
    detected: bool,
    zone: Zone,
    selection: Option<Zone>,
    progress: u32,
}

impl GestureTracker {
    pub fn new(config: GestureConfig) -> Self {
        Self {
            config,
            detected: false,
            zone: Zone::Neutral,
            selection: None,
            progress: 0,
        }
    }

    pub fn config(&self) -> &GestureConfig {
        &self.config
    }

    /// Whether a hand was visible in the last frame; drives the "signal lost" hint.
    pub fn detected(&self) -> bool {
        self.detected
    }

    pub fn zone(&self) -> Zone {
        self.zone
    }

    /// The zone currently being charged, for highlighting its control.
    pub fn selection(&self) -> Option<Zone> {
        self.selection
    }

    pub fn progress(&self) -> u32 {
        self.progress
    }

    /// Fill level in `[0, 1]`.
    pub fn fill(&self) -> f32 {
        self.progress as f32 / MAX_PROGRESS as f32
    }

    pub fn reset(&mut self) {
        self.detected = false;
        self.zone = Zone::Neutral;
        self.selection = None;
        self.progress = 0;
    }

    /// Feed one frame's landmarks (empty when no hand is visible).
    ///
    /// Returns the committed zone on the frame progress reaches 100; progress is zeroed in
    /// the same call, so the next commit needs a full new ramp.
    pub fn update(&mut self, landmarks: &[Landmark]) -> Option<Zone> {
        let Some(point) = landmarks.get(self.config.tracked_landmark) else {
            if self.detected || self.progress > 0 {
                debug!("Hand lost, progress {} dropped", self.progress);
            }
            self.reset();
            return None;
        };

        self.detected = true;
        let x = if self.config.mirror { 1.0 - point.x } else { point.x };
        let zone = self.config.classify(x);
        if zone != self.zone {
            debug!("Gesture zone {:?} -> {:?} (x={x:.3})", self.zone, zone);
        }
        self.zone = zone;

        match zone {
            Zone::Left | Zone::Right => {
                self.progress = (self.progress + self.config.increment).min(MAX_PROGRESS);
                self.selection = Some(zone);
            }
            Zone::Neutral => {
                self.progress = self.progress.saturating_sub(self.config.decrement);
                self.selection = None;
            }
        }
        trace!("gesture frame: zone={zone:?} progress={}", self.progress);

        match self.selection {
            Some(selected) if self.progress >= MAX_PROGRESS => {
                self.progress = 0;
                info!("Gesture committed {selected:?}");
                Some(selected)
            }
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// A camera-like frame producer, exclusively owned by one [`GestureController`].
pub trait FrameSource {
    type Frame;

    /// The next unseen frame, or `None` when no new frame is available yet.
    fn next_frame(&mut self) -> Result<Option<Self::Frame>>;

    /// Stop every underlying track. Called exactly once when the controller is torn down.
    fn release(&mut self);
}

/// Landmark model: the ordered points of the top-ranked hand, or empty when none is visible.
pub trait Detector<F> {
    fn detect_frame(&mut self, frame: &F) -> Vec<Landmark>;
}

impl<F, T: FnMut(&F) -> Vec<Landmark>> Detector<F> for T {
    fn detect_frame(&mut self, frame: &F) -> Vec<Landmark> {
        self(frame)
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// A dwell commit resolved to the choice shown on that side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GestureCommit {
    pub zone: Zone,
    pub choice: Choice,
}

/// Binds a tracker to a frame source, a detector and the two on-screen choices.
///
/// The controller owns the source for as long as it lives; dropping it (including while
/// unwinding out of a failed session) releases the camera.
pub struct GestureController<S: FrameSource, D: Detector<S::Frame>> {
    source: S,
    detector: D,
    tracker: GestureTracker,
    left: Choice,
    right: Choice,
    released: bool,
}

impl<S: FrameSource, D: Detector<S::Frame>> GestureController<S, D> {
    /// Mount over a node's choices; the first choice sits on the left, the second on the right.
    pub fn mount(
        mut source: S,
        detector: D,
        config: GestureConfig,
        choices: &[Choice],
    ) -> Result<Self> {
        let bound = config.validate().and_then(|()| match choices {
            [left, right] => Ok((left.clone(), right.clone())),
            _ => Err(StoryError::InvalidInput(format!(
                "gesture control needs exactly two choices, got {}",
                choices.len()
            ))),
        });
        let (left, right) = match bound {
            Ok(pair) => pair,
            Err(e) => {
                source.release();
                return Err(e);
            }
        };
        info!(
            "Gesture control mounted: left=[{}] {}, right=[{}] {}",
            left.id, left.short_desc, right.id, right.short_desc
        );
        Ok(Self {
            source,
            detector,
            tracker: GestureTracker::new(config),
            left,
            right,
            released: false,
        })
    }

    pub fn tracker(&self) -> &GestureTracker {
        &self.tracker
    }

    /// Process at most one new frame.
    pub fn poll(&mut self) -> Result<Option<GestureCommit>> {
        let Some(frame) = self.source.next_frame()? else {
            return Ok(None);
        };
        Ok(self.process(&frame))
    }

    /// Drain available frames until a commit fires or the source runs dry.
    pub fn run_until_commit(&mut self) -> Result<Option<GestureCommit>> {
        while let Some(frame) = self.source.next_frame()? {
            if let Some(commit) = self.process(&frame) {
                return Ok(Some(commit));
            }
        }
        Ok(None)
    }

    fn process(&mut self, frame: &S::Frame) -> Option<GestureCommit> {
        let landmarks = self.detector.detect_frame(frame);
        let zone = self.tracker.update(&landmarks)?;
        let choice = match zone {
            Zone::Left => self.left.clone(),
            _ => self.right.clone(),
        };
        Some(GestureCommit { zone, choice })
    }

    /// Release the camera now rather than at drop.
    pub fn teardown(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.released {
            self.source.release();
            self.released = true;
            info!("Gesture control released its frame source");
        }
    }
}

impl<S: FrameSource, D: Detector<S::Frame>> Drop for GestureController<S, D> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    use super::*;

    /// A hand whose tracked fingertip sits at camera-space `raw_x`.
    fn hand(raw_x: f32) -> Vec<Landmark> {
        let mut points = vec![Landmark::new(0.5, 0.5); 21];
        points[INDEX_FINGERTIP] = Landmark::new(raw_x, 0.4);
        points
    }

    // mirrored: user-space 0.1 / 0.9 / 0.5
    fn left() -> Vec<Landmark> {
        hand(0.9)
    }
    fn right() -> Vec<Landmark> {
        hand(0.1)
    }
    fn neutral() -> Vec<Landmark> {
        hand(0.5)
    }

    fn choices() -> Vec<Choice> {
        vec![
            Choice {
                id: "A".into(),
                short_desc: "Seize the gate".into(),
                text: "Bronze screams.".into(),
            },
            Choice {
                id: "B".into(),
                short_desc: "Read the omens".into(),
                text: "Birds circle.".into(),
            },
        ]
    }

    #[test]
    fn test_left_dwell_commits_exactly_once() {
        let mut tracker = GestureTracker::new(GestureConfig::default());
        let frames = tracker.config().frames_to_commit();
        assert_eq!(frames, 50);

        let commits: Vec<Zone> = (0..frames).filter_map(|_| tracker.update(&left())).collect();
        assert_eq!(commits, vec![Zone::Left]);
        assert_eq!(tracker.progress(), 0);

        // holding on does not fire again until a fresh full ramp
        let again: Vec<Zone> = (0..frames - 1)
            .filter_map(|_| tracker.update(&left()))
            .collect();
        assert!(again.is_empty());
        assert_eq!(tracker.progress(), 98);
    }

    #[test]
    fn test_neutral_frame_leaks_progress() {
        let mut tracker = GestureTracker::new(GestureConfig::default());
        for _ in 0..25 {
            assert!(tracker.update(&left()).is_none());
        }
        assert_eq!(tracker.progress(), 50);
        assert_eq!(tracker.selection(), Some(Zone::Left));

        tracker.update(&neutral());
        assert_eq!(tracker.progress(), 45);
        assert!(tracker.detected());
        assert_eq!(tracker.selection(), None);
    }

    #[test]
    fn test_neutral_floors_at_zero() {
        let mut tracker = GestureTracker::new(GestureConfig::default());
        tracker.update(&right());
        tracker.update(&neutral());
        assert_eq!(tracker.progress(), 0);
    }

    #[test]
    fn test_lost_hand_resets_instantly() {
        let mut tracker = GestureTracker::new(GestureConfig::default());
        for _ in 0..40 {
            tracker.update(&right());
        }
        assert_eq!(tracker.progress(), 80);

        assert!(tracker.update(&[]).is_none());
        assert_eq!(tracker.progress(), 0);
        assert!(!tracker.detected());
        assert_eq!(tracker.zone(), Zone::Neutral);
    }

    #[test]
    fn test_mirroring_maps_camera_right_to_user_left() {
        let mut tracker = GestureTracker::new(GestureConfig::default());
        tracker.update(&hand(0.95));
        assert_eq!(tracker.zone(), Zone::Left);

        let mut unmirrored = GestureTracker::new(GestureConfig {
            mirror: false,
            ..GestureConfig::default()
        });
        unmirrored.update(&hand(0.95));
        assert_eq!(unmirrored.zone(), Zone::Right);
    }

    #[test]
    fn test_thresholds_are_configurable() {
        // user-space 0.35: left under the default band, neutral under the legacy one
        let mut wide = GestureTracker::new(GestureConfig::default());
        wide.update(&hand(0.65));
        assert_eq!(wide.zone(), Zone::Left);

        let mut legacy = GestureTracker::new(GestureConfig::legacy());
        legacy.update(&hand(0.65));
        assert_eq!(legacy.zone(), Zone::Neutral);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = GestureConfig {
            left_threshold: 0.7,
            right_threshold: 0.3,
            ..GestureConfig::default()
        };
        assert!(config.validate().is_err());
    }

    struct ScriptedCamera {
        frames: VecDeque<Vec<Landmark>>,
        released: Rc<Cell<u32>>,
    }

    impl FrameSource for ScriptedCamera {
        type Frame = Vec<Landmark>;

        fn next_frame(&mut self) -> Result<Option<Self::Frame>> {
            Ok(self.frames.pop_front())
        }

        fn release(&mut self) {
            self.released.set(self.released.get() + 1);
        }
    }

    fn passthrough(frame: &Vec<Landmark>) -> Vec<Landmark> {
        frame.clone()
    }

    #[test]
    fn test_controller_commits_bound_choice_and_releases_camera() {
        let released = Rc::new(Cell::new(0));
        let mut frames: VecDeque<Vec<Landmark>> = VecDeque::new();
        frames.extend((0..10).map(|_| neutral()));
        frames.push_back(Vec::new());
        frames.extend((0..50).map(|_| right()));
        frames.extend((0..5).map(|_| right()));

        let camera = ScriptedCamera {
            frames,
            released: Rc::clone(&released),
        };
        let mut controller =
            GestureController::mount(camera, passthrough, GestureConfig::default(), &choices())
                .unwrap();

        let commit = controller.run_until_commit().unwrap().unwrap();
        assert_eq!(commit.zone, Zone::Right);
        assert_eq!(commit.choice.id, "B");
        assert_eq!(controller.tracker().progress(), 0);

        assert!(controller.run_until_commit().unwrap().is_none());
        assert_eq!(controller.tracker().progress(), 10);

        controller.teardown();
        assert_eq!(released.get(), 1);
    }

    #[test]
    fn test_controller_released_on_drop() {
        let released = Rc::new(Cell::new(0));
        {
            let camera = ScriptedCamera {
                frames: VecDeque::from(vec![left()]),
                released: Rc::clone(&released),
            };
            let mut controller = GestureController::mount(
                camera,
                passthrough,
                GestureConfig::default(),
                &choices(),
            )
            .unwrap();
            assert!(controller.poll().unwrap().is_none());
            assert_eq!(controller.tracker().progress(), 2);
        }
        assert_eq!(released.get(), 1);
    }

    #[test]
    fn test_mount_requires_two_choices() {
        let released = Rc::new(Cell::new(0));
        let camera = ScriptedCamera {
            frames: VecDeque::new(),
            released: Rc::clone(&released),
        };
        let result = GestureController::mount(
            camera,
            passthrough,
            GestureConfig::default(),
            &choices()[..1],
        );
        assert!(matches!(result, Err(StoryError::InvalidInput(_))));
        assert_eq!(released.get(), 1);
    }
}
