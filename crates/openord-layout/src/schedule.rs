//! Stage schedule: maps an iteration index to the active force parameters.
//!
//! The iteration budget is split into the DrL stages
//!
//! ```text
//! | liquid 25% | expansion 25% | cooldown 25% | crunch 10% | simmer 15% |
//! ```
//!
//! Temperature never increases from one iteration to the next, and the
//! cutoff radius shrinks from its start to its end value across expansion
//! and cooldown. Evaluation is pure in `(t, num_iterations, edge_cut)`.

use serde::{Deserialize, Serialize};

/// Named phase of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Stage {
    Liquid,
    Expansion,
    Cooldown,
    Crunch,
    Simmer,
    /// Iteration budget exhausted.
    Complete,
}

impl Stage {
    pub fn label(&self) -> &'static str {
        match self {
            Stage::Liquid => "liquid",
            Stage::Expansion => "expansion",
            Stage::Cooldown => "cooldown",
            Stage::Crunch => "crunch",
            Stage::Simmer => "simmer",
            Stage::Complete => "complete",
        }
    }
}

/// Force parameters in effect for one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StageParameters {
    pub stage: Stage,
    pub iteration: u32,
    /// Bounds how far a node may travel in one iteration.
    pub temperature: f32,
    /// Pull towards the weighted neighbour centroid.
    pub attraction: f32,
    /// Fraction of the computed force applied per iteration.
    pub damping: f32,
    /// Repulsion and edge length beyond which interactions are ignored.
    pub cutoff_radius: f32,
    /// Minimum degree for a node's longest edge to be cut; `None` disables cutting.
    pub min_edges: Option<u32>,
    /// Exact (non-approximated) repulsion.
    pub fine: bool,
}

/// Largest displacement per unit of temperature.
const STEP_PER_DEGREE: f32 = 0.01;
/// Jitter amplitude per unit of temperature.
const JITTER_PER_DEGREE: f32 = 0.001;

impl StageParameters {
    pub fn max_step(&self) -> f32 {
        self.temperature * STEP_PER_DEGREE
    }

    pub fn jitter(&self) -> f32 {
        self.temperature * JITTER_PER_DEGREE
    }
}

/// Linear ramp of one parameter across a stage.
#[derive(Debug, Clone, Copy)]
struct Ramp(f32, f32);

impl Ramp {
    fn at(self, progress: f32) -> f32 {
        self.0 + (self.1 - self.0) * progress
    }
}

struct StageProfile {
    stage: Stage,
    fraction: f32,
    temperature: Ramp,
    attraction: Ramp,
    damping: Ramp,
    min_edges: Option<Ramp>,
}

static PROFILES: [StageProfile; 5] = [
    StageProfile {
        stage: Stage::Liquid,
        fraction: 0.25,
        temperature: Ramp(2000.0, 2000.0),
        attraction: Ramp(2.0, 2.0),
        damping: Ramp(0.2, 0.2),
        min_edges: None,
    },
    StageProfile {
        stage: Stage::Expansion,
        fraction: 0.25,
        temperature: Ramp(2000.0, 1000.0),
        attraction: Ramp(2.0, 1.0),
        damping: Ramp(0.2, 0.4),
        min_edges: Some(Ramp(20.0, 12.0)),
    },
    StageProfile {
        stage: Stage::Cooldown,
        fraction: 0.25,
        temperature: Ramp(1000.0, 250.0),
        attraction: Ramp(1.0, 1.0),
        damping: Ramp(0.4, 0.4),
        min_edges: Some(Ramp(12.0, 1.0)),
    },
    StageProfile {
        stage: Stage::Crunch,
        fraction: 0.10,
        temperature: Ramp(250.0, 250.0),
        attraction: Ramp(1.0, 1.0),
        damping: Ramp(0.4, 0.4),
        min_edges: Some(Ramp(1.0, 1.0)),
    },
    StageProfile {
        stage: Stage::Simmer,
        fraction: 0.15,
        temperature: Ramp(250.0, 50.0),
        attraction: Ramp(0.5, 0.5),
        damping: Ramp(0.6, 0.6),
        min_edges: None,
    },
];

/// Squared cut length at `edge_cut == 0`.
const CUT_LENGTH_SPAN: f32 = 40_000.0;
/// Cutting is pointless when the end length is this close to the span.
const CUT_DISABLED_ABOVE: f32 = 39_500.0;

/// Pure iteration-to-parameters schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct StageSchedule {
    num_iterations: u32,
    edge_cut: f32,
    /// First iteration of each stage, plus `num_iterations` as the end marker.
    starts: [u32; 6],
    cut_radius_start: f32,
    cut_radius_end: f32,
    cutting_enabled: bool,
}

impl StageSchedule {
    /// `edge_cut` outside `[0, 1]` is clamped; NaN counts as 0.
    pub fn new(num_iterations: u32, edge_cut: f32) -> Self {
        let edge_cut = if edge_cut.is_nan() {
            0.0
        } else {
            edge_cut.clamp(0.0, 1.0)
        };

        let mut starts = [0u32; 6];
        let mut cumulative = 0.0f32;
        for (k, profile) in PROFILES.iter().enumerate() {
            starts[k] = (cumulative * num_iterations as f32).round() as u32;
            cumulative += profile.fraction;
        }
        starts[5] = num_iterations;

        let cut_length_end = (CUT_LENGTH_SPAN * (1.0 - edge_cut)).max(1.0);
        let cut_length_start = 4.0 * cut_length_end;

        Self {
            num_iterations,
            edge_cut,
            starts,
            cut_radius_start: cut_length_start.sqrt(),
            cut_radius_end: cut_length_end.sqrt(),
            cutting_enabled: cut_length_end < CUT_DISABLED_ABOVE,
        }
    }

    pub fn num_iterations(&self) -> u32 {
        self.num_iterations
    }

    pub fn edge_cut(&self) -> f32 {
        self.edge_cut
    }

    /// Iteration range `[start, end)` of `stage`.
    pub fn stage_bounds(&self, stage: Stage) -> (u32, u32) {
        match PROFILES.iter().position(|p| p.stage == stage) {
            Some(k) => (self.starts[k], self.starts[k + 1]),
            None => (self.num_iterations, self.num_iterations),
        }
    }

    pub fn stage_at(&self, t: u32) -> Stage {
        self.locate(t).map_or(Stage::Complete, |(k, _)| PROFILES[k].stage)
    }

    fn locate(&self, t: u32) -> Option<(usize, f32)> {
        if t >= self.num_iterations {
            return None;
        }
        let k = (0..PROFILES.len()).rev().find(|&k| self.starts[k] <= t && t < self.starts[k + 1])?;
        let len = self.starts[k + 1] - self.starts[k];
        let progress = if len > 1 {
            (t - self.starts[k]) as f32 / (len - 1) as f32
        } else {
            0.0
        };
        Some((k, progress))
    }

    fn cutoff_radius(&self, t: u32) -> f32 {
        let (from, _) = self.stage_bounds(Stage::Expansion);
        let (_, to) = self.stage_bounds(Stage::Cooldown);
        if t <= from {
            self.cut_radius_start
        } else if t >= to || to <= from {
            self.cut_radius_end
        } else {
            let progress = (t - from) as f32 / (to - from) as f32;
            Ramp(self.cut_radius_start, self.cut_radius_end).at(progress)
        }
    }

    /// Parameters for iteration `t`. Past the budget the final simmer values
    /// are reported with `Stage::Complete`.
    pub fn params_at(&self, t: u32) -> StageParameters {
        let (k, progress, stage) = match self.locate(t) {
            Some((k, progress)) => (k, progress, PROFILES[k].stage),
            None => (PROFILES.len() - 1, 1.0, Stage::Complete),
        };
        let profile = &PROFILES[k];
        let min_edges = if self.cutting_enabled {
            profile.min_edges.map(|ramp| ramp.at(progress).round().max(1.0) as u32)
        } else {
            None
        };
        StageParameters {
            stage,
            iteration: t,
            temperature: profile.temperature.at(progress),
            attraction: profile.attraction.at(progress),
            damping: profile.damping.at(progress),
            cutoff_radius: self.cutoff_radius(t),
            min_edges: if stage == Stage::Complete { None } else { min_edges },
            fine: matches!(stage, Stage::Simmer | Stage::Complete),
        }
    }
}
