//! Layout configuration and the typed property list exposed to hosts.
//!
//! Range policy: `edge_cut` outside `[0, 1]` is rejected, while
//! `num_threads` and `num_iterations` below their floors are raised to the
//! floor.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{LayoutError, Result};

/// Smallest iteration budget a run accepts.
pub const MIN_ITERATIONS: u32 = 100;

/// How worker random generators are seeded from `rand_seed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedPolicy {
    /// Every worker gets `rand_seed`; their jitter sequences are identical.
    Shared,
    /// Each worker derives its own seed from `rand_seed` and its id.
    #[default]
    PerWorker,
}

impl SeedPolicy {
    /// Seed for worker `worker_id`.
    pub fn seed_for(self, rand_seed: i64, worker_id: usize) -> u64 {
        let base = rand_seed as u64;
        match self {
            SeedPolicy::Shared => base,
            SeedPolicy::PerWorker => {
                splitmix64(base ^ (worker_id as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15))
            }
        }
    }
}

fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Configuration for an OpenOrd run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenOrdConfig {
    /// How aggressively long-range interactions are ignored late in the run (0-1).
    pub edge_cut: f32,
    /// Number of worker threads.
    pub num_threads: usize,
    /// Total iteration budget across all stages.
    pub num_iterations: u32,
    /// Start every node at the origin instead of its current position.
    pub reset_position: bool,
    /// Base seed for the jitter generators.
    pub rand_seed: i64,
    pub seed_policy: SeedPolicy,
    /// Node count from which repulsion goes through the Barnes-Hut index.
    pub barnes_hut_threshold: usize,
    /// Barnes-Hut opening ratio.
    pub theta: f32,
}

impl Default for OpenOrdConfig {
    fn default() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            edge_cut: 0.8,
            num_threads: cores.saturating_sub(1).max(1),
            num_iterations: 750,
            reset_position: true,
            rand_seed: rand::random(),
            seed_policy: SeedPolicy::default(),
            barnes_hut_threshold: 1000,
            theta: 0.8,
        }
    }
}

impl OpenOrdConfig {
    /// Apply floors and reject out-of-range values.
    pub fn sanitized(mut self) -> Result<Self> {
        check_edge_cut(self.edge_cut)?;
        if !self.theta.is_finite() || self.theta < 0.0 {
            return Err(LayoutError::config(
                "theta",
                format!("{} is not a non-negative number", self.theta),
            ));
        }
        self.num_threads = self.num_threads.max(1);
        self.num_iterations = self.num_iterations.max(MIN_ITERATIONS);
        Ok(self)
    }

    /// The typed property list shown to hosts.
    pub fn properties() -> &'static [LayoutProperty] {
        &PROPERTIES
    }

    pub fn get_property(&self, key: &str) -> Option<PropertyValue> {
        Some(match key {
            EDGE_CUT => PropertyValue::Float(self.edge_cut),
            NUM_THREADS => PropertyValue::Integer(self.num_threads as i64),
            NUM_ITERATIONS => PropertyValue::Integer(i64::from(self.num_iterations)),
            RESET_POSITION => PropertyValue::Boolean(self.reset_position),
            RAND_SEED => PropertyValue::Long(self.rand_seed),
            _ => return None,
        })
    }

    /// Set one property, applying the same range policy as [`sanitized`](Self::sanitized).
    pub fn set_property(&mut self, key: &str, value: PropertyValue) -> Result<()> {
        match (key, value) {
            (EDGE_CUT, PropertyValue::Float(v)) => {
                check_edge_cut(v)?;
                self.edge_cut = v;
            }
            (NUM_THREADS, PropertyValue::Integer(v)) => {
                self.num_threads = usize::try_from(v.max(1)).unwrap_or(usize::MAX);
            }
            (NUM_ITERATIONS, PropertyValue::Integer(v)) => {
                self.num_iterations =
                    u32::try_from(v.max(i64::from(MIN_ITERATIONS))).unwrap_or(u32::MAX);
            }
            (RESET_POSITION, PropertyValue::Boolean(v)) => self.reset_position = v,
            (RAND_SEED, PropertyValue::Long(v)) => self.rand_seed = v,
            (EDGE_CUT | NUM_THREADS | NUM_ITERATIONS | RESET_POSITION | RAND_SEED, other) => {
                return Err(LayoutError::Configuration {
                    property: property_key(key),
                    message: format!("unexpected value type {:?}", other.kind()),
                });
            }
            _ => {
                return Err(LayoutError::Configuration {
                    property: "key",
                    message: format!("unknown property `{key}`"),
                })
            }
        }
        Ok(())
    }

    /// Flatten into plain key/value pairs for persistence.
    pub fn to_key_values(&self) -> BTreeMap<String, String> {
        let seed_policy = match self.seed_policy {
            SeedPolicy::Shared => "shared",
            SeedPolicy::PerWorker => "per_worker",
        };
        [
            (EDGE_CUT, self.edge_cut.to_string()),
            (NUM_THREADS, self.num_threads.to_string()),
            (NUM_ITERATIONS, self.num_iterations.to_string()),
            (RESET_POSITION, self.reset_position.to_string()),
            (RAND_SEED, self.rand_seed.to_string()),
            (SEED_POLICY, seed_policy.to_string()),
            (BARNES_HUT_THRESHOLD, self.barnes_hut_threshold.to_string()),
            (THETA, self.theta.to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }

    /// Rebuild from key/value pairs. Missing keys keep their defaults.
    pub fn from_key_values(values: &BTreeMap<String, String>) -> Result<Self> {
        let mut config = Self::default();
        for (key, raw) in values {
            match key.as_str() {
                EDGE_CUT => {
                    config.set_property(EDGE_CUT, PropertyValue::Float(parse(EDGE_CUT, raw)?))?
                }
                NUM_THREADS => config.set_property(
                    NUM_THREADS,
                    PropertyValue::Integer(parse(NUM_THREADS, raw)?),
                )?,
                NUM_ITERATIONS => config.set_property(
                    NUM_ITERATIONS,
                    PropertyValue::Integer(parse(NUM_ITERATIONS, raw)?),
                )?,
                RESET_POSITION => config.reset_position = parse(RESET_POSITION, raw)?,
                RAND_SEED => config.rand_seed = parse(RAND_SEED, raw)?,
                SEED_POLICY => {
                    config.seed_policy = match raw.as_str() {
                        "shared" => SeedPolicy::Shared,
                        "per_worker" => SeedPolicy::PerWorker,
                        other => {
                            return Err(LayoutError::config(
                                SEED_POLICY,
                                format!("unknown policy `{other}`"),
                            ))
                        }
                    }
                }
                BARNES_HUT_THRESHOLD => {
                    config.barnes_hut_threshold = parse(BARNES_HUT_THRESHOLD, raw)?
                }
                THETA => config.theta = parse(THETA, raw)?,
                other => warn!(key = other, "openord_unknown_property"),
            }
        }
        config.sanitized()
    }
}

fn check_edge_cut(value: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(LayoutError::config(EDGE_CUT, format!("{value} is outside [0, 1]")));
    }
    Ok(())
}

fn parse<T: std::str::FromStr>(property: &'static str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| LayoutError::config(property, format!("cannot parse `{raw}`: {e}")))
}

fn property_key(key: &str) -> &'static str {
    PROPERTIES
        .iter()
        .find(|p| p.key == key)
        .map(|p| p.key)
        .unwrap_or("key")
}

const EDGE_CUT: &str = "edge_cut";
const NUM_THREADS: &str = "num_threads";
const NUM_ITERATIONS: &str = "num_iterations";
const RESET_POSITION: &str = "reset_position";
const RAND_SEED: &str = "rand_seed";
const SEED_POLICY: &str = "seed_policy";
const BARNES_HUT_THRESHOLD: &str = "barnes_hut_threshold";
const THETA: &str = "theta";

/// Value type of a [`LayoutProperty`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    Float,
    Integer,
    Boolean,
    Long,
}

/// A typed property value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PropertyValue {
    Float(f32),
    Integer(i64),
    Boolean(bool),
    Long(i64),
}

impl PropertyValue {
    pub fn kind(&self) -> PropertyKind {
        match self {
            PropertyValue::Float(_) => PropertyKind::Float,
            PropertyValue::Integer(_) => PropertyKind::Integer,
            PropertyValue::Boolean(_) => PropertyKind::Boolean,
            PropertyValue::Long(_) => PropertyKind::Long,
        }
    }
}

/// Description of one configurable property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutProperty {
    pub key: &'static str,
    pub name: &'static str,
    pub category: &'static str,
    pub description: &'static str,
    pub kind: PropertyKind,
}

static PROPERTIES: [LayoutProperty; 5] = [
    LayoutProperty {
        key: EDGE_CUT,
        name: "Edge Cut",
        category: "DrL",
        description: "Amount of long-range interaction ignored late in the run, from 0 (none) to 1 (maximal)",
        kind: PropertyKind::Float,
    },
    LayoutProperty {
        key: NUM_THREADS,
        name: "Num Threads",
        category: "DrL",
        description: "Number of worker threads",
        kind: PropertyKind::Integer,
    },
    LayoutProperty {
        key: NUM_ITERATIONS,
        name: "Num Iterations",
        category: "DrL",
        description: "Total number of iterations, at least 100",
        kind: PropertyKind::Integer,
    },
    LayoutProperty {
        key: RESET_POSITION,
        name: "Reset Position",
        category: "DrL",
        description: "Start every node at the origin",
        kind: PropertyKind::Boolean,
    },
    LayoutProperty {
        key: RAND_SEED,
        name: "Random Seed",
        category: "Random",
        description: "Seed for the random jitter",
        kind: PropertyKind::Long,
    },
];
