//! Load-balancing schemes.
//!
//! Every scheme maps a list of candidate loads to the index of the engine
//! that gets the next task. Candidates are always ordered least recently
//! serviced first, which is what gives `lru` and `twobin` their meaning.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// The pluggable routing policy of a scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Lru,
    PlainRandom,
    TwoBin,
    Weighted,
    #[default]
    LeastLoad,
}

impl Scheme {
    pub const ALL: [Scheme; 5] = [
        Scheme::Lru,
        Scheme::PlainRandom,
        Scheme::TwoBin,
        Scheme::Weighted,
        Scheme::LeastLoad,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Lru => "lru",
            Self::PlainRandom => "plainrandom",
            Self::TwoBin => "twobin",
            Self::Weighted => "weighted",
            Self::LeastLoad => "leastload",
        }
    }

    /// Pick an index into `loads`. `loads` must not be empty.
    pub fn choose<R: Rng>(&self, loads: &[usize], rng: &mut R) -> usize {
        match self {
            Self::Lru => lru(loads),
            Self::PlainRandom => plainrandom(loads, rng),
            Self::TwoBin => twobin(loads, rng),
            Self::Weighted => weighted(loads, rng),
            Self::LeastLoad => leastload(loads),
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Scheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Scheme::ALL
            .into_iter()
            .find(|scheme| scheme.name() == s)
            .ok_or_else(|| {
                format!(
                    "unknown scheme '{s}', expected one of: lru, plainrandom, twobin, weighted, leastload"
                )
            })
    }
}

/// Always the least recently serviced engine.
pub fn lru(_loads: &[usize]) -> usize {
    0
}

pub fn plainrandom<R: Rng>(loads: &[usize], rng: &mut R) -> usize {
    rng.gen_range(0..loads.len())
}

/// Two uniform samples; the one earlier in LRU order wins.
pub fn twobin<R: Rng>(loads: &[usize], rng: &mut R) -> usize {
    let n = loads.len();
    let a = rng.gen_range(0..n);
    let b = rng.gen_range(0..n);
    a.min(b)
}

/// Two samples drawn with probability inversely proportional to load;
/// the less loaded of the two wins.
pub fn weighted<R: Rng>(loads: &[usize], rng: &mut R) -> usize {
    let weights: Vec<f64> = loads.iter().map(|&l| 1.0 / (1e-6 + l as f64)).collect();
    let mut sums = Vec::with_capacity(weights.len());
    let mut total = 0.0;
    for w in &weights {
        total += w;
        sums.push(total);
    }

    let pick = |x: f64| sums.iter().position(|&s| s >= x).unwrap_or(sums.len() - 1);
    let idx = pick(rng.gen::<f64>() * total);
    let idy = pick(rng.gen::<f64>() * total);
    if weights[idy] > weights[idx] {
        idy
    } else {
        idx
    }
}

/// Index of the smallest load, first occurrence on ties.
pub fn leastload(loads: &[usize]) -> usize {
    let mut best = 0;
    for (i, &load) in loads.iter().enumerate() {
        if load < loads[best] {
            best = i;
        }
    }
    best
}
