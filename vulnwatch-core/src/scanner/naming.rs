//! Scan job naming.

use std::{fmt, sync::Mutex};

use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::model::WorkloadKey;

/// DNS-1123 label limit for job names.
pub const MAX_NAME_LEN: usize = 63;
const SUFFIX_LEN: usize = 5;
/// Alphabet without vowels or look-alike digits, as used for generated
/// cluster object names.
const SUFFIX_ALPHABET: &[u8] = b"bcdfghjklmnpqrstvwxz2456789";

/// Produces human-distinguishable, collision-avoiding scan job names.
pub trait NameGenerator: Send + Sync {
    fn job_name(&self, workload: &WorkloadKey, container: &str) -> String;
}

/// `scan-<workload>-<container>-<suffix>` with a random five-character
/// suffix. Seedable so tests get stable names.
pub struct RandomNameGenerator {
    rng: Mutex<StdRng>,
}

impl fmt::Debug for RandomNameGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RandomNameGenerator").finish_non_exhaustive()
    }
}

impl Default for RandomNameGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl RandomNameGenerator {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn suffix(&self) -> String {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        (0..SUFFIX_LEN)
            .map(|_| {
                let idx = rng.random_range(0..SUFFIX_ALPHABET.len());
                SUFFIX_ALPHABET[idx] as char
            })
            .collect()
    }
}

impl NameGenerator for RandomNameGenerator {
    fn job_name(&self, workload: &WorkloadKey, container: &str) -> String {
        compose_job_name(&workload.name, container, &self.suffix())
    }
}

/// Joins the name parts, trimming the descriptive middle so the suffix
/// always survives the length limit.
pub fn compose_job_name(workload: &str, container: &str, suffix: &str) -> String {
    let stem = sanitize(&format!("scan-{workload}-{container}"));
    let budget = MAX_NAME_LEN.saturating_sub(suffix.len() + 1);
    let stem = stem[..stem.len().min(budget)].trim_end_matches('-');
    format!("{stem}-{suffix}")
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '-' => c,
            'A'..='Z' => c.to_ascii_lowercase(),
            _ => '-',
        })
        .collect()
}
