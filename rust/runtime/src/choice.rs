//! Nondeterministic boolean choice.
//!
//! Explorers install a [`ChoiceProvider`] so every `$` choice point draws from
//! a reproducible source. Without one the container falls back to a
//! generator it owns: a ChaCha stream when `fallback_seed` is set, otherwise
//! [`EntropyChoice`], which is for ad hoc runs only. The fallback stream is
//! container state, so a clone continues from the same position.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Source of nondeterministic booleans.
pub trait ChoiceProvider: Send + Sync {
    /// Next choice.
    fn next_bool(&self) -> bool;
}

impl<F> ChoiceProvider for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn next_bool(&self) -> bool {
        self()
    }
}

/// Reproducible choices from a ChaCha stream.
pub struct SeededChoice {
    rng: Mutex<ChaCha8Rng>,
}

impl SeededChoice {
    /// Stream seeded with `seed`.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
        }
    }
}

impl fmt::Debug for SeededChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeededChoice").finish_non_exhaustive()
    }
}

impl ChoiceProvider for SeededChoice {
    fn next_bool(&self) -> bool {
        self.rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .gen::<bool>()
    }
}

/// Replays a fixed script, then answers `false`.
#[derive(Debug, Default)]
pub struct ScriptedChoice {
    script: Mutex<VecDeque<bool>>,
}

impl ScriptedChoice {
    /// Replay `choices` in order.
    #[must_use]
    pub fn new(choices: impl IntoIterator<Item = bool>) -> Self {
        Self {
            script: Mutex::new(choices.into_iter().collect()),
        }
    }

    /// Choices not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl ChoiceProvider for ScriptedChoice {
    fn next_bool(&self) -> bool {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or(false)
    }
}

/// Fallback used when no provider is installed.
#[derive(Debug, Default)]
pub struct EntropyChoice;

impl ChoiceProvider for EntropyChoice {
    fn next_bool(&self) -> bool {
        rand::thread_rng().gen::<bool>()
    }
}

/// Generator the container owns when no provider is installed.
#[derive(Clone)]
pub(crate) enum Fallback {
    Entropy,
    Seeded(ChaCha8Rng),
}

impl Fallback {
    pub(crate) fn new(seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => Self::Seeded(ChaCha8Rng::seed_from_u64(seed)),
            None => Self::Entropy,
        }
    }

    pub(crate) fn next_bool(&mut self) -> bool {
        match self {
            Self::Entropy => EntropyChoice.next_bool(),
            Self::Seeded(rng) => rng.gen::<bool>(),
        }
    }
}

impl fmt::Debug for Fallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entropy => f.write_str("Entropy"),
            Self::Seeded(_) => f.write_str("Seeded"),
        }
    }
}
