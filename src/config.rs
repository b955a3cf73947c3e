//! Start-up configuration for an [`crate::engine::Engine`] run.

/// Tunables accepted by [`crate::engine::Engine::run`].
///
/// Unlike the quirk-switches a general-purpose CHIP-8 interpreter exposes, this engine fixes
/// its instruction semantics (modern SHR/SHL-on-Vx, non-incrementing `LD [I]`, no SUPER-CHIP
/// support) so there is nothing to configure there. What remains configurable is purely
/// informational/environmental.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct EngineConfig {
    /// The guest clock rate in Hz. The engine itself does not self-throttle to this rate -
    /// that is a concern for whatever drives the `Engine` (see `src/bin/chip8run.rs`) - but it
    /// is reported back so a frontend can pace its own polling loop.
    pub clock_hz: u64,
    /// Seeds the deterministic PRNG backing `RND`. `None` seeds from the OS entropy source,
    /// which is appropriate for interactive use but defeats cross-run/cross-backend trace
    /// comparison; tests that need reproducibility always pass `Some(seed)`.
    pub rng_seed: Option<u64>,
}

/// The conventional CHIP-8 clock rate used by most ROMs tuned against period interpreters.
const DEFAULT_CLOCK_HZ: u64 = 720;

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            clock_hz: DEFAULT_CLOCK_HZ,
            rng_seed: None,
        }
    }
}
