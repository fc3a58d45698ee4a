use std::time::Duration;

const DEFAULT_MODEL: &str = "deepseek-coder";

/// Configuration for a [`StepDriver`](crate::driver::StepDriver).
///
/// All fields are public with sensible defaults. Use `..Default::default()` for
/// fields you don't need to set.
#[derive(Clone)]
pub struct DriverOptions {
    /// Model used by agents that don't name one.
    pub default_model: String,

    /// Ceiling on directives a single run may yield before it is failed.
    pub max_steps_per_run: u32,

    /// Ceiling on inference turns inside one `STEP_ALL`.
    pub max_inference_turns: u32,

    /// Timeout applied to each inference call. A timeout is reported to the
    /// program like any other inference failure.
    pub inference_timeout: Option<Duration>,

    /// Maximum nesting of spawned runs.
    pub max_spawn_depth: u32,

    /// Upper bound on `GENERATE_N` fan-out.
    pub max_generate_n: usize,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            default_model: DEFAULT_MODEL.into(),
            max_steps_per_run: 200,
            max_inference_turns: 50,
            inference_timeout: Some(Duration::from_secs(300)),
            max_spawn_depth: 8,
            max_generate_n: 10,
        }
    }
}

impl std::fmt::Debug for DriverOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverOptions")
            .field("default_model", &self.default_model)
            .field("max_steps_per_run", &self.max_steps_per_run)
            .field("max_inference_turns", &self.max_inference_turns)
            .field("inference_timeout", &self.inference_timeout)
            .field("max_spawn_depth", &self.max_spawn_depth)
            .field("max_generate_n", &self.max_generate_n)
            .finish()
    }
}
