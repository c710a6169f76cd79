use serde::{Deserialize, Serialize};

/// Configuration of an [`InferenceEngine`](crate::inference::InferenceEngine)
///
/// # Example
///
/// ```
/// use jtree::inference::InferenceConfig;
///
/// let config: InferenceConfig = serde_yaml::from_str("parallel: false").unwrap();
/// assert_eq!(config, InferenceConfig::sequential());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Run message passing on a worker pool
    /// Default: true
    #[serde(default = "default_parallel")]
    pub parallel: bool,

    /// Size of the worker pool, 0 lets rayon decide
    /// Default: 0
    #[serde(default)]
    pub num_threads: usize,

    /// Upper bound on the total number of clique table entries,
    /// networks exceeding it are refused when an engine is built
    /// Default: no limit
    #[serde(default)]
    pub max_table_size: Option<usize>,

    /// Keep auxiliary propagations of sensitivity queries until evidence or a CPT changes
    /// Default: true
    #[serde(default = "default_sensitivity_cache")]
    pub sensitivity_cache: bool,
}

fn default_parallel() -> bool {
    true
}

fn default_sensitivity_cache() -> bool {
    true
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            parallel: default_parallel(),
            num_threads: 0,
            max_table_size: None,
            sensitivity_cache: default_sensitivity_cache(),
        }
    }
}

impl InferenceConfig {
    /// Message passing in the calling thread
    pub fn sequential() -> Self {
        Self {
            parallel: false,
            ..Self::default()
        }
    }

    /// Message passing on a pool of `num_threads` workers
    pub fn parallel(num_threads: usize) -> Self {
        Self {
            parallel: true,
            num_threads,
            ..Self::default()
        }
    }

    /// Sets a limit on the total clique table size
    pub fn with_max_table_size(mut self, limit: usize) -> Self {
        self.max_table_size = Some(limit);
        self
    }
}
