mod config;
mod engine;
mod evidence;
mod propagation;
mod sensitivity;

pub use config::InferenceConfig;
pub use engine::{InferenceEngine, Marginal, MpeResult, Propagation};
pub use evidence::{EvidenceManager, Finding};
pub use propagation::{Calibrated, CancellationToken, Collected, Message, MessagePropagator};
pub use sensitivity::{CptParameter, Sensitivity};
