//! Declarative loss configuration
//!
//! A training harness names its loss and hyperparameters in YAML and
//! receives a boxed [`LossFn`]:
//!
//! ```yaml
//! loss: dice
//! num_classes: 2
//! height: 256
//! width: 256
//! multiclass: true
//! ignore_index: 255
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::loss::{BCEDiceLoss, DiceLoss, LossFn, TwerkyLoss};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to parse loss config: {0}")]
    Parse(String),

    #[error("Invalid loss config: {0}")]
    Invalid(String),
}

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Which loss function to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossKind {
    /// [`BCEDiceLoss`]
    BceDice,
    /// [`DiceLoss`]
    Dice,
    /// [`TwerkyLoss`]
    Twerky,
}

/// Loss selection plus hyperparameters
///
/// Geometry fields describe one sample: `num_classes` channels of
/// `height * width` elements. Hyperparameters default to the values the
/// losses themselves default to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LossSpec {
    /// Loss function to build
    pub loss: LossKind,
    /// Channel count of the prediction tensor
    #[serde(default = "default_num_classes")]
    pub num_classes: usize,
    /// Spatial height of one sample
    pub height: usize,
    /// Spatial width of one sample
    pub width: usize,
    /// Per-class Dice dispatch (Dice only)
    #[serde(default)]
    pub multiclass: bool,
    /// Target label excluded from Dice computation
    #[serde(default)]
    pub ignore_index: Option<usize>,
    /// Weight of the BCE component (Twerky only)
    #[serde(default = "default_alpha")]
    pub alpha: f32,
    /// Weight of the Dice component (Twerky only)
    #[serde(default = "default_beta")]
    pub beta: f32,
    /// Smoothing constant (Twerky only)
    #[serde(default = "default_smooth")]
    pub smooth: f32,
    /// Stability epsilon (Dice only)
    #[serde(default = "default_epsilon")]
    pub epsilon: f32,
}

fn default_num_classes() -> usize {
    2
}

fn default_alpha() -> f32 {
    0.5
}

fn default_beta() -> f32 {
    0.5
}

fn default_smooth() -> f32 {
    1e-5
}

fn default_epsilon() -> f32 {
    1e-6
}

/// Validate a spec without building the loss
pub fn validate_spec(spec: &LossSpec) -> Result<()> {
    if spec.num_classes == 0 {
        return Err(ConfigError::Invalid("num_classes must be positive".to_string()));
    }
    if spec.height == 0 || spec.width == 0 {
        return Err(ConfigError::Invalid("height and width must be positive".to_string()));
    }
    if !spec.alpha.is_finite() || spec.alpha < 0.0 {
        return Err(ConfigError::Invalid(format!(
            "alpha must be non-negative, got {}",
            spec.alpha
        )));
    }
    if !spec.beta.is_finite() || spec.beta < 0.0 {
        return Err(ConfigError::Invalid(format!(
            "beta must be non-negative, got {}",
            spec.beta
        )));
    }
    if !(spec.smooth > 0.0) {
        return Err(ConfigError::Invalid(format!(
            "smooth must be positive, got {}",
            spec.smooth
        )));
    }
    if !(spec.epsilon > 0.0) {
        return Err(ConfigError::Invalid(format!(
            "epsilon must be positive, got {}",
            spec.epsilon
        )));
    }
    Ok(())
}

/// Build the loss a spec names
pub fn build_loss(spec: &LossSpec) -> Result<Box<dyn LossFn>> {
    validate_spec(spec)?;

    let plane_size = spec.height * spec.width;
    Ok(match spec.loss {
        LossKind::BceDice => Box::new(BCEDiceLoss::new(spec.num_classes * plane_size)),
        LossKind::Dice => {
            let mut loss = DiceLoss::new(spec.num_classes, plane_size, spec.multiclass)
                .with_epsilon(spec.epsilon);
            if let Some(ix) = spec.ignore_index {
                loss = loss.with_ignore_index(ix);
            }
            Box::new(loss)
        }
        LossKind::Twerky => Box::new(
            TwerkyLoss::with_weights(spec.num_classes, plane_size, spec.alpha, spec.beta)
                .with_smooth(spec.smooth),
        ),
    })
}

/// Parse a YAML loss spec and build the loss it names
pub fn loss_from_yaml(yaml: &str) -> Result<Box<dyn LossFn>> {
    let spec: LossSpec =
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))?;
    build_loss(&spec)
}
