use crate::error::GradeError;
use serde::{Deserialize, Serialize};

/// Settings key the policy is stored under in a workspace.
pub const GRADING_POLICY_KEY: &str = "grading.policy";

/// Lowest score on the 1-10 scale; also the default of every component.
pub const DEFAULT_MIN_SCORE: f64 = 1.0;
pub const DEFAULT_MAX_SCORE: f64 = 10.0;
/// Passing line for trimester, annual and final statuses.
pub const DEFAULT_PASS_MARK: f64 = 7.0;
/// Annual averages at or above this (and below the pass mark) go to remedial.
pub const DEFAULT_REMEDIAL_FLOOR: f64 = 5.0;

/// Thresholds driving every grading decision. Workspaces may override any of
/// them; missing fields fall back to the defaults above.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GradingPolicy {
    pub min_score: f64,
    pub max_score: f64,
    pub pass_mark: f64,
    pub remedial_floor: f64,
}

impl Default for GradingPolicy {
    fn default() -> Self {
        Self {
            min_score: DEFAULT_MIN_SCORE,
            max_score: DEFAULT_MAX_SCORE,
            pass_mark: DEFAULT_PASS_MARK,
            remedial_floor: DEFAULT_REMEDIAL_FLOOR,
        }
    }
}

impl GradingPolicy {
    pub fn validate(&self) -> Result<(), GradeError> {
        let fields = [
            ("minScore", self.min_score),
            ("maxScore", self.max_score),
            ("passMark", self.pass_mark),
            ("remedialFloor", self.remedial_floor),
        ];
        for (name, v) in fields {
            if !v.is_finite() {
                return Err(GradeError::InvalidPolicy(format!(
                    "{} must be a finite number",
                    name
                )));
            }
        }
        if self.min_score >= self.max_score {
            return Err(GradeError::InvalidPolicy(
                "minScore must be below maxScore".into(),
            ));
        }
        if self.pass_mark < self.min_score || self.pass_mark > self.max_score {
            return Err(GradeError::InvalidPolicy(
                "passMark must lie within the score scale".into(),
            ));
        }
        if self.remedial_floor < self.min_score || self.remedial_floor > self.pass_mark {
            return Err(GradeError::InvalidPolicy(
                "remedialFloor must lie between minScore and passMark".into(),
            ));
        }
        Ok(())
    }

    /// Rejects `value` unless it lies inside the closed score scale.
    pub fn check_score(&self, field: &str, value: f64) -> Result<f64, GradeError> {
        if !value.is_finite() || value < self.min_score || value > self.max_score {
            return Err(GradeError::Validation {
                field: field.to_string(),
                value,
                min: self.min_score,
                max: self.max_score,
            });
        }
        Ok(value)
    }

    /// Applies a camelCase JSON patch on top of this policy and validates the
    /// result. Unknown keys are refused.
    pub fn patched(&self, patch: &serde_json::Map<String, serde_json::Value>) -> Result<Self, String> {
        let mut next = *self;
        for (k, v) in patch {
            let n = v
                .as_f64()
                .ok_or_else(|| format!("{} must be a number", k))?;
            match k.as_str() {
                "minScore" => next.min_score = n,
                "maxScore" => next.max_score = n,
                "passMark" => next.pass_mark = n,
                "remedialFloor" => next.remedial_floor = n,
                _ => return Err(format!("unknown grading field: {}", k)),
            }
        }
        next.validate().map_err(|e| e.to_string())?;
        Ok(next)
    }
}
