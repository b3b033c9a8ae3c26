use crate::error::{GradeError, LoadError};
use crate::policy::GradingPolicy;
use rusqlite::{Connection, OptionalExtension};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Trimester {
    T1,
    T2,
    T3,
}

impl Trimester {
    pub const ALL: [Trimester; 3] = [Trimester::T1, Trimester::T2, Trimester::T3];

    pub fn as_str(self) -> &'static str {
        match self {
            Trimester::T1 => "T1",
            Trimester::T2 => "T2",
            Trimester::T3 => "T3",
        }
    }

    pub fn index(self) -> usize {
        match self {
            Trimester::T1 => 0,
            Trimester::T2 => 1,
            Trimester::T3 => 2,
        }
    }

    /// Accepts `T1`/`t1`/`1` style spellings.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "T1" | "1" => Some(Trimester::T1),
            "T2" | "2" => Some(Trimester::T2),
            "T3" | "3" => Some(Trimester::T3),
            _ => None,
        }
    }
}

impl fmt::Display for Trimester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a trimester or of the final (post-remedial) evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PassStatus {
    Approved,
    Failed,
}

impl PassStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PassStatus::Approved => "approved",
            PassStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "approved" => Some(PassStatus::Approved),
            "failed" => Some(PassStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnualStatus {
    Approved,
    Remedial,
    Failed,
}

impl AnnualStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AnnualStatus::Approved => "approved",
            AnnualStatus::Remedial => "remedial",
            AnnualStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "approved" => Some(AnnualStatus::Approved),
            "remedial" => Some(AnnualStatus::Remedial),
            "failed" => Some(AnnualStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for AnnualStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The five equally weighted trimester components. A freshly opened
/// trimester starts every component at the bottom of the scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Components {
    pub ai: f64,
    pub ag: f64,
    pub rp: f64,
    pub pi: f64,
    pub ex: f64,
}

impl Components {
    pub const NAMES: [&'static str; 5] = ["ai", "ag", "rp", "pi", "ex"];

    pub fn filled(v: f64) -> Self {
        Self {
            ai: v,
            ag: v,
            rp: v,
            pi: v,
            ex: v,
        }
    }

    pub fn values(&self) -> [(&'static str, f64); 5] {
        [
            ("ai", self.ai),
            ("ag", self.ag),
            ("rp", self.rp),
            ("pi", self.pi),
            ("ex", self.ex),
        ]
    }
}

impl Default for Components {
    fn default() -> Self {
        Self::filled(crate::policy::DEFAULT_MIN_SCORE)
    }
}

/// Partial edit of a trimester row; `None` keeps the stored value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComponentPatch {
    pub ai: Option<f64>,
    pub ag: Option<f64>,
    pub rp: Option<f64>,
    pub pi: Option<f64>,
    pub ex: Option<f64>,
}

impl ComponentPatch {
    pub fn is_empty(&self) -> bool {
        self.ai.is_none()
            && self.ag.is_none()
            && self.rp.is_none()
            && self.pi.is_none()
            && self.ex.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrimesterResult {
    pub average: f64,
    pub status: PassStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnualResult {
    pub annual_avg: f64,
    pub annual_status: AnnualStatus,
    /// Set when one or more trimesters were missing from the average.
    pub provisional: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum RemedialOutcome {
    #[serde(rename_all = "camelCase")]
    Resolved {
        final_avg: f64,
        final_status: PassStatus,
    },
    /// Remedial student whose supplementary exam has not been recorded yet.
    Pending,
}

/// Round half up (away from zero) at 2 decimals.
///
/// The value is converted through its shortest decimal form first, so
/// `7.005_f64` rounds to `7.01` even though its binary value sits just
/// below the midpoint.
pub fn round_half_up_2(x: f64) -> f64 {
    let Some(d) = Decimal::from_f64(x) else {
        return x;
    };
    d.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
        .to_f64()
        .unwrap_or(x)
}

fn mean_half_up_2(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sum = Decimal::ZERO;
    for v in values {
        sum += Decimal::from_f64(*v).unwrap_or(Decimal::ZERO);
    }
    let mean = sum / Decimal::from(values.len() as u64);
    mean.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
        .to_f64()
        .unwrap_or(0.0)
}

fn pass_status(policy: &GradingPolicy, avg: f64) -> PassStatus {
    if avg >= policy.pass_mark {
        PassStatus::Approved
    } else {
        PassStatus::Failed
    }
}

pub fn evaluate_trimester(
    policy: &GradingPolicy,
    components: &Components,
) -> Result<TrimesterResult, GradeError> {
    let mut values = [0.0_f64; 5];
    for (slot, (name, v)) in values.iter_mut().zip(components.values()) {
        *slot = policy.check_score(name, v)?;
    }
    let average = mean_half_up_2(&values);
    Ok(TrimesterResult {
        average,
        status: pass_status(policy, average),
    })
}

/// Merges `patch` into `current`, validating only the edited components.
/// A locked trimester refuses any edit, even an empty one.
pub fn apply_component_patch(
    policy: &GradingPolicy,
    trimester: Trimester,
    current: &Components,
    patch: &ComponentPatch,
    locked: bool,
) -> Result<Components, GradeError> {
    if locked {
        return Err(GradeError::Locked { trimester });
    }
    let mut next = *current;
    let edits = [
        ("ai", patch.ai, &mut next.ai),
        ("ag", patch.ag, &mut next.ag),
        ("rp", patch.rp, &mut next.rp),
        ("pi", patch.pi, &mut next.pi),
        ("ex", patch.ex, &mut next.ex),
    ];
    for (name, edit, slot) in edits {
        if let Some(v) = edit {
            *slot = policy.check_score(name, v)?;
        }
    }
    Ok(next)
}

fn annual_status(policy: &GradingPolicy, avg: f64) -> AnnualStatus {
    if avg >= policy.pass_mark {
        AnnualStatus::Approved
    } else if avg >= policy.remedial_floor {
        AnnualStatus::Remedial
    } else {
        AnnualStatus::Failed
    }
}

fn missing_trimesters(ts: &[Option<TrimesterResult>; 3]) -> Vec<Trimester> {
    Trimester::ALL
        .iter()
        .copied()
        .filter(|t| ts[t.index()].is_none())
        .collect()
}

/// Full-year aggregation. All three trimesters must be present.
pub fn aggregate_annual(
    policy: &GradingPolicy,
    trimesters: &[Option<TrimesterResult>; 3],
) -> Result<AnnualResult, GradeError> {
    let missing = missing_trimesters(trimesters);
    if !missing.is_empty() {
        return Err(GradeError::IncompleteData { missing });
    }
    aggregate_provisional(policy, trimesters)
}

/// Aggregates whatever trimesters are present. The result is flagged
/// provisional unless all three were available.
pub fn aggregate_provisional(
    policy: &GradingPolicy,
    trimesters: &[Option<TrimesterResult>; 3],
) -> Result<AnnualResult, GradeError> {
    let averages: Vec<f64> = trimesters.iter().flatten().map(|t| t.average).collect();
    if averages.is_empty() {
        return Err(GradeError::IncompleteData {
            missing: Trimester::ALL.to_vec(),
        });
    }
    let annual_avg = mean_half_up_2(&averages);
    Ok(AnnualResult {
        annual_avg,
        annual_status: annual_status(policy, annual_avg),
        provisional: averages.len() < Trimester::ALL.len(),
    })
}

pub fn resolve_remedial(
    policy: &GradingPolicy,
    status: AnnualStatus,
    annual_avg: f64,
    remedial_score: Option<f64>,
) -> Result<RemedialOutcome, GradeError> {
    match status {
        AnnualStatus::Approved | AnnualStatus::Failed => {
            if remedial_score.is_some() {
                return Err(GradeError::NotEligible { status });
            }
            let final_status = if status == AnnualStatus::Approved {
                PassStatus::Approved
            } else {
                PassStatus::Failed
            };
            Ok(RemedialOutcome::Resolved {
                final_avg: annual_avg,
                final_status,
            })
        }
        AnnualStatus::Remedial => {
            let Some(score) = remedial_score else {
                return Ok(RemedialOutcome::Pending);
            };
            let score = policy.check_score("remedialScore", score)?;
            let final_avg = mean_half_up_2(&[annual_avg, score]);
            Ok(RemedialOutcome::Resolved {
                final_avg,
                final_status: pass_status(policy, final_avg),
            })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrimesterRow {
    pub trimester: Trimester,
    pub components: Components,
    pub locked: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrimesterView {
    pub trimester: Trimester,
    pub components: Components,
    pub locked: bool,
    pub average: f64,
    pub status: PassStatus,
}

/// Everything the engine derives for one student.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Standing {
    pub trimesters: Vec<TrimesterView>,
    pub annual: Option<AnnualResult>,
    pub remedial_score: Option<f64>,
    pub final_avg: Option<f64>,
    pub final_status: Option<PassStatus>,
    pub pending: bool,
}

/// Runs the whole pipeline over a student's stored rows.
///
/// A remedial score only survives while the annual status is Remedial; a
/// provisional year never resolves to a final status.
pub fn compute_standing(
    policy: &GradingPolicy,
    rows: &[TrimesterRow],
    remedial_score: Option<f64>,
) -> Result<Standing, GradeError> {
    let mut results: [Option<TrimesterResult>; 3] = [None; 3];
    let mut views = Vec::with_capacity(rows.len());
    for row in rows {
        let r = evaluate_trimester(policy, &row.components)?;
        results[row.trimester.index()] = Some(r);
        views.push(TrimesterView {
            trimester: row.trimester,
            components: row.components,
            locked: row.locked,
            average: r.average,
            status: r.status,
        });
    }
    views.sort_by_key(|v| v.trimester);

    let mut standing = Standing {
        trimesters: views,
        annual: None,
        remedial_score: None,
        final_avg: None,
        final_status: None,
        pending: false,
    };
    if results.iter().all(Option::is_none) {
        return Ok(standing);
    }

    let annual = aggregate_provisional(policy, &results)?;
    standing.annual = Some(annual);
    if annual.provisional {
        return Ok(standing);
    }

    let score = if annual.annual_status == AnnualStatus::Remedial {
        remedial_score
    } else {
        None
    };
    standing.remedial_score = score;
    match resolve_remedial(policy, annual.annual_status, annual.annual_avg, score)? {
        RemedialOutcome::Resolved {
            final_avg,
            final_status,
        } => {
            standing.final_avg = Some(final_avg);
            standing.final_status = Some(final_status);
        }
        RemedialOutcome::Pending => standing.pending = true,
    }
    Ok(standing)
}

pub fn load_trimester_rows(
    conn: &Connection,
    student_id: &str,
) -> Result<Vec<TrimesterRow>, LoadError> {
    let mut stmt = conn.prepare(
        "SELECT trimester, ai, ag, rp, pi, ex, locked
         FROM trimester_grades
         WHERE student_id = ?
         ORDER BY trimester",
    )?;
    let raw = stmt
        .query_map([student_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                Components {
                    ai: r.get(1)?,
                    ag: r.get(2)?,
                    rp: r.get(3)?,
                    pi: r.get(4)?,
                    ex: r.get(5)?,
                },
                r.get::<_, i64>(6)? != 0,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut rows = Vec::with_capacity(raw.len());
    for (t, components, locked) in raw {
        let trimester = Trimester::parse(&t)
            .ok_or_else(|| LoadError::Corrupt(format!("unknown trimester {}", t)))?;
        rows.push(TrimesterRow {
            trimester,
            components,
            locked,
        });
    }
    Ok(rows)
}

pub fn load_remedial_score(
    conn: &Connection,
    student_id: &str,
) -> Result<Option<f64>, LoadError> {
    let score: Option<Option<f64>> = conn
        .query_row(
            "SELECT remedial_score FROM annual_grades WHERE student_id = ?",
            [student_id],
            |r| r.get(0),
        )
        .optional()?;
    Ok(score.flatten())
}

/// Reads a student's rows and derives the current standing. Read-only.
pub fn load_student_standing(
    conn: &Connection,
    policy: &GradingPolicy,
    student_id: &str,
) -> Result<Standing, LoadError> {
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM students WHERE national_id = ?",
            [student_id],
            |r| r.get(0),
        )
        .optional()?;
    if exists.is_none() {
        return Err(LoadError::NotFound(format!("student {}", student_id)));
    }
    let rows = load_trimester_rows(conn, student_id)?;
    let remedial = load_remedial_score(conn, student_id)?;
    Ok(compute_standing(policy, &rows, remedial)?)
}
