//! The fixed diagnostic battery run on every fitted model.
//!
//! Every test is always recorded. A test that cannot be computed is recorded
//! as failed with the reason in `detail`.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::linalg::{mean, Matrix};
use super::ols::{self, OlsFit};
use crate::error::HedonicError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    ResidualNormality,
    Homoscedasticity,
    Multicollinearity,
    InfluentialPoints,
    CoefficientSigns,
}

impl DiagnosticKind {
    pub const ALL: [DiagnosticKind; 5] = [
        DiagnosticKind::ResidualNormality,
        DiagnosticKind::Homoscedasticity,
        DiagnosticKind::Multicollinearity,
        DiagnosticKind::InfluentialPoints,
        DiagnosticKind::CoefficientSigns,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticKind::ResidualNormality => "residual_normality",
            DiagnosticKind::Homoscedasticity => "homoscedasticity",
            DiagnosticKind::Multicollinearity => "multicollinearity",
            DiagnosticKind::InfluentialPoints => "influential_points",
            DiagnosticKind::CoefficientSigns => "coefficient_signs",
        }
    }
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticResult {
    pub test: DiagnosticKind,
    pub passed: bool,
    /// `None` when the statistic is not finite
    pub statistic: Option<f64>,
    pub p_value: Option<f64>,
    pub detail: String,
}

impl DiagnosticResult {
    fn failed_to_compute(test: DiagnosticKind, err: HedonicError) -> Self {
        Self { test, passed: false, statistic: None, p_value: None, detail: format!("not computable: {}", err) }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticReport {
    pub results: Vec<DiagnosticResult>,
}

impl DiagnosticReport {
    pub fn passing_count(&self) -> usize {
        self.results.iter().filter(|r| r.passed).count()
    }

    pub fn get(&self, test: DiagnosticKind) -> Option<&DiagnosticResult> {
        self.results.iter().find(|r| r.test == test)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticThresholds {
    /// Significance level for the normality and heteroscedasticity tests
    pub alpha: f64,
    pub max_vif: f64,
    pub cooks_distance_cutoff: f64,
    /// |t| above which a wrong-signed coefficient counts as a violation
    pub sign_t_critical: f64,
}

impl Default for DiagnosticThresholds {
    fn default() -> Self {
        Self { alpha: 0.05, max_vif: 10.0, cooks_distance_cutoff: 1.0, sign_t_critical: 1.96 }
    }
}

/// Expected sign of a coefficient
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignPrior {
    Positive,
    Negative,
    Free,
}

/// Run all five diagnostics. `names` and `priors` describe the columns of `x`.
pub fn run_diagnostics(
    x: &Matrix,
    fit: &OlsFit,
    names: &[&str],
    priors: &[SignPrior],
    thresholds: &DiagnosticThresholds,
) -> DiagnosticReport {
    let results = vec![
        residual_normality(&fit.residuals, thresholds.alpha),
        homoscedasticity(x, &fit.residuals, thresholds.alpha)
            .unwrap_or_else(|e| DiagnosticResult::failed_to_compute(DiagnosticKind::Homoscedasticity, e)),
        multicollinearity(x, names, thresholds.max_vif)
            .unwrap_or_else(|e| DiagnosticResult::failed_to_compute(DiagnosticKind::Multicollinearity, e)),
        influential_points(fit, thresholds.cooks_distance_cutoff),
        coefficient_signs(fit, names, priors, thresholds.sign_t_critical),
    ];
    DiagnosticReport { results }
}

/// Jarque-Bera on the residuals; the statistic is χ² with 2 degrees of freedom
pub fn residual_normality(residuals: &[f64], alpha: f64) -> DiagnosticResult {
    let n = residuals.len() as f64;
    let m = mean(residuals);
    let m2 = residuals.iter().map(|e| (e - m).powi(2)).sum::<f64>() / n;
    let m3 = residuals.iter().map(|e| (e - m).powi(3)).sum::<f64>() / n;
    let m4 = residuals.iter().map(|e| (e - m).powi(4)).sum::<f64>() / n;

    if m2 <= 0.0 || !m2.is_finite() {
        return DiagnosticResult {
            test: DiagnosticKind::ResidualNormality,
            passed: false,
            statistic: None,
            p_value: None,
            detail: "residuals have zero variance".to_string(),
        };
    }

    let skewness = m3 / m2.powf(1.5);
    let kurtosis = m4 / (m2 * m2);
    let jb = n / 6.0 * (skewness.powi(2) + (kurtosis - 3.0).powi(2) / 4.0);
    let p_value = (-jb / 2.0).exp();
    DiagnosticResult {
        test: DiagnosticKind::ResidualNormality,
        passed: p_value >= alpha,
        statistic: finite(jb),
        p_value: Some(p_value),
        detail: format!("skewness {:.3}, kurtosis {:.3}", skewness, kurtosis),
    }
}

/// Koenker's studentized Breusch-Pagan test: `n·R²` of the squared residuals
/// regressed on the design matrix
pub fn homoscedasticity(x: &Matrix, residuals: &[f64], alpha: f64) -> Result<DiagnosticResult, HedonicError> {
    let squared: Vec<f64> = residuals.iter().map(|e| e * e).collect();
    let aux = ols::fit(x, &squared)?;
    let lm = aux.n as f64 * aux.r_squared.max(0.0);
    let df = (x.cols() - 1).max(1);
    let p_value = chi_square_sf(lm, df as f64);
    Ok(DiagnosticResult {
        test: DiagnosticKind::Homoscedasticity,
        passed: p_value >= alpha,
        statistic: finite(lm),
        p_value: Some(p_value),
        detail: format!("LM on {} degrees of freedom", df),
    })
}

/// Largest variance inflation factor among the non-intercept columns
pub fn multicollinearity(x: &Matrix, names: &[&str], max_vif: f64) -> Result<DiagnosticResult, HedonicError> {
    let p = x.cols();
    let mut worst = (1.0_f64, "none");
    if p > 2 {
        for j in 1..p {
            let target = x.column(j);
            let others: Vec<Vec<f64>> =
                (0..x.rows()).map(|r| (0..p).filter(|&c| c != j).map(|c| x.get(r, c)).collect()).collect();
            let aux = ols::fit(&Matrix::from_rows(&others), &target)?;
            let vif = if aux.r_squared < 1.0 { 1.0 / (1.0 - aux.r_squared) } else { f64::INFINITY };
            if vif > worst.0 {
                worst = (vif, names.get(j).copied().unwrap_or("?"));
            }
        }
    }
    Ok(DiagnosticResult {
        test: DiagnosticKind::Multicollinearity,
        passed: worst.0 <= max_vif,
        statistic: finite(worst.0),
        p_value: None,
        detail: format!("max VIF {:.2} ({})", worst.0, worst.1),
    })
}

/// Cook's distance for every observation
pub fn cooks_distances(fit: &OlsFit) -> Vec<f64> {
    let p = fit.p as f64;
    fit.residuals
        .iter()
        .zip(&fit.leverage)
        .map(|(e, h)| {
            if *h >= 1.0 || fit.sigma2 <= 0.0 {
                f64::INFINITY
            } else {
                e * e / (p * fit.sigma2) * h / (1.0 - h).powi(2)
            }
        })
        .collect()
}

pub fn influential_points(fit: &OlsFit, cutoff: f64) -> DiagnosticResult {
    let distances = cooks_distances(fit);
    let max = distances.iter().copied().fold(0.0_f64, f64::max);
    let flagged = distances.iter().filter(|d| **d > cutoff).count();
    DiagnosticResult {
        test: DiagnosticKind::InfluentialPoints,
        passed: flagged == 0,
        statistic: finite(max),
        p_value: None,
        detail: format!("{} observation(s) with Cook's distance above {}", flagged, cutoff),
    }
}

/// A coefficient violates its prior only when it is significantly of the wrong sign
pub fn coefficient_signs(fit: &OlsFit, names: &[&str], priors: &[SignPrior], t_critical: f64) -> DiagnosticResult {
    let violations: Vec<&str> = fit
        .t_values
        .iter()
        .zip(priors)
        .enumerate()
        .filter(|(_, (t, prior))| match prior {
            SignPrior::Positive => **t < -t_critical,
            SignPrior::Negative => **t > t_critical,
            SignPrior::Free => false,
        })
        .map(|(j, _)| names.get(j).copied().unwrap_or("?"))
        .collect();

    DiagnosticResult {
        test: DiagnosticKind::CoefficientSigns,
        passed: violations.is_empty(),
        statistic: Some(violations.len() as f64),
        p_value: None,
        detail: if violations.is_empty() {
            "all coefficients consistent with priors".to_string()
        } else {
            format!("wrong sign: {}", violations.join(", "))
        },
    }
}

fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

/// Survival function of the χ² distribution
pub fn chi_square_sf(x: f64, df: f64) -> f64 {
    if x <= 0.0 {
        return 1.0;
    }
    gamma_q(df / 2.0, x / 2.0)
}

/// Regularized upper incomplete gamma `Q(a, x)`
fn gamma_q(a: f64, x: f64) -> f64 {
    if x < a + 1.0 {
        1.0 - gamma_p_series(a, x)
    } else {
        gamma_q_continued_fraction(a, x)
    }
}

fn gamma_p_series(a: f64, x: f64) -> f64 {
    let mut term = 1.0 / a;
    let mut sum = term;
    let mut ap = a;
    for _ in 0..500 {
        ap += 1.0;
        term *= x / ap;
        sum += term;
        if term.abs() < sum.abs() * 1e-15 {
            break;
        }
    }
    (sum.ln() - x + a * x.ln() - ln_gamma(a)).exp()
}

fn gamma_q_continued_fraction(a: f64, x: f64) -> f64 {
    const TINY: f64 = 1e-300;
    let mut b = x + 1.0 - a;
    let mut c = 1.0 / TINY;
    let mut d = 1.0 / b;
    let mut h = d;
    for i in 1..500 {
        let an = -(i as f64) * (i as f64 - a);
        b += 2.0;
        d = an * d + b;
        if d.abs() < TINY {
            d = TINY;
        }
        c = b + an / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        let delta = d * c;
        h *= delta;
        if (delta - 1.0).abs() < 1e-15 {
            break;
        }
    }
    (-x + a * x.ln() - ln_gamma(a)).exp() * h
}

/// Lanczos approximation of `ln Γ(x)` for `x > 0`
fn ln_gamma(x: f64) -> f64 {
    const COEFFS: [f64; 6] = [
        76.180_091_729_471_46,
        -86.505_320_329_416_77,
        24.014_098_240_830_91,
        -1.231_739_572_450_155,
        0.001_208_650_973_866_179,
        -0.000_005_395_239_384_953,
    ];
    let tmp = x + 5.5 - (x + 0.5) * (x + 5.5).ln();
    let mut ser = 1.000_000_000_190_015;
    let mut y = x;
    for c in COEFFS {
        y += 1.0;
        ser += c / y;
    }
    -tmp + (2.506_628_274_631_000_5 * ser / x).ln()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() < tol
    }

    #[test]
    fn test_chi_square_sf_reference_values() {
        // df = 2 has the closed form exp(-x/2)
        assert!(close(chi_square_sf(3.0, 2.0), (-1.5f64).exp(), 1e-9));
        assert!(close(chi_square_sf(3.841_458_8, 1.0), 0.05, 1e-6));
        assert!(close(chi_square_sf(11.070_497_7, 5.0), 0.05, 1e-6));
        assert_eq!(chi_square_sf(0.0, 3.0), 1.0);
    }

    #[test]
    fn test_ln_gamma() {
        assert!(close(ln_gamma(1.0), 0.0, 1e-9));
        assert!(close(ln_gamma(5.0), 24f64.ln(), 1e-9));
        assert!(close(ln_gamma(0.5), std::f64::consts::PI.sqrt().ln(), 1e-9));
    }

    #[test]
    fn test_sign_violation_requires_significance() {
        let fit = OlsFit {
            coefficients: vec![1.0, -0.5, 0.2],
            std_errors: vec![0.1, 0.1, 0.5],
            t_values: vec![10.0, -5.0, 0.4],
            fitted: vec![],
            residuals: vec![],
            r_squared: 0.9,
            adj_r_squared: 0.9,
            sigma2: 0.01,
            leverage: vec![],
            n: 50,
            p: 3,
        };
        let names = ["intercept", "ln_superficie", "antiguedad"];
        let priors = [SignPrior::Free, SignPrior::Positive, SignPrior::Negative];

        let result = coefficient_signs(&fit, &names, &priors, 1.96);
        assert!(!result.passed);
        assert!(result.detail.contains("ln_superficie"));

        // An insignificant wrong sign is tolerated
        let priors = [SignPrior::Free, SignPrior::Free, SignPrior::Negative];
        assert!(coefficient_signs(&fit, &names, &priors, 1.96).passed);
    }

    #[test]
    fn test_constant_residuals_fail_normality() {
        let result = residual_normality(&[0.0; 20], 0.05);
        assert!(!result.passed);
        assert!(result.p_value.is_none());
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(DiagnosticKind::ALL.len(), 5);
        assert_eq!(DiagnosticKind::CoefficientSigns.to_string(), "coefficient_signs");
    }
}
