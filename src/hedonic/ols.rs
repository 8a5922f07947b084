use serde::{Deserialize, Serialize};

use super::linalg::{dot, mean, Matrix};
use crate::error::HedonicError;

/// Ordinary least squares fit of `y` on the columns of `X`.
///
/// `X` must already contain the intercept column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OlsFit {
    pub coefficients: Vec<f64>,
    pub std_errors: Vec<f64>,
    pub t_values: Vec<f64>,
    pub fitted: Vec<f64>,
    pub residuals: Vec<f64>,
    pub r_squared: f64,
    pub adj_r_squared: f64,
    /// Residual variance, `SSR / (n - p)`
    pub sigma2: f64,
    /// Diagonal of the hat matrix
    pub leverage: Vec<f64>,
    pub n: usize,
    pub p: usize,
}

pub fn fit(x: &Matrix, y: &[f64]) -> Result<OlsFit, HedonicError> {
    let n = x.rows();
    let p = x.cols();
    if n <= p {
        return Err(HedonicError::DataInsufficient { available: n, required: p + 1 });
    }
    debug_assert_eq!(n, y.len());

    let xtx_inv = x.gram().inverse()?;
    let xty = x.transpose().mul_vec(y);
    let coefficients = xtx_inv.mul_vec(&xty);

    let fitted = x.mul_vec(&coefficients);
    let residuals: Vec<f64> = y.iter().zip(&fitted).map(|(obs, hat)| obs - hat).collect();

    let ssr: f64 = residuals.iter().map(|e| e * e).sum();
    let y_mean = mean(y);
    let sst: f64 = y.iter().map(|v| (v - y_mean).powi(2)).sum();
    let r_squared = if sst > 0.0 { 1.0 - ssr / sst } else { 0.0 };
    let adj_r_squared = 1.0 - (1.0 - r_squared) * (n as f64 - 1.0) / (n - p) as f64;
    let sigma2 = ssr / (n - p) as f64;

    let std_errors: Vec<f64> = (0..p).map(|j| (sigma2 * xtx_inv.get(j, j)).max(0.0).sqrt()).collect();
    let t_values = coefficients
        .iter()
        .zip(&std_errors)
        .map(|(b, se)| if *se > 0.0 { b / se } else { 0.0 })
        .collect();

    let leverage = (0..n)
        .map(|i| {
            let row = x.row(i);
            dot(row, &xtx_inv.mul_vec(row))
        })
        .collect();

    Ok(OlsFit {
        coefficients,
        std_errors,
        t_values,
        fitted,
        residuals,
        r_squared,
        adj_r_squared,
        sigma2,
        leverage,
        n,
        p,
    })
}

impl OlsFit {
    pub fn residual_sum_of_squares(&self) -> f64 {
        self.residuals.iter().map(|e| e * e).sum()
    }
}
