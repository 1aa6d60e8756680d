//! Robust weight functions for iteratively reweighted least squares.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

/// Weight function applied to standardized residuals.
///
/// Every variant maps `|u|` to a weight in `[0, 1]`, is non-increasing and
/// returns 1 at `u = 0`. All but [`RobustFunction::Trim`] are continuous;
/// trimming is a hard cut by construction.
///
/// Tuning is a short tuple whose first entry is always the scale `c` of the
/// standardized residual. Further entries are exponents or, for Hampel and
/// slope, additional breakpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RobustFunction {
    #[default]
    Huber,
    Slope,
    Hampel,
    Danish,
    Epanechnikov,
    #[serde(alias = "bisquare")]
    Tukey,
    Jacobi,
    #[serde(alias = "welsch")]
    Exponential,
    Cra,
    ErrorFunc,
    Cauchy,
    #[serde(rename = "t")]
    StudentT,
    Bell,
    Chain,
    Andrews,
    Wave,
    HalfWave,
    Wigner,
    EllipseCurve,
    Trim,
    Logistic,
    Fair,
}

static REGISTRY: Lazy<HashMap<&'static str, RobustFunction>> = Lazy::new(|| {
    let mut m = HashMap::new();
    for f in RobustFunction::ALL {
        m.insert(f.name(), f);
    }
    m.insert("bisquare", RobustFunction::Tukey);
    m.insert("tukey_bisquare", RobustFunction::Tukey);
    m.insert("welsch", RobustFunction::Exponential);
    m.insert("leclerc", RobustFunction::Exponential);
    m.insert("danish_method", RobustFunction::Danish);
    m.insert("choice_rule_of_alternative", RobustFunction::Cra);
    m.insert("error_function", RobustFunction::ErrorFunc);
    m.insert("erf", RobustFunction::ErrorFunc);
    m.insert("t_distribution", RobustFunction::StudentT);
    m.insert("student", RobustFunction::StudentT);
    m.insert("bell_curve", RobustFunction::Bell);
    m.insert("chain_curve", RobustFunction::Chain);
    m.insert("ellipse", RobustFunction::EllipseCurve);
    m.insert("trimmed", RobustFunction::Trim);
    m
});

impl RobustFunction {
    pub const ALL: [RobustFunction; 22] = [
        RobustFunction::Huber,
        RobustFunction::Slope,
        RobustFunction::Hampel,
        RobustFunction::Danish,
        RobustFunction::Epanechnikov,
        RobustFunction::Tukey,
        RobustFunction::Jacobi,
        RobustFunction::Exponential,
        RobustFunction::Cra,
        RobustFunction::ErrorFunc,
        RobustFunction::Cauchy,
        RobustFunction::StudentT,
        RobustFunction::Bell,
        RobustFunction::Chain,
        RobustFunction::Andrews,
        RobustFunction::Wave,
        RobustFunction::HalfWave,
        RobustFunction::Wigner,
        RobustFunction::EllipseCurve,
        RobustFunction::Trim,
        RobustFunction::Logistic,
        RobustFunction::Fair,
    ];

    pub fn name(self) -> &'static str {
        match self {
            RobustFunction::Huber => "huber",
            RobustFunction::Slope => "slope",
            RobustFunction::Hampel => "hampel",
            RobustFunction::Danish => "danish",
            RobustFunction::Epanechnikov => "epanechnikov",
            RobustFunction::Tukey => "tukey",
            RobustFunction::Jacobi => "jacobi",
            RobustFunction::Exponential => "exponential",
            RobustFunction::Cra => "cra",
            RobustFunction::ErrorFunc => "error_func",
            RobustFunction::Cauchy => "cauchy",
            RobustFunction::StudentT => "t",
            RobustFunction::Bell => "bell",
            RobustFunction::Chain => "chain",
            RobustFunction::Andrews => "andrews",
            RobustFunction::Wave => "wave",
            RobustFunction::HalfWave => "half_wave",
            RobustFunction::Wigner => "wigner",
            RobustFunction::EllipseCurve => "ellipse_curve",
            RobustFunction::Trim => "trim",
            RobustFunction::Logistic => "logistic",
            RobustFunction::Fair => "fair",
        }
    }

    /// Recommended tuning tuple.
    pub fn default_tuning(self) -> &'static [f64] {
        match self {
            RobustFunction::Huber => &[1.345],
            RobustFunction::Slope => &[2.0, 2.0],
            RobustFunction::Hampel => &[1.7, 3.4, 8.5],
            RobustFunction::Danish => &[2.5],
            RobustFunction::Epanechnikov => &[3.674, 2.0],
            RobustFunction::Tukey => &[4.685, 2.0],
            RobustFunction::Jacobi => &[4.687, 1.0],
            RobustFunction::Exponential => &[2.0, 2.0],
            RobustFunction::Cra => &[2.0, 2.0],
            RobustFunction::ErrorFunc => &[1.414, 2.0],
            RobustFunction::Cauchy => &[2.385, 2.0],
            RobustFunction::StudentT => &[1.0, 2.0],
            RobustFunction::Bell => &[1.0, 1.0],
            RobustFunction::Chain => &[1.0],
            RobustFunction::Andrews => &[4.207],
            RobustFunction::Wave => &[2.5],
            RobustFunction::HalfWave => &[2.5],
            RobustFunction::Wigner => &[3.137],
            RobustFunction::EllipseCurve => &[2.5],
            RobustFunction::Trim => &[2.5],
            RobustFunction::Logistic => &[1.205],
            RobustFunction::Fair => &[1.4],
        }
    }

    /// Functions whose scale constant follows the spread of the current
    /// standardized values between iterations.
    pub fn is_adaptive(self) -> bool {
        matches!(self, RobustFunction::StudentT | RobustFunction::Cra)
    }

    /// Checks a tuning tuple: right length, positive finite entries, and
    /// ascending breakpoints for Hampel.
    pub fn check_tuning(self, k: &[f64]) -> Result<(), String> {
        let expected = self.default_tuning().len();
        if k.len() != expected {
            return Err(format!(
                "{self} takes {expected} tuning constant(s), got {}",
                k.len()
            ));
        }
        if let Some(bad) = k.iter().find(|c| !(c.is_finite() && **c > 0.0)) {
            return Err(format!("tuning constants must be positive, got {bad}"));
        }
        if self == RobustFunction::Hampel && !(k[0] < k[1] && k[1] < k[2]) {
            return Err(format!(
                "hampel breakpoints must ascend, got {}, {}, {}",
                k[0], k[1], k[2]
            ));
        }
        Ok(())
    }

    /// Looks a function up by name or alias, ignoring case.
    pub fn lookup(name: &str) -> Option<Self> {
        let key = name.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        REGISTRY.get(key.as_str()).copied()
    }

    /// Weight for standardized residual `u` under tuning tuple `k`.
    ///
    /// `k` must have passed [`RobustFunction::check_tuning`]; entries it lacks
    /// fall back to the defaults.
    pub fn weight(self, u: f64, k: &[f64]) -> f64 {
        let t = u.abs();
        if !t.is_finite() {
            return 0.0;
        }
        let defaults = self.default_tuning();
        let param = |i: usize| k.get(i).or_else(|| defaults.get(i)).copied().unwrap_or(1.0);
        let c = param(0);
        let r = t / c;
        let w = match self {
            RobustFunction::Huber => {
                if t <= c {
                    1.0
                } else {
                    c / t
                }
            }
            RobustFunction::Slope => {
                let a = param(1);
                if t <= c {
                    1.0
                } else if t < c + a {
                    1.0 - (t - c) / a
                } else {
                    0.0
                }
            }
            RobustFunction::Hampel => {
                let (a, b, end) = (c, param(1), param(2));
                if t <= a {
                    1.0
                } else if t <= b {
                    a / t
                } else if t < end {
                    a * (end - t) / ((end - b) * t)
                } else {
                    0.0
                }
            }
            RobustFunction::Danish => {
                if t <= c {
                    1.0
                } else {
                    (1.0 - r * r).exp()
                }
            }
            RobustFunction::Epanechnikov => {
                if r < 1.0 {
                    1.0 - r.powf(param(1))
                } else {
                    0.0
                }
            }
            RobustFunction::Tukey => {
                if r < 1.0 {
                    (1.0 - r * r).powf(param(1))
                } else {
                    0.0
                }
            }
            RobustFunction::Jacobi => {
                if r < 1.0 {
                    (1.0 - r).powf(param(1))
                } else {
                    0.0
                }
            }
            RobustFunction::Exponential => (-r.powf(param(1))).exp(),
            RobustFunction::Cra => {
                if t <= c {
                    1.0
                } else {
                    (c / t).powf(param(1))
                }
            }
            RobustFunction::ErrorFunc => {
                if t == 0.0 {
                    1.0
                } else {
                    erfc(r.powf(param(1)))
                }
            }
            RobustFunction::Cauchy => 1.0 / (1.0 + r.powf(param(1))),
            RobustFunction::StudentT => {
                let nu = param(1);
                nu / (nu + r * r)
            }
            RobustFunction::Bell => (-0.5 * r.powf(2.0 * param(1))).exp(),
            RobustFunction::Chain => {
                // cosh overflows past ~710
                if r < 700.0 {
                    1.0 / r.cosh()
                } else {
                    0.0
                }
            }
            RobustFunction::Andrews => {
                if t == 0.0 {
                    1.0
                } else if r < 1.0 {
                    let a = PI * r;
                    a.sin() / a
                } else {
                    0.0
                }
            }
            RobustFunction::Wave => {
                if r < 1.0 {
                    0.5 * (1.0 + (PI * r).cos())
                } else {
                    0.0
                }
            }
            RobustFunction::HalfWave => {
                if r < 1.0 {
                    (0.5 * PI * r).cos()
                } else {
                    0.0
                }
            }
            RobustFunction::Wigner => {
                if r < 1.0 {
                    (1.0 - r * r).sqrt()
                } else {
                    0.0
                }
            }
            RobustFunction::EllipseCurve => {
                if r < 1.0 {
                    let s = 1.0 - r;
                    1.0 - (1.0 - s * s).sqrt()
                } else {
                    0.0
                }
            }
            RobustFunction::Trim => {
                if t <= c {
                    1.0
                } else {
                    0.0
                }
            }
            RobustFunction::Logistic => {
                if r < 1e-8 {
                    1.0
                } else {
                    r.tanh() / r
                }
            }
            RobustFunction::Fair => 1.0 / (1.0 + r),
        };
        w.clamp(0.0, 1.0)
    }
}

/// Complementary error function for `x >= 0` (Abramowitz & Stegun 7.1.26,
/// absolute error below 1.5e-7).
fn erfc(x: f64) -> f64 {
    let t = 1.0 / (1.0 + 0.327_591_1 * x);
    let poly = t
        * (0.254_829_592
            + t * (-0.284_496_736 + t * (1.421_413_741 + t * (-1.453_152_027 + t * 1.061_405_429))));
    poly * (-x * x).exp()
}

impl fmt::Display for RobustFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RobustFunction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::lookup(s).ok_or_else(|| format!("unknown robust function '{s}'"))
    }
}
