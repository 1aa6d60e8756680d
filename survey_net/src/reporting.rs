//! Plain text adjustment report.

use crate::surveying::{AdjustmentResult, AdjustmentStatus, AngleUnit};
use std::fmt::Write;

fn key_values(out: &mut String, header: &str, rows: &[(&str, String)]) {
    let _ = writeln!(out, "{header}");
    for (k, v) in rows {
        let _ = writeln!(out, "- {k}: {v}");
    }
    out.push('\n');
}

fn opt(v: Option<f64>, precision: usize) -> String {
    v.map(|v| format!("{v:.precision$}"))
        .unwrap_or_else(|| "-".to_string())
}

fn general_sections(out: &mut String, result: &AdjustmentResult) {
    let status = match result.status {
        AdjustmentStatus::Converged => "converged",
        AdjustmentStatus::MaxIterationsReached => "maximum iterations reached",
    };
    key_values(
        out,
        "CALCULATION INFORMATION",
        &[
            ("adjustment status", status.to_string()),
            ("number of iterations", result.iterations.to_string()),
        ],
    );

    let w = &result.weighting;
    let mut method = vec![("method of adjustment observations", w.method.to_string())];
    if let (Some(f), Some(k)) = (w.robust_function, &w.tuning_constants) {
        let k: Vec<String> = k.iter().map(|c| format!("{c:.4}")).collect();
        method.push(("robust function", format!("{f} (k = {})", k.join(", "))));
    }
    if let Some(scale) = w.robust_scale {
        method.push(("residual standardization", scale.to_string()));
    }
    method.push((
        "free adjustment",
        w.free_constraint_method
            .map(|m| m.to_string())
            .unwrap_or_else(|| "no".to_string()),
    ));
    if let Some(r) = w.reference_weighting {
        method.push(("reference point weighting", r.to_string()));
    }
    if result.free_adjustment {
        let params: Vec<String> = result
            .datum_parameters
            .iter()
            .map(|p| {
                serde_json::to_value(p)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default()
            })
            .collect();
        method.push(("datum parameters", params.join(", ")));
    }
    key_values(out, "ADJUSTMENT METHOD INFORMATION", &method);

    let c = &result.counts;
    key_values(
        out,
        "NETWORK SPECIFICATION",
        &[
            ("number of observations", c.observations.to_string()),
            ("number of coordinate unknowns", c.coordinate_unknowns.to_string()),
            ("number of orientation unknowns", c.orientation_unknowns.to_string()),
            ("number of movable tie points", c.movable_tie_points.to_string()),
            ("number of fixed tie points", c.fixed_tie_points.to_string()),
            ("number of datum constraints", c.datum_constraints.to_string()),
            ("number of all unknowns", c.unknowns.to_string()),
            ("number of degrees of freedom", result.degrees_of_freedom.to_string()),
        ],
    );

    key_values(
        out,
        "RESIDUAL SIGMA INFORMATION",
        &[
            ("residual sigma", format!("{:.5}", result.sigma0)),
            ("variance factor", format!("{:.5}", result.variance_factor)),
            ("coord correction sigma", opt(result.coordinate_correction_sigma, 5)),
        ],
    );
}

fn controls_section(out: &mut String, result: &AdjustmentResult, unit: AngleUnit) {
    let _ = writeln!(out, "CONTROLS INFORMATION");
    let _ = writeln!(
        out,
        "{:<12} {:<9} {:<4} {:>15} {:>15} {:>10} {:>10} {:>8}",
        "id", "role", "axis", "approximate", "adjusted", "correction", "sigma", "norm"
    );
    for p in &result.points {
        let role = serde_json::to_value(p.role)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        for c in &p.coordinates {
            let _ = writeln!(
                out,
                "{:<12} {:<9} {:<4} {:>15.4} {:>15.4} {:>10.4} {:>10} {:>8}",
                p.id,
                role,
                c.axis.label(),
                c.approximate,
                c.adjusted,
                c.correction,
                opt(c.sigma, 4),
                opt(c.normalized_correction, 2),
            );
        }
    }
    let ellipses: Vec<_> = result
        .points
        .iter()
        .filter_map(|p| p.error_ellipse.map(|e| (p, e)))
        .collect();
    if !ellipses.is_empty() {
        let _ = writeln!(out, "\nERROR ELLIPSES");
        let _ = writeln!(out, "{:<12} {:>10} {:>10} {:>12}", "id", "a", "b", format!("phi [{unit}]"));
        for (p, e) in ellipses {
            let _ = writeln!(
                out,
                "{:<12} {:>10.4} {:>10.4} {:>12.4}",
                p.id,
                e.a,
                e.b,
                unit.from_rad(e.phi)
            );
        }
    }
    if !result.orientations.is_empty() {
        let _ = writeln!(out, "\nORIENTATIONS");
        let _ = writeln!(
            out,
            "{:<8} {:<12} {:>14} {:>14} {:>12}",
            "station", "point", "approximate", "adjusted", "sigma"
        );
        for o in &result.orientations {
            let _ = writeln!(
                out,
                "{:<8} {:<12} {:>14.5} {:>14.5} {:>12.5}",
                o.station,
                o.point,
                unit.from_rad(o.approximate),
                unit.from_rad(o.adjusted),
                unit.from_rad(o.sigma)
            );
        }
    }
    out.push('\n');
}

fn observations_section(out: &mut String, result: &AdjustmentResult, unit: AngleUnit) {
    let _ = writeln!(out, "OBSERVATIONS INFORMATION");
    let _ = writeln!(
        out,
        "{:>5} {:<4} {:<12} {:<12} {:>15} {:>15} {:>10} {:>10} {:>8} {:>6} {:>12}",
        "no", "kind", "from", "to", "observed", "adjusted", "residual", "sigma", "norm", "r", "weight"
    );
    for o in &result.observations {
        let k = if o.kind.is_angular() {
            unit.from_rad(1.0)
        } else {
            1.0
        };
        let _ = writeln!(
            out,
            "{:>5} {:<4} {:<12} {:<12} {:>15.5} {:>15.5} {:>10.5} {:>10.5} {:>8.2} {:>6.3} {:>12.4e}",
            o.index,
            o.kind.code(),
            o.from,
            o.target,
            o.observed * k,
            o.adjusted * k,
            o.residual * k,
            o.adjusted_sigma * k,
            o.normalized_residual,
            o.redundancy,
            o.weight
        );
    }
}

/// Renders the full report. Angles are printed in `unit`.
pub fn adjustment_report(result: &AdjustmentResult, unit: AngleUnit) -> String {
    let mut out = String::from("----- ADJUSTMENT REPORT -----\n\n");
    general_sections(&mut out, result);
    controls_section(&mut out, result, unit);
    observations_section(&mut out, result, unit);
    out
}

pub fn write_report_txt(path: &str, result: &AdjustmentResult, unit: AngleUnit) -> std::io::Result<()> {
    crate::io::write_string(path, &adjustment_report(result, unit))
}
