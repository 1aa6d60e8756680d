use clap::{Parser, Subcommand};
use survey_net::{
    geometry::Axis,
    io::{read_project_json, write_points_geojson, write_project_json, write_result_json, ProjectFile},
    reporting::write_report_txt,
    surveying::{
        Adjustment, AdjustmentConfig, AdjustmentResult, AngleUnit, FreeConstraintMethod,
        RobustFunction, VarianceScale, WeightingMethod,
    },
};

/// Least squares adjustment of survey control networks.
#[derive(Parser)]
#[command(name = "survey_net_cli", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Settings that override the `config` section of a project file.
#[derive(clap::Args)]
struct ConfigOverrides {
    /// Adjust as a free network without fixed control.
    #[arg(long)]
    free: bool,
    /// inner_constraint or pseudo_inverse
    #[arg(long)]
    constraint: Option<FreeConstraintMethod>,
    /// ordinary, weighted or robust
    #[arg(long)]
    weighting: Option<WeightingMethod>,
    /// Weighting of the datum reference coordinates in a free adjustment.
    #[arg(long)]
    reference_weighting: Option<WeightingMethod>,
    #[arg(long)]
    robust_function: Option<RobustFunction>,
    /// Scale entry of the tuning tuple.
    #[arg(long)]
    tuning_constant: Option<f64>,
    /// Full tuning tuple, comma separated.
    #[arg(long, value_delimiter = ',')]
    tuning_constants: Option<Vec<f64>>,
    /// mad, a_priori or a_posteriori
    #[arg(long)]
    scale: Option<VarianceScale>,
    #[arg(long)]
    max_iterations: Option<usize>,
    /// Convergence threshold on the largest coordinate correction (m).
    #[arg(long)]
    tolerance: Option<f64>,
}

impl ConfigOverrides {
    fn apply(&self, mut config: AdjustmentConfig) -> AdjustmentConfig {
        config.free_adjustment |= self.free;
        if let Some(m) = self.constraint {
            config.free_constraint_method = m;
        }
        if let Some(m) = self.weighting {
            config.weighting_method = m;
        }
        if self.reference_weighting.is_some() {
            config.reference_weighting = self.reference_weighting;
        }
        if let Some(f) = self.robust_function {
            config.robust_function = f;
        }
        if self.tuning_constants.is_some() {
            config.tuning_constants = self.tuning_constants.clone();
        }
        if self.tuning_constant.is_some() {
            config.tuning_constant = self.tuning_constant;
        }
        if let Some(s) = self.scale {
            config.robust_scale = s;
        }
        if let Some(n) = self.max_iterations {
            config.max_iterations = n;
        }
        if let Some(t) = self.tolerance {
            config.convergence_tolerance = t;
        }
        config
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Adjust the network of a JSON project file.
    Adjust {
        project: String,
        #[command(flatten)]
        overrides: ConfigOverrides,
        /// Unit of angles in the outputs; defaults to the project unit.
        #[arg(long)]
        angle_unit: Option<AngleUnit>,
        /// Write the text report to this path.
        #[arg(long)]
        report: Option<String>,
        /// Write the adjusted points as GeoJSON to this path.
        #[arg(long)]
        geojson: Option<String>,
        /// Write the full result as JSON to this path.
        #[arg(long)]
        json: Option<String>,
        /// Write a copy of the project with adjusted coordinates to this path.
        #[arg(long)]
        update: Option<String>,
    },
    /// Check a project and print the network dimensions without solving.
    Check {
        project: String,
        #[command(flatten)]
        overrides: ConfigOverrides,
    },
    /// List the robust weight functions and their default tuning constants.
    RobustFunctions,
}

fn load(path: &str) -> Option<ProjectFile> {
    match read_project_json(path) {
        Ok(p) => Some(p),
        Err(e) => {
            eprintln!("Error reading {}: {}", path, e);
            None
        }
    }
}

fn print_summary(result: &AdjustmentResult) {
    println!(
        "Status: {} after {} iterations",
        if result.converged {
            "converged"
        } else {
            "maximum iterations reached"
        },
        result.iterations
    );
    println!("Degrees of freedom: {}", result.degrees_of_freedom);
    println!("Sigma0: {:.5}", result.sigma0);
    for p in &result.points {
        let coords: Vec<String> = Axis::ALL
            .iter()
            .filter_map(|a| p.adjusted(*a).map(|v| format!("{v:.4}")))
            .collect();
        println!("{},{}", p.id, coords.join(","));
    }
}

fn report_write(what: &str, path: &str, res: std::io::Result<()>) -> bool {
    match res {
        Ok(()) => {
            println!("Wrote {} to {}", what, path);
            true
        }
        Err(e) => {
            eprintln!("Error writing {}: {}", path, e);
            false
        }
    }
}

fn run(cli: Cli) -> bool {
    match cli.command {
        Commands::Adjust {
            project,
            overrides,
            angle_unit,
            report,
            geojson,
            json,
            update,
        } => {
            let Some(proj) = load(&project) else {
                return false;
            };
            let config = overrides.apply(proj.config.clone());
            let network = match proj.to_network() {
                Ok(n) => n,
                Err(e) => {
                    eprintln!("Error in {}: {}", project, e);
                    return false;
                }
            };
            let result = match Adjustment::new(&network, &config).and_then(|mut a| a.run()) {
                Ok(r) => r,
                Err(e) => {
                    eprintln!("Adjustment failed: {}", e);
                    return false;
                }
            };
            print_summary(&result);
            let unit = angle_unit.unwrap_or(proj.angle_unit);
            let mut ok = true;
            if let Some(path) = report {
                ok &= report_write("report", &path, write_report_txt(&path, &result, unit));
            }
            if let Some(path) = geojson {
                ok &= report_write("points", &path, write_points_geojson(&path, &result, unit));
            }
            if let Some(path) = json {
                ok &= report_write("result", &path, write_result_json(&path, &result));
            }
            if let Some(path) = update {
                let updated = proj.with_adjusted_coordinates(&result);
                ok &= report_write("project", &path, write_project_json(&path, &updated));
            }
            ok
        }
        Commands::Check { project, overrides } => {
            let Some(proj) = load(&project) else {
                return false;
            };
            let config = overrides.apply(proj.config.clone());
            let checked = proj.to_network().and_then(|n| {
                let adjustment = Adjustment::new(&n, &config)?;
                Ok((
                    n.observations().len(),
                    adjustment.datum_defect(),
                    adjustment.degrees_of_freedom(),
                ))
            });
            match checked {
                Ok((observations, defect, dof)) => {
                    println!("Observations: {}", observations);
                    println!("Datum defect: {}", defect);
                    println!("Degrees of freedom: {}", dof);
                    true
                }
                Err(e) => {
                    eprintln!("Error in {}: {}", project, e);
                    false
                }
            }
        }
        Commands::RobustFunctions => {
            for f in RobustFunction::ALL {
                let k: Vec<String> =
                    f.default_tuning().iter().map(|c| format!("{c:.3}")).collect();
                let note = if f.is_adaptive() { " (adaptive)" } else { "" };
                println!("{} {}{}", f, k.join(" "), note);
            }
            true
        }
    }
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    if !run(cli) {
        std::process::exit(1);
    }
}
