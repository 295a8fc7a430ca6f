mod model_file;

use clap::{Parser, Subcommand, ValueEnum};
use layoutqp_solver::{ConstraintRole, DEFAULT_MAX_ITERATIONS, ResultCode, Size, SolverOptions};
use std::path::{Path, PathBuf};

use model_file::{LoadedModel, ModelFile};

#[derive(Parser)]
#[command(name = "layoutqp")]
#[command(about = "Solve linear layout specifications with soft constraints", long_about = None)]
struct Cli {
    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Pretty,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Solve a model and print every variable
    Solve {
        /// The JSON model file
        file: PathBuf,
        /// Output format
        #[arg(short, long, value_enum, default_value = "pretty")]
        format: Format,
        /// Bound on active-set iterations
        #[arg(long, default_value_t = DEFAULT_MAX_ITERATIONS)]
        max_iterations: usize,
    },
    /// Smallest size the hard constraints allow
    MinSize {
        /// The JSON model file
        file: PathBuf,
        /// Name of the width variable
        width: String,
        /// Name of the height variable
        height: String,
        #[arg(short, long, value_enum, default_value = "pretty")]
        format: Format,
    },
    /// Largest size the hard constraints allow
    MaxSize {
        /// The JSON model file
        file: PathBuf,
        /// Name of the width variable
        width: String,
        /// Name of the height variable
        height: String,
        #[arg(short, long, value_enum, default_value = "pretty")]
        format: Format,
    },
    /// Check a model file for errors
    Check {
        /// The file to check
        file: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match cli.command {
        Commands::Solve {
            file,
            format,
            max_iterations,
        } => {
            let options = SolverOptions::new().with_max_iterations(max_iterations);
            let mut model = load(&file, options);
            let result = model.spec.solve();

            match format {
                Format::Json => print_json(&model.spec.snapshot()),
                Format::Pretty => {
                    println!("Status: {}", result);
                    let millis = model.spec.solving_time().as_secs_f64() * 1000.0;
                    println!("Solving time: {:.3} ms", millis);
                    if result.is_success() {
                        println!();
                        for (name, id) in &model.variables {
                            let value = model.spec.value(*id).unwrap_or(f64::NAN);
                            println!("  {:20} {:12.4}", name, value);
                        }
                    }
                }
            }

            if !result.is_success() {
                std::process::exit(1);
            }
        }
        Commands::MinSize {
            file,
            width,
            height,
            format,
        } => size_query(&file, &width, &height, format, false),
        Commands::MaxSize {
            file,
            width,
            height,
            format,
        } => size_query(&file, &width, &height, format, true),
        Commands::Check { file } => {
            let model = load(&file, SolverOptions::default());

            let constraints: Vec<_> = model
                .spec
                .constraints()
                .filter(|(_, c)| c.role() == ConstraintRole::User)
                .map(|(_, c)| c)
                .collect();
            let soft = constraints.iter().filter(|c| c.is_soft()).count();
            let elastic = constraints.iter().filter(|c| c.elastic().is_some()).count();

            println!("✓ {} is valid", file.display());
            println!("  {} variables", model.variables.len());
            println!("  {} constraints ({} soft, {} elastic)", constraints.len(), soft, elastic);
            println!("  {} rows after expansion", model.spec.constraint_count());
        }
    }
}

fn load(file: &Path, options: SolverOptions) -> LoadedModel {
    let model = match ModelFile::from_path(file) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("Error loading {}: {}", file.display(), e);
            std::process::exit(1);
        }
    };
    match model.build(options) {
        Ok(m) => {
            log::debug!(
                "loaded {}: {} variables, {} constraints",
                file.display(),
                m.variables.len(),
                m.spec.constraint_count()
            );
            m
        }
        Err(e) => {
            eprintln!("✗ {} has errors:", file.display());
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    }
}

fn size_query(file: &Path, width: &str, height: &str, format: Format, max: bool) {
    let mut model = load(file, SolverOptions::default());
    let (Some(w), Some(h)) = (model.lookup(width), model.lookup(height)) else {
        eprintln!("Unknown variable: expected '{}' and '{}' to be declared", width, height);
        std::process::exit(1);
    };

    let size = if max {
        model.spec.max_size(w, h)
    } else {
        model.spec.min_size(w, h)
    };
    let size = match size {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    match format {
        Format::Json => print_json(&size),
        Format::Pretty => {
            if size == Size::UNBOUNDED {
                println!("Size: unbounded");
            } else {
                println!("Size: {:.4} x {:.4}", size.width, size.height);
            }
            if model.spec.result() != ResultCode::Optimal {
                println!("Status: {}", model.spec.result());
            }
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error serializing output: {}", e);
            std::process::exit(1);
        }
    }
}
