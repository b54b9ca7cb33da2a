use anyhow::Result;
use clap::Parser;
use log::error;
use std::path::PathBuf;
use std::process::ExitCode;

use removebg_server::requirements::{self, PackageManager, MIN_PYTHON};

#[derive(Parser)]
#[command(name = "dependency_installer", about = "Checks and installs the Python packages listed in a requirements file")]
struct Args {
    /// Defaults to requirements.txt next to this executable
    #[arg(long)]
    requirements: Option<PathBuf>,

    #[arg(long, default_value = "python3")]
    python: PathBuf,

    /// Report missing packages without installing them
    #[arg(long)]
    check_only: bool,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    match run(Args::parse()) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{e:#}");
            println!("ERROR: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<bool> {
    println!("RemoveThatBG Dependency Installer");
    println!("{}", "=".repeat(50));

    let manager = PackageManager::new(&args.python);
    let version = manager.python_version()?;
    println!("Python version: {}.{}.{}", version.0, version.1, version.2);
    if !requirements::version_supported(version) {
        println!(
            "ERROR: Python {}.{}+ required, found {}.{}",
            MIN_PYTHON.0, MIN_PYTHON.1, version.0, version.1
        );
        return Ok(false);
    }

    match manager.pip_version() {
        Ok(pip) => println!("pip available: {pip}"),
        Err(e) => {
            println!("ERROR: {e}");
            println!("Install pip: {} -m ensurepip --upgrade", args.python.display());
            return Ok(false);
        }
    }

    let requirements_file = match args.requirements {
        Some(path) => path,
        None => default_requirements_file()?,
    };
    if !requirements_file.exists() {
        println!("ERROR: {} not found", requirements_file.display());
        return Ok(false);
    }
    println!("Requirements file: {}", requirements_file.display());
    println!();

    println!("Checking dependencies...");
    let wanted = requirements::read_requirements(&requirements_file)?;
    let installed = manager.installed_packages()?;
    let report = requirements::check_dependencies(&wanted, &installed);
    println!("  Already installed: {}", report.installed_count);
    println!("  Missing: {}", report.missing.len());

    if report.is_satisfied() {
        println!("\nAll dependencies satisfied ({} packages)", report.installed_count);
        return Ok(true);
    }
    if args.check_only {
        for requirement in &report.missing {
            println!("  - {requirement}");
        }
        return Ok(false);
    }

    let total = report.missing.len();
    println!("\nInstalling {total} package(s)...\n");
    let failed = requirements::install_dependencies(&manager, &report, |i, n, requirement| {
        println!("[{i}/{n}] Installing {requirement}...");
    });
    println!();

    if failed.is_empty() {
        println!("Successfully installed {total} package(s)");
        return Ok(true);
    }
    println!("Failed to install {} package(s):", failed.len());
    for (requirement, output) in &failed {
        println!("\n{requirement}:\n{output}");
    }
    Ok(false)
}

fn default_requirements_file() -> Result<PathBuf> {
    let exe = std::env::current_exe()?;
    let dir = exe.parent().map(PathBuf::from).unwrap_or_default();
    Ok(dir.join("requirements.txt"))
}
