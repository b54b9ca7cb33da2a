// Requirement list parsing and pip-backed dependency installation
use anyhow::{bail, Context};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

pub const MIN_PYTHON: (u32, u32) = (3, 8);

/// Outcome of comparing a requirement list with what is installed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyReport {
    pub missing: Vec<String>,
    pub installed_count: usize,
}

impl DependencyReport {
    pub fn is_satisfied(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Non-empty, non-comment lines, trimmed.
pub fn parse_requirements(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_owned)
        .collect()
}

pub fn read_requirements(path: &Path) -> anyhow::Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Error reading {}", path.display()))?;
    Ok(parse_requirements(&text))
}

/// The distribution name of a requirement line, lowercased.
pub fn package_name(requirement: &str) -> String {
    let end = requirement
        .find(|c: char| matches!(c, '=' | '<' | '>' | '!' | '~' | '[' | ';' | ' ' | '@'))
        .unwrap_or(requirement.len());
    requirement[..end].trim().to_lowercase()
}

fn normalize(name: &str) -> String {
    name.to_lowercase().replace('_', "-")
}

/// Splits `requirements` into those whose package is absent from `installed` and a count of the rest.
pub fn check_dependencies(
    requirements: &[String],
    installed: &HashMap<String, String>,
) -> DependencyReport {
    let installed: Vec<String> = installed.keys().map(|name| normalize(name)).collect();
    let missing: Vec<String> = requirements
        .iter()
        .filter(|req| !installed.contains(&normalize(&package_name(req))))
        .cloned()
        .collect();
    DependencyReport {
        installed_count: requirements.len() - missing.len(),
        missing,
    }
}

#[derive(Deserialize)]
struct PipPackage {
    name: String,
    version: String,
}

/// A Python interpreter and the pip module it ships with.
#[derive(Debug, Clone)]
pub struct PackageManager {
    python: PathBuf,
}

impl PackageManager {
    pub fn new(python: impl Into<PathBuf>) -> Self {
        Self {
            python: python.into(),
        }
    }

    /// Interpreter version as `(major, minor, micro)`.
    pub fn python_version(&self) -> anyhow::Result<(u32, u32, u32)> {
        let output = self.run(&["-c", "import sys; print('%d.%d.%d' % sys.version_info[:3])"])?;
        if !output.status.success() {
            bail!("{} exited with {}", self.python.display(), output.status);
        }
        parse_version(String::from_utf8_lossy(&output.stdout).trim())
    }

    pub fn pip_version(&self) -> anyhow::Result<String> {
        let output = self.run(&["-m", "pip", "--version"])?;
        if !output.status.success() {
            bail!("pip is not available: {}", String::from_utf8_lossy(&output.stderr).trim());
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Installed distributions, keyed by lowercased name.
    pub fn installed_packages(&self) -> anyhow::Result<HashMap<String, String>> {
        let output = self.run(&["-m", "pip", "list", "--format=json"])?;
        if !output.status.success() {
            bail!("pip list failed: {}", String::from_utf8_lossy(&output.stderr).trim());
        }
        let packages: Vec<PipPackage> =
            serde_json::from_slice(&output.stdout).context("unexpected pip list output")?;
        Ok(packages
            .into_iter()
            .map(|pkg| (pkg.name.to_lowercase(), pkg.version))
            .collect())
    }

    /// Runs `pip install --upgrade`. The error carries pip's combined output.
    pub fn install(&self, requirement: &str) -> anyhow::Result<()> {
        let output = self.run(&["-m", "pip", "install", "--upgrade", requirement])?;
        if !output.status.success() {
            bail!(
                "{}{}",
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            );
        }
        Ok(())
    }

    fn run(&self, args: &[&str]) -> anyhow::Result<Output> {
        Command::new(&self.python)
            .args(args)
            .output()
            .with_context(|| format!("failed to run {}", self.python.display()))
    }
}

pub fn parse_version(text: &str) -> anyhow::Result<(u32, u32, u32)> {
    let mut parts = text.split('.').map(|part| {
        part.trim()
            .parse::<u32>()
            .with_context(|| format!("invalid version '{text}'"))
    });
    let major = parts.next().context("empty version")??;
    let minor = parts.next().transpose()?.unwrap_or(0);
    let micro = parts.next().transpose()?.unwrap_or(0);
    Ok((major, minor, micro))
}

pub fn version_supported((major, minor, _): (u32, u32, u32)) -> bool {
    (major, minor) >= MIN_PYTHON
}

/// Installs every missing requirement, calling `progress(index, total, requirement)` first.
/// Returns the requirements that failed along with pip's output.
pub fn install_dependencies<F>(
    manager: &PackageManager,
    report: &DependencyReport,
    mut progress: F,
) -> Vec<(String, String)>
where
    F: FnMut(usize, usize, &str),
{
    let total = report.missing.len();
    report
        .missing
        .iter()
        .enumerate()
        .filter_map(|(i, requirement)| {
            progress(i + 1, total, requirement);
            manager
                .install(requirement)
                .err()
                .map(|e| (requirement.clone(), format!("{e:#}")))
        })
        .collect()
}
