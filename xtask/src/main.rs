use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{exit, Command, ExitStatus};

use batch_pipeline_core::contract::PipelineConfig;
use batch_pipeline_core::prompts::PromptCatalog;
use batch_pipeline_core::validation::validate_pipeline;
use clap::{Parser, Subcommand, ValueEnum};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

const RUNTIME_PACKAGE: &str = "batch_pipeline_lambda";
const RUNTIME_BIN: &str = "pipeline_runtime";

// ── CLI definition ─────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "xtask",
    about = "Task runner for the Bedrock batch pipeline workspace",
    long_about = "A unified CLI for CI checks, offline pipeline config validation,\n\
                  and packaging the pipeline Lambda runtime."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run CI checks (fmt, clippy, tests)
    Ci {
        /// Job to run
        #[arg(value_enum, default_value_t = CiJob::Check)]
        job: CiJob,
    },
    /// Validate a pipeline config file against the prompt catalog
    ValidateConfig {
        /// Pipeline config JSON file
        path: PathBuf,
        /// Prompt catalog JSON file; defaults to the bundled catalog
        #[arg(long, env = "PROMPT_CATALOG_PATH")]
        catalog: Option<PathBuf>,
    },
    /// Build the runtime binary and package it as a Lambda zip
    Package {
        /// Compilation target triple for the Lambda binary
        #[arg(long, default_value = "x86_64-unknown-linux-gnu")]
        target: String,
        /// Build profile used for the binary
        #[arg(value_enum, long, default_value_t = BuildProfile::Release)]
        profile: BuildProfile,
        /// Directory the zip is written to
        #[arg(long, default_value = "dist")]
        out_dir: PathBuf,
    },
}

#[derive(Clone, ValueEnum)]
enum CiJob {
    /// Formatting and clippy
    Lint,
    /// Unit and integration tests
    Test,
    /// Lint + test
    Check,
}

#[derive(Clone, Copy, ValueEnum)]
enum BuildProfile {
    Debug,
    Release,
}

impl BuildProfile {
    fn dir_name(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Release => "release",
        }
    }

    fn as_cargo_flag(self) -> Option<&'static str> {
        match self {
            Self::Debug => None,
            Self::Release => Some("--release"),
        }
    }
}

// ── helpers ────────────────────────────────────────────────────────

fn step(label: &str) {
    eprintln!("\n=== {label} ===");
}

fn cargo(args: &[&str]) -> ExitStatus {
    eprintln!("+ cargo {}", args.join(" "));
    Command::new("cargo")
        .args(args)
        .status()
        .expect("failed to execute cargo")
}

fn run_cargo(args: &[&str]) {
    let status = cargo(args);
    if !status.success() {
        exit(status.code().unwrap_or(1));
    }
}

fn package_runtime(target: &str, profile: BuildProfile, out_dir: &Path) {
    ensure_rust_target_installed(target);

    step("Build pipeline runtime binary");
    let mut cargo_args = vec![
        "build",
        "-p",
        RUNTIME_PACKAGE,
        "--target",
        target,
        "--bin",
        RUNTIME_BIN,
    ];
    if let Some(flag) = profile.as_cargo_flag() {
        cargo_args.push(flag);
    }
    run_cargo(&cargo_args);

    step("Package Lambda zip");
    let target_dir = Path::new("target").join(target).join(profile.dir_name());
    fs::create_dir_all(out_dir).expect("failed to create lambda dist directory");
    let zip_path = out_dir.join("runtime.zip");
    package_lambda_zip(&target_dir.join(binary_name(RUNTIME_BIN, target)), &zip_path);

    eprintln!(
        "\nPackaged artifact:\n- {}\nSet PIPELINE_HANDLER on each function to pick its handler.",
        zip_path.display()
    );
}

/// Fails early when the cross target is missing; skips the check when rustup
/// itself is unavailable.
fn ensure_rust_target_installed(target: &str) {
    let installed = match Command::new("rustup")
        .args(["target", "list", "--installed"])
        .output()
    {
        Ok(output) if output.status.success() => output.stdout,
        Ok(output) => panic!(
            "`rustup target list --installed` failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        ),
        Err(error) => {
            eprintln!("warning: skipping target preflight, rustup unavailable ({error})");
            return;
        }
    };

    if !String::from_utf8_lossy(&installed)
        .lines()
        .any(|line| line.trim() == target)
    {
        panic!("rust target `{target}` is missing; run `rustup target add {target}` first");
    }
}

fn binary_name(bin_name: &str, target: &str) -> String {
    if target.contains("windows") {
        format!("{bin_name}.exe")
    } else {
        bin_name.to_string()
    }
}

/// Lambda's provided runtime expects an executable named `bootstrap` at the
/// zip root.
fn package_lambda_zip(binary_path: &Path, zip_path: &Path) {
    let binary = fs::read(binary_path).unwrap_or_else(|error| {
        panic!("cannot read runtime binary '{}': {error}", binary_path.display())
    });
    let file = fs::File::create(zip_path).expect("failed to create lambda zip");
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o755);
    zip.start_file("bootstrap", options)
        .expect("failed to add bootstrap to lambda zip");
    zip.write_all(&binary).expect("failed to write bootstrap");
    zip.finish().expect("failed to finish lambda zip");
}

fn validate_config_file(path: &Path, catalog_path: Option<&Path>) {
    let catalog = match catalog_path {
        Some(catalog_path) => {
            let text = fs::read_to_string(catalog_path).expect("failed to read prompt catalog");
            PromptCatalog::from_json(&text).expect("failed to parse prompt catalog")
        }
        None => PromptCatalog::bundled().expect("bundled prompt catalog should parse"),
    };

    let text = fs::read_to_string(path).expect("failed to read pipeline config");
    let config: PipelineConfig = serde_json::from_str(&text).unwrap_or_else(|error| {
        eprintln!("invalid pipeline config JSON: {error}");
        exit(1);
    });

    let result = validate_pipeline(&config, &catalog);
    for warning in &result.warnings {
        eprintln!("warning: {warning}");
    }
    for error in &result.errors {
        eprintln!("error: {error}");
    }
    if !result.valid {
        exit(1);
    }
    eprintln!(
        "\n{} is valid ({} stage(s), fingerprint {}).",
        path.display(),
        config.stages.len(),
        result.config_fingerprint.as_deref().unwrap_or("n/a")
    );
}

// ── CI jobs ────────────────────────────────────────────────────────

fn ci_lint() {
    step("Check formatting");
    run_cargo(&["fmt", "--all", "--", "--check"]);

    step("Clippy");
    run_cargo(&[
        "clippy",
        "--all-targets",
        "--all-features",
        "--",
        "-D",
        "warnings",
    ]);
}

fn ci_test() {
    step("Test batch_pipeline_core");
    run_cargo(&["test", "-p", "batch_pipeline_core"]);

    step("Test batch_pipeline_lambda");
    run_cargo(&["test", "-p", RUNTIME_PACKAGE]);
}

// ── main ───────────────────────────────────────────────────────────

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Ci { job } => {
            match job {
                CiJob::Lint => ci_lint(),
                CiJob::Test => ci_test(),
                CiJob::Check => {
                    ci_lint();
                    ci_test();
                }
            }
            eprintln!("\nCI job passed.");
        }
        Commands::ValidateConfig { path, catalog } => {
            validate_config_file(&path, catalog.as_deref());
        }
        Commands::Package {
            target,
            profile,
            out_dir,
        } => {
            package_runtime(&target, profile, &out_dir);
        }
    }
}
