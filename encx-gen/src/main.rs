//! encx-gen CLI — scan annotated records and emit their crypto pipelines.
//!
//! Usage:
//!   encx-gen generate [-config PATH] [-output DIR] [-v] [-json] [-dry-run] [packages...]
//!   encx-gen validate [-config PATH] [-v] [-json] [packages...]
//!   encx-gen clean [-dry-run]
//!   encx-gen init [-force]
//!   encx-gen version

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

use encx_gen::cache::{sha256_hex, GenerationCache};
use encx_gen::report::GenerationReport;
use encx_gen::{generate_package, scan_package, Config, GenError, GENERATOR_VERSION};

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage();
        return ExitCode::from(1);
    }

    let result = match args[1].as_str() {
        "generate" => cmd_generate(&args[2..]),
        "validate" => cmd_validate(&args[2..]),
        "clean" => cmd_clean(&args[2..]),
        "init" => cmd_init(&args[2..]),
        "version" => {
            println!("{}", GENERATOR_VERSION);
            Ok(())
        }
        "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        cmd => {
            eprintln!("error: unknown command '{}'", cmd);
            print_usage();
            Err(GenError::Config("unknown command".into()))
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn print_usage() {
    eprintln!(
        r#"encx-gen — code generator for encx-annotated records

USAGE:
    encx-gen <COMMAND> [OPTIONS] [packages...]

COMMANDS:
    generate    Scan packages and write the generated pipelines
    validate    Scan packages and report annotation problems
    clean       Remove generated files tracked by the cache
    init        Write a default encx.yaml config file
    version     Print the generator version tag

OPTIONS:
    -config PATH    Config file (default: encx.yaml)
    -output DIR     Override the output directory
    -dry-run        Show what would be done without writing
    -json           Machine-readable report on stdout
    -force          Overwrite an existing config file (init)
    -v              Verbose logging
    -h, --help      Print help
"#
    );
}

// ---------------------------------------------------------------------------
// Flag parsing (shared by the scan-driven commands)
// ---------------------------------------------------------------------------

struct Flags {
    config_path: PathBuf,
    output: Option<PathBuf>,
    verbose: bool,
    dry_run: bool,
    force: bool,
    json: bool,
    packages: Vec<String>,
}

fn parse_flags(args: &[String]) -> Result<Flags, GenError> {
    let mut flags = Flags {
        config_path: PathBuf::from(encx_gen::DEFAULT_CONFIG_FILE),
        output: None,
        verbose: false,
        dry_run: false,
        force: false,
        json: false,
        packages: Vec::new(),
    };

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-config" | "--config" => {
                i += 1;
                let value = args
                    .get(i)
                    .ok_or_else(|| GenError::Config("missing value for -config".into()))?;
                flags.config_path = PathBuf::from(value);
            }
            "-output" | "--output" | "-o" => {
                i += 1;
                let value = args
                    .get(i)
                    .ok_or_else(|| GenError::Config("missing value for -output".into()))?;
                flags.output = Some(PathBuf::from(value));
            }
            "-v" | "--verbose" => flags.verbose = true,
            "-dry-run" | "--dry-run" => flags.dry_run = true,
            "-force" | "--force" => flags.force = true,
            "-json" | "--json" => flags.json = true,
            flag if flag.starts_with('-') => {
                return Err(GenError::Config(format!("unknown option: {}", flag)));
            }
            package => flags.packages.push(package.to_string()),
        }
        i += 1;
    }
    Ok(flags)
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env("ENCX_LOG_LEVEL")
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    let json = std::env::var("ENCX_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    // A second init in the same process is fine; keep going.
    let _ = result;
}

/// Packages to operate on: CLI args win, then the config, then `.`.
fn resolve_packages(flags: &Flags, config: &Config) -> Vec<String> {
    if !flags.packages.is_empty() {
        return flags.packages.clone();
    }
    let configured: Vec<String> = config
        .packages
        .iter()
        .filter(|(_, package)| !package.skip)
        .map(|(path, _)| path.clone())
        .collect();
    if configured.is_empty() {
        vec![".".to_string()]
    } else {
        configured
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn cmd_generate(args: &[String]) -> Result<(), GenError> {
    let flags = parse_flags(args)?;
    init_logging(flags.verbose);
    let config = Config::load_or_default(&flags.config_path)?;
    let packages = resolve_packages(&flags, &config);

    let mut cache = GenerationCache::load(".");
    let mut report = GenerationReport::new();

    for package in &packages {
        let package_dir = Path::new(package);
        let records = scan_package(package_dir)?;
        tracing::debug!(package = %package, records = records.len(), "scanned");
        report.add_package(package, &records);

        let output_dir = flags.output.clone().or_else(|| {
            config
                .packages
                .get(package)
                .and_then(|p| p.output_dir.clone().map(PathBuf::from))
        });

        let files = generate_package(package_dir, &records, &config, output_dir.as_deref())?;
        for file in files {
            let source_bytes =
                std::fs::read(&file.source).map_err(|e| GenError::io(&file.source, e))?;
            let source_hash = sha256_hex(&source_bytes);

            if !cache.needs_regenerate(&file.source, &source_hash) {
                tracing::debug!(source = %file.source.display(), "unchanged, skipping");
                report.record_skipped(file.path.display().to_string());
                continue;
            }

            if flags.dry_run {
                println!("would write {}", file.path.display());
                continue;
            }

            if let Some(parent) = file.path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| GenError::io(parent, e))?;
            }
            std::fs::write(&file.path, &file.content)
                .map_err(|e| GenError::io(&file.path, e))?;
            cache.record(
                &file.source,
                source_hash,
                &file.path,
                sha256_hex(file.content.as_bytes()),
            );
            tracing::info!(path = %file.path.display(), "generated");
            report.record_written(file.path.display().to_string());
        }
    }

    if !flags.dry_run {
        cache.prune_missing();
        cache.save()?;
    }

    if flags.json {
        println!("{}", report.to_json());
    } else if flags.verbose {
        print!("{}", report);
    } else {
        println!(
            "generated {} file(s), {} unchanged",
            report.written.len(),
            report.skipped.len()
        );
    }
    Ok(())
}

fn cmd_validate(args: &[String]) -> Result<(), GenError> {
    let flags = parse_flags(args)?;
    init_logging(flags.verbose);
    let config = Config::load_or_default(&flags.config_path)?;
    let packages = resolve_packages(&flags, &config);

    let mut report = GenerationReport::new();
    for package in &packages {
        let records = scan_package(Path::new(package))?;
        report.add_package(package, &records);
    }

    let problems = report.problems();
    if flags.json {
        // Machine-readable report on stdout; the exit code still carries
        // the verdict.
        println!("{}", report.to_json());
        if problems.is_empty() {
            return Ok(());
        }
        return Err(GenError::Validation(problems));
    }

    if problems.is_empty() {
        println!("{} annotated record(s), no problems", report.annotated_count());
        Ok(())
    } else {
        // Display prints one `<Type>.<Field>: <msg>` line per problem.
        Err(GenError::Validation(problems))
    }
}

fn cmd_clean(args: &[String]) -> Result<(), GenError> {
    let flags = parse_flags(args)?;
    init_logging(flags.verbose);

    let cache = GenerationCache::load(".");
    if cache.is_empty() {
        println!("nothing to clean");
        return Ok(());
    }

    let mut removed = 0usize;
    for path in cache.generated_paths() {
        if !path.exists() {
            continue;
        }
        if flags.dry_run {
            println!("would remove {}", path.display());
            continue;
        }
        std::fs::remove_file(&path).map_err(|e| GenError::io(&path, e))?;
        tracing::info!(path = %path.display(), "removed");
        removed += 1;
    }

    if !flags.dry_run {
        cache.delete()?;
        println!("removed {} file(s) and the generation cache", removed);
    }
    Ok(())
}

fn cmd_init(args: &[String]) -> Result<(), GenError> {
    let flags = parse_flags(args)?;
    let path = flags.config_path;

    if path.exists() && !flags.force {
        return Err(GenError::Config(format!(
            "{} already exists (use -force to overwrite)",
            path.display()
        )));
    }
    std::fs::write(&path, Config::default_yaml()).map_err(|e| GenError::io(&path, e))?;
    println!("wrote {}", path.display());
    Ok(())
}
