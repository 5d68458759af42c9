//! Runs every fixture under every compression policy, twice, and reports
//! whether the two runs agree.
//!
//! Usage: `dev-test-runner [FILTER_REGEX]`
use colored::Colorize;
use regex::Regex;
use schema_typegraph::path_de::{load_documents, LoadSettings};
use schema_typegraph::{CompressionPolicy, Options, Pipeline, SchemaDocument};

const POLICIES: [CompressionPolicy; 3] =
    [CompressionPolicy::Off, CompressionPolicy::Default, CompressionPolicy::ErrorStructureAndGenerics];

fn main() {
    let filter = std::env::args().nth(1).map(|f| match Regex::new(&f) {
        Ok(re) => re,
        Err(error) => {
            eprintln!("{} bad filter: {error}", "error:".red());
            std::process::exit(2);
        }
    });

    let root = concat!(env!("CARGO_MANIFEST_DIR"), "/../fixtures/**/*.json");
    let paths: Vec<_> = match glob::glob(root) {
        Ok(paths) => paths.filter_map(Result::ok).collect(),
        Err(error) => {
            eprintln!("{} {error}", "error:".red());
            std::process::exit(2);
        }
    };

    let mut failures = 0;
    for path in paths {
        let label = path.display().to_string();
        if filter.as_ref().is_some_and(|re| !re.is_match(&label)) {
            continue;
        }
        let documents = match load_documents(&path, &LoadSettings::default()) {
            Ok(documents) => documents,
            Err(error) => {
                eprintln!("{} {label}: {error}", "✗".red());
                failures += 1;
                continue;
            }
        };
        for policy in POLICIES {
            match check(&documents, policy) {
                Ok(merged) => eprintln!("{} {label} [{policy:?}] stable, {merged} merged", "✓".green()),
                Err(message) => {
                    eprintln!("{} {label} [{policy:?}] {message}", "✗".red());
                    failures += 1;
                }
            }
        }
    }

    if failures > 0 {
        eprintln!("{}", format!("{failures} failure(s)").red().bold());
        std::process::exit(1);
    }
}

/// Two runs must produce identical dumps.
fn check(documents: &[SchemaDocument], policy: CompressionPolicy) -> Result<usize, String> {
    let pipeline = Pipeline::new(Options::default().with_compression(policy));
    let first = pipeline.run(documents).map_err(|e| e.to_string())?;
    let second = pipeline.run(documents).map_err(|e| e.to_string())?;
    let a = serde_json::to_value(first.dump()).map_err(|e| e.to_string())?;
    let b = serde_json::to_value(second.dump()).map_err(|e| e.to_string())?;
    if a != b {
        return Err("runs disagree".to_string());
    }
    Ok(first.report().removed_count())
}
