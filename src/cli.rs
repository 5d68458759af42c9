//! CLI: schema documents → (model dump | qualified names)
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use indexmap::IndexSet;
use schema_typegraph::graph::TypeKind;
use schema_typegraph::path_de::{load_documents, LoadSettings};
use schema_typegraph::{CompressionPolicy, FinalizedModel, Options, Pipeline, SchemaDocument};
use tracing::{debug, info};

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

/// build a canonical type model from parsed schema documents
#[derive(Parser, Debug)]
pub struct CommandLineInterface {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// run the pipeline and print the model dump as JSON
    Model(ModelOut),
    /// run the pipeline and list every declared type with its kind
    Names(NamesOut),
}

#[derive(Args, Debug, Clone)]
struct InputSettings {
    /// JSON Pointer to select the schema document inside each file (e.g. /components)
    #[arg(long)]
    json_pointer: Option<String>,

    /// JQ pre-process filter for each file; every emitted value is one document.
    #[arg(long)]
    jq_expr: Option<String>,

    /// One or more inputs. May be literal paths or quoted glob patterns
    #[arg(long, short, num_args = 1.., required = true)]
    input: Vec<String>,

    /// run every document on its own, in parallel, instead of as one linked set
    #[arg(long, default_value_t = false)]
    separate: bool,
}

#[derive(Args, Debug, Clone)]
struct RunSettings {
    /// JSON options file; flags given here override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// compression policy
    #[arg(long, value_enum)]
    policy: Option<CompressionPolicy>,
}

#[derive(clap::Parser, Debug)]
struct ModelOut {
    #[command(flatten)]
    input_settings: InputSettings,

    #[command(flatten)]
    run_settings: RunSettings,

    /// output .json file (stdout if omitted)
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// debugging
    #[arg(long)]
    no_op: bool,
}

#[derive(clap::Parser, Debug)]
struct NamesOut {
    #[command(flatten)]
    input_settings: InputSettings,

    #[command(flatten)]
    run_settings: RunSettings,

    /// output text file (stdout if omitted)
    #[arg(short, long)]
    out: Option<PathBuf>,
}

// ————————————————————————————————————————————————————————————————————————————
// IMPLEMENTATION
// ————————————————————————————————————————————————————————————————————————————

impl InputSettings {
    fn load(&self) -> Result<Vec<SchemaDocument>> {
        let settings = LoadSettings { json_pointer: self.json_pointer.clone(), jq_expr: self.jq_expr.clone() };
        let source_paths = schema_files(&self.input).context("failed to resolve input file paths")?;
        let mut documents = Vec::new();
        for source_path in source_paths {
            let loaded = load_documents(&source_path, &settings)
                .with_context(|| format!("failed to load {}", source_path.display()))?;
            documents.extend(loaded);
        }
        info!(documents = documents.len(), "loaded schema documents");
        Ok(documents)
    }

    fn run(&self, options: Options) -> Result<Vec<FinalizedModel>> {
        let documents = self.load()?;
        let pipeline = Pipeline::new(options);
        if !self.separate {
            return Ok(vec![pipeline.run(&documents)?]);
        }
        pipeline
            .run_each(&documents)
            .into_iter()
            .zip(&documents)
            .map(|(result, doc)| result.with_context(|| format!("document {}", doc.id)))
            .collect()
    }
}

impl RunSettings {
    fn options(&self) -> Result<Options> {
        let mut options = match &self.config {
            Some(path) => Options::load(path)?,
            None => Options::default(),
        };
        if let Some(policy) = self.policy {
            options.compression = policy;
        }
        Ok(options)
    }
}

impl CommandLineInterface {
    pub fn load() -> Self {
        Self::parse()
    }
    pub fn run(&self) -> Result<()> {
        match &self.cmd {
            Command::Model(target) => {
                // debug path
                if target.no_op {
                    eprintln!("{self:#?}");
                    return Ok(());
                }

                // 1) load + run
                let models = target.input_settings.run(target.run_settings.options()?)?;

                // 2) dump
                let dumps: Vec<_> = models.iter().map(FinalizedModel::dump).collect();
                let source = match target.input_settings.separate {
                    true => serde_json::to_string_pretty(&dumps)?,
                    false => serde_json::to_string_pretty(&dumps[0])?,
                };
                write_output(target.out.as_ref(), &source)
            }
            Command::Names(target) => {
                let models = target.input_settings.run(target.run_settings.options()?)?;
                let mut lines = Vec::new();
                for model in &models {
                    for (name, r) in model.declared() {
                        lines.push(format!("{:<10} {name}", kind_label(model.graph().kind(r))));
                    }
                    let merged = model.report().removed_count();
                    if merged > 0 {
                        eprintln!("{} {merged} type(s) merged by compression", "note:".cyan());
                    }
                }
                write_output(target.out.as_ref(), &lines.join("\n"))
            }
        }
    }
}

// ————————————————————————————————————————————————————————————————————————————
// INTERNAL HELPERS
// ————————————————————————————————————————————————————————————————————————————

fn kind_label(kind: &TypeKind) -> &'static str {
    match kind {
        TypeKind::Enum(e) if e.is_open() => "open-enum",
        TypeKind::Object(o) if !o.params.is_empty() => "generic",
        other => other.label(),
    }
}

fn write_output(out: Option<&PathBuf>, source: &str) -> Result<()> {
    match out {
        Some(out) => {
            if let Some(parent) = out.parent() {
                std::fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
            }
            std::fs::write(out, source).with_context(|| format!("failed to write {}", out.display()))
        }
        None => {
            println!("{source}");
            Ok(())
        }
    }
}

/// Literal paths are taken as given. A glob keeps only the `.json` files it
/// matches and must match at least one. Each file is listed once, in first
/// mention order.
fn schema_files<I>(patterns: I) -> Result<Vec<PathBuf>>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    fn has_glob_chars(s: &str) -> bool {
        s.bytes().any(|b| matches!(b, b'*' | b'?' | b'[' | b'{'))
    }
    fn is_schema_file(path: &Path) -> bool {
        path.is_file() && path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
    }

    let mut out = IndexSet::<PathBuf>::new();
    for raw in patterns {
        let pattern = raw.as_ref();
        if !has_glob_chars(pattern) {
            out.insert(PathBuf::from(pattern));
            continue;
        }
        let mut matched_any = false;
        for entry in glob::glob(pattern).with_context(|| format!("invalid glob pattern: {pattern}"))? {
            let path = entry?;
            if is_schema_file(&path) {
                out.insert(path);
                matched_any = true;
            } else {
                debug!(path = %path.display(), "skipping non-schema match");
            }
        }
        if !matched_any {
            anyhow::bail!("glob pattern matched no .json files: {pattern}");
        }
    }
    Ok(out.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn globs_keep_json_files_once() {
        let dir = std::env::temp_dir().join(format!("schema-typegraph-cli-{}", std::process::id()));
        std::fs::create_dir_all(dir.join("nested.json")).unwrap();
        for file in ["a.json", "b.JSON", "notes.txt"] {
            std::fs::write(dir.join(file), "{}").unwrap();
        }
        let all = format!("{}/*", dir.display());
        let literal = dir.join("a.json").display().to_string();

        let files = schema_files([literal.as_str(), all.as_str()]).unwrap();
        assert_eq!(files, vec![dir.join("a.json"), dir.join("b.JSON")]);

        let none = format!("{}/*.txt", dir.display());
        assert!(schema_files([none.as_str()]).is_err());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
