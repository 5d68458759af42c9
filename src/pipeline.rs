//! Strictly sequential driver over the passes.
use rayon::prelude::*;
use tracing::{debug, info, info_span};

use crate::builder;
use crate::compress;
use crate::config::Options;
use crate::error::ModelError;
use crate::generics;
use crate::graph::TypeGraph;
use crate::inheritance;
use crate::model::FinalizedModel;
use crate::package;
use crate::schema::SchemaDocument;
use crate::unions;

#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    options: Options,
}

impl Pipeline {
    pub fn new(options: Options) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// One run over `documents`, which may reference each other.
    pub fn run(&self, documents: &[SchemaDocument]) -> Result<FinalizedModel, ModelError> {
        let options = &self.options;
        let span = info_span!("run", documents = documents.len(), policy = ?options.compression);
        let _guard = span.enter();

        let mut graph = {
            let _pass = info_span!("pass", name = "build").entered();
            let graph = builder::build(documents, options)?;
            graph.validate()?;
            graph
        };
        pass(&mut graph, "package", package::resolve_packages)?;
        pass(&mut graph, "inheritance", |g| inheritance::normalize_inheritance(g, options))?;
        if options.generify {
            pass(&mut graph, "generics", |g| generics::resolve_generics(g, options))?;
        }
        pass(&mut graph, "unions", |g| unions::synthesize(g, options))?;
        let mut report = None;
        pass(&mut graph, "compress", |g| {
            report = Some(compress::compress(g, options.compression)?);
            Ok(())
        })?;

        let report = report.unwrap_or_default();
        info!(live = graph.live().count(), merged = report.removed_count(), "model finalized");
        Ok(FinalizedModel::freeze(graph, report))
    }

    /// Independent runs, one per document, in parallel. Each run owns its
    /// graph and registries; only the options are shared.
    pub fn run_each(&self, documents: &[SchemaDocument]) -> Vec<Result<FinalizedModel, ModelError>> {
        documents.par_iter().map(|doc| self.run(std::slice::from_ref(doc))).collect()
    }
}

fn pass(
    graph: &mut TypeGraph,
    name: &'static str,
    apply: impl FnOnce(&mut TypeGraph) -> Result<(), ModelError>,
) -> Result<(), ModelError> {
    let _pass = info_span!("pass", name).entered();
    apply(graph)?;
    graph.validate()?;
    debug!(stage = ?graph.stage(), slots = graph.slot_count(), "pass committed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompressionPolicy;
    use crate::graph::Stage;
    use serde_json::json;

    fn document() -> SchemaDocument {
        serde_json::from_value(json!({
            "id": "api.json",
            "namespace": "m",
            "schemas": {
                "Payload": { "type": "object", "properties": { "kind": { "type": "string" } } },
                "DataA": { "allOf": [{ "$ref": "Payload" }, { "type": "object", "properties": { "a": { "type": "string" } } }] },
                "DataB": { "allOf": [{ "$ref": "Payload" }, { "type": "object", "properties": { "b": { "type": "string" } } }] },
                "Envelope": { "type": "object", "properties": { "id": { "type": "string" } } },
                "A": { "allOf": [{ "$ref": "Envelope" }, { "type": "object", "required": ["data"], "properties": { "data": { "$ref": "DataA" } } }] },
                "B": { "allOf": [{ "$ref": "Envelope" }, { "type": "object", "required": ["data"], "properties": { "data": { "$ref": "DataB" } } }] }
            }
        }))
        .unwrap()
    }

    #[test]
    fn generify_can_be_switched_off() {
        let on = Pipeline::new(Options::default()).run(&[document()]).unwrap();
        let envelope = on.find("m.Envelope").unwrap();
        assert_eq!(on.graph().object(envelope).unwrap().params.len(), 1);

        let options = Options { generify: false, ..Options::default() };
        let off = Pipeline::new(options).run(&[document()]).unwrap();
        let envelope = off.find("m.Envelope").unwrap();
        assert!(off.graph().object(envelope).unwrap().params.is_empty());
        assert_eq!(off.graph().stage(), Stage::Compressed);
    }

    #[test]
    fn documents_run_independently_in_parallel() {
        let other: SchemaDocument =
            serde_json::from_value(json!({ "id": "other.json", "schemas": { "Broken": { "$ref": "Missing" } } })).unwrap();
        let pipeline = Pipeline::new(Options::default().with_compression(CompressionPolicy::Off));
        let results = pipeline.run_each(&[document(), other]);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
    }
}
