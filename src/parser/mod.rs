pub mod analyze;
pub mod document;
pub mod flatten;
pub mod reconstruct;
pub mod validate;

use rayon::prelude::*;

use crate::error::Error;
use crate::scan::SourceFile;
use analyze::AllowList;
use document::ParsedDocument;
use flatten::Flattened;

/// Parse every source. Malformed files come back as errors next to the
/// documents that parsed, so one bad file never sinks the batch.
pub fn parse_all(sources: &[SourceFile]) -> (Vec<ParsedDocument>, Vec<Error>) {
    let results: Vec<_> = sources
        .par_iter()
        .map(|s| document::parse(&s.rel_path, &s.text, s.modified))
        .collect();

    let mut docs = Vec::with_capacity(results.len());
    let mut failures = Vec::new();
    for result in results {
        match result {
            Ok(doc) => docs.push(doc),
            Err(e) => failures.push(e),
        }
    }
    (docs, failures)
}

/// Second phase: the allow-list is final before any document is flattened.
pub fn flatten_all(docs: &[ParsedDocument], allow: Option<&AllowList>) -> Vec<Flattened> {
    docs.par_iter().map(|doc| flatten::flatten(doc, allow)).collect()
}
