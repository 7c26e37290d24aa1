//! Context assembly: retrieved chunks → one labelled context block.

use crate::store::chunks::ScoredChunk;

/// Concatenates chunk texts under `[Source: title]` labels, stopping before
/// the character cap would be crossed.
pub fn build_context(chunks: &[ScoredChunk], max_chars: usize) -> String {
    let mut context = String::new();

    for scored in chunks {
        let block = format!(
            "[Source: {}]\n{}\n\n",
            scored.chunk.source, scored.chunk.content
        );
        if !context.is_empty() && context.chars().count() + block.chars().count() > max_chars {
            break;
        }
        context.push_str(&block);
    }

    context.trim_end().to_string()
}

/// Distinct source titles, first-retrieved order.
pub fn distinct_sources(chunks: &[ScoredChunk]) -> Vec<String> {
    let mut sources: Vec<String> = Vec::new();
    for scored in chunks {
        if !sources.contains(&scored.chunk.source) {
            sources.push(scored.chunk.source.clone());
        }
    }
    sources
}
