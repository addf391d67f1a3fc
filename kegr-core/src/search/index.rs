// kegr-core/src/search/index.rs
// Full-text index over a DocumentStore.

use kegr_common::error::{KegrError, Result};
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::{
    Field, IndexRecordOption, Schema, TextFieldIndexing, TextOptions, Value, STORED, STRING, TEXT,
};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument};
use tracing::debug;

use super::store::DocumentStore;

const WRITER_MEMORY_BUDGET: usize = 50_000_000;

// Registered by tantivy's default tokenizer manager: lowercasing plus the
// English Porter stemmer, so "install" also finds "installation".
const STEMMED_TOKENIZER: &str = "en_stem";

fn stemmed_text() -> TextOptions {
    TextOptions::default().set_indexing_options(
        TextFieldIndexing::default()
            .set_tokenizer(STEMMED_TOKENIZER)
            .set_index_option(IndexRecordOption::WithFreqsAndPositions),
    )
}

fn search_err(context: &str, e: tantivy::TantivyError) -> KegrError {
    KegrError::Search(format!("{context}: {e}"))
}

pub struct SearchIndex {
    index: Index,
    reader: IndexReader,
    id: Field,
    url: Field,
    title: Field,
    content: Field,
    limit: usize,
}

impl SearchIndex {
    /// Indexes every document of `store` in memory.
    pub fn build(store: &DocumentStore) -> Result<Self> {
        let mut schema = Schema::builder();
        let id = schema.add_text_field("id", STRING | STORED);
        let url = schema.add_text_field("url", TEXT);
        let title = schema.add_text_field("title", stemmed_text());
        let content = schema.add_text_field("content", stemmed_text());
        let index = Index::create_in_ram(schema.build());

        let mut writer: IndexWriter = index
            .writer_with_num_threads(1, WRITER_MEMORY_BUDGET)
            .map_err(|e| search_err("Failed to open index writer", e))?;
        for document in store.documents() {
            writer
                .add_document(doc!(
                    id => document.id.clone(),
                    url => document.url.clone(),
                    title => document.title.clone(),
                    content => document.content.clone(),
                ))
                .map_err(|e| search_err("Failed to index document", e))?;
        }
        writer
            .commit()
            .map_err(|e| search_err("Failed to commit index", e))?;

        let reader: IndexReader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .map_err(|e| search_err("Failed to open index reader", e))?;
        debug!("Indexed {} documents", store.len());
        Ok(Self {
            index,
            reader,
            id,
            url,
            title,
            content,
            limit: store.len().max(1),
        })
    }

    /// Document ids matching `query`, best first. Malformed query syntax is
    /// tolerated; whatever parses is searched.
    pub fn search(&self, query: &str) -> Result<Vec<String>> {
        let parser = QueryParser::for_index(&self.index, vec![self.url, self.title, self.content]);
        let (parsed, errors) = parser.parse_query_lenient(query);
        if !errors.is_empty() {
            debug!("Ignoring {} query syntax errors in {:?}", errors.len(), query);
        }
        let searcher = self.reader.searcher();
        let hits = searcher
            .search(&parsed, &TopDocs::with_limit(self.limit))
            .map_err(|e| search_err("Search failed", e))?;

        let mut refs = Vec::with_capacity(hits.len());
        for (_score, address) in hits {
            let stored: TantivyDocument = searcher
                .doc(address)
                .map_err(|e| search_err("Failed to load hit", e))?;
            if let Some(id) = stored.get_first(self.id).and_then(|v| v.as_str()) {
                refs.push(id.to_string());
            }
        }
        Ok(refs)
    }
}
