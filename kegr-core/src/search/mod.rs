// kegr-core/src/search/mod.rs
// Documentation site search: reads the query from the page location, runs it
// against the document store and renders the hit list.

use kegr_common::error::Result;
use once_cell::sync::OnceCell;
use tracing::debug;
use url::Url;

pub mod index;
pub mod store;

pub use index::SearchIndex;
pub use store::{Document, DocumentStore};

pub const QUERY_PARAM: &str = "query";
pub const EXCERPT_CHARS: usize = 150;
pub const NO_RESULTS: &str = "<li>No results found</li>";

/// The two page elements search touches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPage {
    pub search_box: Option<String>,
    pub results_html: Option<String>,
}

/// Value of query parameter `name` in `location`, `+` and percent escapes
/// decoded. Absent and empty parameters are both `None`.
pub fn query_variable(location: &Url, name: &str) -> Option<String> {
    location
        .query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

pub struct SiteSearch {
    store: DocumentStore,
    index: OnceCell<SearchIndex>,
}

impl SiteSearch {
    pub fn new(store: DocumentStore) -> Self {
        Self {
            store,
            index: OnceCell::new(),
        }
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    /// Whether the full-text index has been built yet.
    pub fn is_indexed(&self) -> bool {
        self.index.get().is_some()
    }

    fn index(&self) -> Result<&SearchIndex> {
        self.index.get_or_try_init(|| SearchIndex::build(&self.store))
    }

    /// Matching documents for `query`, best first.
    pub fn search(&self, query: &str) -> Result<Vec<&Document>> {
        let refs = self.index()?.search(query)?;
        Ok(refs.iter().filter_map(|id| self.store.get(id)).collect())
    }

    /// Runs the search requested by `location` against `page`. Without a
    /// query parameter the page is left as it is and nothing is indexed.
    pub fn run(&self, page: &mut SearchPage, location: &Url) -> Result<()> {
        let Some(query) = query_variable(location, QUERY_PARAM) else {
            debug!("No '{}' parameter in {}", QUERY_PARAM, location);
            return Ok(());
        };
        page.search_box = Some(query.clone());
        let hits = self.search(&query)?;
        debug!("Query {:?} matched {} documents", query, hits.len());
        page.results_html = Some(render_results(&hits));
        Ok(())
    }
}

pub fn render_results(hits: &[&Document]) -> String {
    if hits.is_empty() {
        return NO_RESULTS.to_string();
    }
    hits.iter().map(|doc| render_item(doc)).collect()
}

fn render_item(doc: &Document) -> String {
    let excerpt: String = doc.content.chars().take(EXCERPT_CHARS).collect();
    format!(
        "<li><a href=\"{}\"><h3>{}</h3></a><p>{}...</p></li>",
        escape_html(&doc.url),
        escape_html(&doc.title),
        escape_html(&excerpt)
    )
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
