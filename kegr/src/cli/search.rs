// kegr/src/cli/search.rs

use std::path::PathBuf;

use clap::Args;
use kegr_common::config::Config;
use kegr_common::error::{KegrError, Result};
use kegr_core::search::DocumentStore;
use kegr_core::{SearchPage, SiteSearch};
use url::Url;

#[derive(Args, Debug)]
pub struct Search {
    /// JSON array of documents (`id`, `url`, `title`, `content`)
    #[arg(long)]
    pub store: PathBuf,

    /// Page location carrying the `query` parameter
    #[arg(long)]
    pub location: String,
}

impl Search {
    pub async fn run(&self, _config: &Config) -> Result<()> {
        let location = Url::parse(&self.location).map_err(|e| {
            KegrError::ValidationError(format!("Invalid location '{}': {}", self.location, e))
        })?;
        tracing::debug!("Searching {} for {}", self.store.display(), location);

        let site = SiteSearch::new(DocumentStore::load(&self.store)?);
        let mut page = SearchPage::default();
        site.run(&mut page, &location)?;
        print!("{}", render_page(&page));
        Ok(())
    }
}

/// The search box value on a `value=` line, then the results list. A page
/// without a query renders as nothing.
fn render_page(page: &SearchPage) -> String {
    let mut out = String::new();
    if let Some(query) = &page.search_box {
        out.push_str(&format!("value={query}\n"));
    }
    if let Some(html) = &page.results_html {
        out.push_str(html);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_is_echoed_before_results() {
        let page = SearchPage {
            search_box: Some("bottles".to_string()),
            results_html: Some("<li>No results found</li>".to_string()),
        };
        assert_eq!(
            render_page(&page),
            "value=bottles\n<li>No results found</li>\n"
        );
    }

    #[test]
    fn page_without_query_prints_nothing() {
        assert_eq!(render_page(&SearchPage::default()), "");
    }
}
