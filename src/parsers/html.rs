use scraper::{Html, Selector};
use url::Url;

/// SEO fields and outbound links read from a rendered DOM snapshot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedDocument {
    pub title: String,
    pub description: String,
    pub h1_count: u32,
    pub image_count: u32,
    /// Number of `<a>` elements, with or without href
    pub link_count: u32,
    /// Absolute hrefs of every anchor, in document order, empty ones dropped
    pub links: Vec<String>,
}

/// Parses a serialized DOM. Relative hrefs are resolved against `<base href>`
/// when present, otherwise against `page_url`.
pub fn parse(html: &str, page_url: &Url) -> ParsedDocument {
    let doc = Html::parse_document(html);

    let title_selector = Selector::parse("title").unwrap();
    let title = doc
        .select(&title_selector)
        .next()
        .map(|t| collapse_whitespace(&t.text().collect::<String>()))
        .unwrap_or_default();

    let description_selector = Selector::parse(r#"meta[name="description"]"#).unwrap();
    let description = doc
        .select(&description_selector)
        .next()
        .and_then(|m| m.value().attr("content"))
        .unwrap_or_default()
        .to_string();

    let h1_count = count(&doc, "h1");
    let image_count = count(&doc, "img");
    let link_count = count(&doc, "a");

    let base_selector = Selector::parse("base[href]").unwrap();
    let base = doc
        .select(&base_selector)
        .next()
        .and_then(|b| b.value().attr("href"))
        .and_then(|href| page_url.join(href).ok())
        .unwrap_or_else(|| page_url.clone());

    // Extract links
    let link_selector = Selector::parse("a[href]").unwrap();
    let links = doc
        .select(&link_selector)
        .filter_map(|e| e.value().attr("href"))
        .map(str::trim)
        .filter(|href| !href.is_empty())
        .filter_map(|href| base.join(href).ok())
        .map(|url| url.to_string())
        .collect::<Vec<String>>();

    ::log::debug!("HTML parser found {} links in {}", links.len(), page_url);

    ParsedDocument {
        title,
        description,
        h1_count,
        image_count,
        link_count,
        links,
    }
}

fn count(doc: &Html, css: &str) -> u32 {
    match Selector::parse(css) {
        Ok(selector) => doc.select(&selector).count() as u32,
        Err(_) => 0,
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
