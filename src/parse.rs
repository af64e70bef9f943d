use std::collections::BTreeMap;
use std::sync::Arc;

use scraper::{ElementRef, Html, Selector};
use tokio::task::spawn_blocking;
use tracing::info;
use url::Url;

use crate::{Error, Result};

/// Fields of a [`PageRecord`], in output column order.
pub const FIELDS: &[&str] = &[
    "username",
    "user_url",
    "lokalita",
    "cena",
    "nazev",
    "autor",
    "nakladatel",
    "book_url",
    "isbn",
    "rok",
    "vydani",
    "jazyk",
];

const LISTING_ITEM: &str = "div.bookitem.span2";
const LISTING_LINK: &str = "a.title-name";
const OFFER: &str = "div.span6.asmaro.clearfix";
const DATA_TABLE_ROW: &str = "table.table.table-striped tr";
const ROW_CELL: &str = "th, td";

/// How a value is pulled out of the first element a selector matches.
#[derive(Debug, Clone, Copy)]
enum Extract {
    Text,
    Attr(&'static str),
}

/// What happens to a raw value before it is stored.
#[derive(Debug, Clone, Copy)]
enum Post {
    Keep,
    /// Joined onto the base URL, with an optional path prefix.
    Link(&'static str),
    StripSuffix(&'static str),
}

#[derive(Debug, Clone, Copy)]
struct FieldRule {
    field: &'static str,
    selector: &'static str,
    extract: Extract,
    post: Post,
}

/// Rules evaluated inside each seller offer.
const OFFER_RULES: &[FieldRule] = &[
    FieldRule {
        field: "username",
        selector: "a[data-username]",
        extract: Extract::Attr("data-username"),
        post: Post::Keep,
    },
    FieldRule {
        field: "user_url",
        selector: "a[data-username]",
        extract: Extract::Attr("href"),
        post: Post::Link(""),
    },
    FieldRule {
        field: "lokalita",
        selector: "span.ask-detail-trigger",
        extract: Extract::Text,
        post: Post::Keep,
    },
    FieldRule {
        field: "cena",
        selector: "div.ask-col-price",
        extract: Extract::Text,
        post: Post::StripSuffix("Kč"),
    },
];

/// Rules evaluated once per detail page.
const PAGE_RULES: &[FieldRule] = &[
    FieldRule {
        field: "book_url",
        selector: "div.ask-col-actions a[data-issue-id]",
        extract: Extract::Attr("data-issue-id"),
        post: Post::Link("/kniha/"),
    },
    FieldRule {
        field: "nazev",
        selector: "div.page-header.span12 h1",
        extract: Extract::Text,
        post: Post::Keep,
    },
    FieldRule {
        field: "autor",
        selector: "div.span3",
        extract: Extract::Text,
        post: Post::Keep,
    },
];

/// Leading label of a data table row, and the field it fills.
const TABLE_LABELS: &[(&str, &str)] = &[
    ("nakladatel", "nakladatel"),
    ("rok vydání", "rok"),
    ("vydání", "vydani"),
    ("jazyk", "jazyk"),
    ("isbn", "isbn"),
];

/// One scraped item. Every field in [`FIELDS`] is present, absent values are `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRecord {
    fields: BTreeMap<&'static str, Option<String>>,
}

impl Default for PageRecord {
    fn default() -> Self {
        Self {
            fields: FIELDS.iter().map(|&f| (f, None)).collect(),
        }
    }
}

impl PageRecord {
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(|v| v.as_deref())
    }

    pub fn fields(&self) -> impl Iterator<Item = (&'static str, Option<&str>)> + '_ {
        self.fields.iter().map(|(&k, v)| (k, v.as_deref()))
    }

    pub(crate) fn set(&mut self, field: &'static str, value: Option<String>) {
        self.fields.insert(field, value);
    }

    /// Repeated values of one field are joined with a space.
    fn append(&mut self, field: &'static str, value: String) {
        match self.fields.get_mut(field) {
            Some(Some(existing)) => {
                existing.push(' ');
                existing.push_str(&value);
            }
            _ => {
                self.fields.insert(field, Some(value));
            }
        }
    }

    fn merge(&mut self, other: &PageRecord) {
        for (&field, value) in &other.fields {
            if value.is_some() {
                self.fields.insert(field, value.clone());
            }
        }
    }
}

struct CompiledRule {
    rule: FieldRule,
    selector: Selector,
}

fn compile(rules: &[FieldRule]) -> Result<Vec<CompiledRule>> {
    rules
        .iter()
        .map(|&rule| -> Result<CompiledRule> {
            Ok(CompiledRule {
                rule,
                selector: create_selector(rule.selector)?,
            })
        })
        .collect()
}

/// Extracts the detail page link of every item on a listing page.
/// Only the first title link of an item counts.
pub fn parse_listing(html: &str, base_url: &str) -> Result<Vec<String>> {
    let item_selector = create_selector(LISTING_ITEM)?;
    let link_selector = create_selector(LISTING_LINK)?;
    let doc = Html::parse_document(html);
    let links = doc
        .select(&item_selector)
        .filter_map(|item| item.select(&link_selector).next())
        .filter_map(|a| a.value().attr("href"))
        .map(|href| join_url(base_url, "", href.trim()))
        .collect();
    Ok(links)
}

/// Links of every fetched listing page; absent pages are skipped.
pub fn parse_listings(pages: &[Option<String>], base_url: &str) -> Result<Vec<String>> {
    let mut urls = Vec::new();
    for html in pages.iter().flatten() {
        urls.extend(parse_listing(html, base_url)?);
    }
    info!("Number of URLs: {}", urls.len());
    Ok(urls)
}

/// One record per seller offer on a detail page.
///
/// Book-level values (title, author, the data table) are shared by every offer on the page.
/// Anything missing from the page, including the whole data table, comes out as `None`.
pub fn parse_detail(html: &str, base_url: &str) -> Result<Vec<PageRecord>> {
    let offer_selector = create_selector(OFFER)?;
    let offer_rules = compile(OFFER_RULES)?;
    let page_rules = compile(PAGE_RULES)?;

    let doc = Html::parse_document(html);
    let root = doc.root_element();

    let mut book = PageRecord::default();
    apply_rules(&mut book, root, &page_rules, base_url);
    book.merge(&parse_data_table(root)?);

    let records = doc
        .select(&offer_selector)
        .map(|offer| {
            let mut record = book.clone();
            apply_rules(&mut record, offer, &offer_rules, base_url);
            record
        })
        .collect();
    Ok(records)
}

/// Records of every fetched detail page; absent pages are skipped.
pub fn parse_details(pages: &[Option<String>], base_url: &str) -> Result<Vec<PageRecord>> {
    let mut records = Vec::new();
    for html in pages.iter().flatten() {
        records.extend(parse_detail(html, base_url)?);
    }
    info!("Number of records: {}", records.len());
    Ok(records)
}

/// Parses listing pages off the async runtime.
pub(crate) async fn extract_listing_urls(
    pages: Arc<Vec<Option<String>>>,
    base_url: Arc<str>,
) -> Result<Vec<String>> {
    spawn_blocking(move || parse_listings(&pages, &base_url)).await?
}

/// Parses detail pages off the async runtime.
pub(crate) async fn extract_records(
    pages: Arc<Vec<Option<String>>>,
    base_url: Arc<str>,
) -> Result<Vec<PageRecord>> {
    spawn_blocking(move || parse_details(&pages, &base_url)).await?
}

fn apply_rules(record: &mut PageRecord, scope: ElementRef, rules: &[CompiledRule], base_url: &str) {
    for compiled in rules {
        record.set(compiled.rule.field, extract_or_absent(scope, compiled, base_url));
    }
}

/// The value a rule yields in `scope`, or `None` when the element or attribute is missing
/// or the text is blank.
fn extract_or_absent(scope: ElementRef, compiled: &CompiledRule, base_url: &str) -> Option<String> {
    let element = scope.select(&compiled.selector).next()?;
    let raw = match compiled.rule.extract {
        Extract::Text => collapse_whitespace(&element.text().collect::<String>()),
        Extract::Attr(name) => element.value().attr(name)?.trim().to_string(),
    };

    let value = match compiled.rule.post {
        Post::Keep => raw,
        Post::Link(prefix) if !raw.is_empty() => join_url(base_url, prefix, &raw),
        Post::Link(_) => raw,
        Post::StripSuffix(suffix) => raw.trim_end_matches(suffix).trim_end().to_string(),
    };
    (!value.is_empty()).then_some(value)
}

/// Maps each row of the data table to a field by its leading label.
fn parse_data_table(root: ElementRef) -> Result<PageRecord> {
    let row_selector = create_selector(DATA_TABLE_ROW)?;
    let cell_selector = create_selector(ROW_CELL)?;

    let mut record = PageRecord::default();
    for row in root.select(&row_selector) {
        let cells: Vec<String> = row
            .select(&cell_selector)
            .map(|cell| collapse_whitespace(&cell.text().collect::<String>()))
            .collect();

        let labelled = match cells.as_slice() {
            [] => None,
            [single] => split_label(single),
            [label, rest @ ..] => {
                field_for_label(label).map(|field| (field, collapse_whitespace(&rest.join(" "))))
            }
        };

        if let Some((field, value)) = labelled {
            if !value.is_empty() {
                record.append(field, value);
            }
        }
    }
    Ok(record)
}

fn field_for_label(label: &str) -> Option<&'static str> {
    let label = label.trim().trim_end_matches(':').trim_end().to_lowercase();
    TABLE_LABELS
        .iter()
        .find(|(known, _)| *known == label)
        .map(|&(_, field)| field)
}

/// A row rendered as one cell, e.g. `ISBN 978-80-...`.
fn split_label(text: &str) -> Option<(&'static str, String)> {
    let lowered = text.to_lowercase();
    TABLE_LABELS
        .iter()
        .filter(|(known, _)| lowered.starts_with(known))
        .max_by_key(|(known, _)| known.len())
        .and_then(|&(known, field)| {
            let rest = text.get(known.len()..)?;
            // The label must be a whole word.
            if !rest.is_empty() && !rest.starts_with([' ', ':']) {
                return None;
            }
            Some((field, rest.trim_start_matches([' ', ':']).trim().to_string()))
        })
}

fn join_url(base_url: &str, prefix: &str, path: &str) -> String {
    let relative = format!("{prefix}{path}");
    Url::parse(base_url)
        .and_then(|base| base.join(&relative))
        .map(String::from)
        .unwrap_or_else(|_| format!("{}{relative}", base_url.trim_end_matches('/')))
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[inline]
fn create_selector(sel_str: &str) -> Result<Selector> {
    Selector::parse(sel_str).map_err(|_| Error::ParseMissingSelector(sel_str.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://www.trhknih.cz";

    const LISTING: &str = r#"
        <html><body>
          <div class="bookitem span2"><a class="title-name" href="/kniha/krakatit-123">Krakatit</a></div>
          <div class="bookitem span2"><a class="title-name" href="/kniha/rur-456">R.U.R.</a></div>
          <div class="bookitem span2"><span>no link here</span></div>
          <div class="sidebar"><a class="title-name" href="/not-a-book">ignored</a></div>
        </body></html>
    "#;

    const DETAIL: &str = r#"
        <html><body>
          <div class="page-header span12">
            <h1>
              Válka s mloky
                  (brožovaná)
            </h1>
          </div>
          <div class="span3">
              Karel
              Čapek
          </div>
          <table class="table table-striped">
            <tr><td>nakladatel</td><td>Československý spisovatel</td></tr>
            <tr><td>rok vydání</td><td>1965</td></tr>
            <tr><td>jazyk</td><td>čeština</td></tr>
            <tr><td>vydání</td><td>3.</td></tr>
            <tr><td>ISBN</td><td>80-200-0001-1</td></tr>
            <tr><td>ISBN</td><td>978-80-200-0001-2</td></tr>
            <tr><td>vazba</td><td>brožovaná</td></tr>
          </table>
          <div class="span6 asmaro clearfix">
            <a href="/uzivatel/pepa" data-username="pepa">pepa</a>
            <span class="ask-detail-trigger"> Praha </span>
            <div class="ask-col-price">120 Kč</div>
          </div>
          <div class="span6 asmaro clearfix">
            <a href="/uzivatel/jana" data-username="jana">jana</a>
            <div class="ask-col-price">95 Kč</div>
          </div>
          <div class="ask-col-actions"><a data-issue-id="98765">Koupit</a></div>
        </body></html>
    "#;

    #[test]
    fn test_listing_links() {
        let links = parse_listing(LISTING, BASE).unwrap();
        assert_eq!(
            links,
            vec![
                "https://www.trhknih.cz/kniha/krakatit-123",
                "https://www.trhknih.cz/kniha/rur-456",
            ]
        );
    }

    #[test]
    fn test_listing_takes_one_link_per_item() {
        let html = r#"
            <div class="bookitem span2">
              <a class="title-name" href="/kniha/krakatit-123">Krakatit</a>
              <a class="title-name" href="/kniha/krakatit-123#nabidky">Nabídky</a>
            </div>
            <div class="bookitem span2"><a class="title-name" href="/kniha/rur-456">R.U.R.</a></div>
        "#;
        let links = parse_listing(html, BASE).unwrap();
        assert_eq!(
            links,
            vec![
                "https://www.trhknih.cz/kniha/krakatit-123",
                "https://www.trhknih.cz/kniha/rur-456",
            ]
        );
    }

    #[test]
    fn test_listing_without_items() {
        let html = "<html><body><p>Nic nenalezeno</p></body></html>";
        assert!(parse_listing(html, BASE).unwrap().is_empty());
    }

    #[test]
    fn test_listings_skip_absent_pages() {
        let pages = vec![None, Some(LISTING.to_string()), None];
        assert_eq!(parse_listings(&pages, BASE).unwrap().len(), 2);
    }

    #[test]
    fn test_detail_record_per_offer() {
        let records = parse_detail(DETAIL, BASE).unwrap();
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert_eq!(first.get("username"), Some("pepa"));
        assert_eq!(first.get("user_url"), Some("https://www.trhknih.cz/uzivatel/pepa"));
        assert_eq!(first.get("lokalita"), Some("Praha"));
        assert_eq!(first.get("cena"), Some("120"));
        assert_eq!(first.get("nazev"), Some("Válka s mloky (brožovaná)"));
        assert_eq!(first.get("autor"), Some("Karel Čapek"));
        assert_eq!(first.get("book_url"), Some("https://www.trhknih.cz/kniha/98765"));
        assert_eq!(first.get("nakladatel"), Some("Československý spisovatel"));
        assert_eq!(first.get("rok"), Some("1965"));
        assert_eq!(first.get("vydani"), Some("3."));
        assert_eq!(first.get("jazyk"), Some("čeština"));
        assert_eq!(first.get("isbn"), Some("80-200-0001-1 978-80-200-0001-2"));

        let second = &records[1];
        assert_eq!(second.get("username"), Some("jana"));
        assert_eq!(second.get("lokalita"), None);
        assert_eq!(second.get("cena"), Some("95"));
        assert_eq!(second.get("nazev"), first.get("nazev"));
    }

    #[test]
    fn test_detail_without_data_table() {
        let html = r#"
            <div class="page-header span12"><h1>Bez tabulky</h1></div>
            <div class="span6 asmaro clearfix">
              <a href="/uzivatel/pepa" data-username="pepa">pepa</a>
            </div>
        "#;
        let records = parse_detail(html, BASE).unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.get("nazev"), Some("Bez tabulky"));
        for field in ["nakladatel", "rok", "vydani", "jazyk", "isbn", "book_url", "cena"] {
            assert_eq!(record.get(field), None, "{field} should be absent");
        }
        assert_eq!(record.fields().count(), FIELDS.len());
    }

    #[test]
    fn test_table_rows_matched_by_label_not_position() {
        let html = r#"
            <table class="table table-striped">
              <tr><th>ISBN:</th><td>80-1</td></tr>
              <tr><td>Jazyk</td><td>slovenština</td></tr>
              <tr><td>nakladatel</td><td>Odeon</td></tr>
            </table>
            <div class="span6 asmaro clearfix"><a data-username="x" href="/u/x">x</a></div>
        "#;
        let record = &parse_detail(html, BASE).unwrap()[0];
        assert_eq!(record.get("isbn"), Some("80-1"));
        assert_eq!(record.get("jazyk"), Some("slovenština"));
        assert_eq!(record.get("nakladatel"), Some("Odeon"));
        assert_eq!(record.get("rok"), None);
    }

    #[test]
    fn test_single_cell_rows() {
        assert_eq!(split_label("ISBN 978-80-1"), Some(("isbn", "978-80-1".to_string())));
        assert_eq!(split_label("rok vydání 1999"), Some(("rok", "1999".to_string())));
        assert_eq!(split_label("vydáníX"), None);
        assert_eq!(split_label("vazba pevná"), None);
    }

    #[test]
    fn test_detail_without_offers() {
        let html = r#"<div class="page-header span12"><h1>Nikdo neprodává</h1></div>"#;
        assert!(parse_detail(html, BASE).unwrap().is_empty());
    }

    #[test]
    fn test_parsing_is_idempotent() {
        let first = parse_detail(DETAIL, BASE).unwrap();
        let second = parse_detail(DETAIL, BASE).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            parse_listing(LISTING, BASE).unwrap(),
            parse_listing(LISTING, BASE).unwrap()
        );
    }

    #[test]
    fn test_garbage_input_does_not_fail() {
        let html = "<div class=\"span6 asmaro clearfix\"><table class=\"table table-striped\"><tr>";
        let records = parse_detail(html, BASE).unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].fields().all(|(_, v)| v.is_none()));
    }

    #[tokio::test]
    async fn test_blocking_wrappers() {
        let pages = Arc::new(vec![Some(LISTING.to_string())]);
        let urls = extract_listing_urls(pages, BASE.into()).await.unwrap();
        assert_eq!(urls.len(), 2);

        let pages = Arc::new(vec![None, Some(DETAIL.to_string())]);
        let records = extract_records(pages, BASE.into()).await.unwrap();
        assert_eq!(records.len(), 2);
    }
}
