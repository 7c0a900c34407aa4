use crate::error::IngestError;
use lopdf::Document;

/// One run of text as reported by the extractor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextItem {
    pub text: String,
    pub has_eol: bool,
}

impl TextItem {
    pub fn new(text: impl Into<String>, has_eol: bool) -> Self {
        Self {
            text: text.into(),
            has_eol,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PageContent {
    /// 1-indexed page number.
    pub number: u32,
    pub items: Vec<TextItem>,
}

impl PageContent {
    /// Items are concatenated directly; a single space follows an item only
    /// when the extractor marked it as ending a line.
    pub fn text(&self) -> String {
        join_items(&self.items)
    }
}

pub fn join_items(items: &[TextItem]) -> String {
    let mut text = String::new();
    for item in items {
        text.push_str(&item.text);
        if item.has_eol {
            text.push(' ');
        }
    }
    text
}

/// Split raw page text into items at line breaks. Every segment terminated by
/// a newline ends a line; a trailing unterminated segment does not.
pub fn items_from_lines(raw: &str) -> Vec<TextItem> {
    let mut items = Vec::new();
    let mut rest = raw;
    while let Some(index) = rest.find('\n') {
        let line = rest[..index].trim_end_matches('\r');
        items.push(TextItem::new(line, true));
        rest = &rest[index + 1..];
    }
    if !rest.is_empty() {
        items.push(TextItem::new(rest, false));
    }
    items
}

pub trait PdfExtractor {
    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<PageContent>, IngestError>;
}

#[derive(Default)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<PageContent>, IngestError> {
        let document =
            Document::load_mem(bytes).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        // get_pages is keyed by page number, so iteration follows page order.
        for (page_no, _page_id) in document.get_pages() {
            let raw = document
                .extract_text(&[page_no])
                .map_err(|error| IngestError::PdfParse(error.to_string()))?;

            pages.push(PageContent {
                number: page_no,
                items: items_from_lines(&raw),
            });
        }

        Ok(pages)
    }
}

/// Concatenate page texts in page order.
pub fn document_text(pages: &[PageContent]) -> String {
    let mut ordered: Vec<&PageContent> = pages.iter().collect();
    ordered.sort_by_key(|page| page.number);
    ordered.into_iter().map(PageContent::text).collect()
}

pub fn extract_document_text(bytes: &[u8]) -> Result<String, IngestError> {
    let pages = LopdfExtractor.extract_pages(bytes)?;
    let text = document_text(&pages);
    if text.trim().is_empty() {
        return Err(IngestError::EmptyText);
    }
    Ok(text)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn space_is_inserted_only_after_end_of_line_items() {
        let items = vec![
            TextItem::new("Total", false),
            TextItem::new(":", true),
            TextItem::new("42", false),
            TextItem::new("EUR", true),
        ];
        assert_eq!(join_items(&items), "Total: 42EUR ");
    }

    #[test]
    fn line_splitting_marks_terminated_segments() {
        let items = items_from_lines("first\nsecond\r\nthird");
        assert_eq!(
            items,
            vec![
                TextItem::new("first", true),
                TextItem::new("second", true),
                TextItem::new("third", false),
            ]
        );
        assert!(items_from_lines("").is_empty());
    }

    #[test]
    fn pages_are_concatenated_in_page_order() {
        let pages = vec![
            PageContent {
                number: 2,
                items: vec![TextItem::new("two", true)],
            },
            PageContent {
                number: 1,
                items: vec![TextItem::new("one", true)],
            },
        ];
        assert_eq!(document_text(&pages), "one two ");
    }

    #[test]
    fn extracts_text_from_generated_pdf_in_page_order() {
        let bytes = fixtures::pdf_with_pages(&["First page", "Second page"]);
        let text = extract_document_text(&bytes).expect("text");

        let first = text.find("First page").expect("first page text");
        let second = text.find("Second page").expect("second page text");
        assert!(first < second);
    }

    #[test]
    fn text_length_grows_with_page_count() {
        let mut previous = 0;
        let contents = ["alpha", "beta", "gamma", "delta"];
        for count in 1..=contents.len() {
            let bytes = fixtures::pdf_with_pages(&contents[..count]);
            let length = extract_document_text(&bytes).expect("text").len();
            assert!(length >= previous);
            previous = length;
        }
    }

    #[test]
    fn garbage_bytes_are_a_parse_error() {
        let error = extract_document_text(b"%PDF-1.4\n%broken").expect_err("broken pdf");
        assert!(matches!(error, IngestError::PdfParse(_)));
    }
}
