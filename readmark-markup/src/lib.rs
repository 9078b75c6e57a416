use std::fmt::Write as _;

use anyhow::{Context, Result};
use readmark_core::{span_id, Toc, WordIndex, WordQuery};
use regex::Regex;
use tracing::debug;

mod notes;

pub use notes::{link_notes, NOTE_TITLE_LIMIT};

/// Matches any run of non-letters or HTML entities between the parts of a
/// multi-word phrase.
const PHRASE_GAP: &str = r"(?:\P{L}|&[#a-z0-9]+;)+";
const ENTITY: &str = r"(?i)&[#a-z0-9]+;";

/// Wraps occurrences of the searched words in `<span class="word">` elements,
/// touching only text between tags.
pub struct WordMarker {
    pattern: Regex,
    entity: Regex,
    words: usize,
}

impl WordMarker {
    pub fn new(query: &WordQuery) -> Result<Option<Self>> {
        if query.is_empty() {
            return Ok(None);
        }
        let alternatives: Vec<String> = query
            .words()
            .iter()
            .map(|word| {
                let parts: Vec<String> = word.split_whitespace().map(regex::escape).collect();
                format!("({})", parts.join(PHRASE_GAP))
            })
            .collect();
        let source = format!("(?i){}", alternatives.join("|"));
        let pattern =
            Regex::new(&source).with_context(|| format!("invalid word pattern {source:?}"))?;
        let entity = Regex::new(ENTITY).context("invalid entity pattern")?;
        Ok(Some(Self {
            pattern,
            entity,
            words: query.words().len(),
        }))
    }

    /// Marks one block of HTML. Occurrence numbers continue across calls
    /// through `index`, so blocks must be fed in document order.
    pub fn mark(&self, html: &str, block: &str, index: &mut WordIndex) -> String {
        let mut out = String::with_capacity(html.len());
        let mut rest = html;
        while !rest.is_empty() {
            let text_end = rest.find('<').unwrap_or(rest.len());
            let (text, tail) = rest.split_at(text_end);
            self.mark_text(text, block, index, &mut out);
            let tag_end = tail.find('>').map_or(tail.len(), |pos| pos + 1);
            let (tag, tail) = tail.split_at(tag_end);
            out.push_str(tag);
            rest = tail;
        }
        out
    }

    fn mark_text(&self, text: &str, block: &str, index: &mut WordIndex, out: &mut String) {
        let entities: Vec<_> = self.entity.find_iter(text).map(|m| m.range()).collect();
        let mut last = 0;
        for caps in self.pattern.captures_iter(text) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            // Entities may sit inside a phrase match but must never be cut.
            let cuts_entity = entities.iter().any(|entity| {
                (entity.start < whole.start() && whole.start() < entity.end)
                    || (entity.start < whole.end() && whole.end() < entity.end)
            });
            if cuts_entity {
                continue;
            }
            let Some(word) = (1..=self.words).find(|&group| caps.get(group).is_some()) else {
                continue;
            };
            let word = word - 1;
            let Some(occurrence) = index.record(word, block) else {
                continue;
            };
            out.push_str(&text[last..whole.start()]);
            let _ = write!(
                out,
                "<span class=\"word\" id=\"{}\">{}</span>",
                span_id(word, occurrence),
                whole.as_str()
            );
            last = whole.end();
        }
        out.push_str(&text[last..]);
    }
}

/// Marks every `(anchor, html)` block and returns the decorated blocks
/// together with the filled occurrence index.
pub fn mark_blocks<'a>(
    query: &WordQuery,
    blocks: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> Result<(Vec<String>, WordIndex)> {
    let mut index = WordIndex::new(query);
    let Some(marker) = WordMarker::new(query)? else {
        return Ok((
            blocks.into_iter().map(|(_, html)| html.to_string()).collect(),
            index,
        ));
    };
    let marked = blocks
        .into_iter()
        .map(|(anchor, html)| marker.mark(html, anchor, &mut index))
        .collect();
    debug!(
        words = query.words().len(),
        total = (0..query.words().len()).map(|w| index.count(w)).sum::<usize>(),
        "marked searched words"
    );
    Ok((marked, index))
}

/// Nested `<ul>` lists, one level per relative title depth.
pub fn toc_html(toc: &Toc) -> String {
    let mut html = String::new();
    let mut prev: isize = -1;
    for entry in toc.entries() {
        let level = entry.level as isize;
        for _ in level..prev {
            html.push_str("</ul>");
        }
        for _ in prev..level {
            html.push_str("<ul>");
        }
        let _ = write!(
            html,
            "<li><a href=\"#{}\">{}</a></li>",
            escape_html(&entry.anchor),
            escape_html(&entry.text)
        );
        prev = level;
    }
    for _ in -1..prev {
        html.push_str("</ul>");
    }
    html
}

/// Buttons of the word finder panel, one per searched word.
pub fn word_panel_html(query: &WordQuery) -> String {
    let mut html = String::from("<div class=\"find_words\"><span class=\"hide\">X</span>");
    for (idx, word) in query.words().iter().enumerate() {
        let _ = write!(
            html,
            "<span class=\"word\" data-word=\"{idx}\">{}</span>",
            escape_html(word)
        );
    }
    html.push_str("</div>");
    html
}

/// Classes put on an element bookmarked at `index`.
pub fn bookmark_class(index: usize) -> String {
    format!("bookmark bm{index}")
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    use readmark_core::Title;

    fn mark_one(query: &str, html: &str) -> (String, WordIndex) {
        let query = WordQuery::parse(query);
        let (mut marked, index) = mark_blocks(&query, [("_p0", html)]).unwrap();
        (marked.remove(0), index)
    }

    #[test]
    fn marks_words_case_insensitively() {
        let (html, index) = mark_one("whale", "The Whale and the whale.");
        assert_eq!(
            html,
            "The <span class=\"word\" id=\"word-0-0\">Whale</span> and the \
             <span class=\"word\" id=\"word-0-1\">whale</span>."
        );
        assert_eq!(index.count(0), 2);
    }

    #[test]
    fn leaves_tags_and_attributes_alone() {
        let (html, index) = mark_one("title", "<a title=\"title\" href=\"#t\">A title</a>");
        assert_eq!(
            html,
            "<a title=\"title\" href=\"#t\">A <span class=\"word\" id=\"word-0-0\">title</span></a>"
        );
        assert_eq!(index.count(0), 1);
    }

    #[test]
    fn phrase_spans_punctuation_and_entities() {
        let (html, index) = mark_one("old man", "the old&nbsp;man, the old,\n man");
        assert_eq!(index.count(0), 2);
        assert!(html.contains("id=\"word-0-0\">old&nbsp;man</span>"));
        assert!(html.contains("id=\"word-0-1\">old,\n man</span>"));
    }

    #[test]
    fn each_word_gets_its_own_numbering_across_blocks() {
        let query = WordQuery::parse("sea,ship");
        let (marked, mut index) =
            mark_blocks(&query, [("_p0", "sea ship"), ("_p1", "ship sea ship")]).unwrap();
        assert!(marked[1].contains("id=\"word-1-2\">ship</span>"));
        assert!(marked[1].contains("id=\"word-0-1\">sea</span>"));
        assert_eq!(index.count(0), 2);
        assert_eq!(index.count(1), 3);
        assert_eq!(index.prev(1).unwrap().block, "_p1");
    }

    #[test]
    fn entities_are_never_split() {
        let (html, index) = mark_one("amp,nbsp", "salt &amp; pepper&nbsp;amp");
        assert_eq!(
            html,
            "salt &amp; pepper&nbsp;<span class=\"word\" id=\"word-0-0\">amp</span>"
        );
        assert_eq!(index.count(0), 1);
        assert_eq!(index.count(1), 0);
    }

    #[test]
    fn special_characters_are_literal() {
        let (html, index) = mark_one("c++", "learn c++ or c");
        assert_eq!(index.count(0), 1);
        assert!(html.contains(">c++</span>"));
    }

    #[test]
    fn empty_query_passes_html_through() {
        let (html, index) = mark_one("", "<p>text</p>");
        assert_eq!(html, "<p>text</p>");
        assert!(index.words().is_empty());
    }

    #[test]
    fn toc_html_nests_by_level() {
        let titles: Vec<Title> = [(2, "Book"), (3, "Ch 1"), (4, "Sec"), (3, "Ch 2"), (2, "Notes")]
            .iter()
            .enumerate()
            .map(|(i, (depth, text))| Title {
                id: format!("title-{i}"),
                top: 0,
                depth: *depth,
                text: text.to_string(),
            })
            .collect();
        let toc = Toc::build(&titles).unwrap();
        assert_eq!(
            toc_html(&toc),
            "<ul><li><a href=\"#title-0\">Book</a></li>\
             <ul><li><a href=\"#title-1\">Ch 1</a></li>\
             <ul><li><a href=\"#title-2\">Sec</a></li>\
             </ul><li><a href=\"#title-3\">Ch 2</a></li>\
             </ul><li><a href=\"#title-4\">Notes</a></li></ul>"
        );
    }

    #[test]
    fn panel_and_bookmark_markup() {
        let panel = word_panel_html(&WordQuery::parse("a<b,c"));
        assert!(panel.contains("data-word=\"0\">a&lt;b</span>"));
        assert!(panel.contains("data-word=\"1\">c</span>"));
        assert_eq!(bookmark_class(3), "bookmark bm3");
    }
}
