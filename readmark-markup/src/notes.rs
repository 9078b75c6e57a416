//! Note references and back-links.
//!
//! Every `<a href="#id">` pointing at an element of the same page gets the
//! note text as its tooltip, and the note gets a link back to the reference.

use std::fmt::Write as _;
use std::ops::Range;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Tooltips longer than this many characters are cut and get `...`.
pub const NOTE_TITLE_LIMIT: usize = 600;

static LINK_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<a\s[^>]*>").expect("valid link pattern"));
static ANY_LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<a\b").expect("valid link pattern"));
static ATTRIBUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([A-Za-z_:][-A-Za-z0-9_:.]*)\s*=\s*"([^"]*)""#).expect("valid attribute pattern")
});
static ELEMENT_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<(/?)([A-Za-z][A-Za-z0-9]*)\b[^>]*>").expect("valid element pattern")
});
static ANY_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid tag pattern"));
static TITLE_DIV: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<div\b[^>]*\bclass="(?:[^"]*\s)?title(?:\s[^"]*)?"[^>]*>"#)
        .expect("valid title pattern")
});
static BLANK_OR_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*[0-9]*\s*$").expect("valid number pattern"));
static NEWLINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n+").expect("valid newline pattern"));
static NUMBER_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]+\n").expect("valid number pattern"));

struct Element {
    inner: Range<usize>,
    end: usize,
}

/// Wires tooltips and back-links for all same-page links of `html`.
///
/// A link that already has a `title` keeps it. Notes that contain a link of
/// their own are left alone, as is every link whose target is missing.
pub fn link_notes(html: &str) -> String {
    let mut doc = html.to_string();
    let mut cursor = 0;
    let mut linked = 0;

    while let Some(found) = LINK_TAG.find(&doc[cursor..]) {
        let tag_range = cursor + found.start()..cursor + found.end();
        cursor = tag_range.end;
        let tag = doc[tag_range.clone()].to_string();
        let attrs = attributes(&tag);
        let is_backlink = attr(&attrs, "class")
            .is_some_and(|class| class.split_whitespace().any(|c| c == "backlink"));
        if is_backlink {
            continue;
        }
        let Some(target) = attr(&attrs, "href")
            .and_then(|href| href.strip_prefix('#'))
            .filter(|target| !target.is_empty())
        else {
            continue;
        };
        let Some(note) = find_by_id(&doc, target) else {
            continue;
        };

        let title = match attr(&attrs, "title") {
            Some(existing) if !existing.is_empty() => None,
            _ => Some(note_title(&doc, &note)),
        };
        let wants_backlink = !ANY_LINK.is_match(&doc[note.inner.clone()]);
        let own_id = attr(&attrs, "id").filter(|id| !id.is_empty());
        let back_id = own_id
            .map(str::to_string)
            .unwrap_or_else(|| format!("back-{target}"));
        let new_id = (wants_backlink && own_id.is_none()).then_some(back_id.as_str());

        let rewritten = rewrite_link(&tag, new_id, title.as_deref());
        doc.replace_range(tag_range.clone(), &rewritten);
        cursor = tag_range.start + rewritten.len();
        linked += 1;

        if !wants_backlink {
            continue;
        }
        let Some(note) = find_by_id(&doc, target) else {
            continue;
        };
        let inner = title_inner(&doc, &note).unwrap_or(note.inner);
        let open = format!("<a class=\"backlink\" href=\"#{back_id}\">");
        let close = "</a>";
        doc.insert_str(inner.end, close);
        doc.insert_str(inner.start, &open);
        if inner.start < cursor {
            cursor += open.len() + close.len();
        }
    }

    debug!(linked, "wired note links");
    doc
}

fn attributes(tag: &str) -> Vec<(String, String)> {
    ATTRIBUTE
        .captures_iter(tag)
        .map(|caps| (caps[1].to_ascii_lowercase(), caps[2].to_string()))
        .collect()
}

fn attr<'a>(attrs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

fn find_by_id(html: &str, id: &str) -> Option<Element> {
    ELEMENT_TAG
        .captures_iter(html)
        .filter(|caps| caps[1].is_empty())
        .find(|caps| attr(&attributes(&caps[0]), "id") == Some(id))
        .and_then(|caps| {
            let whole = caps.get(0)?;
            Some(element_at(html, whole.range(), &caps[2]))
        })
}

/// Content range of the element whose opening tag spans `open`. Unclosed and
/// self-closing elements are empty.
fn element_at(html: &str, open: Range<usize>, name: &str) -> Element {
    let empty = Element {
        inner: open.end..open.end,
        end: open.end,
    };
    if html[open.clone()].ends_with("/>") {
        return empty;
    }
    let mut depth = 1usize;
    for caps in ELEMENT_TAG.captures_iter(&html[open.end..]) {
        if !caps[2].eq_ignore_ascii_case(name) {
            continue;
        }
        let Some(whole) = caps.get(0) else {
            continue;
        };
        if caps[1].is_empty() {
            if !whole.as_str().ends_with("/>") {
                depth += 1;
            }
            continue;
        }
        depth -= 1;
        if depth == 0 {
            return Element {
                inner: open.end..open.end + whole.start(),
                end: open.end + whole.end(),
            };
        }
    }
    empty
}

fn text_of(fragment: &str) -> String {
    ANY_TAG.replace_all(fragment, "").into_owned()
}

/// Text of the first non-blank sibling after `from`, stopping at the parent's
/// closing tag.
fn following_text(html: &str, from: usize) -> Option<String> {
    let mut pos = from;
    while let Some(caps) = ELEMENT_TAG.captures(&html[pos..]) {
        if !caps[1].is_empty() {
            return None;
        }
        let whole = caps.get(0)?;
        let open = pos + whole.start()..pos + whole.end();
        let element = element_at(html, open.clone(), &caps[2]);
        let text = text_of(&html[element.inner.clone()]);
        if text.chars().any(|c| !c.is_whitespace()) {
            return Some(text);
        }
        pos = element.end.max(open.end);
    }
    None
}

fn note_title(html: &str, note: &Element) -> String {
    let mut text = text_of(&html[note.inner.clone()]);
    // A bare note number: the note body is the next paragraph.
    if BLANK_OR_NUMBER.is_match(&text) {
        text = following_text(html, note.end).unwrap_or_default();
    }
    let text = NEWLINES.replace_all(&text, "\n");
    let text = NUMBER_LINE.replace(text.trim_start(), "");
    if text.chars().count() > NOTE_TITLE_LIMIT {
        let mut cut: String = text.chars().take(NOTE_TITLE_LIMIT).collect();
        cut.push_str("...");
        cut
    } else {
        text.into_owned()
    }
}

fn title_inner(html: &str, note: &Element) -> Option<Range<usize>> {
    let found = TITLE_DIV.find(&html[note.inner.clone()])?;
    let open = note.inner.start + found.start()..note.inner.start + found.end();
    Some(element_at(html, open, "div").inner)
}

fn rewrite_link(tag: &str, id: Option<&str>, title: Option<&str>) -> String {
    let (head, tail) = match tag.strip_suffix("/>") {
        Some(head) => (head, "/>"),
        None => (&tag[..tag.len() - 1], ">"),
    };
    let mut out = head.trim_end().to_string();
    if let Some(id) = id {
        let _ = write!(out, " id=\"{id}\"");
    }
    if let Some(title) = title {
        let _ = write!(out, " title=\"{}\"", title.replace('"', "&quot;"));
    }
    out.push_str(tail);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_gets_tooltip_and_note_title_links_back() {
        let html = "<p>Call<a href=\"#n1\">1</a></p>\
                    <div id=\"n1\">\n<div class=\"title\">1</div>\n<p>The note text.</p>\n</div>";
        assert_eq!(
            link_notes(html),
            "<p>Call<a href=\"#n1\" id=\"back-n1\" title=\"The note text.\n\">1</a></p>\
             <div id=\"n1\">\n<div class=\"title\"><a class=\"backlink\" href=\"#back-n1\">1</a></div>\
             \n<p>The note text.</p>\n</div>"
        );
    }

    #[test]
    fn bare_number_takes_text_from_next_paragraph() {
        let html = "<a href=\"#n2\">2</a><p id=\"n2\">2</p><p>  </p><p>Second \"note\".</p>";
        assert_eq!(
            link_notes(html),
            "<a href=\"#n2\" id=\"back-n2\" title=\"Second &quot;note&quot;.\">2</a>\
             <p id=\"n2\"><a class=\"backlink\" href=\"#back-n2\">2</a></p><p>  </p>\
             <p>Second \"note\".</p>"
        );
    }

    #[test]
    fn note_before_reference_is_wrapped_once() {
        let html = "<div id=\"n1\">Note.</div><a href=\"#n1\">1</a>";
        assert_eq!(
            link_notes(html),
            "<div id=\"n1\"><a class=\"backlink\" href=\"#back-n1\">Note.</a></div>\
             <a href=\"#n1\" id=\"back-n1\" title=\"Note.\">1</a>"
        );
    }

    #[test]
    fn existing_title_and_linked_notes_are_kept() {
        let html = "<a title=\"Custom\" href=\"#n3\">*</a>\
                    <div id=\"n3\">See <a href=\"https://example.org\">there</a></div>";
        assert_eq!(link_notes(html), html);
    }

    #[test]
    fn own_id_is_reused_for_the_backlink() {
        let html = "<a id=\"ref7\" href=\"#n7\">7</a><p id=\"n7\">Seven</p>";
        assert_eq!(
            link_notes(html),
            "<a id=\"ref7\" href=\"#n7\" title=\"Seven\">7</a>\
             <p id=\"n7\"><a class=\"backlink\" href=\"#ref7\">Seven</a></p>"
        );
    }

    #[test]
    fn long_notes_are_cut() {
        let body = "ж".repeat(NOTE_TITLE_LIMIT + 20);
        let html = format!("<a href=\"#n\">1</a><p id=\"n\">{body}</p>");
        let linked = link_notes(&html);
        let expected = format!("title=\"{}...\"", "ж".repeat(NOTE_TITLE_LIMIT));
        assert!(linked.contains(&expected));
    }

    #[test]
    fn missing_targets_and_external_links_are_untouched() {
        let html = "<a href=\"#nowhere\">x</a><a href=\"/porcula/book/1/render\">y</a><a href=\"#\">z</a>";
        assert_eq!(link_notes(html), html);
    }
}
