use serde::{Deserialize, Serialize};

/// A block-level element (normally a paragraph) at a vertical offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    #[serde(default)]
    pub id: String,
    pub top: u32,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Title {
    #[serde(default)]
    pub id: String,
    pub top: u32,
    /// Nesting depth of the title element in the document tree.
    pub depth: usize,
    pub text: String,
}

/// Geometry of an already rendered page as reported by the UI layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageLayout {
    #[serde(default)]
    pub book: Option<String>,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub paragraphs: Vec<Block>,
    #[serde(default)]
    pub titles: Vec<Title>,
}

impl PageLayout {
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        let mut layout: PageLayout = serde_json::from_str(raw)?;
        layout.assign_missing_ids();
        Ok(layout)
    }

    /// Paragraphs without an id become `_p{n}`, titles become `title-{n}`,
    /// numbered in document order over the unnamed ones only.
    pub fn assign_missing_ids(&mut self) {
        let mut next = 0;
        for block in self.paragraphs.iter_mut().filter(|b| b.id.is_empty()) {
            block.id = format!("_p{next}");
            next += 1;
        }
        let mut next = 0;
        for title in self.titles.iter_mut().filter(|t| t.id.is_empty()) {
            title.id = format!("title-{next}");
            next += 1;
        }
        let bottom = self
            .paragraphs
            .iter()
            .map(|b| b.top)
            .chain(self.titles.iter().map(|t| t.top))
            .max()
            .unwrap_or(0);
        self.height = self.height.max(bottom);
    }

    pub fn paragraph_index(&self) -> AnchorIndex {
        AnchorIndex::new(self.paragraphs.iter().map(|b| (b.id.clone(), b.top)))
    }

    pub fn title_index(&self) -> AnchorIndex {
        AnchorIndex::new(self.titles.iter().map(|t| (t.id.clone(), t.top)))
    }

    pub fn top_of(&self, anchor: &str) -> Option<u32> {
        self.paragraphs
            .iter()
            .find(|b| b.id == anchor)
            .map(|b| b.top)
            .or_else(|| self.titles.iter().find(|t| t.id == anchor).map(|t| t.top))
    }
}

/// Anchors in document order, searchable by vertical offset.
#[derive(Debug, Clone, Default)]
pub struct AnchorIndex {
    anchors: Vec<(String, u32)>,
}

impl AnchorIndex {
    pub fn new(anchors: impl IntoIterator<Item = (String, u32)>) -> Self {
        Self {
            anchors: anchors.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    /// Last anchor whose top is at or above `y`; the first anchor when `y`
    /// lies above all of them.
    pub fn closest(&self, y: u32) -> Option<&str> {
        if self.anchors.is_empty() {
            return None;
        }
        let (mut a, mut b) = (0, self.anchors.len());
        while b - a > 1 {
            let i = a + (b - a) / 2;
            if y < self.anchors[i].1 {
                b = i;
            } else {
                a = i;
            }
        }
        Some(self.anchors[a].0.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(tops: &[u32]) -> AnchorIndex {
        AnchorIndex::new(tops.iter().enumerate().map(|(i, t)| (format!("_p{i}"), *t)))
    }

    #[test]
    fn closest_picks_block_containing_offset() {
        let idx = index(&[0, 100, 250, 400]);
        assert_eq!(idx.closest(0), Some("_p0"));
        assert_eq!(idx.closest(99), Some("_p0"));
        assert_eq!(idx.closest(100), Some("_p1"));
        assert_eq!(idx.closest(399), Some("_p2"));
        assert_eq!(idx.closest(10_000), Some("_p3"));
    }

    #[test]
    fn closest_above_first_anchor_returns_first() {
        let idx = index(&[50, 90]);
        assert_eq!(idx.closest(10), Some("_p0"));
        assert_eq!(AnchorIndex::default().closest(10), None);
    }

    #[test]
    fn layout_fills_missing_ids_and_height() {
        let layout = PageLayout::from_json(
            r#"{
                "paragraphs": [
                    {"top": 0, "text": "one"},
                    {"id": "intro", "top": 40},
                    {"top": 80}
                ],
                "titles": [{"top": 0, "depth": 3, "text": "Part"}]
            }"#,
        )
        .unwrap();
        let ids: Vec<&str> = layout.paragraphs.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["_p0", "intro", "_p1"]);
        assert_eq!(layout.titles[0].id, "title-0");
        assert_eq!(layout.height, 80);
        assert_eq!(layout.top_of("intro"), Some(40));
        assert_eq!(layout.top_of("title-0"), Some(0));
        assert_eq!(layout.top_of("missing"), None);
    }
}
