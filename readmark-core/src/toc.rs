use crate::layout::Title;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocEntry {
    pub anchor: String,
    /// Depth relative to the shallowest title, starting at 0.
    pub level: usize,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toc {
    entries: Vec<TocEntry>,
}

impl Toc {
    /// Returns `None` when there are fewer than two titles; a one-line table
    /// of contents is not worth showing.
    pub fn build(titles: &[Title]) -> Option<Self> {
        if titles.len() < 2 {
            return None;
        }
        let min_depth = titles.iter().map(|t| t.depth).min().unwrap_or(0);
        let entries = titles
            .iter()
            .map(|t| TocEntry {
                anchor: t.id.clone(),
                level: t.depth - min_depth,
                text: t.text.trim().to_string(),
            })
            .collect();
        Some(Self { entries })
    }

    pub fn entries(&self) -> &[TocEntry] {
        &self.entries
    }

    pub fn position_of(&self, anchor: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.anchor == anchor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn title(id: &str, depth: usize, text: &str) -> Title {
        Title {
            id: id.to_string(),
            top: 0,
            depth,
            text: text.to_string(),
        }
    }

    #[test]
    fn single_title_yields_no_toc() {
        assert!(Toc::build(&[]).is_none());
        assert!(Toc::build(&[title("t0", 4, "Only")]).is_none());
    }

    #[test]
    fn levels_are_relative_to_shallowest_title() {
        let toc = Toc::build(&[
            title("t0", 5, " Part One "),
            title("t1", 6, "Chapter 1"),
            title("t2", 7, "Section"),
            title("t3", 5, "Part Two"),
        ])
        .unwrap();
        let levels: Vec<usize> = toc.entries().iter().map(|e| e.level).collect();
        assert_eq!(levels, vec![0, 1, 2, 0]);
        assert_eq!(toc.entries()[0].text, "Part One");
        assert_eq!(toc.position_of("t2"), Some(2));
        assert_eq!(toc.position_of("nope"), None);
    }
}
