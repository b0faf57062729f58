use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

use anyhow::{Context, Result};

/// Class id → label mapping loaded from a label file.
///
/// Labels only name detections for logs and previews; which class counts as
/// a person is a detector setting, not something read from this file.
///
/// Each line is either `"<index> <label>"` (separator: any run of spaces,
/// tabs or colons) or a bare label whose index is its line number.
#[derive(Clone, Debug, Default)]
pub struct Labels {
    entries: BTreeMap<u32, String>,
}

impl Labels {
    /// Load a label file. A missing or unreadable file is fatal to detector construction.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read label file {}", path.display()))?;
        Ok(Self::parse(&raw))
    }

    pub fn parse(raw: &str) -> Self {
        static SEPARATOR: OnceLock<regex::Regex> = OnceLock::new();
        let sep = SEPARATOR.get_or_init(|| regex::Regex::new(r"[:\s]+").unwrap());

        let mut entries = BTreeMap::new();
        for (row, line) in raw.lines().enumerate() {
            let mut parts = sep.splitn(line.trim(), 2);
            let first = parts.next().unwrap_or("").trim();
            match parts.next() {
                Some(label) if is_index(first) => {
                    if let Ok(index) = first.parse::<u32>() {
                        entries.insert(index, label.trim().to_string());
                    }
                }
                _ => {
                    if !first.is_empty() {
                        entries.insert(row as u32, first.to_string());
                    }
                }
            }
        }
        Self { entries }
    }

    pub fn get(&self, class_id: u32) -> Option<&str> {
        self.entries.get(&class_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn is_index(token: &str) -> bool {
    !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_indexed_labels() {
        let labels = Labels::parse("0  person\n1 bicycle\n2:car\n");
        assert_eq!(labels.get(0), Some("person"));
        assert_eq!(labels.get(1), Some("bicycle"));
        assert_eq!(labels.get(2), Some("car"));
    }

    #[test]
    fn bare_labels_use_line_number() {
        let labels = Labels::parse("???\nperson\nbicycle\n");
        assert_eq!(labels.get(0), Some("???"));
        assert_eq!(labels.get(1), Some("person"));
        assert_eq!(labels.get(2), Some("bicycle"));
    }

    #[test]
    fn bare_label_keeps_first_token_only() {
        let labels = Labels::parse("traffic light\n");
        assert_eq!(labels.get(0), Some("traffic"));
    }

    #[test]
    fn blank_lines_keep_numbering() {
        let labels = Labels::parse("person\n\ncar\n");
        assert_eq!(labels.get(1), None);
        assert_eq!(labels.get(2), Some("car"));
        assert_eq!(labels.len(), 2);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(Labels::load("/nonexistent/coco_labels.txt").is_err());
    }
}
