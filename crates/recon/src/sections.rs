//! Section-header detection for the legacy log.
//!
//! The log is segmented into host sections by markup that depends on how it
//! was exported. A [`SectionBoundary`] finds the headers; the parser only
//! needs their byte offsets and labels.

use regex::Regex;

use crate::config::{LogConfig, SectionDialect};
use crate::error::ReconError;

/// A recognised header: entries at or after `offset` belong to `label`
/// until the next header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionHeader {
    pub offset: usize,
    pub label: String,
}

pub trait SectionBoundary {
    /// Headers found in `text`, in ascending offset order.
    fn headers(&self, text: &str) -> Vec<SectionHeader>;
}

/// Treats the whole log as one unlabeled section.
pub struct NoSections;

impl SectionBoundary for NoSections {
    fn headers(&self, _text: &str) -> Vec<SectionHeader> {
        Vec::new()
    }
}

/// Headers located by a regex whose first capture group is the label.
pub struct RegexSections {
    pattern: Regex,
    strip_rtf: bool,
}

const RTF_HEADER: &str =
    r"\\fs36[^\n]*?\\cf0(?:\s*\\[a-z]+-?\d*)*\s*([A-Z][A-Z0-9 (),&/'\-]*[A-Z0-9)])";
const MARKDOWN_HEADER: &str = r"(?m)^#{1,6}[ \t]+(.+?)[ \t#]*$";

impl RegexSections {
    pub fn new(pattern: &str) -> Result<Self, ReconError> {
        let compiled = Regex::new(pattern).map_err(|e| ReconError::SectionPattern {
            pattern: pattern.into(),
            reason: e.to_string(),
        })?;
        if compiled.captures_len() < 2 {
            return Err(ReconError::SectionPattern {
                pattern: pattern.into(),
                reason: "pattern needs a capture group for the section label".into(),
            });
        }
        Ok(Self {
            pattern: compiled,
            strip_rtf: false,
        })
    }

    /// `\fs36 ... \cf0 HOST NAME` header runs in RTF exports.
    pub fn rtf() -> Result<Self, ReconError> {
        Ok(Self {
            strip_rtf: true,
            ..Self::new(RTF_HEADER)?
        })
    }

    /// `# Host name` lines.
    pub fn markdown() -> Result<Self, ReconError> {
        Self::new(MARKDOWN_HEADER)
    }
}

impl SectionBoundary for RegexSections {
    fn headers(&self, text: &str) -> Vec<SectionHeader> {
        self.pattern
            .captures_iter(text)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                let raw = caps.get(1)?.as_str();
                let label = if self.strip_rtf {
                    strip_rtf_controls(raw)
                } else {
                    collapse_whitespace(raw)
                };
                (!label.is_empty()).then(|| SectionHeader {
                    offset: whole.start(),
                    label,
                })
            })
            .collect()
    }
}

/// Build the boundary strategy named by the log config.
pub fn boundary_for(config: &LogConfig) -> Result<Box<dyn SectionBoundary>, ReconError> {
    Ok(match config.sections {
        SectionDialect::Rtf => Box::new(RegexSections::rtf()?),
        SectionDialect::Markdown => Box::new(RegexSections::markdown()?),
        SectionDialect::None => Box::new(NoSections),
        SectionDialect::Custom => {
            let pattern = config.section_pattern.as_deref().ok_or_else(|| {
                ReconError::ConfigValidation(
                    "log.sections = \"custom\" requires log.section_pattern".into(),
                )
            })?;
            Box::new(RegexSections::new(pattern)?)
        }
    })
}

fn strip_rtf_controls(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            // control word: \name[-]digits[ ]
            while chars.peek().is_some_and(|c| c.is_ascii_alphabetic()) {
                chars.next();
            }
            if chars.peek() == Some(&'-') {
                chars.next();
            }
            while chars.peek().is_some_and(|c| c.is_ascii_digit()) {
                chars.next();
            }
            if chars.peek() == Some(&' ') {
                chars.next();
            }
            continue;
        }
        out.push(c);
    }
    collapse_whitespace(&out)
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rtf_headers_with_offsets() {
        let text = "{\\rtf1 intro\n\\b\\fs36 \\cf2 \\cf0 DUNWOODY\\\nWeek 1 (01/07/2024): 100 sandwiches\n\\fs36 \\cf0 EAST COBB (SANDY SPRINGS)\\\nWeek 1 (01/07/2024): 50 sandwiches";
        let headers = RegexSections::rtf().unwrap().headers(text);
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[0].label, "DUNWOODY");
        assert_eq!(headers[1].label, "EAST COBB (SANDY SPRINGS)");
        assert!(headers[0].offset < headers[1].offset);
        assert!(text[headers[1].offset..].starts_with("\\fs36"));
    }

    #[test]
    fn markdown_headers() {
        let text = "# Alpharetta\nWeek 2 (01/14/2024): 10 sandwiches\n## Roswell  ##\n";
        let headers = RegexSections::markdown().unwrap().headers(text);
        let labels: Vec<_> = headers.iter().map(|h| h.label.as_str()).collect();
        assert_eq!(labels, vec!["Alpharetta", "Roswell"]);
    }

    #[test]
    fn custom_pattern_requires_group() {
        assert!(RegexSections::new("HOST:").is_err());
        assert!(RegexSections::new("HOST: (.+").is_err());
        let custom = RegexSections::new(r"(?m)^HOST: (.+)$").unwrap();
        let headers = custom.headers("HOST: Midtown\nWeek 1 (01/01/2024): 5 sandwiches");
        assert_eq!(headers[0].label, "Midtown");
        assert_eq!(headers[0].offset, 0);
    }

    #[test]
    fn strips_control_words() {
        assert_eq!(strip_rtf_controls("SANDY \\b0 SPRINGS"), "SANDY SPRINGS");
        assert_eq!(strip_rtf_controls("\\cf2  ROSWELL"), "ROSWELL");
    }

    #[test]
    fn none_dialect_has_no_headers() {
        let config = LogConfig {
            sections: SectionDialect::None,
            ..LogConfig::default()
        };
        let boundary = boundary_for(&config).unwrap();
        assert!(boundary.headers("# Looks like a header").is_empty());
    }
}
