//! Regular expression support: XPath-style flag handling and the
//! alternating match/separator iterator behind `matches()` and
//! `tokenize()`.

use fancy_regex::Regex;

use crate::error::{Error, ErrorCode};

/// Compile a pattern with XPath flags. `i m s x` translate to the
/// engine's inline flags; any other flag letter is `FORX0001`, a pattern
/// the engine rejects is `FORX0002`.
pub fn compile(pattern: &str, flags: &str) -> Result<Regex, Error> {
    let mut inline = String::new();
    for f in flags.chars() {
        match f {
            'i' | 'm' | 's' | 'x' => inline.push(f),
            _ => {
                return Err(Error::dynamic(
                    ErrorCode::FORX0001,
                    format!("invalid regular expression flag '{f}'"),
                ));
            }
        }
    }
    let full = if inline.is_empty() {
        pattern.to_string()
    } else {
        format!("(?{inline}){pattern}")
    };
    Regex::new(&full).map_err(|e| {
        Error::dynamic(
            ErrorCode::FORX0002,
            format!("invalid regular expression: {e}"),
        )
    })
}

/// One segment of the input: either a stretch the pattern matched (with
/// its capture groups) or the stretch between two matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Matching {
        text: String,
        /// Captured groups by number, group 1 first.
        groups: Vec<Option<String>>,
    },
    Separator(String),
}

impl Segment {
    pub fn is_matching(&self) -> bool {
        matches!(self, Segment::Matching { .. })
    }

    pub fn text(&self) -> &str {
        match self {
            Segment::Matching { text, .. } => text,
            Segment::Separator(s) => s,
        }
    }

    /// Captured group by 1-based number; group 0 is the whole match.
    pub fn group(&self, n: usize) -> Option<&str> {
        match self {
            Segment::Matching { text, groups } => {
                if n == 0 {
                    Some(text)
                } else {
                    groups.get(n - 1).and_then(|g| g.as_deref())
                }
            }
            Segment::Separator(_) => None,
        }
    }
}

/// Alternating iterator over the matched and unmatched substrings of an
/// input. Zero-length matches are skipped: the scan advances one
/// character past them so the iteration always terminates.
pub struct RegexIterator {
    segments: std::vec::IntoIter<Segment>,
}

impl RegexIterator {
    pub fn new(input: &str, regex: &Regex) -> Result<Self, Error> {
        let mut segments = Vec::new();
        // `seg_start` marks the beginning of the current unmatched run;
        // `scan` is where the engine looks next. They diverge only while
        // stepping over zero-length matches.
        let mut seg_start = 0usize;
        let mut scan = 0usize;
        while scan <= input.len() {
            match regex.find_from_pos(input, scan).map_err(engine_failure)? {
                Some(m) if m.start() == m.end() => {
                    if m.end() >= input.len() {
                        break;
                    }
                    scan = m.start()
                        + input[m.start()..]
                            .chars()
                            .next()
                            .map_or(1, char::len_utf8);
                }
                Some(m) => {
                    if m.start() > seg_start {
                        segments.push(Segment::Separator(
                            input[seg_start..m.start()].to_string(),
                        ));
                    }
                    let caps = regex
                        .captures_from_pos(input, m.start())
                        .map_err(engine_failure)?;
                    let groups = caps.map_or_else(Vec::new, |c| {
                        (1..c.len())
                            .map(|i| c.get(i).map(|g| g.as_str().to_string()))
                            .collect()
                    });
                    segments.push(Segment::Matching {
                        text: input[m.start()..m.end()].to_string(),
                        groups,
                    });
                    seg_start = m.end();
                    scan = m.end();
                }
                None => break,
            }
        }
        if seg_start < input.len() {
            segments.push(Segment::Separator(input[seg_start..].to_string()));
        }
        Ok(Self {
            segments: segments.into_iter(),
        })
    }
}

fn engine_failure(e: fancy_regex::Error) -> Error {
    Error::dynamic(
        ErrorCode::FORX0002,
        format!("regular expression evaluation failed: {e}"),
    )
}

impl Iterator for RegexIterator {
    type Item = Segment;

    fn next(&mut self) -> Option<Segment> {
        self.segments.next()
    }
}

/// `matches()` semantics: does the pattern match anywhere in the input.
pub fn matches(input: &str, pattern: &str, flags: &str) -> Result<bool, Error> {
    let re = compile(pattern, flags)?;
    re.is_match(input).map_err(engine_failure)
}

/// `tokenize()` semantics: the separator substrings between matches,
/// with leading and adjacent matches contributing empty tokens.
pub fn tokenize(input: &str, pattern: &str, flags: &str) -> Result<Vec<String>, Error> {
    if input.is_empty() {
        return Ok(Vec::new());
    }
    let re = compile(pattern, flags)?;
    let mut tokens = Vec::new();
    let mut pos = 0usize;
    loop {
        match re.find_from_pos(input, pos).map_err(engine_failure)? {
            Some(m) if m.start() != m.end() => {
                tokens.push(input[pos..m.start()].to_string());
                pos = m.end();
            }
            _ => break,
        }
    }
    tokens.push(input[pos..].to_string());
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iterator_alternates_separator_and_match() {
        let re = compile("[0-9]+", "").unwrap();
        let segs: Vec<Segment> = RegexIterator::new("a12b3", &re).unwrap().collect();
        assert_eq!(
            segs.iter().map(Segment::text).collect::<Vec<_>>(),
            vec!["a", "12", "b", "3"]
        );
        assert!(!segs[0].is_matching());
        assert!(segs[1].is_matching());
    }

    #[test]
    fn captured_groups_are_reachable_from_matching_segments() {
        let re = compile("([a-z])([0-9])", "").unwrap();
        let segs: Vec<Segment> = RegexIterator::new("x a7 y", &re).unwrap().collect();
        let m = segs.iter().find(|s| s.is_matching()).unwrap();
        assert_eq!(m.group(1), Some("a"));
        assert_eq!(m.group(2), Some("7"));
        assert_eq!(m.group(0), Some("a7"));
    }

    #[test]
    fn zero_length_matches_are_skipped() {
        let re = compile("x?", "").unwrap();
        let segs: Vec<Segment> = RegexIterator::new("axb", &re).unwrap().collect();
        // Only the real 'x' match survives; the scan still terminates.
        assert_eq!(
            segs.iter()
                .filter(|s| s.is_matching())
                .map(Segment::text)
                .collect::<Vec<_>>(),
            vec!["x"]
        );
    }

    #[test]
    fn invalid_flag_and_pattern_codes() {
        assert_eq!(
            compile("a", "q").unwrap_err().code,
            ErrorCode::FORX0001
        );
        assert_eq!(
            compile("(", "").unwrap_err().code,
            ErrorCode::FORX0002
        );
    }

    #[test]
    fn case_insensitive_flag_applies() {
        assert!(matches("ABC", "abc", "i").unwrap());
        assert!(!matches("ABC", "abc", "").unwrap());
    }

    #[test]
    fn tokenize_splits_on_separator_pattern() {
        assert_eq!(
            tokenize("a,b,,c", ",", "").unwrap(),
            vec!["a", "b", "", "c"]
        );
        assert!(tokenize("", ",", "").unwrap().is_empty());
    }
}
