//! Glob matching for `KEYS`.
//!
//! Supported syntax:
//! - `*` matches any run of bytes, including none
//! - `?` matches exactly one byte
//! - `[abc]`, `[a-z]`, `[^a]` match one byte from (or not from) a class
//! - `\x` matches `x` literally
//!
//! Matching works on raw bytes, so binary keys are matched too.

#[derive(Debug, Clone)]
pub struct GlobPattern {
    pattern: Vec<u8>,
}

impl GlobPattern {
    pub fn new(pattern: &[u8]) -> Self {
        Self {
            pattern: pattern.to_vec(),
        }
    }

    /// True if the pattern is a bare `*`, which matches every key.
    pub fn matches_all(&self) -> bool {
        self.pattern == b"*"
    }

    pub fn matches(&self, text: &[u8]) -> bool {
        // Greedy scan; on mismatch, backtrack to the most recent `*` and let
        // it absorb one more byte.
        let pattern = &self.pattern[..];
        let (mut p, mut t) = (0usize, 0usize);
        let mut star: Option<(usize, usize)> = None;

        while t < text.len() {
            if p < pattern.len() {
                match pattern[p] {
                    b'*' => {
                        star = Some((p, t));
                        p += 1;
                        continue;
                    }
                    _ => {
                        if let Some(width) = match_one(&pattern[p..], text[t]) {
                            p += width;
                            t += 1;
                            continue;
                        }
                    }
                }
            }
            match star {
                Some((star_p, star_t)) => {
                    p = star_p + 1;
                    t = star_t + 1;
                    star = Some((star_p, star_t + 1));
                }
                None => return false,
            }
        }

        pattern[p..].iter().all(|&c| c == b'*')
    }
}

/// Matches a single byte against the token at the front of `pattern`.
/// Returns the token's width on success.
fn match_one(pattern: &[u8], byte: u8) -> Option<usize> {
    match pattern[0] {
        b'?' => Some(1),
        b'\\' if pattern.len() > 1 => (pattern[1] == byte).then_some(2),
        b'[' => {
            let mut i = 1;
            let negate = pattern.get(1) == Some(&b'^');
            if negate {
                i += 1;
            }

            let mut matched = false;
            while i < pattern.len() && pattern[i] != b']' {
                if pattern[i] == b'\\' && i + 1 < pattern.len() {
                    i += 1;
                    matched |= pattern[i] == byte;
                } else if i + 2 < pattern.len() && pattern[i + 1] == b'-' && pattern[i + 2] != b']' {
                    let (lo, hi) = if pattern[i] <= pattern[i + 2] {
                        (pattern[i], pattern[i + 2])
                    } else {
                        (pattern[i + 2], pattern[i])
                    };
                    matched |= (lo..=hi).contains(&byte);
                    i += 2;
                } else {
                    matched |= pattern[i] == byte;
                }
                i += 1;
            }

            // An unterminated class never matches.
            if i >= pattern.len() {
                return None;
            }
            (matched != negate).then_some(i + 1)
        }
        c => (c == byte).then_some(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn glob(p: &str) -> GlobPattern {
        GlobPattern::new(p.as_bytes())
    }

    #[test]
    fn test_star_and_question_mark() {
        let pattern = glob("h*llo");
        assert!(pattern.matches(b"hello"));
        assert!(pattern.matches(b"hallo"));
        assert!(pattern.matches(b"hllo"));
        assert!(pattern.matches(b"heeeello"));
        assert!(!pattern.matches(b"world"));

        let pattern = glob("h?llo");
        assert!(pattern.matches(b"hello"));
        assert!(!pattern.matches(b"hllo"));
        assert!(!pattern.matches(b"heello"));

        let pattern = glob("*");
        assert!(pattern.matches_all());
        assert!(pattern.matches(b""));
        assert!(pattern.matches(b"anything"));

        assert!(glob("user:*:name").matches(b"user:42:name"));
        assert!(!glob("user:*:name").matches(b"user:42:email"));
    }

    #[test]
    fn test_classes() {
        let pattern = glob("h[ae]llo");
        assert!(pattern.matches(b"hello"));
        assert!(pattern.matches(b"hallo"));
        assert!(!pattern.matches(b"hillo"));

        assert!(glob("k[0-9]").matches(b"k7"));
        assert!(!glob("k[0-9]").matches(b"kx"));
        assert!(glob("h[^e]llo").matches(b"hallo"));
        assert!(!glob("h[^e]llo").matches(b"hello"));
        assert!(!glob("h[ello").matches(b"hello"));
    }

    #[test]
    fn test_escape_and_binary() {
        assert!(glob("a\\*b").matches(b"a*b"));
        assert!(!glob("a\\*b").matches(b"axb"));
        assert!(GlobPattern::new(b"\x00*").matches(b"\x00\xff"));
    }
}
