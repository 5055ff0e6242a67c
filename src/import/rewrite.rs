//! Rewriting of source references embedded in rich content

use crate::types::{PostId, PostOldId};
use regex_lite::{Captures, Regex};
use std::sync::OnceLock;

static RE_MODULE_BLOCK: OnceLock<Regex> = OnceLock::new();
static RE_BLOCK_ID: OnceLock<Regex> = OnceLock::new();

/// Replace every occurrence of a source URL with its destination URL.
///
/// `pairs` must be ordered longest source first. The content is scanned once
/// and at each position the longest matching source wins, so a URL is never
/// rewritten through a shorter URL it contains and replaced text is never
/// rewritten again. Returns the new content and the number of replacements.
pub fn replace_urls(content: &str, pairs: &[(&str, &str)]) -> (String, usize) {
    if pairs.is_empty() || content.is_empty() {
        return (content.to_string(), 0);
    }

    let mut first_bytes = [false; 256];
    for (old, _) in pairs {
        if let Some(b) = old.as_bytes().first() {
            first_bytes[*b as usize] = true;
        }
    }

    let bytes = content.as_bytes();
    let mut out = String::with_capacity(content.len());
    let mut copied_to = 0;
    let mut i = 0;
    let mut count = 0;

    while i < bytes.len() {
        if first_bytes[bytes[i] as usize] && content.is_char_boundary(i) {
            let rest = &content[i..];
            if let Some((old, new)) = pairs.iter().find(|(old, _)| !old.is_empty() && rest.starts_with(old)) {
                out.push_str(&content[copied_to..i]);
                out.push_str(new);
                i += old.len();
                copied_to = i;
                count += 1;
                continue;
            }
        }
        i += 1;
    }
    out.push_str(&content[copied_to..]);
    (out, count)
}

/// Result of rewriting block references in one piece of content
#[derive(Debug, Default, PartialEq, Eq)]
pub struct BlockRewrite {
    pub content: String,
    /// Ids rewritten
    pub rewritten: usize,
    /// Source ids with no mapping, left untouched
    pub unresolved: Vec<u64>,
}

/// Rewrite `moduleId=N` and `pageId=N` inside `<!-- module-... -->` block
/// comments through `lookup`. Ids outside such comments are not touched.
pub fn rewrite_block_references<F>(content: &str, lookup: F) -> BlockRewrite
where
    F: Fn(PostOldId) -> Option<PostId>,
{
    let block_re =
        RE_MODULE_BLOCK.get_or_init(|| Regex::new(r"<!--\s*module-[\w-]+[^>]*?-->").unwrap());
    let id_re = RE_BLOCK_ID.get_or_init(|| Regex::new(r"\b(moduleId|pageId)=(\d+)").unwrap());

    let mut rewritten = 0;
    let mut unresolved = Vec::new();

    let content = block_re
        .replace_all(content, |block: &Captures| {
            id_re
                .replace_all(&block[0], |caps: &Captures| {
                    let raw = &caps[2];
                    match raw.parse::<u64>().ok().and_then(|id| lookup(PostOldId(id))) {
                        Some(new_id) => {
                            rewritten += 1;
                            format!("{}={}", &caps[1], new_id)
                        }
                        None => {
                            if let Ok(id) = raw.parse() {
                                unresolved.push(id);
                            }
                            caps[0].to_string()
                        }
                    }
                })
                .into_owned()
        })
        .into_owned();

    BlockRewrite {
        content,
        rewritten,
        unresolved,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_longest_match_wins() {
        let pairs = [
            ("http://old/u/a.jpg-300x200.jpg", "http://new/u/a-300x200.jpg"),
            ("http://old/u/a.jpg", "http://new/u/a.jpg"),
        ];
        let (out, count) = replace_urls(
            r#"<img src="http://old/u/a.jpg-300x200.jpg"><a href="http://old/u/a.jpg">"#,
            &pairs,
        );
        assert_eq!(
            out,
            r#"<img src="http://new/u/a-300x200.jpg"><a href="http://new/u/a.jpg">"#
        );
        assert_eq!(count, 2);
    }

    #[test]
    fn test_replacement_is_not_rewritten_again() {
        let pairs = [("http://a/x", "http://a/x/y"), ("http://a/x/y", "nope")];
        // Longest first ordering
        let mut sorted = pairs.to_vec();
        sorted.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        let (out, _) = replace_urls("see http://a/x", &sorted);
        assert_eq!(out, "see http://a/x/y");
    }

    #[test]
    fn test_multibyte_content_is_preserved() {
        let pairs = [("http://old/é.png", "http://new/e.png")];
        let (out, count) = replace_urls("café → http://old/é.png ✓", &pairs);
        assert_eq!(out, "café → http://new/e.png ✓");
        assert_eq!(count, 1);
    }

    #[test]
    fn test_block_references_rewritten() {
        let content = "<!-- module-nav moduleId=10 -->\n<p>moduleId=10 stays</p>\n<!-- module-page-link pageId=11 moduleId=10 /-->\n<!-- module-nav moduleId=99 -->";
        let lookup = |old: PostOldId| match old.get() {
            10 => Some(PostId(55)),
            11 => Some(PostId(56)),
            _ => None,
        };
        let result = rewrite_block_references(content, lookup);
        assert_eq!(
            result.content,
            "<!-- module-nav moduleId=55 -->\n<p>moduleId=10 stays</p>\n<!-- module-page-link pageId=56 moduleId=55 /-->\n<!-- module-nav moduleId=99 -->"
        );
        assert_eq!(result.rewritten, 3);
        assert_eq!(result.unresolved, vec![99]);
    }
}
