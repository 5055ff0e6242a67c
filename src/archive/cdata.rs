//! CDATA wrapping for free text

const TERMINATOR: &str = "]]>";

/// Split `text` into pieces that can each be written as one CDATA section.
///
/// A literal `]]>` would end the section early, so it is split between two
/// sections: `a]]>b` becomes `a]]` and `>b`, written back to back as
/// `<![CDATA[a]]]]><![CDATA[>b]]>`. A reader concatenating adjacent sections
/// gets the original text back.
pub fn cdata_sections(text: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    while let Some(pos) = text[start..].find(TERMINATOR) {
        let split = start + pos + 2;
        pieces.push(&text[start..split]);
        start = split;
    }
    pieces.push(&text[start..]);
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_one_section() {
        assert_eq!(cdata_sections("hello <b>world</b>"), vec!["hello <b>world</b>"]);
        assert_eq!(cdata_sections(""), vec![""]);
    }

    #[test]
    fn test_terminator_is_split() {
        let pieces = cdata_sections("a]]>b]]>c");
        assert_eq!(pieces, vec!["a]]", ">b]]", ">c"]);
        assert!(pieces.iter().all(|p| !p.contains(TERMINATOR)));
        assert_eq!(pieces.concat(), "a]]>b]]>c");
    }

    #[test]
    fn test_terminator_at_edges() {
        assert_eq!(cdata_sections("]]>"), vec!["]]", ">"]);
        assert_eq!(cdata_sections("x]]]>"), vec!["x]]]", ">"]);
    }
}
