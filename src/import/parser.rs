//! Streaming archive document parser
//!
//! Pull-based: the parser reads XML events until it has one complete
//! top-level record, expands only that record's subtree into a small
//! [`Node`] tree, decodes it into a [`Record`] and hands it out. Memory use is
//! bounded by the largest single record, not by the document.

use super::types::ImportError;
use crate::archive::{
    parse_date, tag, ArchiveHeader, AuthorRecord, CommentRecord, ItemRecord, MetaPair, Record,
    TermKind, TermRecord, TermRef,
};
use crate::types::{CommentOldId, PostKind, PostOldId};
use chrono::Utc;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::debug;

/// Position of the cursor in the document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    /// Before the root element, or at the top level of the archive
    Start,
    InHeader,
    InAuthorList,
    InTermList,
    InItemList,
    /// Root closed, end of input, or unrecoverable XML error
    End,
}

/// Expanded subtree of one record
#[derive(Debug, Default)]
struct Node {
    name: String,
    text: String,
    cdata: Option<String>,
    children: Vec<Node>,
}

impl Node {
    fn child(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|c| c.name == name)
    }

    fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Node> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Character data of this node. CDATA is taken verbatim; plain text is trimmed.
    fn value(&self) -> &str {
        match &self.cdata {
            Some(cdata) => cdata,
            None => self.text.trim(),
        }
    }

    fn field(&self, name: &str) -> &str {
        self.child(name).map(Node::value).unwrap_or("")
    }

    fn opt_field(&self, name: &str) -> Option<&str> {
        self.child(name).map(Node::value).filter(|v| !v.is_empty())
    }

    fn u64_field(&self, name: &str) -> Option<u64> {
        self.opt_field(name).and_then(|v| v.parse().ok())
    }

    /// Parent-style ids: absent, empty or zero mean "none"
    fn ref_field(&self, name: &str) -> Option<u64> {
        self.u64_field(name).filter(|id| *id != 0)
    }
}

fn local_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).to_string()
}

/// Read the subtree opened by `start` into a [`Node`]
fn read_node<R: BufRead>(reader: &mut Reader<R>, start: &BytesStart) -> Result<Node, ImportError> {
    let mut stack = vec![Node {
        name: local_name(start),
        ..Node::default()
    }];
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref e) => stack.push(Node {
                name: local_name(e),
                ..Node::default()
            }),
            Event::Empty(ref e) => {
                let node = Node {
                    name: local_name(e),
                    ..Node::default()
                };
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(node);
                }
            }
            Event::Text(ref e) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&e.unescape()?);
                }
            }
            Event::CData(ref e) => {
                let text = String::from_utf8(e.to_vec())
                    .map_err(|e| ImportError::XmlParse(format!("invalid UTF-8 in CDATA: {}", e)))?;
                if let Some(node) = stack.last_mut() {
                    node.cdata.get_or_insert_with(String::new).push_str(&text);
                }
            }
            Event::End(_) => {
                let node = stack.pop().ok_or_else(|| {
                    ImportError::XmlParse("unbalanced end element".to_string())
                })?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => return Ok(node),
                }
            }
            Event::Eof => {
                return Err(ImportError::XmlParse(format!(
                    "unexpected end of document inside <{}>",
                    stack.first().map(|n| n.name.as_str()).unwrap_or("?")
                )))
            }
            _ => {}
        }
        buf.clear();
    }
}

fn decode_header(node: &Node, root_version: Option<&str>) -> ArchiveHeader {
    let format_version = node
        .opt_field("format_version")
        .or(root_version)
        .unwrap_or("")
        .to_string();
    ArchiveHeader {
        format_version,
        generator: node.field("generator").to_string(),
        site_title: node.field("site_title").to_string(),
        site_url: node.field("site_url").to_string(),
        uploads_url: node.field("uploads_url").to_string(),
        module_id: node.ref_field("module_id").map(PostOldId),
        created: node.opt_field("created").and_then(parse_date),
    }
}

fn decode_author(node: &Node) -> Result<AuthorRecord, ImportError> {
    let login = node
        .opt_field("login")
        .ok_or_else(|| ImportError::MalformedRecord("author without login".to_string()))?;
    Ok(AuthorRecord {
        id: node.u64_field("id").unwrap_or(0),
        login: login.to_string(),
        email: node.field("email").to_string(),
        display_name: node.field("display_name").to_string(),
        first_name: node.field("first_name").to_string(),
        last_name: node.field("last_name").to_string(),
    })
}

fn decode_term(node: &Node, kind: TermKind) -> Result<TermRecord, ImportError> {
    let slug = node
        .opt_field("slug")
        .ok_or_else(|| ImportError::MalformedRecord(format!("<{}> without slug", node.name)))?;
    let taxonomy = match (kind, node.opt_field("taxonomy")) {
        (_, Some(taxonomy)) => taxonomy.to_string(),
        (TermKind::Category, None) => "category".to_string(),
        (TermKind::Tag, None) => "post_tag".to_string(),
        (TermKind::Custom, None) => {
            return Err(ImportError::MalformedRecord(format!(
                "term {} without taxonomy",
                slug
            )))
        }
    };
    Ok(TermRecord {
        kind,
        id: node.u64_field("id").unwrap_or(0),
        taxonomy,
        slug: slug.to_string(),
        name: node.opt_field("name").unwrap_or(slug).to_string(),
        description: node.field("description").to_string(),
        parent_slug: node.opt_field("parent").map(str::to_string),
    })
}

fn decode_meta(node: &Node) -> Vec<MetaPair> {
    node.children_named(tag::META)
        .filter_map(|m| {
            m.opt_field("key")
                .map(|key| MetaPair::new(key, m.field("value")))
        })
        .collect()
}

fn decode_comment(node: &Node, fallback_date: chrono::DateTime<Utc>) -> Result<CommentRecord, ImportError> {
    let id = node
        .u64_field("id")
        .ok_or_else(|| ImportError::MalformedRecord("comment without id".to_string()))?;
    Ok(CommentRecord {
        id: CommentOldId(id),
        author_name: node.field("author").to_string(),
        author_email: node.field("author_email").to_string(),
        author_url: node.field("author_url").to_string(),
        user_id: node.ref_field("user_id"),
        date: node
            .opt_field("date")
            .and_then(parse_date)
            .unwrap_or(fallback_date),
        content: node.field("content").to_string(),
        approved: node.opt_field("approved").unwrap_or("1").to_string(),
        comment_type: node.field("type").to_string(),
        parent: node.ref_field("parent").map(CommentOldId),
        meta: decode_meta(node),
    })
}

fn decode_item(node: &Node) -> Result<ItemRecord, ImportError> {
    let id = node
        .u64_field("id")
        .ok_or_else(|| ImportError::MalformedRecord("item without id".to_string()))?;
    let raw_kind = node.field("type");
    let kind = PostKind::parse(raw_kind).ok_or_else(|| {
        ImportError::MalformedRecord(format!("item {} has unknown type '{}'", id, raw_kind))
    })?;
    let date = node
        .opt_field("date")
        .and_then(parse_date)
        .unwrap_or_else(Utc::now);

    let terms = node
        .children_named(tag::TERM_REF)
        .filter_map(|t| {
            let slug = t.opt_field("slug")?;
            Some(TermRef {
                taxonomy: t.opt_field("taxonomy").unwrap_or("category").to_string(),
                slug: slug.to_string(),
                name: t.opt_field("name").unwrap_or(slug).to_string(),
            })
        })
        .collect();

    let comments = node
        .children_named(tag::COMMENT)
        .map(|c| decode_comment(c, date))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ItemRecord {
        id: PostOldId(id),
        kind,
        guid: node.field("guid").to_string(),
        title: node.field("title").to_string(),
        content: node.field("content").to_string(),
        excerpt: node.field("excerpt").to_string(),
        slug: node.field("slug").to_string(),
        status: node.opt_field("status").unwrap_or("publish").to_string(),
        parent: node.ref_field("parent").map(PostOldId),
        creator: node.opt_field("creator").map(str::to_string),
        date,
        modified: node
            .opt_field("modified")
            .and_then(parse_date)
            .unwrap_or(date),
        menu_order: node
            .opt_field("menu_order")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        attachment_url: node.opt_field("attachment_url").map(str::to_string),
        terms,
        meta: decode_meta(node),
        comments,
    })
}

/// Streaming parser over an archive document
pub struct ArchiveParser<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
    state: ParserState,
    /// Version declared on the root element
    root_version: Option<String>,
    records: usize,
}

impl ArchiveParser<BufReader<File>> {
    /// Open a document file
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ImportError> {
        let file = File::open(path.as_ref())?;
        Ok(Self::from_reader(BufReader::with_capacity(256 * 1024, file)))
    }
}

impl<R: BufRead> ArchiveParser<R> {
    pub fn from_reader(reader: R) -> Self {
        Self {
            reader: Reader::from_reader(reader),
            buf: Vec::with_capacity(8192),
            state: ParserState::Start,
            root_version: None,
            records: 0,
        }
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Records yielded so far
    pub fn records_read(&self) -> usize {
        self.records
    }

    /// Byte offset in the document
    pub fn position(&self) -> u64 {
        self.reader.buffer_position() as u64
    }

    fn skip(&mut self, start: &BytesStart<'static>) -> Result<(), ImportError> {
        debug!("Skipping unknown element <{}>", local_name(start));
        let mut skip_buf = Vec::new();
        self.reader.read_to_end_into(start.name(), &mut skip_buf)?;
        Ok(())
    }

    /// Decode a record element inside a list
    fn decode(&mut self, start: &BytesStart<'static>) -> Result<Option<Record>, ImportError> {
        let name = local_name(start);
        let list_item = match (self.state, name.as_str()) {
            (ParserState::InAuthorList, tag::AUTHOR) => true,
            (ParserState::InTermList, tag::CATEGORY | tag::TAG | tag::TERM) => true,
            (ParserState::InItemList, tag::ITEM) => true,
            _ => false,
        };
        if !list_item {
            self.skip(start)?;
            return Ok(None);
        }

        let node = read_node(&mut self.reader, start)?;
        let record = match name.as_str() {
            tag::AUTHOR => Record::Author(decode_author(&node)?),
            tag::CATEGORY => Record::Term(decode_term(&node, TermKind::Category)?),
            tag::TAG => Record::Term(decode_term(&node, TermKind::Tag)?),
            tag::TERM => Record::Term(decode_term(&node, TermKind::Custom)?),
            _ => Record::Item(Box::new(decode_item(&node)?)),
        };
        Ok(Some(record))
    }

    fn next_record(&mut self) -> Result<Option<Record>, ImportError> {
        loop {
            if self.state == ParserState::End {
                return Ok(None);
            }
            self.buf.clear();
            let event = self.reader.read_event_into(&mut self.buf)?.into_owned();

            match event {
                Event::Start(e) => {
                    let name = local_name(&e);
                    match (self.state, name.as_str()) {
                        (ParserState::Start, tag::ARCHIVE) => {
                            self.root_version = e
                                .try_get_attribute("format_version")
                                .ok()
                                .flatten()
                                .and_then(|a| a.unescape_value().ok().map(|v| v.to_string()));
                        }
                        (ParserState::Start, tag::HEADER) => {
                            self.state = ParserState::InHeader;
                            let node = read_node(&mut self.reader, &e)?;
                            self.state = ParserState::Start;
                            let header = decode_header(&node, self.root_version.as_deref());
                            return Ok(Some(Record::Header(header)));
                        }
                        (ParserState::Start, tag::AUTHORS) => self.state = ParserState::InAuthorList,
                        (ParserState::Start, tag::TERMS) => self.state = ParserState::InTermList,
                        (ParserState::Start, tag::ITEMS) => self.state = ParserState::InItemList,
                        (ParserState::Start, _) => self.skip(&e)?,
                        _ => {
                            if let Some(record) = self.decode(&e)? {
                                return Ok(Some(record));
                            }
                        }
                    }
                }
                Event::Empty(e) => {
                    debug!("Ignoring empty element <{}>", local_name(&e));
                }
                Event::End(e) => {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                    match (self.state, name.as_str()) {
                        (ParserState::InAuthorList, tag::AUTHORS)
                        | (ParserState::InTermList, tag::TERMS)
                        | (ParserState::InItemList, tag::ITEMS) => self.state = ParserState::Start,
                        (ParserState::Start, tag::ARCHIVE) => self.state = ParserState::End,
                        _ => {}
                    }
                }
                Event::Eof => {
                    self.state = ParserState::End;
                }
                _ => {}
            }
        }
    }
}

impl<R: BufRead> Iterator for ArchiveParser<R> {
    type Item = Result<Record, ImportError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_record() {
            Ok(Some(record)) => {
                self.records += 1;
                Some(Ok(record))
            }
            Ok(None) => None,
            Err(e) => {
                // The reader cannot resynchronise after a syntax error
                if e.is_fatal() {
                    self.state = ParserState::End;
                }
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<archive format_version="1.2">
<header><format_version>1.2</format_version><generator>modmigrate/0.1.0</generator><site_title><![CDATA[Old & Site]]></site_title><site_url>http://old.example</site_url><uploads_url>http://old.example/uploads</uploads_url><module_id>10</module_id><created>2024-05-01T09:30:00Z</created></header>
<authors>
  <author><id>3</id><login>ada</login><email>ada@example.com</email><display_name><![CDATA[Ada]]></display_name></author>
</authors>
<terms>
  <category><id>5</id><slug>intro</slug><name><![CDATA[Intro]]></name></category>
  <tag><id>6</id><slug>week</slug></tag>
  <term><id>7</id><taxonomy>level</taxonomy><slug>easy</slug><parent>basic</parent></term>
</terms>
<widgets><widget>ignored</widget></widgets>
<items>
  <item>
    <id>10</id><type>module</type><guid>http://old.example/?p=10</guid>
    <title><![CDATA[Module]]></title>
    <content><![CDATA[a]]]]><![CDATA[>b]]></content>
    <creator>ada</creator><date>2024-05-01T09:30:00Z</date>
    <term_ref><taxonomy>category</taxonomy><slug>intro</slug></term_ref>
    <meta><key>_module_pages</key><value><![CDATA[[11]]]></value></meta>
    <revision>skipped</revision>
    <comment><id>20</id><author><![CDATA[Bob]]></author><date>2024-05-02T10:00:00Z</date><content><![CDATA[Nice]]></content><parent>0</parent><meta><key>rating</key><value>5</value></meta></comment>
  </item>
  <item><id>11</id><type>page</type><parent>10</parent><title><![CDATA[Week 1]]></title><content><![CDATA[]]></content><excerpt/></item>
</items>
</archive>"#;

    #[test]
    fn test_parses_all_record_kinds_in_order() {
        let records: Vec<Record> = ArchiveParser::from_reader(DOC.as_bytes())
            .collect::<Result<_, _>>()
            .unwrap();
        let labels: Vec<String> = records.iter().map(Record::label).collect();
        assert_eq!(
            labels,
            vec![
                "header",
                "author ada",
                "term category:intro",
                "term post_tag:week",
                "term level:easy",
                "module 10 \"Module\"",
                "page 11 \"Week 1\"",
            ]
        );

        match &records[0] {
            Record::Header(h) => {
                assert_eq!(h.site_title, "Old & Site");
                assert_eq!(h.module_id, Some(PostOldId(10)));
                assert!(h.created.is_some());
            }
            other => panic!("expected header, got {:?}", other),
        }
        match &records[4] {
            Record::Term(t) => assert_eq!(t.parent_slug.as_deref(), Some("basic")),
            other => panic!("expected term, got {:?}", other),
        }
    }

    #[test]
    fn test_item_subtree_decoding() {
        let item = ArchiveParser::from_reader(DOC.as_bytes())
            .filter_map(Result::ok)
            .find_map(|r| match r {
                Record::Item(i) if i.id == PostOldId(10) => Some(i),
                _ => None,
            })
            .unwrap();

        assert_eq!(item.content, "a]]>b");
        assert_eq!(item.creator.as_deref(), Some("ada"));
        assert_eq!(item.meta("_module_pages"), Some("[11]"));
        assert_eq!(item.terms.len(), 1);
        assert_eq!(item.comments.len(), 1);
        let comment = &item.comments[0];
        assert_eq!(comment.author_name, "Bob");
        assert_eq!(comment.parent, None);
        assert_eq!(comment.meta, vec![MetaPair::new("rating", "5")]);
    }

    #[test]
    fn test_malformed_record_does_not_stop_parsing() {
        let doc = r#"<archive><items>
            <item><type>page</type><title>no id</title></item>
            <item><id>2</id><type>page</type><title>ok</title></item>
        </items></archive>"#;
        let results: Vec<_> = ArchiveParser::from_reader(doc.as_bytes()).collect();
        assert_eq!(results.len(), 2);
        assert!(matches!(results[0], Err(ImportError::MalformedRecord(_))));
        assert!(matches!(results[1], Ok(Record::Item(_))));
    }

    #[test]
    fn test_syntax_error_ends_stream() {
        let doc = "<archive><items><item><id>1</id></wrong></items></archive>";
        let mut parser = ArchiveParser::from_reader(doc.as_bytes());
        assert!(matches!(parser.next(), Some(Err(ImportError::XmlParse(_)))));
        assert!(parser.next().is_none());
        assert_eq!(parser.state(), ParserState::End);
    }

    #[test]
    fn test_root_version_used_when_header_lacks_one() {
        let doc = r#"<archive format_version="9.0"><header><site_url>x</site_url></header></archive>"#;
        let first = ArchiveParser::from_reader(doc.as_bytes()).next().unwrap().unwrap();
        match first {
            Record::Header(h) => assert_eq!(h.format_version, "9.0"),
            other => panic!("expected header, got {:?}", other),
        }
    }
}
