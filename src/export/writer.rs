//! Streaming archive document writer
//!
//! Writes the document section by section (header, authors, terms, items)
//! and flushes after each one. Items are fetched from the store in batches,
//! so only one batch of posts is held in memory at a time.

use super::graph::ExportUnit;
use super::ExportError;
use crate::archive::{cdata_sections, format_date, generator, tag, TermKind, FORMAT_VERSION};
use crate::config::ExportConfig;
use crate::store::{
    Comment, ContentStore, Post, Term, META_ATTACHMENT_SHA256, META_COMMENT_PRIVATE,
};
use crate::types::{PostId, PostKind, TermId, UserId};
use crate::util::sha256_file;
use chrono::Utc;
use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, info};

/// Counts of what a document contains
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub authors: usize,
    pub terms: usize,
    pub items: usize,
    pub comments: usize,
    pub comments_excluded: usize,
}

type XmlWriter = Writer<BufWriter<File>>;

fn start(w: &mut XmlWriter, name: &str) -> Result<(), ExportError> {
    w.write_event(Event::Start(BytesStart::new(name)))?;
    Ok(())
}

fn end(w: &mut XmlWriter, name: &str) -> Result<(), ExportError> {
    w.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn newline(w: &mut XmlWriter) -> Result<(), ExportError> {
    w.write_event(Event::Text(BytesText::new("\n")))?;
    Ok(())
}

/// Element with escaped text content
fn text_el(w: &mut XmlWriter, name: &str, value: &str) -> Result<(), ExportError> {
    start(w, name)?;
    w.write_event(Event::Text(BytesText::new(value)))?;
    end(w, name)
}

/// Element with CDATA content
fn cdata_el(w: &mut XmlWriter, name: &str, value: &str) -> Result<(), ExportError> {
    start(w, name)?;
    for piece in cdata_sections(value) {
        w.write_event(Event::CData(BytesCData::new(piece)))?;
    }
    end(w, name)
}

fn flush(w: &mut XmlWriter) -> Result<(), ExportError> {
    w.get_mut().flush()?;
    Ok(())
}

/// Order terms so each comes after its parent.
///
/// Categories come first, then tags, then other taxonomies. Within each group
/// the list is passed over repeatedly, emitting terms whose parent has been
/// emitted and requeueing the rest. Terms whose parent never appears are
/// appended at the end of their group.
pub fn order_terms(terms: Vec<Term>) -> Vec<Term> {
    let mut groups: [Vec<Term>; 3] = Default::default();
    for term in terms {
        groups[TermKind::for_taxonomy(&term.taxonomy).rank() as usize].push(term);
    }

    let mut ordered = Vec::new();
    for mut group in groups {
        group.sort_by(|a, b| a.taxonomy.cmp(&b.taxonomy).then_with(|| a.slug.cmp(&b.slug)));
        let mut queue: VecDeque<Term> = group.into();
        let mut emitted: HashSet<TermId> = HashSet::new();

        loop {
            let mut progressed = false;
            for _ in 0..queue.len() {
                let Some(term) = queue.pop_front() else { break };
                let ready = term.parent.map_or(true, |p| emitted.contains(&p));
                if ready {
                    emitted.insert(term.id);
                    ordered.push(term);
                    progressed = true;
                } else {
                    queue.push_back(term);
                }
            }
            if !progressed || queue.is_empty() {
                break;
            }
        }
        // Orphans: parent never emitted
        ordered.extend(queue);
    }
    ordered
}

/// Writes archive documents for export units
pub struct ArchiveWriter<'a, S: ContentStore + ?Sized> {
    store: &'a S,
    config: &'a ExportConfig,
}

impl<'a, S: ContentStore + ?Sized> ArchiveWriter<'a, S> {
    pub fn new(store: &'a S, config: &'a ExportConfig) -> Self {
        Self { store, config }
    }

    fn include_comment(&self, comment: &Comment) -> bool {
        !self
            .config
            .excluded_comment_types
            .iter()
            .any(|t| *t == comment.comment_type)
            && comment.meta.get(META_COMMENT_PRIVATE).map(String::as_str) != Some("1")
    }

    fn batches(&self, unit: &ExportUnit) -> Vec<Vec<PostId>> {
        unit.post_ids()
            .chunks(self.config.batch_size.max(1))
            .map(<[PostId]>::to_vec)
            .collect()
    }

    /// Write the document for `unit` to `path`
    pub fn write(&self, unit: &ExportUnit, path: &Path) -> Result<WriteSummary, ExportError> {
        let file = File::create(path)?;
        let mut w = Writer::new(BufWriter::new(file));
        let mut summary = WriteSummary::default();

        // First pass: which authors and terms the items reference
        let mut author_ids: BTreeSet<UserId> = BTreeSet::new();
        let mut term_ids: BTreeSet<TermId> = BTreeSet::new();
        for batch in self.batches(unit) {
            for post in self.store.posts(&batch)? {
                author_ids.extend(post.author);
                term_ids.extend(post.terms.iter().copied());
                for comment in self.store.comments_for_post(post.id)? {
                    if self.include_comment(&comment) {
                        author_ids.extend(comment.user);
                    }
                }
            }
        }

        w.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        newline(&mut w)?;
        w.write_event(Event::Start(
            BytesStart::new(tag::ARCHIVE).with_attributes([("format_version", FORMAT_VERSION)]),
        ))?;
        newline(&mut w)?;

        self.write_header(&mut w, unit)?;
        flush(&mut w)?;

        summary.authors = self.write_authors(&mut w, &author_ids)?;
        flush(&mut w)?;

        let terms = self.load_terms(&term_ids)?;
        summary.terms = self.write_terms(&mut w, &terms)?;
        flush(&mut w)?;

        let term_index: HashMap<TermId, &Term> = terms.iter().map(|t| (t.id, t)).collect();
        start(&mut w, tag::ITEMS)?;
        newline(&mut w)?;
        for batch in self.batches(unit) {
            for post in self.store.posts(&batch)? {
                self.write_item(&mut w, &post, &term_index, &mut summary)?;
                summary.items += 1;
            }
            flush(&mut w)?;
            debug!("Wrote {} items", summary.items);
        }
        end(&mut w, tag::ITEMS)?;
        newline(&mut w)?;

        end(&mut w, tag::ARCHIVE)?;
        newline(&mut w)?;
        flush(&mut w)?;

        info!(
            "Wrote {} ({} items, {} terms, {} authors, {} comments)",
            path.display(),
            summary.items,
            summary.terms,
            summary.authors,
            summary.comments
        );
        Ok(summary)
    }

    fn write_header(&self, w: &mut XmlWriter, unit: &ExportUnit) -> Result<(), ExportError> {
        let site = self.store.site_info();
        start(w, tag::HEADER)?;
        text_el(w, "format_version", FORMAT_VERSION)?;
        text_el(w, "generator", &generator())?;
        cdata_el(w, "site_title", &site.title)?;
        text_el(w, "site_url", &site.url)?;
        text_el(w, "uploads_url", &site.uploads_url)?;
        text_el(w, "module_id", &unit.module.to_string())?;
        text_el(w, "created", &format_date(&Utc::now()))?;
        end(w, tag::HEADER)?;
        newline(w)
    }

    fn write_authors(&self, w: &mut XmlWriter, ids: &BTreeSet<UserId>) -> Result<usize, ExportError> {
        let mut count = 0;
        start(w, tag::AUTHORS)?;
        newline(w)?;
        for id in ids {
            let Some(user) = self.store.user(*id)? else {
                debug!("Skipping missing author {}", id);
                continue;
            };
            start(w, tag::AUTHOR)?;
            text_el(w, "id", &user.id.to_string())?;
            text_el(w, "login", &user.login)?;
            text_el(w, "email", &user.email)?;
            cdata_el(w, "display_name", &user.display_name)?;
            cdata_el(w, "first_name", &user.first_name)?;
            cdata_el(w, "last_name", &user.last_name)?;
            end(w, tag::AUTHOR)?;
            newline(w)?;
            count += 1;
        }
        end(w, tag::AUTHORS)?;
        newline(w)?;
        Ok(count)
    }

    /// Referenced terms plus their ancestors
    fn load_terms(&self, ids: &BTreeSet<TermId>) -> Result<Vec<Term>, ExportError> {
        let mut loaded: HashMap<TermId, Term> = HashMap::new();
        let mut pending: Vec<TermId> = ids.iter().copied().collect();
        while let Some(id) = pending.pop() {
            if loaded.contains_key(&id) {
                continue;
            }
            if let Some(term) = self.store.term(id)? {
                if let Some(parent) = term.parent {
                    pending.push(parent);
                }
                loaded.insert(id, term);
            }
        }
        Ok(order_terms(loaded.into_values().collect()))
    }

    fn write_terms(&self, w: &mut XmlWriter, terms: &[Term]) -> Result<usize, ExportError> {
        let slugs: HashMap<TermId, &str> = terms.iter().map(|t| (t.id, t.slug.as_str())).collect();
        start(w, tag::TERMS)?;
        newline(w)?;
        for term in terms {
            let kind = TermKind::for_taxonomy(&term.taxonomy);
            start(w, kind.tag())?;
            text_el(w, "id", &term.id.to_string())?;
            if kind == TermKind::Custom {
                text_el(w, "taxonomy", &term.taxonomy)?;
            }
            text_el(w, "slug", &term.slug)?;
            if let Some(parent) = term.parent.and_then(|p| slugs.get(&p)) {
                text_el(w, "parent", parent)?;
            }
            cdata_el(w, "name", &term.name)?;
            cdata_el(w, "description", &term.description)?;
            end(w, kind.tag())?;
            newline(w)?;
        }
        end(w, tag::TERMS)?;
        newline(w)?;
        Ok(terms.len())
    }

    fn write_item(
        &self,
        w: &mut XmlWriter,
        post: &Post,
        terms: &HashMap<TermId, &Term>,
        summary: &mut WriteSummary,
    ) -> Result<(), ExportError> {
        start(w, tag::ITEM)?;
        text_el(w, "id", &post.id.to_string())?;
        text_el(w, "type", post.kind.as_str())?;
        text_el(w, "guid", &post.guid)?;
        cdata_el(w, "title", &post.title)?;
        cdata_el(w, "content", &post.content)?;
        cdata_el(w, "excerpt", &post.excerpt)?;
        text_el(w, "slug", &post.slug)?;
        text_el(w, "status", &post.status)?;
        if let Some(parent) = post.parent {
            text_el(w, "parent", &parent.to_string())?;
        }
        if let Some(author) = post.author {
            if let Some(user) = self.store.user(author)? {
                text_el(w, "creator", &user.login)?;
            }
        }
        text_el(w, "date", &format_date(&post.date))?;
        text_el(w, "modified", &format_date(&post.modified))?;
        text_el(w, "menu_order", &post.menu_order.to_string())?;
        if let Some(url) = &post.attachment_url {
            text_el(w, "attachment_url", url)?;
        }

        for term in post.terms.iter().filter_map(|id| terms.get(id)) {
            start(w, tag::TERM_REF)?;
            text_el(w, "taxonomy", &term.taxonomy)?;
            text_el(w, "slug", &term.slug)?;
            cdata_el(w, "name", &term.name)?;
            end(w, tag::TERM_REF)?;
        }

        for (key, value) in &post.meta {
            if key == META_ATTACHMENT_SHA256 {
                continue;
            }
            write_meta(w, key, value)?;
        }
        if post.kind == PostKind::Attachment {
            if let Some(file) = self.store.attachment_file(post.id)?.filter(|f| f.is_file()) {
                write_meta(w, META_ATTACHMENT_SHA256, &sha256_file(&file)?)?;
            }
        }

        for comment in self.store.comments_for_post(post.id)? {
            if !self.include_comment(&comment) {
                summary.comments_excluded += 1;
                continue;
            }
            write_comment(w, &comment)?;
            summary.comments += 1;
        }

        end(w, tag::ITEM)?;
        newline(w)
    }
}

fn write_meta(w: &mut XmlWriter, key: &str, value: &str) -> Result<(), ExportError> {
    start(w, tag::META)?;
    text_el(w, "key", key)?;
    cdata_el(w, "value", value)?;
    end(w, tag::META)
}

fn write_comment(w: &mut XmlWriter, comment: &Comment) -> Result<(), ExportError> {
    start(w, tag::COMMENT)?;
    text_el(w, "id", &comment.id.to_string())?;
    cdata_el(w, "author", &comment.author_name)?;
    text_el(w, "author_email", &comment.author_email)?;
    text_el(w, "author_url", &comment.author_url)?;
    if let Some(user) = comment.user {
        text_el(w, "user_id", &user.to_string())?;
    }
    text_el(w, "date", &format_date(&comment.date))?;
    cdata_el(w, "content", &comment.content)?;
    text_el(w, "approved", &comment.approved)?;
    text_el(w, "type", &comment.comment_type)?;
    if let Some(parent) = comment.parent {
        text_el(w, "parent", &parent.to_string())?;
    }
    for (key, value) in &comment.meta {
        write_meta(w, key, value)?;
    }
    end(w, tag::COMMENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn term(id: u64, taxonomy: &str, slug: &str, parent: Option<u64>) -> Term {
        Term {
            id: TermId(id),
            taxonomy: taxonomy.to_string(),
            slug: slug.to_string(),
            name: slug.to_string(),
            description: String::new(),
            parent: parent.map(TermId),
        }
    }

    #[test]
    fn test_terms_follow_parents_and_group_order() {
        let ordered = order_terms(vec![
            term(1, "level", "hard", None),
            term(2, "post_tag", "week", None),
            term(3, "category", "a-child", Some(4)),
            term(4, "category", "b-parent", Some(5)),
            term(5, "category", "c-root", None),
            term(6, "category", "orphan", Some(99)),
        ]);
        let slugs: Vec<&str> = ordered.iter().map(|t| t.slug.as_str()).collect();
        assert_eq!(
            slugs,
            vec!["c-root", "b-parent", "a-child", "orphan", "week", "hard"]
        );
    }
}
