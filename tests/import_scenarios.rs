//! Import behaviour on hand-written documents

mod common;

use common::*;
use modmigrate::import::{
    import_document, EventLevel, ImportCoordinatorBuilder, MemorySink, ProgressReporter,
};
use modmigrate::store::{ContentStore, MemoryStore, SiteInfo, User, META_MODULE_PAGES};
use modmigrate::types::{PostId, PostKind, UserId};
use tempfile::TempDir;

fn store_with_ada(media: &std::path::Path, next_id: u64) -> MemoryStore {
    let mut store = MemoryStore::new(SiteInfo::default(), media).with_next_id(next_id);
    store.add_user(User {
        id: UserId(1),
        login: "ada".to_string(),
        email: "ada@example.com".to_string(),
        display_name: "Ada".to_string(),
        first_name: String::new(),
        last_name: String::new(),
    });
    store
}

fn builder(max_records: Option<usize>) -> ImportCoordinatorBuilder {
    let temp_work = std::env::temp_dir();
    ImportCoordinatorBuilder::new(import_config(&temp_work)).with_max_records(max_records)
}

#[test]
fn test_module_references_follow_new_ids() {
    let temp = TempDir::new().unwrap();
    let mut store = store_with_ada(&temp.path().join("media"), 55);
    let xml = document(&[
        item(
            10,
            "module",
            None,
            "<!-- module-nav moduleId=10 -->",
            &[("_module_pages", "[11]")],
        ),
        item(11, "page", Some(10), "<!-- module-page moduleId=10 pageId=11 -->", &[]),
    ]
    .join("\n"));
    let path = write_document(temp.path(), &xml);

    let stats = import_document(&mut store, &path, builder(None), &ProgressReporter::silent())
        .unwrap();
    assert_eq!(stats.posts_created, 2);
    assert_eq!(stats.users_existing, 1);

    let module = store.post(PostId(55)).unwrap().unwrap();
    assert_eq!(module.kind, PostKind::Module);
    assert_eq!(module.content, "<!-- module-nav moduleId=55 -->");
    assert_eq!(module.meta(META_MODULE_PAGES), Some("[56]"));
    assert_eq!(module.author, Some(UserId(1)));

    let page = store.post(PostId(56)).unwrap().unwrap();
    assert_eq!(page.parent, Some(PostId(55)));
    assert_eq!(page.content, "<!-- module-page moduleId=55 pageId=56 -->");
}

#[test]
fn test_forward_parent_reference_is_resolved() {
    let temp = TempDir::new().unwrap();
    let mut store = store_with_ada(&temp.path().join("media"), 100);
    // Page before its module
    let xml = document(&[
        item(11, "page", Some(10), "Week 1", &[]),
        item(10, "module", None, "Module", &[("_module_pages", "[11]")]),
    ]
    .join("\n"));
    let path = write_document(temp.path(), &xml);

    let stats = import_document(&mut store, &path, builder(None), &ProgressReporter::silent())
        .unwrap();
    assert_eq!(stats.fixups_unresolved, 0);
    assert!(stats.fixups_resolved >= 1);

    let page = store.all_posts().find(|p| p.kind == PostKind::Page).unwrap();
    let module = store.all_posts().find(|p| p.kind == PostKind::Module).unwrap();
    assert_eq!(page.parent, Some(module.id));
    assert_eq!(module.module_pages(), vec![page.id]);
}

#[test]
fn test_interrupted_run_resumes_without_duplicates() {
    let temp = TempDir::new().unwrap();
    let mut store = store_with_ada(&temp.path().join("media"), 100);
    let pages: Vec<String> = (11..=14)
        .map(|id| item(id, "page", Some(10), &format!("Page {}", id), &[]))
        .collect();
    let xml = document(
        &std::iter::once(item(10, "module", None, "Module", &[("_module_pages", "[11,12,13,14]")]))
            .chain(pages)
            .collect::<Vec<_>>()
            .join("\n"),
    );
    let path = write_document(temp.path(), &xml);

    let sink = MemorySink::new();
    let reporter = ProgressReporter::new(Box::new(sink.clone()), false);
    let first = import_document(&mut store, &path, builder(Some(3)), &reporter).unwrap();
    assert_eq!(first.posts_created, 3);
    assert_eq!(store.all_posts().count(), 3);
    let partial = store.all_posts().find(|p| p.kind == PostKind::Module).unwrap();
    assert_eq!(partial.module_pages().len(), 2);
    assert_eq!(partial.meta("_import_pending_pages"), Some("[11,12,13,14]"));
    assert!(sink
        .messages(EventLevel::Warning)
        .iter()
        .any(|m| m.contains("stopped early")));

    let second = import_document(&mut store, &path, builder(None), &ProgressReporter::silent())
        .unwrap();
    assert_eq!(second.posts_existing, 3);
    assert_eq!(second.posts_created, 2);
    assert_eq!(store.all_posts().count(), 5);

    // Pages from the second run still find their module, and the page list
    // is complete again
    let module = store.all_posts().find(|p| p.kind == PostKind::Module).unwrap().clone();
    assert!(store
        .all_posts()
        .filter(|p| p.kind == PostKind::Page)
        .all(|p| p.parent == Some(module.id)));
    assert_eq!(module.module_pages().len(), 4);
    assert!(module.meta("_import_pending_pages").is_none());
}

#[test]
fn test_interrupted_run_rewrites_forward_references_on_resume() {
    let temp = TempDir::new().unwrap();
    let mut store = store_with_ada(&temp.path().join("media"), 100);
    let xml = document(&[
        item(10, "module", None, "<!-- module-nav moduleId=10 -->", &[]),
        item(
            11,
            "page",
            Some(10),
            "<!-- module-page-link moduleId=10 pageId=12 -->",
            &[],
        ),
        item(12, "page", Some(10), "Week 2", &[]),
    ]
    .join("\n"));
    let path = write_document(temp.path(), &xml);

    import_document(&mut store, &path, builder(Some(2)), &ProgressReporter::silent()).unwrap();
    let waiting = store
        .all_posts()
        .find(|p| p.title == "Item 11")
        .unwrap()
        .clone();
    assert_eq!(waiting.content, "<!-- module-page-link moduleId=100 pageId=12 -->");
    assert_eq!(waiting.meta("_import_pending_refs"), Some("[12]"));

    import_document(&mut store, &path, builder(None), &ProgressReporter::silent()).unwrap();
    let target = store.all_posts().find(|p| p.title == "Item 12").unwrap().id;
    let page = store.post(waiting.id).unwrap().unwrap();
    assert_eq!(
        page.content,
        format!("<!-- module-page-link moduleId=100 pageId={} -->", target)
    );
    assert!(page.meta("_import_pending_refs").is_none());
}

#[test]
fn test_malformed_item_is_skipped() {
    let temp = TempDir::new().unwrap();
    let mut store = store_with_ada(&temp.path().join("media"), 100);
    let xml = document(&[
        item(10, "module", None, "Module", &[]),
        "<item><type>page</type><title>no id</title></item>".to_string(),
        item(12, "page", Some(10), "Week 2", &[]),
    ]
    .join("\n"));
    let path = write_document(temp.path(), &xml);

    let sink = MemorySink::new();
    let reporter = ProgressReporter::new(Box::new(sink.clone()), false);
    let stats = import_document(&mut store, &path, builder(None), &reporter).unwrap();
    assert_eq!(stats.records_failed, 1);
    assert_eq!(stats.posts_created, 2);
    assert_eq!(sink.messages(EventLevel::Error).len(), 1);
}

#[test]
fn test_broken_document_fails_the_run() {
    let temp = TempDir::new().unwrap();
    let mut store = store_with_ada(&temp.path().join("media"), 100);
    let xml = document(&item(10, "module", None, "Module", &[])).replace("</items>", "</itmes>");
    let path = write_document(temp.path(), &xml);

    let result = import_document(&mut store, &path, builder(None), &ProgressReporter::silent());
    assert!(result.is_err());
}
