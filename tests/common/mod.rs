//! Shared fixtures for the integration tests

#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use modmigrate::config::{ExportConfig, ImportConfig};
use modmigrate::export::{ExportOptions, Exporter};
use modmigrate::store::{Comment, MemoryStore, Post, SiteInfo, Term, User, META_MODULE_PAGES};
use modmigrate::types::{CommentId, PostId, PostKind, TermId, UserId};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const OLD_UPLOADS: &str = "http://old.example/uploads";
pub const NEW_UPLOADS: &str = "http://new.example/uploads";
pub const MODULE_ID: u64 = 10;
pub const ATTACHMENT_ID: u64 = 30;
pub const PHOTO_URL: &str = "http://old.example/uploads/2024/05/photo.jpg";

pub fn site(base: &str) -> SiteInfo {
    SiteInfo {
        title: format!("Site at {}", base),
        url: base.to_string(),
        uploads_url: format!("{}/uploads", base),
        ..SiteInfo::default()
    }
}

pub fn post(id: u64, kind: PostKind, title: &str, content: &str) -> Post {
    let date = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
    Post {
        id: PostId(id),
        kind,
        guid: format!("http://old.example/?p={}", id),
        title: title.to_string(),
        content: content.to_string(),
        excerpt: String::new(),
        slug: title.to_lowercase().replace(' ', "-"),
        status: "publish".to_string(),
        parent: None,
        author: Some(UserId(3)),
        date,
        modified: date,
        menu_order: 0,
        attachment_url: None,
        meta: BTreeMap::new(),
        terms: Vec::new(),
    }
}

pub fn comment(id: u64, post: u64, author: &str, minute: u32, parent: Option<u64>) -> Comment {
    Comment {
        id: CommentId(id),
        post: PostId(post),
        author_name: author.to_string(),
        author_email: format!("{}@example.com", author.to_lowercase()),
        author_url: String::new(),
        date: Utc.with_ymd_and_hms(2024, 5, 2, 10, minute, 0).unwrap(),
        content: format!("Comment by {}", author),
        approved: "1".to_string(),
        comment_type: String::new(),
        parent: parent.map(CommentId),
        user: None,
        meta: BTreeMap::new(),
    }
}

/// A source site with one module, `pages` pages, one image and a few comments.
///
/// The module links to its first page and embeds the image through a derived
/// size URL; every page links back to the module and the first page uses the
/// image as its featured image.
pub fn source_store(media_root: &Path, pages: usize) -> MemoryStore {
    let mut store = MemoryStore::new(site("http://old.example"), media_root);

    store.add_user(User {
        id: UserId(3),
        login: "ada".to_string(),
        email: "ada@example.com".to_string(),
        display_name: "Ada".to_string(),
        first_name: "Ada".to_string(),
        last_name: "Lovelace".to_string(),
    });
    store.add_term(Term {
        id: TermId(4),
        taxonomy: "category".to_string(),
        slug: "basics".to_string(),
        name: "Basics".to_string(),
        description: String::new(),
        parent: None,
    });

    let page_ids: Vec<u64> = (0..pages as u64).map(|i| 11 + i).collect();
    let first_page = page_ids.first().copied().unwrap_or(MODULE_ID);

    let mut module = post(
        MODULE_ID,
        PostKind::Module,
        "Intro to Rust",
        &format!(
            "<!-- module-nav moduleId={} pageId={} -->\n<p>Welcome</p>\n\
             <img src=\"{}/2024/05/photo-300x200.jpg\" />",
            MODULE_ID, first_page, OLD_UPLOADS
        ),
    );
    module.terms.push(TermId(4));
    module
        .meta
        .insert(META_MODULE_PAGES.to_string(), serde_json::to_string(&page_ids).unwrap());
    store.add_post(module);

    for (i, id) in page_ids.iter().enumerate() {
        let mut page = post(
            *id,
            PostKind::Page,
            &format!("Week {}", i + 1),
            &format!(
                "<!-- module-page moduleId={} pageId={} -->\n<p>Week {}</p>",
                MODULE_ID,
                id,
                i + 1
            ),
        );
        page.parent = Some(PostId(MODULE_ID));
        page.menu_order = i as i64;
        if i == 0 {
            page.meta
                .insert("_thumbnail_id".to_string(), ATTACHMENT_ID.to_string());
        }
        store.add_post(page);
    }

    let image = media_root.join("2024/05/photo.jpg");
    std::fs::create_dir_all(image.parent().unwrap()).unwrap();
    std::fs::write(&image, b"\xFF\xD8\xFF\xE0 not really a jpeg").unwrap();
    let mut attachment = post(ATTACHMENT_ID, PostKind::Attachment, "Photo", "");
    attachment.attachment_url = Some(PHOTO_URL.to_string());
    attachment.parent = Some(PostId(MODULE_ID));
    store.add_post(attachment);

    store.add_comment(comment(40, MODULE_ID, "Grace", 0, None));
    store.add_comment(comment(41, MODULE_ID, "Linus", 5, Some(40)));
    let mut private = comment(42, MODULE_ID, "Tutor", 10, None);
    private.comment_type = "private".to_string();
    store.add_comment(private);

    store
}

pub fn destination_store(media_root: &Path) -> MemoryStore {
    MemoryStore::new(site("http://new.example"), media_root).with_next_id(100)
}

pub fn import_config(work_dir: &Path) -> ImportConfig {
    ImportConfig {
        work_dir: work_dir.to_path_buf(),
        fetch_remote_media: false,
        ..ImportConfig::default()
    }
}

/// Export the fixture module from `store` into `work_dir`
pub fn export_module(store: &mut MemoryStore, work_dir: &Path) -> PathBuf {
    let config = ExportConfig {
        work_dir: work_dir.to_path_buf(),
        ..ExportConfig::default()
    };
    Exporter::new(store, config)
        .export(PostId(MODULE_ID), ExportOptions::default())
        .unwrap()
}

/// Wrap item XML in a complete document with one author
pub fn document(items: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<archive format_version="1.2">
<header><format_version>1.2</format_version><site_url>http://old.example</site_url><uploads_url>{}</uploads_url><module_id>10</module_id></header>
<authors><author><id>3</id><login>ada</login><email>ada@example.com</email></author></authors>
<items>
{}
</items>
</archive>
"#,
        OLD_UPLOADS, items
    )
}

/// One item element
pub fn item(id: u64, kind: &str, parent: Option<u64>, content: &str, meta: &[(&str, &str)]) -> String {
    let parent = parent
        .map(|p| format!("<parent>{}</parent>", p))
        .unwrap_or_default();
    let meta: String = meta
        .iter()
        .map(|(k, v)| format!("<meta><key>{}</key><value><![CDATA[{}]]></value></meta>", k, v))
        .collect();
    format!(
        "<item><id>{id}</id><type>{kind}</type><guid>http://old.example/?p={id}</guid>\
         <title><![CDATA[Item {id}]]></title><content><![CDATA[{content}]]></content>\
         <slug>item-{id}</slug><status>publish</status>{parent}<creator>ada</creator>\
         <date>2024-05-01T09:00:00Z</date>{meta}</item>"
    )
}

pub fn write_document(dir: &Path, xml: &str) -> PathBuf {
    let path = dir.join("export.xml");
    std::fs::write(&path, xml).unwrap();
    path
}
