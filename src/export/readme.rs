//! Human-readable archive manifest

use crate::archive::{format_date, generator, FORMAT_VERSION};
use crate::store::{Post, SiteInfo};
use chrono::{DateTime, Utc};
use std::fmt::Write;

/// What the manifest describes
#[derive(Debug, Clone)]
pub struct ReadmeContext<'a> {
    pub site: &'a SiteInfo,
    pub module: &'a Post,
    pub pages: usize,
    pub attachments: usize,
    pub created: DateTime<Utc>,
    pub notes: Option<&'a str>,
}

/// Render the manifest as plain text
pub fn render_readme(ctx: &ReadmeContext<'_>) -> String {
    let mut out = String::new();
    let title = if ctx.module.title.is_empty() {
        "(untitled)"
    } else {
        ctx.module.title.as_str()
    };

    // Writing to a String cannot fail
    let _ = writeln!(out, "Module export: {}", title);
    let _ = writeln!(out, "{}", "=".repeat(15 + title.chars().count()));
    let _ = writeln!(out);
    let _ = writeln!(out, "Source site:     {} ({})", ctx.site.title, ctx.site.url);
    let _ = writeln!(out, "Exported at:     {}", format_date(&ctx.created));
    let _ = writeln!(out, "Generator:       {} (format {})", generator(), FORMAT_VERSION);
    let _ = writeln!(
        out,
        "Theme:           {}",
        ctx.site.theme.as_deref().unwrap_or("unknown")
    );
    let plugins = if ctx.site.plugins.is_empty() {
        "none".to_string()
    } else {
        ctx.site.plugins.join(", ")
    };
    let _ = writeln!(out, "Plugins:         {}", plugins);
    let _ = writeln!(
        out,
        "Admin contact:   {}",
        ctx.site.admin_email.as_deref().unwrap_or("unknown")
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "Pages:           {}", ctx.pages);
    let _ = writeln!(out, "Attachments:     {}", ctx.attachments);

    if let Some(notes) = ctx.notes.map(str::trim).filter(|n| !n.is_empty()) {
        let _ = writeln!(out);
        let _ = writeln!(out, "Notes");
        let _ = writeln!(out, "-----");
        let _ = writeln!(out, "{}", notes);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PostId, PostKind};
    use std::collections::BTreeMap;

    #[test]
    fn test_readme_lists_counts_and_notes() {
        let site = SiteInfo {
            plugins: vec!["quiz".to_string(), "glossary".to_string()],
            ..SiteInfo::default()
        };
        let now = Utc::now();
        let module = Post {
            id: PostId(10),
            kind: PostKind::Module,
            guid: "g".to_string(),
            title: "Intro to Rust".to_string(),
            content: String::new(),
            excerpt: String::new(),
            slug: "intro".to_string(),
            status: "publish".to_string(),
            parent: None,
            author: None,
            date: now,
            modified: now,
            menu_order: 0,
            attachment_url: None,
            meta: BTreeMap::new(),
            terms: Vec::new(),
        };
        let text = render_readme(&ReadmeContext {
            site: &site,
            module: &module,
            pages: 3,
            attachments: 2,
            created: now,
            notes: Some("Revised for spring term"),
        });

        assert!(text.starts_with("Module export: Intro to Rust\n"));
        assert!(text.contains("Pages:           3"));
        assert!(text.contains("Attachments:     2"));
        assert!(text.contains("Plugins:         quiz, glossary"));
        assert!(text.contains("Revised for spring term"));
    }
}
