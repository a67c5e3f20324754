use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;

/// Marker attribute identifying the widget tag so install/uninstall stay
/// idempotent no matter how the HTML was reformatted.
const WIDGET_ATTR: &str = "data-pagefeed-widget";

#[derive(Debug, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed,
    AlreadyInstalled,
}

#[derive(Debug, PartialEq, Eq)]
pub enum UninstallOutcome {
    Removed,
    NotInstalled,
}

fn widget_tag(port: u16) -> String {
    format!(r#"<script src="http://localhost:{port}/widget.js" {WIDGET_ATTR}></script>"#)
}

/// Inserts the widget script tag into an HTML file, just before `</body>`
/// when one exists, appended at the end otherwise. A file that already
/// carries the tag is left untouched.
pub fn install_widget(path: &Path, port: u16) -> Result<InstallOutcome> {
    let html = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    if html.contains(WIDGET_ATTR) {
        return Ok(InstallOutcome::AlreadyInstalled);
    }

    let tag = widget_tag(port);
    let body_close = Regex::new(r"(?i)</body\s*>").expect("static regex");
    let updated = match body_close.find(&html) {
        Some(found) => {
            let mut out = String::with_capacity(html.len() + tag.len() + 1);
            out.push_str(&html[..found.start()]);
            out.push_str(&tag);
            out.push('\n');
            out.push_str(&html[found.start()..]);
            out
        }
        None => format!("{html}\n{tag}\n"),
    };

    fs::write(path, updated)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(InstallOutcome::Installed)
}

/// Removes every widget script tag (ours, or any tag pointing at a
/// `/widget.js` on localhost) from an HTML file.
pub fn uninstall_widget(path: &Path) -> Result<UninstallOutcome> {
    let html = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    let tag_pattern = Regex::new(&format!(
        r#"(?i)[ \t]*<script[^>]*(?:{WIDGET_ATTR}|src="http://localhost:\d+/widget\.js")[^>]*>\s*</script>\r?\n?"#
    ))
    .expect("static regex");

    let updated = tag_pattern.replace_all(&html, "");
    if updated == html {
        return Ok(UninstallOutcome::NotInstalled);
    }

    fs::write(path, updated.as_bytes())
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(UninstallOutcome::Removed)
}
