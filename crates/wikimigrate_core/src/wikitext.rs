use std::collections::BTreeMap;
use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// `[[target|label]]`
    WikiLink,
    /// `{{target|param}}`
    Transclusion,
}

/// Raw target text of a link or transclusion, as a byte range into the scanned content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkTarget {
    pub kind: LinkKind,
    pub range: Range<usize>,
}

/// Category memberships and outgoing links of one page body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageLinks {
    /// Category topic name mapped to its sort key (empty when none was given).
    pub categories: BTreeMap<String, String>,
    pub links: Vec<String>,
}

/// Find the target portion of every `[[...]]` and `{{...}}` in `content`.
///
/// The target runs up to the first `|` or the closing brackets. A transclusion target may
/// also end at a line break when the closing braces follow later. Other openers without a
/// terminator on the same line are ignored, as are `{{{parameter}}}` references.
pub fn link_targets(content: &str) -> Vec<LinkTarget> {
    let bytes = content.as_bytes();
    let mut out = Vec::new();
    let mut cursor = 0usize;

    while cursor + 1 < bytes.len() {
        let kind = match (bytes[cursor], bytes[cursor + 1]) {
            (b'[', b'[') => LinkKind::WikiLink,
            (b'{', b'{') => LinkKind::Transclusion,
            _ => {
                cursor += 1;
                continue;
            }
        };
        let start = cursor + 2;
        if bytes.get(start) == Some(&bytes[cursor]) {
            if kind == LinkKind::Transclusion {
                cursor = start;
                while cursor < bytes.len() && bytes[cursor] == b'{' {
                    cursor += 1;
                }
            } else {
                cursor += 1;
            }
            continue;
        }

        let close = match kind {
            LinkKind::WikiLink => b']',
            LinkKind::Transclusion => b'}',
        };
        let mut end = start;
        let mut terminated = false;
        while end < bytes.len() {
            let current = bytes[end];
            let next = bytes.get(end + 1).copied();
            if current == b'|' || (current == close && next == Some(close)) {
                terminated = true;
                break;
            }
            if current == b'\n' {
                // Multi-line templates put their first `|` on the next line.
                terminated = kind == LinkKind::Transclusion && closes_later(&bytes[end..], close);
                break;
            }
            if (current == b'[' || current == b'{') && next == Some(current) {
                break;
            }
            end += 1;
        }

        if terminated {
            out.push(LinkTarget {
                kind,
                range: start..end,
            });
        }
        cursor = end;
    }

    out
}

fn closes_later(rest: &[u8], close: u8) -> bool {
    rest.windows(2).any(|pair| pair == [close, close])
}

/// Collect categories and outgoing wiki links, given the internal name of the category namespace.
pub fn extract_page_links(content: &str, category_namespace: &str) -> PageLinks {
    let mut page_links = PageLinks::default();
    for target in link_targets(content) {
        if target.kind != LinkKind::WikiLink {
            continue;
        }
        let raw = &content[target.range.clone()];
        let Some((title, leading_colon)) = normalize_link_target(raw) else {
            continue;
        };

        let is_category = !leading_colon
            && !category_namespace.is_empty()
            && title
                .split_once(':')
                .is_some_and(|(prefix, _)| prefix.trim().eq_ignore_ascii_case(category_namespace));
        if is_category {
            let sort_key = link_label(content, target.range.end).unwrap_or_default();
            page_links.categories.entry(title).or_insert(sort_key);
        } else if !page_links.links.contains(&title) {
            page_links.links.push(title);
        }
    }
    page_links
}

fn normalize_link_target(raw: &str) -> Option<(String, bool)> {
    let mut target = raw.trim();
    let mut leading_colon = false;
    while let Some(stripped) = target.strip_prefix(':') {
        leading_colon = true;
        target = stripped.trim_start();
    }
    if let Some((without_fragment, _)) = target.split_once('#') {
        target = without_fragment.trim_end();
    }
    if target.is_empty() {
        return None;
    }
    if target.starts_with("http://") || target.starts_with("https://") || target.starts_with("//") {
        return None;
    }

    let normalized = normalize_spaces(&target.replace('_', " "));
    if normalized.is_empty() {
        None
    } else {
        Some((normalized, leading_colon))
    }
}

fn link_label(content: &str, target_end: usize) -> Option<String> {
    let rest = content.get(target_end..)?;
    let label = rest.strip_prefix('|')?;
    let end = label.find("]]")?;
    Some(label[..end].trim().to_string())
}

fn normalize_spaces(value: &str) -> String {
    let mut output = String::with_capacity(value.len());
    let mut previous_was_space = false;

    for ch in value.chars() {
        if ch.is_whitespace() {
            if !previous_was_space {
                output.push(' ');
                previous_was_space = true;
            }
        } else {
            output.push(ch);
            previous_was_space = false;
        }
    }

    output.trim().to_string()
}
