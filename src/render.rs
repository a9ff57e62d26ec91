//! Notice renderer: converts a notice's raw HTML body plus metadata into
//! Telegram-flavored HTML, bounded by the platform's message length limit.
//!
//! The body goes through an ordered rule set over a streaming HTML rewriter
//! (`lol_html`): readability newlines for exam notices, label/underline span
//! fixes, link rewrites, `<br>` and list-item conversion, and finally a
//! catch-all that strips every tag Telegram does not support while keeping
//! its text content.

use std::cell::Cell;
use std::error::Error as StdError;
use std::fmt::Write as _;
use std::rc::Rc;

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use lol_html::html_content::ContentType;
use lol_html::{element, rewrite_str, RewriteStrSettings};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::error;
use url::form_urlencoded;

use crate::fibapi::{Attachment, Notice};
use crate::locales::Locale;

pub const MESSAGE_MAX_LENGTH: usize = 4096;
pub const RACO_BASE_URL: &str = "https://raco.fib.upc.edu";

const DATETIME_FORMAT: &str = "%d/%m/%Y %H:%M:%S";
const TOP_LEVEL_LIST_ITEM_PREFIX: &str = "  • ";
const NESTED_LIST_ITEM_PREFIX: &str = "    • ";

// HTML tags Telegram's message parser supports.
const SUPPORTED_TAGS: [&str; 13] = [
    "a", "b", "strong", "i", "em", "u", "ins", "s", "strike", "del", "code", "pre", "tg-spoiler",
];

static HTML_COMMENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<!--.*?-->").unwrap());

// These four entities are structurally significant to Telegram's HTML parser
// and must stay escaped when all other entities are decoded. The backtick
// marker temporarily hides them from the decoder.
const KEPT_ENTITIES: [(&str, &str); 4] = [
    ("&lt;", "&`lt;"),
    ("&gt;", "&`gt;"),
    ("&amp;", "&`amp;"),
    ("&quot;", "&`quot;"),
];

/// Renders one notice for a subscriber locale. Pure except for error logging:
/// a rewrite failure degrades to header + a localized internal-error line.
pub fn render(notice: &Notice, locale: &Locale, link_url: &str, mailto_redirect_url: &str) -> String {
    let header = format!(
        "[#{}] <b>{}</b>\n\n<i>{}</i>  <a href=\"{}\">{}</a>",
        sanitize_subject_code(&notice.subject_code),
        notice.title,
        notice.published_at().0.format(DATETIME_FORMAT),
        link_url,
        locale.notice_link_text,
    );

    let mut out = header.clone();

    if !notice.body_html.is_empty() {
        let body = match rewrite_body(&notice.body_html, mailto_redirect_url) {
            Ok(body) => body,
            Err(err) => {
                error!(notice_id = notice.id, %err, "failed to rewrite notice body HTML");
                return format!("{header}\n\n{}", locale.internal_error_message);
            }
        };
        let body = decode_entities_keeping_structural(&body);
        let body = HTML_COMMENT_RE.replace_all(&body, "");
        let body = body.trim_matches(|c| c == '\n' || c == '\r');
        out.push_str("\n\n");
        out.push_str(body);
    }

    if !notice.attachments.is_empty() {
        let mut attachments: Vec<&Attachment> = notice.attachments.iter().collect();
        if attachments.len() > 1 {
            attachments.sort_by(|a, b| a.name.cmp(&b.name));
        }

        let mut list = String::new();
        for a in &attachments {
            let size = byte_count_iec(a.size).replace('.', &locale.decimal_separator.to_string());
            let _ = writeln!(list, "<a href=\"{}\">{}</a>  ({})", a.redirect_url(), a.name, size);
        }
        let _ = write!(
            out,
            "\n\n{}\n{}",
            locale.attachment_list_header(attachments.len()),
            list.trim_end_matches('\n'),
        );
    }

    if out.len() > MESSAGE_MAX_LENGTH {
        let fallback = format!("{header}\n\n{}", locale.notice_too_long(link_url));
        // The header itself can blow the limit (degenerate titles); drop it
        // rather than send a message Telegram will reject.
        if fallback.len() > MESSAGE_MAX_LENGTH {
            return locale.notice_too_long(link_url);
        }
        return fallback;
    }
    out
}

/// Strips the banner `#` prefix and replaces dashes, which Telegram forbids
/// inside hashtags.
fn sanitize_subject_code(subject_code: &str) -> String {
    subject_code.trim_start_matches('#').replace('-', "_")
}

type HandlerError = Box<dyn StdError + Send + Sync>;

fn rewrite_body(html: &str, mailto_redirect_url: &str) -> Result<String, lol_html::errors::RewritingError> {
    // Set by the nested-item handlers so the generic `li` handler below does
    // not add a second bullet to the same element.
    let nested = Rc::new(Cell::new(false));
    let nested_ul = Rc::clone(&nested);
    let nested_ol = Rc::clone(&nested);
    let mailto_redirect_url = mailto_redirect_url.to_owned();

    let handlers = vec![
        // add newline before exam "extra info" blocks
        element!(r#"div[class="extraInfo"]"#, |el| {
            el.before("\n", ContentType::Text);
            Ok(())
        }),
        // add newline after exam time spans
        element!(r#"span[id="horaExamen"]"#, |el| {
            el.after("\n", ContentType::Text);
            Ok(())
        }),
        // italicize label spans, prefixed with "- "
        element!(r#"span[class="label"]"#, |el| {
            el.remove_attribute("class");
            el.set_tag_name("i")?;
            el.before("- ", ContentType::Html);
            Ok(())
        }),
        // underline-styled spans become a native underline tag
        element!(r#"span[style="text-decoration:underline"]"#, |el| {
            el.remove_attribute("style");
            el.set_tag_name("u")?;
            Ok(())
        }),
        // absolutize root-relative links
        element!(r#"a[href^="/"]"#, |el| {
            if let Some(href) = el.get_attribute("href") {
                el.set_attribute("href", &format!("{RACO_BASE_URL}{href}"))?;
            }
            Ok(())
        }),
        // Telegram clients don't support mailto: in <a> tags; route through
        // an outbound redirect carrying the original URL base64url-encoded
        element!(r#"a[href^="mailto:"]"#, move |el| {
            if let Some(href) = el.get_attribute("href") {
                let params = form_urlencoded::Serializer::new(String::new())
                    .append_pair("payload", &URL_SAFE.encode(href.as_bytes()))
                    .finish();
                el.set_attribute("href", &format!("{mailto_redirect_url}{params}"))?;
            }
            Ok(())
        }),
        // Telegram doesn't support <br> but \n
        element!("br", |el| {
            el.replace("\n", ContentType::Text);
            Ok(())
        }),
        // Telegram doesn't support lists either, so items get a bullet-point
        // prefix instead: 4-space indent for nested items, 2-space for
        // top-level ones, a newline after each
        element!("li > ul > li", move |el| {
            el.before(NESTED_LIST_ITEM_PREFIX, ContentType::Text);
            el.after("\n", ContentType::Text);
            nested_ul.set(true);
            Ok(())
        }),
        element!("li > ol > li", move |el| {
            el.before(NESTED_LIST_ITEM_PREFIX, ContentType::Text);
            el.after("\n", ContentType::Text);
            nested_ol.set(true);
            Ok(())
        }),
        element!("li", move |el| {
            if nested.replace(false) {
                return Ok(());
            }
            el.before(TOP_LEVEL_LIST_ITEM_PREFIX, ContentType::Text);
            el.after("\n", ContentType::Text);
            Ok(())
        }),
        // strip all unsupported tags, keeping their text content; supported
        // tags lose every attribute except href on anchors
        element!("*", |el| {
            let tag_name = el.tag_name();
            if SUPPORTED_TAGS.contains(&tag_name.as_str()) {
                let names: Vec<String> = el.attributes().iter().map(|a| a.name()).collect();
                for name in names {
                    if !(tag_name == "a" && name == "href") {
                        el.remove_attribute(&name);
                    }
                }
            } else {
                el.remove_and_keep_content();
            }
            Ok::<(), HandlerError>(())
        }),
    ];

    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: handlers,
            ..RewriteStrSettings::default()
        },
    )
}

/// Decodes HTML entities except the four that Telegram's parser treats as
/// structural.
fn decode_entities_keeping_structural(text: &str) -> String {
    let mut masked = text.to_owned();
    for (entity, marker) in KEPT_ENTITIES {
        masked = masked.replace(entity, marker);
    }
    let mut decoded = html_escape::decode_html_entities(&masked).into_owned();
    for (entity, marker) in KEPT_ENTITIES {
        decoded = decoded.replace(marker, entity);
    }
    decoded
}

/// Human-readable IEC (base-1024) byte size with one decimal place.
fn byte_count_iec(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    if bytes < UNIT {
        return format!("{bytes} B");
    }
    let mut div = UNIT;
    let mut exp = 0usize;
    let mut n = bytes / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    format!("{:.1} {}iB", bytes as f64 / div as f64, ["K", "M", "G", "T", "P", "E"][exp])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iec_sizes() {
        assert_eq!(byte_count_iec(0), "0 B");
        assert_eq!(byte_count_iec(1023), "1023 B");
        assert_eq!(byte_count_iec(1024), "1.0 KiB");
        assert_eq!(byte_count_iec(66670), "65.1 KiB");
        assert_eq!(byte_count_iec(121304), "118.5 KiB");
        assert_eq!(byte_count_iec(5 * 1024 * 1024), "5.0 MiB");
        assert_eq!(byte_count_iec(3 * 1024 * 1024 * 1024), "3.0 GiB");
    }

    #[test]
    fn subject_code_sanitization() {
        assert_eq!(sanitize_subject_code("SI"), "SI");
        assert_eq!(sanitize_subject_code("#PREMAT-GEI"), "PREMAT_GEI");
        assert_eq!(sanitize_subject_code("A-B-C"), "A_B_C");
    }

    #[test]
    fn structural_entities_stay_escaped() {
        let decoded = decode_entities_keeping_structural(
            "&lt;xc.h&gt; &#61; &#34;x&#34; &amp; &eacute; &quot;q&quot;",
        );
        assert_eq!(decoded, "&lt;xc.h&gt; = \"x\" &amp; é &quot;q&quot;");
    }

    #[test]
    fn paragraphs_are_stripped() {
        let out = rewrite_body("<p>hola</p>", "https://bot.example/mailto?").unwrap();
        assert_eq!(out, "hola");
    }

    #[test]
    fn br_becomes_newline() {
        let out = rewrite_body("a<br />b", "https://bot.example/mailto?").unwrap();
        assert_eq!(out, "a\nb");
    }

    #[test]
    fn relative_links_are_absolutized() {
        let out = rewrite_body(
            r#"<a href="/avisos/veure.jsp?id=1">x</a>"#,
            "https://bot.example/mailto?",
        )
        .unwrap();
        assert_eq!(
            out,
            r#"<a href="https://raco.fib.upc.edu/avisos/veure.jsp?id=1">x</a>"#
        );
    }

    #[test]
    fn mailto_links_are_redirected() {
        let out = rewrite_body(
            r#"<a href="mailto:secretaria@fib.upc.edu">write us</a>"#,
            "https://bot.example/mailto?",
        )
        .unwrap();
        let payload = URL_SAFE.encode("mailto:secretaria@fib.upc.edu".as_bytes());
        let expected_params = form_urlencoded::Serializer::new(String::new())
            .append_pair("payload", &payload)
            .finish();
        assert_eq!(
            out,
            format!(r#"<a href="https://bot.example/mailto?{expected_params}">write us</a>"#)
        );
    }

    #[test]
    fn label_spans_become_italic() {
        let out = rewrite_body(
            r#"<span class="label">Aula</span>"#,
            "https://bot.example/mailto?",
        )
        .unwrap();
        assert_eq!(out, "- <i>Aula</i>");
    }

    #[test]
    fn underline_spans_become_u_tags() {
        let out = rewrite_body(
            r#"<span style="text-decoration:underline">important</span>"#,
            "https://bot.example/mailto?",
        )
        .unwrap();
        assert_eq!(out, "<u>important</u>");
    }

    #[test]
    fn top_level_list_items_get_two_space_bullets() {
        let out = rewrite_body(
            "<ul><li>one</li><li>two</li></ul>",
            "https://bot.example/mailto?",
        )
        .unwrap();
        assert_eq!(out, "  • one\n  • two\n");
    }

    #[test]
    fn nested_list_items_get_four_space_bullets() {
        let out = rewrite_body(
            "<ul><li>top<ul><li>inner</li></ul></li></ul>",
            "https://bot.example/mailto?",
        )
        .unwrap();
        assert_eq!(out, "  • top    • inner\n\n");
    }

    #[test]
    fn supported_tags_lose_extra_attributes() {
        let out = rewrite_body(
            r#"<b class="x">bold</b> <a href="https://a.example" target="_blank">link</a>"#,
            "https://bot.example/mailto?",
        )
        .unwrap();
        assert_eq!(out, r#"<b>bold</b> <a href="https://a.example">link</a>"#);
    }
}
