//! Apache `mod_autoindex`-style HTML.
//!
//! Pure string formatting: every dynamic string passes through
//! [`html_escape`], and every generated link carries the page's query.

use crate::models::listing::{ListingPage, ListingRow};
use crate::services::sort::{SortColumn, SortOrder, SortSpec};
use axum::http::StatusCode;
use std::fmt::Write;

const DOCTYPE: &str = "<!DOCTYPE HTML PUBLIC \"-//W3C//DTD HTML 3.2 Final//EN\">";

pub fn html_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Human-readable size the way Apache prints it: `512`, `4.0K`, `18M`.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["K", "M", "G", "T", "P", "E"];
    if bytes < 1024 {
        return bytes.to_string();
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    if value < 9.95 {
        format!("{value:.1}{}", UNITS[unit])
    } else {
        format!("{:.0}{}", value.round(), UNITS[unit])
    }
}

/// Percent-encode one path segment.
pub fn encode_segment(segment: &str) -> String {
    urlencoding::encode(segment).into_owned()
}

/// `path` followed by `query` as a query string. Not HTML-escaped.
pub fn with_query(path: &str, query: &[(&str, String)]) -> String {
    if query.is_empty() {
        return path.to_string();
    }
    let pairs: Vec<String> = query
        .iter()
        .map(|(name, value)| format!("{name}={}", urlencoding::encode(value)))
        .collect();
    format!("{path}?{}", pairs.join("&"))
}

fn sort_query(page: &ListingPage, sort: SortSpec) -> Vec<(&str, String)> {
    let mut query: Vec<(&str, String)> = page
        .carried_query
        .iter()
        .map(|(name, value)| (*name, value.clone()))
        .collect();
    query.push(("C", sort.column.code().to_string()));
    query.push(("O", sort.order.code().to_string()));
    query
}

/// Header link for `column`: clicking the active column flips its order.
fn header_link(page: &ListingPage, column: SortColumn, label: &str) -> String {
    let order = if page.sort.column == column {
        page.sort.order.reversed()
    } else {
        SortOrder::Ascending
    };
    let href = with_query(&page.path, &sort_query(page, SortSpec { column, order }));
    format!("<a href=\"{}\">{}</a>", html_escape(&href), label)
}

fn row_html(out: &mut String, row: &ListingRow, query: &[(&str, String)]) {
    let name = html_escape(&row.name);
    let cell = match &row.href {
        Some(href) => format!(
            "<a href=\"{}\">{}</a>",
            html_escape(&with_query(href, query)),
            name
        ),
        None => name,
    };
    let size = row.size.map(format_size).unwrap_or_else(|| "-".to_string());
    let description = row
        .description
        .as_deref()
        .map(html_escape)
        .unwrap_or_else(|| "&nbsp;".to_string());
    let _ = writeln!(
        out,
        "<tr><td valign=\"top\">{cell}</td><td align=\"right\">{size}</td><td>{description}</td></tr>"
    );
}

fn summary(page: &ListingPage) -> String {
    let noun = if page.total_matched == 1 { "entry" } else { "entries" };
    let mut line = format!(
        "Showing {} of {} {}",
        page.displayed(),
        page.total_matched,
        noun
    );
    if page.is_partial() {
        line.push_str(" (partial listing; raise limit to see more)");
    }
    line
}

pub fn render_listing(page: &ListingPage) -> String {
    let title = html_escape(&page.path);
    let row_query = sort_query(page, page.sort);
    let mut out = String::new();

    let _ = writeln!(out, "{DOCTYPE}");
    let _ = writeln!(out, "<html>\n <head>\n  <title>Index of {title}</title>\n </head>\n <body>");
    let _ = writeln!(out, "<h1>Index of {title}</h1>");

    if let Some(filter) = &page.filter_description {
        let _ = writeln!(out, "<p>Filtered by {}</p>", html_escape(filter));
    }
    for error in &page.errors {
        let _ = writeln!(out, "<p class=\"error\">Unavailable: {}</p>", html_escape(error));
    }

    let _ = writeln!(out, "<table>");
    let _ = writeln!(
        out,
        "<tr><th valign=\"top\">{}</th><th>{}</th><th>{}</th></tr>",
        header_link(page, SortColumn::Name, "Name"),
        header_link(page, SortColumn::Size, "Size"),
        header_link(page, SortColumn::Description, "Description"),
    );
    let _ = writeln!(out, "<tr><th colspan=\"3\"><hr></th></tr>");

    if let Some(parent) = &page.parent {
        row_html(
            &mut out,
            &ListingRow {
                href: Some(parent.clone()),
                name: "Parent Directory".to_string(),
                size: None,
                description: None,
            },
            &row_query,
        );
    }
    for row in &page.rows {
        row_html(&mut out, row, &row_query);
    }

    let _ = writeln!(out, "<tr><th colspan=\"3\"><hr></th></tr>");
    let _ = writeln!(out, "</table>");
    let _ = writeln!(out, "<address>{}</address>", html_escape(&summary(page)));
    let _ = writeln!(out, "</body></html>");
    out
}

/// Small error document; `message` is escaped.
pub fn error_page(status: StatusCode, message: &str) -> String {
    let title = html_escape(&format!(
        "{} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Error")
    ));
    format!(
        "{DOCTYPE}\n<html>\n <head>\n  <title>{title}</title>\n </head>\n <body>\n<h1>{title}</h1>\n<p>{}</p>\n</body></html>\n",
        html_escape(message)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn page(rows: Vec<ListingRow>, total: usize) -> ListingPage {
        ListingPage {
            path: "/torrents/".to_string(),
            parent: Some("/".to_string()),
            rows,
            total_matched: total,
            filter_description: None,
            errors: Vec::new(),
            sort: SortSpec::default(),
            carried_query: vec![("key", "k&y".to_string())],
        }
    }

    fn row(name: &str, size: u64) -> ListingRow {
        ListingRow {
            href: Some(format!("/torrents/{}/", encode_segment(name))),
            name: name.to_string(),
            size: Some(size),
            description: None,
        }
    }

    #[rstest]
    #[case(0, "0")]
    #[case(1023, "1023")]
    #[case(1024, "1.0K")]
    #[case(1536, "1.5K")]
    #[case(10 * 1024, "10K")]
    #[case(5 * 1024 * 1024 + 300 * 1024, "5.3M")]
    #[case(3 * 1024 * 1024 * 1024, "3.0G")]
    fn sizes_are_human_readable(#[case] bytes: u64, #[case] expected: &str) {
        assert_eq!(format_size(bytes), expected);
    }

    #[test]
    fn markup_in_names_is_escaped() {
        let html = render_listing(&page(vec![row("<script>alert(1)</script>", 1)], 1));
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;alert(1)&lt;/script&gt;"));
    }

    #[test]
    fn links_carry_the_query_and_sort() {
        let html = render_listing(&page(vec![row("movie", 1)], 1));
        assert!(html.contains("href=\"/torrents/movie/?key=k%26y&amp;C=N&amp;O=A\""));
        // Parent link keeps the key too.
        assert!(html.contains("href=\"/?key=k%26y&amp;C=N&amp;O=A\">Parent Directory</a>"));
    }

    #[test]
    fn active_column_header_toggles_order() {
        let html = render_listing(&page(Vec::new(), 0));
        assert!(html.contains("C=N&amp;O=D\">Name</a>"));
        assert!(html.contains("C=S&amp;O=A\">Size</a>"));
    }

    #[test]
    fn summary_flags_partial_listings() {
        let full = render_listing(&page(vec![row("a", 1)], 1));
        assert!(full.contains("Showing 1 of 1 entry</address>"));

        let partial = render_listing(&page(vec![row("a", 1)], 5));
        assert!(partial.contains("Showing 1 of 5 entries (partial listing"));
    }

    #[test]
    fn filter_and_source_errors_are_annotated() {
        let mut listing = page(Vec::new(), 0);
        listing.filter_description = Some("files ending in .mkv".to_string());
        listing.errors = vec!["usenet: upstream returned HTTP 503".to_string()];
        let html = render_listing(&listing);
        assert!(html.contains("Filtered by files ending in .mkv"));
        assert!(html.contains("Unavailable: usenet: upstream returned HTTP 503"));
    }

    #[test]
    fn error_page_escapes_message() {
        let html = error_page(StatusCode::BAD_REQUEST, "bad <filter>");
        assert!(html.contains("<title>400 Bad Request</title>"));
        assert!(html.contains("bad &lt;filter&gt;"));
    }
}
