//! `Link` header pagination.
//!
//! GitHub list endpoints advertise further pages in a header like:
//! `<https://api.github.com/installation/repositories?per_page=100&page=2>; rel="next", <...&page=3>; rel="last"`
//! The last page carries no `rel="next"` link.

use url::Url;

/// Page numbers advertised by a `Link` header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkPagination {
    pub next_page: Option<u32>,
    pub last_page: Option<u32>,
}

/// Parse a `Link` header. Unknown relations and malformed parts are skipped.
pub fn parse_link_header(link_header: &str) -> LinkPagination {
    let mut info = LinkPagination::default();

    for part in link_header.split(',') {
        let mut url = None;
        let mut rel = None;

        for segment in part.split(';').map(str::trim) {
            if let Some(inner) = segment.strip_prefix('<').and_then(|s| s.strip_suffix('>')) {
                url = Some(inner);
            } else if let Some(value) = segment.strip_prefix("rel=") {
                rel = Some(value.trim_matches('"'));
            }
        }

        let (Some(url), Some(rel)) = (url, rel) else {
            continue;
        };
        let Some(page) = page_of(url) else {
            continue;
        };
        match rel {
            "next" => info.next_page = Some(page),
            "last" => info.last_page = Some(page),
            _ => {}
        }
    }

    info
}

fn page_of(url: &str) -> Option<u32> {
    let url = Url::parse(url).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == "page")
        .and_then(|(_, value)| value.parse().ok())
}
