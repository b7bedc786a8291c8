use url::Url;

/// Host part of a `chrome-extension://<id>/...` URL.
pub(crate) fn extension_id(raw: &str) -> Option<String> {
    let parsed = Url::parse(raw).ok()?;
    if parsed.scheme() != "chrome-extension" {
        return None;
    }
    parsed
        .host_str()
        .filter(|host| !host.is_empty())
        .map(str::to_string)
}

/// `chrome-extension://<id>/<page>` with any leading slash on `page` removed.
pub(crate) fn extension_url(extension_id: &str, page: &str) -> String {
    format!(
        "chrome-extension://{}/{}",
        extension_id,
        page.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_extension_id() {
        assert_eq!(
            extension_id("chrome-extension://abcdefgh/pages/frontend.html?x=1").as_deref(),
            Some("abcdefgh")
        );
        assert!(extension_id("https://example.com/").is_none());
        assert!(extension_id("not a url").is_none());
    }

    #[test]
    fn builds_extension_urls() {
        assert_eq!(
            extension_url("abc", "/pages/options.html"),
            "chrome-extension://abc/pages/options.html"
        );
    }
}
