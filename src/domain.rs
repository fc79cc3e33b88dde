use url::Url;

/// Canonical grouping key for same-site duplicate detection: the lowercased
/// hostname with a single leading `www.` label stripped. Malformed URLs map
/// to the empty string — callers treat that as "no grouping possible" and
/// fall back to global comparison.
pub fn canonical_domain(url: &str) -> String {
    let host = Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .unwrap_or_default();
    let host = host.to_lowercase();
    match host.strip_prefix("www.") {
        Some(rest) => rest.to_string(),
        None => host,
    }
}

/// URL with its host replaced by the canonical domain, used for suppression
/// keys so `http://Example.com/a` and `http://www.example.com/a` count as
/// one sighting. Malformed URLs pass through trimmed but otherwise verbatim.
pub fn canonical_url(url: &str) -> String {
    let Ok(mut parsed) = Url::parse(url.trim()) else {
        return url.trim().to_string();
    };
    let canon = canonical_domain(url);
    if !canon.is_empty() {
        let _ = parsed.set_host(Some(&canon));
    }
    parsed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_and_strips_www() {
        assert_eq!(canonical_domain("http://Example.com/a"), "example.com");
        assert_eq!(canonical_domain("https://WWW.Example.com/x?y=1"), "example.com");
    }

    #[test]
    fn strips_www_exactly_once() {
        assert_eq!(
            canonical_domain("http://www.www.example.com/"),
            "www.example.com"
        );
    }

    #[test]
    fn idempotent_on_canonical_domains() {
        for d in ["example.com", "phish.sinking.yachts", "a.b.c.d.example.org"] {
            let again = canonical_domain(&format!("http://{}/", d));
            assert_eq!(again, d);
        }
    }

    #[test]
    fn ignores_port_userinfo_and_path() {
        assert_eq!(
            canonical_domain("http://user:pw@Example.com:8080/deep/path"),
            "example.com"
        );
    }

    #[test]
    fn url_variants_share_a_canonical_form() {
        assert_eq!(
            canonical_url("http://Example.com/a"),
            canonical_url("http://www.example.com/a")
        );
        assert_eq!(canonical_url("http://Example.com/a"), "http://example.com/a");
    }

    #[test]
    fn canonical_url_preserves_path_query_and_port() {
        assert_eq!(
            canonical_url("https://WWW.Example.com:8443/login?x=1"),
            "https://example.com:8443/login?x=1"
        );
    }

    #[test]
    fn canonical_url_passes_malformed_through() {
        assert_eq!(canonical_url("  not a url "), "not a url");
    }

    #[test]
    fn malformed_urls_yield_empty() {
        assert_eq!(canonical_domain("not a url"), "");
        assert_eq!(canonical_domain(""), "");
        assert_eq!(canonical_domain("mailto:"), "");
    }
}
