/// Checks whether a credential scope applies to a domain
///
/// A scope covers the domain itself and every subdomain below it:
/// `example.com` applies to `example.com`, `shop.example.com` and
/// `api.v2.example.com`, but not to `myexample.com`.
///
/// # Examples
///
/// ```
/// use sumi_harvest::url::scope_applies;
///
/// assert!(scope_applies("example.com", "example.com"));
/// assert!(scope_applies("example.com", "shop.example.com"));
/// assert!(!scope_applies("example.com", "myexample.com"));
/// assert!(!scope_applies("shop.example.com", "example.com"));
/// ```
pub fn scope_applies(scope: &str, domain: &str) -> bool {
    if scope.is_empty() {
        return false;
    }
    domain == scope
        || domain
            .strip_suffix(scope)
            .map_or(false, |rest| rest.ends_with('.'))
}

/// Lists the scopes that could cover `domain`, most specific first
///
/// `a.shop.example.com` yields `a.shop.example.com`, `shop.example.com`,
/// `example.com`. Bare top-level labels are never candidates.
pub fn scope_candidates(domain: &str) -> Vec<&str> {
    let mut candidates = vec![domain];
    let mut rest = domain;
    while let Some((_, parent)) = rest.split_once('.') {
        if !parent.contains('.') {
            break;
        }
        candidates.push(parent);
        rest = parent;
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_scope() {
        assert!(scope_applies("example.com", "example.com"));
        assert!(scope_applies("blog.example.com", "blog.example.com"));
    }

    #[test]
    fn test_parent_scope_covers_subdomains() {
        assert!(scope_applies("example.com", "blog.example.com"));
        assert!(scope_applies("example.com", "deep.nested.sub.example.com"));
    }

    #[test]
    fn test_scope_no_partial_label_match() {
        assert!(!scope_applies("example.com", "notexample.com"));
        assert!(!scope_applies("example.com", "example.com.org"));
        assert!(!scope_applies("", "example.com"));
    }

    #[test]
    fn test_child_scope_does_not_cover_parent() {
        assert!(!scope_applies("blog.example.com", "example.com"));
    }

    #[test]
    fn test_scope_candidates_order() {
        assert_eq!(
            scope_candidates("a.shop.example.com"),
            vec!["a.shop.example.com", "shop.example.com", "example.com"]
        );
        assert_eq!(scope_candidates("example.com"), vec!["example.com"]);
    }

    #[test]
    fn test_scope_candidates_for_ip() {
        // Not meaningful for IPs, but must not panic and must start with the host
        let candidates = scope_candidates("127.0.0.1");
        assert_eq!(candidates[0], "127.0.0.1");
    }

    #[test]
    fn test_every_candidate_applies() {
        let domain = "x.y.example.co.uk";
        for scope in scope_candidates(domain) {
            assert!(scope_applies(scope, domain), "{} should cover {}", scope, domain);
        }
    }
}
