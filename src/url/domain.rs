use crate::UrlError;
use url::Url;

/// Returns the lowercase host of a URL, the key used for rate buckets,
/// circuit breakers and credential scopes
///
/// # Examples
///
/// ```
/// use url::Url;
/// use sumi_harvest::url::domain_of;
///
/// let url = Url::parse("https://Shop.Example.com:8443/cart").unwrap();
/// assert_eq!(domain_of(&url).unwrap(), "shop.example.com");
/// ```
pub fn domain_of(url: &Url) -> Result<String, UrlError> {
    url.host_str()
        .filter(|h| !h.is_empty())
        .map(|h| h.to_lowercase())
        .ok_or(UrlError::MissingDomain)
}
