use std::time::Duration;

use actix_web::cookie::{time, Cookie, SameSite};

use super::extractor::ACCESS_COOKIE_NAME;

/// Attributes shared by every session cookie the server sets or clears.
#[derive(Debug, Clone)]
pub struct SessionCookies {
    domain: Option<String>,
    max_age: Duration,
}

impl SessionCookies {
    pub fn new(domain: Option<String>, max_age: Duration) -> Self {
        Self {
            domain: domain.filter(|d| !d.is_empty()),
            max_age,
        }
    }

    pub fn issue(&self, token: &str, secure_connection: bool) -> Cookie<'static> {
        let max_age = i64::try_from(self.max_age.as_secs()).unwrap_or(i64::MAX);
        self.build(token.to_string(), secure_connection, time::Duration::seconds(max_age))
    }

    pub fn clear(&self, secure_connection: bool) -> Cookie<'static> {
        self.build(String::new(), secure_connection, time::Duration::seconds(0))
    }

    fn build(
        &self,
        value: String,
        secure_connection: bool,
        max_age: time::Duration,
    ) -> Cookie<'static> {
        // Cross-site requests only carry SameSite=None cookies over TLS.
        let same_site = if secure_connection {
            SameSite::None
        } else {
            SameSite::Lax
        };

        let mut cookie = Cookie::build(ACCESS_COOKIE_NAME, value)
            .path("/")
            .secure(true)
            .http_only(true)
            .same_site(same_site)
            .max_age(max_age)
            .finish();

        if let Some(domain) = &self.domain {
            cookie.set_domain(domain.clone());
        }

        cookie
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_cookie_attributes() {
        let cookies = SessionCookies::new(Some("shop.example".to_string()), Duration::from_secs(3600));
        let cookie = cookies.issue("a.b.c", true);

        assert_eq!(cookie.name(), ACCESS_COOKIE_NAME);
        assert_eq!(cookie.value(), "a.b.c");
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.domain(), Some("shop.example"));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::None));
        assert_eq!(cookie.max_age(), Some(time::Duration::seconds(3600)));
    }

    #[test]
    fn plain_http_uses_lax() {
        let cookies = SessionCookies::new(None, Duration::from_secs(60));
        let cookie = cookies.issue("a.b.c", false);

        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.domain(), None);
    }

    #[test]
    fn cleared_cookie_expires_immediately() {
        let cookies = SessionCookies::new(Some(String::new()), Duration::from_secs(60));
        let cookie = cookies.clear(true);

        assert_eq!(cookie.value(), "");
        assert_eq!(cookie.max_age(), Some(time::Duration::ZERO));
        assert_eq!(cookie.domain(), None);
    }
}
