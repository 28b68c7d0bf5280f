//! Redirect follow policy.
//!
//! # Design Decisions
//! - 301, 302, 303, 307 and 308 with a `Location` are followed; any other
//!   3xx, or a 3xx without `Location`, is delivered to the client as final
//! - 303 turns every method except HEAD into GET; 301 and 302 turn POST into
//!   GET; 307 and 308 never change the method
//! - A method change drops the body and the headers that describe it
//! - Credentials are not forwarded to a different origin

use hyper::{Method, StatusCode};
use url::Url;

use crate::config::RedirectConfig;
use crate::net::Scheme;
use crate::request::error::{ErrorKind, RequestError};
use crate::request::headers::Headers;

/// Headers that describe a request body and go away with it.
const BODY_HEADERS: [&str; 5] = [
    "content-type",
    "content-length",
    "content-encoding",
    "content-language",
    "content-location",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedirectPolicy {
    pub follow: bool,
    pub max_redirects: u32,
}

impl Default for RedirectPolicy {
    fn default() -> Self {
        Self::from(&RedirectConfig::default())
    }
}

impl From<&RedirectConfig> for RedirectPolicy {
    fn from(config: &RedirectConfig) -> Self {
        Self {
            follow: config.follow,
            max_redirects: config.max_redirects,
        }
    }
}

/// What to do with a response header block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectAction {
    /// Hand the response to the client.
    Deliver,
    /// Discard the response and issue the next hop.
    Follow(Redirect),
}

/// The next hop of a redirect chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub url: Url,
    pub method: Method,
    pub drop_body: bool,
    pub cross_origin: bool,
}

impl Redirect {
    /// Rewrite the outgoing header set for this hop.
    pub fn apply_to(&self, headers: &mut Headers) {
        if self.drop_body {
            for name in BODY_HEADERS {
                headers.remove(name);
            }
        }
        if self.cross_origin {
            headers.remove("authorization");
            headers.remove("cookie");
            headers.remove("proxy-authorization");
        }
    }
}

pub fn is_redirect(status: StatusCode) -> bool {
    matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308)
}

/// Method for the next hop and whether the body is dropped.
pub fn rewrite_method(status: StatusCode, method: &Method) -> (Method, bool) {
    match status.as_u16() {
        303 if method != Method::HEAD => (Method::GET, method != Method::GET),
        301 | 302 if method == Method::POST => (Method::GET, true),
        _ => (method.clone(), false),
    }
}

impl RedirectPolicy {
    /// Decide whether a response is final or the next hop of a chain.
    ///
    /// `followed` counts hops already taken by this request.
    pub fn evaluate(
        &self,
        method: &Method,
        current: &Url,
        status: StatusCode,
        location: Option<&str>,
        followed: u32,
    ) -> Result<RedirectAction, RequestError> {
        if !self.follow || !is_redirect(status) {
            return Ok(RedirectAction::Deliver);
        }
        let Some(location) = location else {
            return Ok(RedirectAction::Deliver);
        };

        if followed >= self.max_redirects {
            return Err(RequestError::new(
                ErrorKind::TooManyRedirects,
                format!("more than {} redirects, last from {}", self.max_redirects, current),
            ));
        }

        let url = current
            .join(location.trim())
            .map_err(|e| RequestError::invalid(format!("bad redirect location '{}': {}", location, e)))?;
        if Scheme::from_url_scheme(url.scheme()).is_none() {
            return Err(RequestError::invalid(format!("redirect to unsupported scheme '{}'", url.scheme())));
        }

        let (method, drop_body) = rewrite_method(status, method);
        let cross_origin = url.origin() != current.origin();

        Ok(RedirectAction::Follow(Redirect {
            url,
            method,
            drop_body,
            cross_origin,
        }))
    }
}
