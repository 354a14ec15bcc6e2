//! Header and credential injection.
//!
//! - [`headers`] adds default headers to every request, leaving headers the
//!   request already carries untouched.
//! - [`credential`] places a [`Credential`] in a header, a query parameter or
//!   a cookie.
//!
//! Credential values are opaque here: how they are obtained (login flows,
//! token refresh, profile lookup) is up to the caller.

use std::fmt;

use http::header::{HeaderName, HeaderValue, COOKIE};
use http::HeaderMap;
use relay_core::{
    BoxFuture, Next, Policy, PolicyKind, PolicyMeta, RelayError, RelayResult, RequestContext,
    Response,
};
use serde::{Deserialize, Serialize};

/// Policy adding default headers. See [`headers`].
#[derive(Debug, Clone, Default)]
pub struct DefaultHeaders {
    headers: HeaderMap,
}

/// Creates a policy that adds `headers` to requests that do not already set
/// them.
pub fn headers(headers: HeaderMap) -> DefaultHeaders {
    DefaultHeaders { headers }
}

impl DefaultHeaders {
    /// Builds the policy from string pairs.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidRequest`] for an invalid name or value.
    pub fn from_pairs<I, K, V>(pairs: I) -> RelayResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            let (name, value) = (name.as_ref(), value.as_ref());
            let header = HeaderName::try_from(name)
                .map_err(|e| RelayError::invalid_request(format!("invalid header name '{name}': {e}")))?;
            let value = HeaderValue::try_from(value)
                .map_err(|e| RelayError::invalid_request(format!("invalid value for '{name}': {e}")))?;
            map.append(header, value);
        }
        Ok(headers(map))
    }
}

impl Policy for DefaultHeaders {
    fn name(&self) -> &'static str {
        "headers"
    }

    fn meta(&self) -> PolicyMeta {
        PolicyMeta::new(self.name(), PolicyKind::Headers)
    }

    fn handle<'a>(
        &'a self,
        mut ctx: RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, RelayResult<Response>> {
        let request_headers = ctx.headers_mut();
        for name in self.headers.keys() {
            if !request_headers.contains_key(name) {
                for value in self.headers.get_all(name) {
                    request_headers.append(name.clone(), value.clone());
                }
            }
        }
        next.run(ctx)
    }
}

/// Where a credential is placed on the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialLocation {
    /// A request header, e.g. `Authorization`.
    Header,
    /// A query parameter.
    Query,
    /// A cookie.
    Cookie,
}

/// A credential to attach to requests.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Where to place the credential.
    pub location: CredentialLocation,
    /// Header, parameter or cookie name.
    pub name: String,
    /// The secret value.
    pub value: String,
}

impl Credential {
    /// A header credential.
    pub fn header(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            location: CredentialLocation::Header,
            name: name.into(),
            value: value.into(),
        }
    }

    /// An `Authorization: Bearer <token>` credential.
    pub fn bearer(token: impl AsRef<str>) -> Self {
        Self::header("authorization", format!("Bearer {}", token.as_ref()))
    }

    /// A query-parameter credential.
    pub fn query(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            location: CredentialLocation::Query,
            name: name.into(),
            value: value.into(),
        }
    }

    /// A cookie credential.
    pub fn cookie(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            location: CredentialLocation::Cookie,
            name: name.into(),
            value: value.into(),
        }
    }

    /// Returns the context with the credential applied.
    ///
    /// Header credentials replace an existing header of the same name. Query
    /// credentials are appended to the URL with form encoding. Cookie
    /// credentials are merged into an existing `Cookie` header.
    pub fn apply(&self, ctx: RequestContext) -> RelayResult<RequestContext> {
        match self.location {
            CredentialLocation::Header => ctx.with_header(&self.name, &self.value),
            CredentialLocation::Query => {
                let pair = serde_urlencoded::to_string([(&self.name, &self.value)])
                    .map_err(|e| RelayError::serialization(e.to_string()))?;
                let url = append_query(ctx.url(), &pair);
                ctx.with_url(url)
            }
            CredentialLocation::Cookie => {
                let pair = format!("{}={}", self.name, self.value);
                let merged = match ctx.header_str(COOKIE.as_str()) {
                    Some(existing) if !existing.trim().is_empty() => {
                        format!("{}; {pair}", existing.trim_end_matches([';', ' ']))
                    }
                    _ => pair,
                };
                ctx.with_header(COOKIE.as_str(), &merged)
            }
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("location", &self.location)
            .field("name", &self.name)
            .field("value", &"<redacted>")
            .finish()
    }
}

/// Appends an encoded `key=value` pair to a URL, before any fragment.
fn append_query(url: &str, pair: &str) -> String {
    let (base, fragment) = match url.split_once('#') {
        Some((base, fragment)) => (base, Some(fragment)),
        None => (url, None),
    };
    let separator = if !base.contains('?') {
        "?"
    } else if base.ends_with('?') || base.ends_with('&') {
        ""
    } else {
        "&"
    };
    let mut out = format!("{base}{separator}{pair}");
    if let Some(fragment) = fragment {
        out.push('#');
        out.push_str(fragment);
    }
    out
}

/// Policy attaching a credential. See [`credential`].
#[derive(Debug, Clone)]
pub struct CredentialPolicy {
    credential: Credential,
}

/// Creates a policy that applies `credential` to every request.
pub fn credential(credential: Credential) -> CredentialPolicy {
    CredentialPolicy { credential }
}

impl Policy for CredentialPolicy {
    fn name(&self) -> &'static str {
        "credential"
    }

    fn meta(&self) -> PolicyMeta {
        PolicyMeta::new(self.name(), PolicyKind::Headers)
    }

    fn handle<'a>(
        &'a self,
        ctx: RequestContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, RelayResult<Response>> {
        match self.credential.apply(ctx) {
            Ok(ctx) => next.run(ctx),
            Err(e) => Box::pin(async move { Err(e) }),
        }
    }
}
