//! SigV2 canonicalisation and signing core
//!
//! Builds the legacy header-style string-to-sign and its HMAC-SHA1
//! signature. Bit-exact compatibility with external clients is the whole
//! point here: subresources are emitted in a fixed whitelist order and never
//! URL-decoded or re-encoded, absent fields still contribute their
//! newlines, and amz headers are sorted by lower-cased name.

use crate::error::AuthError;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Datelike, Utc};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use std::collections::{BTreeMap, HashMap};

type HmacSha1 = Hmac<Sha1>;

/// Query parameters that participate in the canonical resource, in emission
/// order.
pub const SIGNED_SUBRESOURCES: [&str; 25] = [
    "acl",
    "cors",
    "delete",
    "lifecycle",
    "location",
    "logging",
    "notification",
    "partNumber",
    "policy",
    "requestPayment",
    "response-cache-control",
    "response-content-disposition",
    "response-content-encoding",
    "response-content-language",
    "response-content-type",
    "response-expires",
    "torrent",
    "uploadId",
    "uploads",
    "start-date",
    "end-date",
    "versionId",
    "versioning",
    "versions",
    "website",
];

/// The pieces of a request that feed the canonical header string
#[derive(Clone, Debug)]
pub struct SignableRequest<'a> {
    /// HTTP method
    pub method: &'a str,
    /// Content-MD5 header, if present
    pub content_md5: Option<&'a str>,
    /// Content-Type header, if present
    pub content_type: Option<&'a str>,
    /// Date header, if present
    pub date: Option<&'a str>,
    /// X-Amz-Date header, if present
    pub amz_date: Option<&'a str>,
    /// Expires value for pre-signed URLs
    pub expires: Option<&'a str>,
    /// x-amz-* headers, keyed by lower-cased name
    pub amz_headers: &'a BTreeMap<String, String>,
    /// Request URI (path only)
    pub uri: &'a str,
    /// Raw query parameters (undecoded key → undecoded value)
    pub sub_resources: &'a HashMap<String, String>,
}

/// Canonical representation of the x-amz-* headers: `name:value\n` per
/// header, ordered by name.
fn canon_amz_headers(amz_headers: &BTreeMap<String, String>) -> String {
    let mut dest = String::new();
    for (name, value) in amz_headers {
        dest.push_str(name);
        dest.push(':');
        dest.push_str(value);
        dest.push('\n');
    }
    dest
}

/// Canonical representation of the object's location: the request URI plus
/// the signed subresources in whitelist order, carried verbatim.
fn canon_resource(request_uri: &str, sub_resources: &HashMap<String, String>) -> String {
    let mut dest = String::from(request_uri);

    let mut initial = true;
    for subresource in SIGNED_SUBRESOURCES {
        let Some(value) = sub_resources.get(subresource) else {
            continue;
        };
        dest.push(if initial { '?' } else { '&' });
        initial = false;
        dest.push_str(subresource);
        if !value.is_empty() {
            dest.push('=');
            dest.push_str(value);
        }
    }
    dest
}

/// Assemble the canonical header string:
///
/// ```text
/// METHOD\nCONTENT-MD5\nCONTENT-TYPE\nDATE\n{amz headers}{resource}
/// ```
///
/// Absent optional fields still emit their line breaks.
pub fn canonical_header_string(
    method: &str,
    content_md5: Option<&str>,
    content_type: Option<&str>,
    date: &str,
    amz_headers: &BTreeMap<String, String>,
    request_uri: &str,
    sub_resources: &HashMap<String, String>,
) -> String {
    let mut dest = String::from(method);
    dest.push('\n');
    dest.push_str(content_md5.unwrap_or(""));
    dest.push('\n');
    dest.push_str(content_type.unwrap_or(""));
    dest.push('\n');
    dest.push_str(date);
    dest.push('\n');
    dest.push_str(&canon_amz_headers(amz_headers));
    dest.push_str(&canon_resource(request_uri, sub_resources));
    dest
}

/// Whether a Content-MD5 value is plausible base64
fn is_base64_for_content_md5(c: char) -> bool {
    c.is_ascii_alphanumeric() || c.is_whitespace() || c == '+' || c == '/' || c == '='
}

/// Parse an RFC-2616 date; anything before 1970 is rejected.
pub fn parse_header_date(date: &str) -> Result<DateTime<Utc>, AuthError> {
    let parsed = DateTime::parse_from_rfc2822(date)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(date, "%a, %d %b %Y %H:%M:%S GMT")
                .map(|dt| DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc))
        })
        .map_err(|_| AuthError::InvalidDateFormat)?;
    if parsed.year() < 1970 {
        return Err(AuthError::DateBeforeEpoch);
    }
    Ok(parsed)
}

/// Build the canonical header string for a request, validating Content-MD5
/// and the date along the way. `presigned` requests take the Expires value
/// as the date line and skip date parsing.
pub fn build_canonical_header(
    req: &SignableRequest<'_>,
    presigned: bool,
) -> Result<String, AuthError> {
    if let Some(md5) = req.content_md5 {
        if !md5.chars().all(is_base64_for_content_md5) {
            return Err(AuthError::InvalidContentMd5);
        }
    }

    let date = if presigned {
        req.expires.ok_or(AuthError::MissingDateHeader)?
    } else if let Some(date) = req.date {
        parse_header_date(date)?;
        date
    } else {
        // x-amz-date rides in the amz headers; the date line stays empty
        let amz_date = req.amz_date.ok_or(AuthError::MissingDateHeader)?;
        parse_header_date(amz_date)?;
        ""
    };

    Ok(canonical_header_string(
        req.method,
        req.content_md5,
        req.content_type,
        date,
        req.amz_headers,
        req.uri,
        req.sub_resources,
    ))
}

/// Sign a canonical header string: `base64(HMAC-SHA1(secret, canonical))`
pub fn sign_v2(secret: &str, canonical: &str) -> Result<String, AuthError> {
    if secret.is_empty() {
        return Err(AuthError::EmptySecretKey);
    }
    let mut mac =
        HmacSha1::new_from_slice(secret.as_bytes()).map_err(|_| AuthError::EmptySecretKey)?;
    mac.update(canonical.as_bytes());
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// Extract the signed subresources from a raw query string, without
/// decoding keys or values.
#[must_use]
pub fn collect_sub_resources(query: &str) -> HashMap<String, String> {
    let mut subs = HashMap::new();
    if query.is_empty() {
        return subs;
    }
    for param in query.split('&') {
        let mut parts = param.splitn(2, '=');
        let key = parts.next().unwrap_or("");
        let value = parts.next().unwrap_or("");
        if SIGNED_SUBRESOURCES.contains(&key) {
            subs.insert(key.to_string(), value.to_string());
        }
    }
    subs
}
