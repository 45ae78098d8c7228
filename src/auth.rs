//! HTTP authentication.
//!
//! On a 401 the strongest offered scheme wins (Digest over Basic) and the
//! request is retried once with an `Authorization` header.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngCore;

use crate::headers::Challenge;

/// Prefer `Digest` over `Basic`; anything else is not understood.
pub fn select_challenge(challenges: &[Challenge]) -> Option<&Challenge> {
    challenges
        .iter()
        .find(|c| c.scheme.eq_ignore_ascii_case("digest"))
        .or_else(|| {
            challenges
                .iter()
                .find(|c| c.scheme.eq_ignore_ascii_case("basic"))
        })
}

/// Build the `Authorization` value answering `challenge`.
///
/// `target` is the request target (escaped path plus query) the
/// credentials are scoped to.
pub fn authorization(
    challenge: &Challenge,
    method: &str,
    target: &str,
    username: &str,
    password: &str,
) -> Option<String> {
    if challenge.scheme.eq_ignore_ascii_case("basic") {
        let credentials = BASE64.encode(format!("{username}:{password}"));
        return Some(format!("Basic {credentials}"));
    }
    if challenge.scheme.eq_ignore_ascii_case("digest") {
        return digest_authorization(challenge, method, target, username, password);
    }
    None
}

fn digest_authorization(
    challenge: &Challenge,
    method: &str,
    target: &str,
    username: &str,
    password: &str,
) -> Option<String> {
    let realm = challenge.param("realm").unwrap_or_default();
    let nonce = challenge.param("nonce")?;
    let opaque = challenge.param("opaque");
    // only qop=auth is implemented, matching the MD5 profile
    let qop_auth = challenge
        .param("qop")
        .is_some_and(|qop| qop.split(',').any(|q| q.trim().eq_ignore_ascii_case("auth")));

    let ha1 = md5_hex(format!("{username}:{realm}:{password}").as_bytes());
    let ha2 = md5_hex(format!("{method}:{target}").as_bytes());

    let mut header = String::with_capacity(256);
    header.push_str("Digest username=\"");
    header.push_str(username);
    header.push_str("\", realm=\"");
    header.push_str(realm);
    header.push_str("\", nonce=\"");
    header.push_str(nonce);
    header.push_str("\", uri=\"");
    header.push_str(target);
    header.push('"');

    let response = if qop_auth {
        let mut raw = [0u8; 16];
        rand::rng().fill_bytes(&mut raw);
        let cnonce: String = raw.iter().map(|b| format!("{b:02x}")).collect();
        let nc = "00000001";
        let response = md5_hex(format!("{ha1}:{nonce}:{nc}:{cnonce}:auth:{ha2}").as_bytes());
        header.push_str(", qop=auth, nc=");
        header.push_str(nc);
        header.push_str(", cnonce=\"");
        header.push_str(&cnonce);
        header.push('"');
        response
    } else {
        md5_hex(format!("{ha1}:{nonce}:{ha2}").as_bytes())
    };

    header.push_str(", response=\"");
    header.push_str(&response);
    header.push('"');

    if let Some(opaque) = opaque {
        header.push_str(", opaque=\"");
        header.push_str(opaque);
        header.push('"');
    }
    if challenge.param("algorithm").is_some() {
        header.push_str(", algorithm=MD5");
    }

    Some(header)
}

fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}
