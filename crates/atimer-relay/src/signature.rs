use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::digest::InvalidLength;
use hmac::{Hmac, Mac};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// URL Trello signed: the public base plus this request's raw path and query.
pub fn callback_url(public_base: &str, path_and_query: &str) -> String {
    format!("{}{}", public_base.trim_end_matches('/'), path_and_query)
}

/// `base64(HMAC-SHA1(secret, body + callback_url))`.
pub fn sign(secret: &str, body: &str, callback_url: &str) -> Result<String, InvalidLength> {
    let mac = keyed(secret, body, callback_url)?;
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// Constant-time check of the `x-trello-webhook` header value.
pub fn verify(secret: &str, body: &str, callback_url: &str, provided: &str) -> bool {
    let Ok(expected) = BASE64.decode(provided) else {
        return false;
    };
    match keyed(secret, body, callback_url) {
        Ok(mac) => mac.verify_slice(&expected).is_ok(),
        Err(_) => false,
    }
}

fn keyed(secret: &str, body: &str, callback_url: &str) -> Result<HmacSha1, InvalidLength> {
    let mut mac = HmacSha1::new_from_slice(secret.as_bytes())?;
    mac.update(body.as_bytes());
    mac.update(callback_url.as_bytes());
    Ok(mac)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "trello-app-secret";
    const BODY: &str = r#"{"action":{"type":"updateCard"}}"#;
    const URL: &str = "https://timer.example.com/webhook?token=t0k&apiKey=k3y";

    #[test]
    fn known_vector() {
        // HMAC-SHA1("key", "The quick brown fox jumps over the lazy dog")
        let signed = sign("key", "The quick brown fox ", "jumps over the lazy dog").unwrap();
        assert_eq!(signed, "3nybhbi3iqa8ino29wqQcBydtNk=");
    }

    #[test]
    fn accepts_own_signature() {
        let signed = sign(SECRET, BODY, URL).unwrap();
        assert!(verify(SECRET, BODY, URL, &signed));
    }

    #[test]
    fn single_byte_mutations_are_rejected() {
        let signed = sign(SECRET, BODY, URL).unwrap();

        let body = BODY.replace("updateCard", "updateCarD");
        assert!(!verify(SECRET, &body, URL, &signed));

        let url = URL.replace("t0k", "t0K");
        assert!(!verify(SECRET, BODY, &url, &signed));

        assert!(!verify("trello-app-secreT", BODY, URL, &signed));
    }

    #[test]
    fn garbage_header_is_rejected() {
        assert!(!verify(SECRET, BODY, URL, "not base64 !!"));
        assert!(!verify(SECRET, BODY, URL, ""));
    }

    #[test]
    fn callback_url_keeps_raw_query() {
        assert_eq!(
            callback_url("https://timer.example.com/", "/webhook?token=a%2Fb&apiKey=k"),
            "https://timer.example.com/webhook?token=a%2Fb&apiKey=k"
        );
    }
}
