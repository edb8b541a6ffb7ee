//! Header decoding and the matching keys derived from it.
//!
//! Everything here is pure and infallible: a header that cannot be decoded
//! is used as raw text, a header that is missing yields no key.

use std::sync::LazyLock;

use mail_parser::{HeaderName, MessageParser};
use regex::Regex;

use crate::pipeline::types::{HeaderField, Headers};

static ANGLE_TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<([^>]+)>").unwrap());

static EMAIL_DOMAIN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@([a-z0-9.\-]+\.[a-z]{2,})").unwrap());

static URL_HOST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://(?:[^@/?#]*@)?(\[[^\]]*\]|[^:/?#\[\]]+)").unwrap()
});

/// Subject keywords that mark travel documents, in priority order.
pub const TRAVEL_KEYWORDS: [&str; 7] = [
    "itinerary",
    "booking",
    "reservation",
    "boarding",
    "ticket",
    "trip",
    "flight",
];

// ── Decoding ────────────────────────────────────────────────────────

/// Join folded header lines into one line.
fn unfold(raw: &str) -> String {
    raw.split(['\r', '\n'])
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Decode RFC 2047 encoded words in a header value.
///
/// Falls back to the unfolded raw text when the value cannot be decoded.
pub fn decode_header_value(raw: &str) -> String {
    let unfolded = unfold(raw);
    if !unfolded.contains("=?") {
        return unfolded;
    }

    // Unstructured headers get the full encoded-word treatment, so decode the
    // value as a Subject.
    let synthetic = format!("Subject: {unfolded}\r\n\r\n");
    MessageParser::default()
        .parse(synthetic.as_bytes())
        .and_then(|message| message.subject().map(str::to_string))
        .filter(|decoded| !decoded.is_empty())
        .unwrap_or(unfolded)
}

/// Decode the headers the engine looks at from a message source.
///
/// Only the header block is needed; a full message works too.
pub fn decode_headers(raw: &[u8]) -> Headers {
    let Some(message) = MessageParser::default().parse(raw) else {
        return Headers::default();
    };

    Headers {
        from: message.header_raw(HeaderName::From).map(decode_header_value),
        subject: message.header_raw(HeaderName::Subject).map(decode_header_value),
        list_id: message.header_raw(HeaderName::ListId).map(decode_header_value),
        list_unsubscribe: message.header_raw(HeaderName::ListUnsubscribe).map(unfold),
    }
}

// ── Keys ────────────────────────────────────────────────────────────

/// The List-Id token: the bracketed part if present, else the whole value.
pub fn list_id_key(headers: &Headers) -> Option<String> {
    let value = headers.list_id.as_deref()?.trim();
    if value.is_empty() {
        return None;
    }
    let key = ANGLE_TOKEN
        .captures(value)
        .and_then(|caps| caps.get(1))
        .map_or(value, |m| m.as_str());
    Some(key.trim().to_lowercase())
}

/// Hostnames of HTTP(S) entries and domains of `mailto:` entries in
/// List-Unsubscribe, in order of appearance.
pub fn list_unsubscribe_domains(headers: &Headers) -> Vec<String> {
    let Some(value) = headers.list_unsubscribe.as_deref() else {
        return Vec::new();
    };

    let bracketed: Vec<&str> = ANGLE_TOKEN
        .captures_iter(value)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect();
    let entries = if bracketed.is_empty() {
        value.split(',').collect()
    } else {
        bracketed
    };

    entries
        .into_iter()
        .filter_map(|entry| {
            let entry = entry
                .trim_matches(|c: char| c == '<' || c == '>' || c.is_whitespace())
                .to_lowercase();
            unsubscribe_target(&entry)
        })
        .collect()
}

fn unsubscribe_target(entry: &str) -> Option<String> {
    if entry.starts_with("http") {
        let host = URL_HOST.captures(entry)?.get(1)?.as_str();
        let host = host.trim_start_matches('[').trim_end_matches(']');
        return (!host.is_empty()).then(|| host.to_string());
    }
    if entry.starts_with("mailto:") && entry.contains('@') {
        let domain = entry.rsplit('@').next()?;
        let domain = domain.split('?').next().unwrap_or(domain);
        return (!domain.is_empty()).then(|| domain.to_string());
    }
    None
}

/// The sender's domain, or the whole lower-cased From header if none is found.
pub fn from_domain(headers: &Headers) -> String {
    let from = headers.from.as_deref().unwrap_or_default().to_lowercase();
    EMAIL_DOMAIN
        .captures(&from)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or(from)
}

/// First travel keyword found in the Subject.
pub fn subject_hint(headers: &Headers) -> Option<&'static str> {
    let subject = headers.subject.as_deref()?.to_lowercase();
    TRAVEL_KEYWORDS
        .into_iter()
        .find(|keyword| subject.contains(keyword))
}

/// A header kind plus the key inferred from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signal {
    pub header: HeaderField,
    pub key: String,
}

/// Most specific signal available: List-Id, then List-Unsubscribe, then the
/// From domain (always present).
pub fn infer_signal(headers: &Headers) -> Signal {
    if let Some(key) = list_id_key(headers) {
        return Signal {
            header: HeaderField::ListId,
            key,
        };
    }
    if let Some(key) = list_unsubscribe_domains(headers).into_iter().next() {
        return Signal {
            header: HeaderField::ListUnsubscribe,
            key,
        };
    }
    Signal {
        header: HeaderField::From,
        key: from_domain(headers),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_list_unsubscribe(value: &str) -> Headers {
        Headers {
            list_unsubscribe: Some(value.into()),
            ..Default::default()
        }
    }

    // ── Decoding ────────────────────────────────────────────────────

    #[test]
    fn decodes_quoted_printable_word() {
        assert_eq!(decode_header_value(" =?utf-8?q?Caf=C3=A9_ouvert?="), "Café ouvert");
    }

    #[test]
    fn decodes_base64_word() {
        assert_eq!(decode_header_value("=?UTF-8?B?SGVsbG8=?= world"), "Hello world");
    }

    #[test]
    fn plain_value_passes_through() {
        assert_eq!(decode_header_value("  Weekly digest \r\n"), "Weekly digest");
    }

    #[test]
    fn folded_value_is_unfolded() {
        assert_eq!(
            decode_header_value(" Your booking\r\n is confirmed\r\n"),
            "Your booking is confirmed"
        );
    }

    #[test]
    fn malformed_encoded_word_never_panics() {
        let decoded = decode_header_value("=?bogus-charset?x?@@@?= tail");
        assert!(!decoded.is_empty());
    }

    #[test]
    fn decode_headers_from_source() {
        let raw = b"From: =?utf-8?q?Tripit?= <a@tripit.com>\r\n\
Subject: Your booking\r\n confirmed\r\n\
List-Id: Travel News <news.tripit.com>\r\n\
List-Unsubscribe: <mailto:unsub@tripit.com>,\r\n <https://tripit.com/u>\r\n\
\r\n\
body\r\n";
        let headers = decode_headers(raw);
        assert_eq!(headers.from.as_deref(), Some("Tripit <a@tripit.com>"));
        assert_eq!(headers.subject.as_deref(), Some("Your booking confirmed"));
        assert_eq!(headers.list_id.as_deref(), Some("Travel News <news.tripit.com>"));
        assert_eq!(
            headers.list_unsubscribe.as_deref(),
            Some("<mailto:unsub@tripit.com>, <https://tripit.com/u>")
        );
    }

    #[test]
    fn decode_headers_missing_headers() {
        let headers = decode_headers(b"Subject: hi\r\n\r\nbody");
        assert_eq!(headers.subject.as_deref(), Some("hi"));
        assert!(headers.from.is_none());
        assert!(headers.list_id.is_none());
    }

    // ── List-Id ─────────────────────────────────────────────────────

    #[test]
    fn list_id_prefers_bracket_token() {
        let headers = Headers {
            list_id: Some("Newsletter <Newsletter.Example.com>".into()),
            ..Default::default()
        };
        assert_eq!(list_id_key(&headers).as_deref(), Some("newsletter.example.com"));
    }

    #[test]
    fn list_id_without_brackets_uses_whole_value() {
        let headers = Headers {
            list_id: Some("  Updates.Example.org ".into()),
            ..Default::default()
        };
        assert_eq!(list_id_key(&headers).as_deref(), Some("updates.example.org"));
    }

    #[test]
    fn list_id_absent_or_blank() {
        assert_eq!(list_id_key(&Headers::default()), None);
        let blank = Headers {
            list_id: Some("   ".into()),
            ..Default::default()
        };
        assert_eq!(list_id_key(&blank), None);
    }

    // ── List-Unsubscribe ────────────────────────────────────────────

    #[test]
    fn unsubscribe_http_host() {
        let headers = with_list_unsubscribe("<https://unsub.offers.co/x?id=1>");
        assert_eq!(list_unsubscribe_domains(&headers), vec!["unsub.offers.co"]);
    }

    #[test]
    fn unsubscribe_ipv6_host_without_brackets() {
        let headers = with_list_unsubscribe("<http://[::1]/unsub>, <https://[2001:db8::2]:8443/u>");
        assert_eq!(list_unsubscribe_domains(&headers), vec!["::1", "2001:db8::2"]);
    }

    #[test]
    fn unsubscribe_mailto_domain() {
        let headers = with_list_unsubscribe("mailto:a@TripIt.com");
        assert_eq!(list_unsubscribe_domains(&headers), vec!["tripit.com"]);
    }

    #[test]
    fn unsubscribe_mailto_query_is_dropped() {
        let headers = with_list_unsubscribe("<mailto:leave@lists.example.net?subject=unsubscribe>");
        assert_eq!(list_unsubscribe_domains(&headers), vec!["lists.example.net"]);
    }

    #[test]
    fn unsubscribe_multiple_entries_in_order() {
        let headers =
            with_list_unsubscribe("<mailto:u@mail.shop.com>, <https://www.shop.com:8443/unsub>");
        assert_eq!(
            list_unsubscribe_domains(&headers),
            vec!["mail.shop.com", "www.shop.com"]
        );
    }

    #[test]
    fn unsubscribe_unbracketed_comma_list() {
        let headers = with_list_unsubscribe("https://a.example.com/u, mailto:x@b.example.com");
        assert_eq!(
            list_unsubscribe_domains(&headers),
            vec!["a.example.com", "b.example.com"]
        );
    }

    #[test]
    fn unsubscribe_ignores_other_schemes() {
        let headers = with_list_unsubscribe("<ftp://files.example.com>, <mailto:nobody>");
        assert!(list_unsubscribe_domains(&headers).is_empty());
        assert!(list_unsubscribe_domains(&Headers::default()).is_empty());
    }

    // ── From / Subject ──────────────────────────────────────────────

    #[test]
    fn from_domain_extracts_domain() {
        let headers = Headers {
            from: Some("Alerts <Alerts@Bank.Example.CO.uk>".into()),
            ..Default::default()
        };
        assert_eq!(from_domain(&headers), "bank.example.co.uk");
    }

    #[test]
    fn from_domain_falls_back_to_header() {
        let headers = Headers {
            from: Some("Local Daemon".into()),
            ..Default::default()
        };
        assert_eq!(from_domain(&headers), "local daemon");
        assert_eq!(from_domain(&Headers::default()), "");
    }

    #[test]
    fn subject_hint_uses_vocabulary_order() {
        let headers = Headers {
            subject: Some("Your FLIGHT ticket and Booking".into()),
            ..Default::default()
        };
        assert_eq!(subject_hint(&headers), Some("booking"));
    }

    #[test]
    fn subject_hint_none() {
        let headers = Headers {
            subject: Some("Lunch on Friday?".into()),
            ..Default::default()
        };
        assert_eq!(subject_hint(&headers), None);
    }

    // ── Inference ───────────────────────────────────────────────────

    #[test]
    fn infer_prefers_list_id() {
        let headers = Headers {
            from: Some("news@shop.com".into()),
            list_id: Some("<weekly.shop.com>".into()),
            list_unsubscribe: Some("<https://shop.com/u>".into()),
            ..Default::default()
        };
        let signal = infer_signal(&headers);
        assert_eq!(signal.header, HeaderField::ListId);
        assert_eq!(signal.key, "weekly.shop.com");
    }

    #[test]
    fn infer_uses_unsubscribe_then_from() {
        let headers = Headers {
            from: Some("a@tripit.com".into()),
            subject: Some("Your booking confirmed".into()),
            list_unsubscribe: Some("mailto:a@tripit.com".into()),
            ..Default::default()
        };
        assert_eq!(
            infer_signal(&headers),
            Signal {
                header: HeaderField::ListUnsubscribe,
                key: "tripit.com".into()
            }
        );

        let plain = Headers {
            from: Some("Bob <bob@example.org>".into()),
            ..Default::default()
        };
        assert_eq!(
            infer_signal(&plain),
            Signal {
                header: HeaderField::From,
                key: "example.org".into()
            }
        );
    }
}
