//! Message fingerprinting.
//!
//! Decomposes an RFC822/MIME message into digest sources and computes one
//! TLSH digest per source that clears the size floor:
//!
//! 1. normalized body (plaintext + HTML through [`normalize::normalize`])
//! 2. raw body (plaintext + HTML, untouched; keeps layout artifacts)
//! 3. attachments (images ≥ 50 KiB, anything else ≥ 128 bytes)
//! 4. the chosen external image, appended by the analyzer when the
//!    sidechannel runs
//!
//! TLSH refuses short or low-entropy input; such a source simply
//! contributes no digest and analysis proceeds with the rest.

pub mod bands;
pub mod distance;
pub mod normalize;

use mail_parser::{MessageParser, MimeHeaders, PartType};
use tlsh2::TlshDefaultBuilder;

use crate::error::AnalyzeError;

/// Hard cap on message size accepted by `/analyze`.
pub const MAX_PROCESS_SIZE: usize = 15 * 1024 * 1024;
/// A digest source below this many bytes is skipped outright.
pub const MIN_SOURCE_BYTES: usize = 100;
/// Image attachments below this size carry too little structure to match on.
pub const MIN_VISUAL_SIZE: usize = 50 * 1024;
/// Floor for non-image attachments.
pub const MIN_ATTACHMENT_BYTES: usize = 128;

/// An attachment extracted from the message.
pub struct AttachmentPart {
    pub data: Vec<u8>,
    pub is_image: bool,
}

/// The decomposed message: headers the analyzer logs and keys on, inline
/// bodies, and attachment payloads.
pub struct ParsedMail {
    pub message_id: Option<String>,
    pub subject: Option<String>,
    pub text: String,
    pub html: String,
    pub attachments: Vec<AttachmentPart>,
}

/// Parse a raw message. The parser is lenient; only input it cannot
/// interpret as a message at all is rejected.
pub fn parse(raw: &[u8]) -> Result<ParsedMail, AnalyzeError> {
    let msg = MessageParser::default()
        .parse(raw)
        .ok_or(AnalyzeError::InvalidMime)?;

    let message_id = msg.message_id().map(str::to_string);
    let subject = msg.subject().map(str::to_string);

    let mut text = String::new();
    let mut html = String::new();
    let mut attachments = Vec::new();

    for part in &msg.parts {
        let as_attachment = part
            .content_disposition()
            .map(|cd| cd.ctype().eq_ignore_ascii_case("attachment"))
            .unwrap_or(false);

        match &part.body {
            PartType::Text(body) if !as_attachment => text.push_str(body),
            PartType::Html(body) if !as_attachment => html.push_str(body),
            PartType::Text(body) | PartType::Html(body) => {
                attachments.push(AttachmentPart {
                    data: body.as_bytes().to_vec(),
                    is_image: false,
                });
            }
            PartType::Binary(data) | PartType::InlineBinary(data) => {
                let is_image = part
                    .content_type()
                    .map(|ct| ct.ctype().eq_ignore_ascii_case("image"))
                    .unwrap_or(false);
                attachments.push(AttachmentPart {
                    data: data.to_vec(),
                    is_image,
                });
            }
            _ => {}
        }
    }

    Ok(ParsedMail {
        message_id,
        subject,
        text,
        html,
        attachments,
    })
}

/// Compute the TLSH digest of one source. `None` when the source is too
/// short or too uniform for the hash to exist.
pub fn tlsh_digest(data: &[u8]) -> Option<String> {
    if data.len() < MIN_SOURCE_BYTES {
        return None;
    }
    let mut builder = TlshDefaultBuilder::new();
    builder.update(data);
    let tlsh = builder.build()?;
    let raw = tlsh.hash();
    Some(std::str::from_utf8(&raw).ok()?.to_ascii_uppercase())
}

/// Digest list for a parsed message, in source order. The order is part of
/// the contract: it decides which digest wins when several could match.
pub fn digests(mail: &ParsedMail) -> Vec<String> {
    let mut out = Vec::new();

    let raw_body = format!("{}{}", mail.text, mail.html);
    if let Some(d) = tlsh_digest(normalize::normalize(&raw_body).as_bytes()) {
        out.push(d);
    }
    if let Some(d) = tlsh_digest(raw_body.as_bytes()) {
        out.push(d);
    }

    for att in &mail.attachments {
        let floor = if att.is_image {
            MIN_VISUAL_SIZE
        } else {
            MIN_ATTACHMENT_BYTES
        };
        if att.data.len() >= floor {
            if let Some(d) = tlsh_digest(&att.data) {
                out.push(d);
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const LONG_TEXT: &str = "Dear customer, congratulations on winning our grand promotional \
        giveaway. To claim the reward you must confirm your shipping address within the next \
        48 hours by replying directly to this message. Failure to respond forfeits the prize \
        and it will be offered to the runner-up instead. This offer is not transferable.";

    fn plain_message(message_id: &str, body: &str) -> Vec<u8> {
        format!(
            "Message-ID: {message_id}\r\nFrom: a@example.com\r\nTo: b@example.com\r\n\
             Subject: promo\r\nContent-Type: text/plain\r\n\r\n{body}"
        )
        .into_bytes()
    }

    #[test]
    fn digest_has_tlsh_shape() {
        let d = tlsh_digest(LONG_TEXT.as_bytes()).expect("digest");
        assert!(d.starts_with("T1"));
        assert_eq!(d.len(), 72);
        assert!(d[2..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn short_source_yields_no_digest() {
        assert!(tlsh_digest(b"too short").is_none());
    }

    #[test]
    fn uniform_source_yields_no_digest() {
        let uniform = vec![b'a'; 400];
        assert!(tlsh_digest(&uniform).is_none());
    }

    #[test]
    fn digesting_is_deterministic() {
        assert_eq!(
            tlsh_digest(LONG_TEXT.as_bytes()),
            tlsh_digest(LONG_TEXT.as_bytes())
        );
    }

    #[test]
    fn parse_extracts_headers_and_body() {
        let mail = parse(&plain_message("<m1@example.com>", LONG_TEXT)).unwrap();
        assert_eq!(mail.message_id.as_deref(), Some("m1@example.com"));
        assert_eq!(mail.subject.as_deref(), Some("promo"));
        assert!(mail.text.contains("grand promotional"));
        assert!(mail.html.is_empty());
        assert!(mail.attachments.is_empty());
    }

    #[test]
    fn parse_rejects_empty_input() {
        assert!(parse(b"").is_err());
    }

    #[test]
    fn long_body_produces_normalized_and_raw_digests() {
        let mail = parse(&plain_message("<m2@example.com>", LONG_TEXT)).unwrap();
        let digests = digests(&mail);
        assert_eq!(digests.len(), 2);
        assert!(digests.iter().all(|d| d.starts_with("T1")));
    }

    #[test]
    fn multipart_attachment_is_fingerprinted() {
        let attachment: String = (0..3)
            .map(|i| format!("[part {i}] {LONG_TEXT} "))
            .collect();
        let raw = format!(
            "Message-ID: <m3@example.com>\r\nFrom: a@example.com\r\nTo: b@example.com\r\n\
             Subject: files\r\nMIME-Version: 1.0\r\n\
             Content-Type: multipart/mixed; boundary=\"xyz\"\r\n\r\n\
             --xyz\r\nContent-Type: text/plain\r\n\r\n{LONG_TEXT}\r\n\
             --xyz\r\nContent-Type: application/octet-stream\r\n\
             Content-Disposition: attachment; filename=\"data.bin\"\r\n\r\n{attachment}\r\n\
             --xyz--\r\n"
        );
        let mail = parse(raw.as_bytes()).unwrap();
        assert_eq!(mail.attachments.len(), 1);
        assert!(!mail.attachments[0].is_image);
        assert!(mail.attachments[0].data.len() >= MIN_ATTACHMENT_BYTES);

        let digests = digests(&mail);
        assert_eq!(digests.len(), 3);
    }

    #[test]
    fn small_attachment_is_skipped() {
        let raw = format!(
            "Message-ID: <m4@example.com>\r\nFrom: a@example.com\r\nTo: b@example.com\r\n\
             Subject: files\r\nMIME-Version: 1.0\r\n\
             Content-Type: multipart/mixed; boundary=\"xyz\"\r\n\r\n\
             --xyz\r\nContent-Type: text/plain\r\n\r\n{LONG_TEXT}\r\n\
             --xyz\r\nContent-Type: application/octet-stream\r\n\
             Content-Disposition: attachment; filename=\"tiny.bin\"\r\n\r\ntiny\r\n\
             --xyz--\r\n"
        );
        let mail = parse(raw.as_bytes()).unwrap();
        assert_eq!(digests(&mail).len(), 2);
    }

    #[test]
    fn whitespace_variants_share_the_normalized_digest() {
        let a = parse(&plain_message("<m5@example.com>", LONG_TEXT)).unwrap();
        let perturbed = LONG_TEXT.replace("winning our", "winning  our");
        let b = parse(&plain_message("<m6@example.com>", &perturbed)).unwrap();
        assert_eq!(digests(&a)[0], digests(&b)[0]);
    }
}
