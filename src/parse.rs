use crate::error::ParseError;
use crate::model::{Attachment, ParsedEmail};
use mail_parser::{Address, MessageParser, MimeHeaders};

// Turn the raw RFC 5322 bytes of message `seq` into a ParsedEmail
pub fn parse_email(seq: u32, raw: &[u8]) -> Result<ParsedEmail, ParseError> {
    let parsed = MessageParser::default()
        .parse(raw)
        .ok_or(ParseError::Malformed { seq })?;

    // Without any identifying header this is not a message
    let identified = parsed.from().is_some()
        || parsed.subject().is_some()
        || parsed.date().is_some()
        || parsed.message_id().is_some();
    if !identified {
        return Err(ParseError::Malformed { seq });
    }

    let attachments = parsed
        .attachments()
        .map(|part| Attachment {
            filename: part.attachment_name().map(str::to_string),
            content_type: part
                .content_type()
                .map(|ct| match ct.subtype() {
                    Some(sub) => format!("{}/{}", ct.ctype(), sub),
                    None => ct.ctype().to_string(),
                })
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            size_bytes: part.len() as u64,
        })
        .collect();

    Ok(ParsedEmail {
        from: parsed.from().map(address_text).unwrap_or_default(),
        to: parsed.to().map(address_text).unwrap_or_default(),
        subject: parsed.subject().unwrap_or_default().to_string(),
        body_text: parsed
            .body_text(0)
            .map(|text| text.into_owned())
            .unwrap_or_default(),
        body_html: parsed
            .body_html(0)
            .map(|html| html.into_owned())
            .unwrap_or_default(),
        date: parsed.date().map(|date| date.to_rfc3339()),
        message_id: parsed.message_id().map(str::to_string),
        attachments,
    })
}

// "Name <mailbox@host>, other@host"
fn address_text(address: &Address<'_>) -> String {
    address
        .iter()
        .filter_map(|addr| match (addr.name(), addr.address()) {
            (Some(name), Some(mailbox)) => Some(format!("{name} <{mailbox}>")),
            (None, Some(mailbox)) => Some(mailbox.to_string()),
            (Some(name), None) => Some(name.to_string()),
            (None, None) => None,
        })
        .collect::<Vec<_>>()
        .join(", ")
}
