/// Build the raw acknowledgement. The recipient and subject are taken
/// verbatim from the original message.
pub fn build_reply(to: &str, subject: &str, body: &str) -> String {
    format!("To: {}\nSubject: RE:{}\n\n{}", to, subject, body)
}

/// Whether a From header value was written by `owner`. Matches the bare
/// address as well as the `Name <address>` form.
pub fn is_owner_address(from: &str, owner: &str) -> bool {
    if from == owner {
        return true;
    }
    let address = match (from.rfind('<'), from.rfind('>')) {
        (Some(start), Some(end)) if start < end => &from[start + 1..end],
        _ => from,
    };
    address.trim().eq_ignore_ascii_case(owner.trim())
}
