use uuid::Uuid;

pub const REFERENCE_PREFIX: &str = "REF-";
const REFERENCE_HEX_LEN: usize = 8;

/// Mint a candidate reference number (`REF-` plus 8 upper-case hex digits).
/// Uniqueness is checked by the caller against the order store.
pub fn mint() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{}{}", REFERENCE_PREFIX, hex[..REFERENCE_HEX_LEN].to_ascii_uppercase())
}

pub fn is_well_formed(reference: &str) -> bool {
    reference
        .strip_prefix(REFERENCE_PREFIX)
        .map(|rest| {
            rest.len() == REFERENCE_HEX_LEN
                && rest.chars().all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c))
        })
        .unwrap_or(false)
}
