use uuid::Uuid;

/// Returns a fresh random UUID.
pub fn new_uuid() -> Uuid {
    Uuid::new_v4()
}

/// Returns a compact random token (32 lowercase hex characters).
///
/// Used wherever an identifier has to survive transports that are picky
/// about punctuation, such as broker queue names and file suffixes.
pub fn short_token() -> String {
    new_uuid().simple().to_string()
}
