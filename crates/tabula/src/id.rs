use uuid::Uuid;

pub const ID_LEN: usize = 24;

pub fn generate_id() -> String {
    let uuid = Uuid::now_v7();
    let hex = format!("{:032x}", uuid.as_u128());
    // 48-bit millisecond prefix keeps ids in creation order; the tail of
    // random_b separates ids minted in the same millisecond.
    format!("{}{}", &hex[..12], &hex[20..])
}

/// Whether `id` has the shape of an issue id. Anything else can never
/// match a stored record.
pub fn is_valid_id(id: &str) -> bool {
    id.len() == ID_LEN && id.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f'))
}
