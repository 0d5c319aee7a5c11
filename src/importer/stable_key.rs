// ==========================================
// 价目表归一化管道 - 稳定键
// ==========================================
// key = hex(sha256(supplier_id | norm(group) | norm(name)))[..16]
// norm: 小写 + 折叠空白
// 红线: SupplierItem 唯一的 upsert 身份；名称任何改动都会产生新身份
// ==========================================

use sha2::{Digest, Sha256};

pub const STABLE_KEY_LEN: usize = 16;

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

pub fn stable_key(supplier_id: &str, group: Option<&str>, name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(supplier_id.as_bytes());
    hasher.update(b"|");
    hasher.update(normalize(group.unwrap_or_default()).as_bytes());
    hasher.update(b"|");
    hasher.update(normalize(name).as_bytes());
    let mut key = hex::encode(hasher.finalize());
    key.truncate(STABLE_KEY_LEN);
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic_and_normalized() {
        let a = stable_key("sup-1", Some("Розы"), "Роза Explorer 60см");
        let b = stable_key("sup-1", Some("  РОЗЫ "), "роза   explorer 60см");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_one_character_changes_key() {
        let a = stable_key("sup-1", None, "Роза Explorer 60см");
        assert_ne!(a, stable_key("sup-1", None, "Роза Explorer 60см."));
        assert_ne!(a, stable_key("sup-2", None, "Роза Explorer 60см"));
    }
}
