//! 文件名推导：扩展名拆分、音译 slug 与随机后缀。

use rand::Rng;

pub const RANDOM_ID_LEN: usize = 5;
const RANDOM_ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const FALLBACK_SLUG: &str = "file";

/// 将文本转换为可用于路径与 URL 的小写 ASCII slug。
pub trait SlugGenerator: Send + Sync {
    fn slugify(&self, text: &str) -> String;
}

/// 先音译非 ASCII 文字，再把不安全字符段折叠为 `-` 或 `_`。
#[derive(Debug, Default, Clone, Copy)]
pub struct TransliterateSlugger;

impl SlugGenerator for TransliterateSlugger {
    fn slugify(&self, text: &str) -> String {
        let ascii = deunicode::deunicode(text);
        let mut slug = String::with_capacity(ascii.len());
        // `_` 优先于 `-` 作为分隔符保留。
        let mut pending: Option<char> = None;
        for ch in ascii.chars() {
            if ch.is_ascii_alphanumeric() {
                if let Some(sep) = pending.take()
                    && !slug.is_empty()
                {
                    slug.push(sep);
                }
                slug.push(ch.to_ascii_lowercase());
            } else if ch == '_' {
                pending = Some('_');
            } else if pending.is_none() {
                pending = Some('-');
            }
        }
        slug
    }
}

/// 将上传文件名拆成 `(stem, extension)`。
///
/// 扩展名保留前导点与原始大小写。仅有前导点的名字（`.env`）整体视为 stem，
/// 客户端附带的目录部分会被丢弃。
pub fn split_file_name(original: &str) -> (&str, &str) {
    let name = original
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(original);
    match name.rfind('.') {
        Some(idx) if idx > 0 => (&name[..idx], &name[idx..]),
        _ => (name, ""),
    }
}

/// 生成较短的小写字母数字 id。
pub fn random_id() -> String {
    let mut rng = rand::rng();
    (0..RANDOM_ID_LEN)
        .map(|_| RANDOM_ID_ALPHABET[rng.random_range(0..RANDOM_ID_ALPHABET.len())] as char)
        .collect()
}

/// 选择 slug 来源并转换，结果为空时回退为 `file`。
pub fn derive_slug(slugger: &dyn SlugGenerator, seo_title: Option<&str>, stem: &str) -> String {
    let source = seo_title
        .map(str::trim)
        .filter(|title| !title.is_empty())
        .unwrap_or(stem);
    let slug = slugger.slugify(&source.to_lowercase());
    if slug.is_empty() {
        FALLBACK_SLUG.to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_transliterates_and_collapses() {
        let slugger = TransliterateSlugger;
        assert_eq!(slugger.slugify("café menu"), "cafe-menu");
        assert_eq!(slugger.slugify("  Hello,   World!! "), "hello-world");
        assert_eq!(slugger.slugify("Übergröße_2024"), "ubergrosse_2024");
        assert_eq!(slugger.slugify("!!!"), "");
    }

    #[test]
    fn slugify_output_is_ascii_safe() {
        let slugger = TransliterateSlugger;
        let slug = slugger.slugify("Привет мир 東京 ../etc/passwd");
        assert!(!slug.is_empty());
        assert!(
            slug.chars()
                .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-' || ch == '_')
        );
        assert!(!slug.starts_with(['-', '_']) && !slug.ends_with(['-', '_']));
    }

    #[test]
    fn slugify_keeps_underscore_separators() {
        let slugger = TransliterateSlugger;
        assert_eq!(slugger.slugify("IMG_0042"), "img_0042");
        assert_eq!(slugger.slugify("report _ final"), "report_final");
        assert_eq!(slugger.slugify("__init__"), "init");
        assert_eq!(slugger.slugify("a-_-b"), "a_b");
    }

    #[test]
    fn split_file_name_keeps_extension_verbatim() {
        assert_eq!(split_file_name("Café Menu.PDF"), ("Café Menu", ".PDF"));
        assert_eq!(split_file_name("archive.tar.gz"), ("archive.tar", ".gz"));
        assert_eq!(split_file_name("README"), ("README", ""));
        assert_eq!(split_file_name(".env"), (".env", ""));
        assert_eq!(split_file_name("C:\\fakepath\\photo.jpg"), ("photo", ".jpg"));
    }

    #[test]
    fn random_id_uses_lowercase_alphanumerics() {
        for _ in 0..32 {
            let id = random_id();
            assert_eq!(id.len(), RANDOM_ID_LEN);
            assert!(
                id.chars()
                    .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit())
            );
        }
    }

    #[test]
    fn derive_slug_prefers_seo_title() {
        let slugger = TransliterateSlugger;
        assert_eq!(
            derive_slug(&slugger, Some("Summer Sale"), "IMG_0001"),
            "summer-sale"
        );
        assert_eq!(derive_slug(&slugger, Some("   "), "IMG_0001"), "img_0001");
        assert_eq!(derive_slug(&slugger, None, "???"), "file");
    }
}
