//! MIME 类型白名单：按文件类别判断上传是否被允许。

use mime_guess::mime::Mime;

/// 判断声明的 MIME 类型是否属于某个文件类型类别。
pub trait TypeFilter: Send + Sync {
    fn is_allowed(&self, category: &str, mime_type: &str) -> bool;
}

const IMAGE_TYPES: &[&str] = &[
    "image/jpeg",
    "image/pjpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "image/svg+xml",
    "image/x-icon",
    "image/vnd.microsoft.icon",
];

const DOCUMENT_TYPES: &[&str] = &[
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.oasis.opendocument.text",
    "application/rtf",
    "text/plain",
    "text/csv",
];

const EXCEL_TYPES: &[&str] = &[
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.oasis.opendocument.spreadsheet",
    "text/csv",
];

const VIDEO_TYPES: &[&str] = &[
    "video/mp4",
    "video/mpeg",
    "video/webm",
    "video/ogg",
    "video/quicktime",
];

const AUDIO_TYPES: &[&str] = &[
    "audio/mpeg",
    "audio/mp3",
    "audio/wav",
    "audio/x-wav",
    "audio/ogg",
    "audio/webm",
    "audio/aac",
];

/// 按类别名索引的内置白名单。
///
/// `default` 接受其余所有列表的并集，未知类别一律拒绝。
#[derive(Debug, Default, Clone, Copy)]
pub struct MimeTypeFilter;

impl MimeTypeFilter {
    fn allowed_for(category: &str) -> Option<Vec<&'static str>> {
        let list = match category.trim().to_ascii_lowercase().as_str() {
            "image" => IMAGE_TYPES.to_vec(),
            "document" => DOCUMENT_TYPES.to_vec(),
            "excel" => EXCEL_TYPES.to_vec(),
            "video" => VIDEO_TYPES.to_vec(),
            "audio" => AUDIO_TYPES.to_vec(),
            "default" => [
                IMAGE_TYPES,
                DOCUMENT_TYPES,
                EXCEL_TYPES,
                VIDEO_TYPES,
                AUDIO_TYPES,
            ]
            .concat(),
            _ => return None,
        };
        Some(list)
    }
}

impl TypeFilter for MimeTypeFilter {
    fn is_allowed(&self, category: &str, mime_type: &str) -> bool {
        let Ok(parsed) = mime_type.trim().parse::<Mime>() else {
            return false;
        };
        let essence = parsed.essence_str().to_ascii_lowercase();
        Self::allowed_for(category)
            .map(|list| list.contains(&essence.as_str()))
            .unwrap_or(false)
    }
}
