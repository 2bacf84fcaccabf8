//! 单文件上传处理：类型校验、文件名推导、目录准备与落盘。

use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::UploadError;
use crate::filter::TypeFilter;
use crate::slug::{SlugGenerator, derive_slug, random_id, split_file_name};
use crate::storage::{StorageError, UploadStore};

/// 存在时代替文件名作为 slug 来源的表单字段。
pub const SEO_TITLE_FIELD: &str = "seotitle";
pub const DEFAULT_FILE_TYPE: &str = "default";
pub const DEFAULT_FIELD_NAME: &str = "file";
/// 文件名冲突时最多重新生成后缀的次数。
const MAX_NAME_ATTEMPTS: usize = 8;

#[derive(Debug, Clone)]
pub struct AttachedFile {
    pub name: String,
    pub mime_type: String,
    pub data: Bytes,
}

/// 上传阶段的路由级配置。
#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub entity: String,
    pub file_type: String,
    /// 携带文件的 multipart 字段名。
    pub upload_field_name: String,
    /// 接收保存路径（或 null）的输出字段。
    pub field_name: String,
}

impl UploadOptions {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            file_type: DEFAULT_FILE_TYPE.to_string(),
            upload_field_name: DEFAULT_FIELD_NAME.to_string(),
            field_name: DEFAULT_FIELD_NAME.to_string(),
        }
    }

    pub fn with_file_type(mut self, file_type: impl Into<String>) -> Self {
        self.file_type = file_type.into();
        self
    }

    pub fn with_fields(
        mut self,
        upload_field_name: impl Into<String>,
        field_name: impl Into<String>,
    ) -> Self {
        self.upload_field_name = upload_field_name.into();
        self.field_name = field_name.into();
        self
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResult {
    pub generated_file_name: String,
    pub file_extension: String,
    pub storage_path: String,
    pub entity_category: String,
    pub target_field_name: String,
    pub file_type_category: String,
    pub size: u64,
    pub uploaded_at: String,
}

/// 上传阶段读取并填充的请求级状态。
#[derive(Debug, Clone, Default)]
pub struct UploadContext {
    pub file: Option<AttachedFile>,
    pub fields: Map<String, Value>,
    pub upload: Option<UploadResult>,
}

impl UploadContext {
    pub fn seo_title(&self) -> Option<&str> {
        self.fields.get(SEO_TITLE_FIELD).and_then(Value::as_str)
    }
}

pub struct UploadHandler {
    store: Arc<dyn UploadStore>,
    filter: Arc<dyn TypeFilter>,
    slugger: Arc<dyn SlugGenerator>,
    uploads_root: String,
}

impl UploadHandler {
    pub fn new(
        store: Arc<dyn UploadStore>,
        filter: Arc<dyn TypeFilter>,
        slugger: Arc<dyn SlugGenerator>,
        uploads_root: &str,
    ) -> Self {
        Self {
            store,
            filter,
            slugger,
            uploads_root: uploads_root.trim_matches(['/', '\\']).to_string(),
        }
    }

    pub fn store(&self) -> &Arc<dyn UploadStore> {
        &self.store
    }

    /// 保存附带的文件（如有）并把结果写入 `ctx`。
    ///
    /// 没有文件时目标字段设为 null，不触碰存储。出错时 `ctx` 保持不变。
    pub async fn handle(
        &self,
        options: &UploadOptions,
        ctx: &mut UploadContext,
    ) -> Result<(), UploadError> {
        let Some(file) = ctx.file.as_ref() else {
            debug!(entity = options.entity, "no file attached");
            ctx.fields.insert(options.field_name.clone(), Value::Null);
            return Ok(());
        };

        let result = self.store_file(options, file, ctx.seo_title()).await?;
        info!(
            entity = result.entity_category,
            path = result.storage_path,
            size = result.size,
            "file uploaded"
        );
        ctx.fields.insert(
            options.field_name.clone(),
            Value::String(result.storage_path.clone()),
        );
        ctx.upload = Some(result);
        Ok(())
    }

    async fn store_file(
        &self,
        options: &UploadOptions,
        file: &AttachedFile,
        seo_title: Option<&str>,
    ) -> Result<UploadResult, UploadError> {
        if !self.filter.is_allowed(&options.file_type, &file.mime_type) {
            warn!(
                entity = options.entity,
                file_type = options.file_type,
                mime = file.mime_type,
                "file type rejected"
            );
            return Err(UploadError::UnsupportedFileType);
        }
        let entity = validate_entity(&options.entity)?;

        let (stem, extension) = split_file_name(&file.name);
        let slug = derive_slug(self.slugger.as_ref(), seo_title, stem);
        let entity_dir = if self.uploads_root.is_empty() {
            entity.to_string()
        } else {
            format!("{}/{}", self.uploads_root, entity)
        };
        self.store.prepare_dir(&entity_dir).await?;

        for _ in 0..MAX_NAME_ATTEMPTS {
            let generated_file_name = format!("{slug}-{}{extension}", random_id());
            let storage_path = format!("{entity_dir}/{generated_file_name}");
            match self.store.persist_new(&storage_path, &file.data).await {
                Ok(()) => {
                    return Ok(UploadResult {
                        generated_file_name,
                        file_extension: extension.to_string(),
                        storage_path,
                        entity_category: entity.to_string(),
                        target_field_name: options.field_name.clone(),
                        file_type_category: options.file_type.clone(),
                        size: file.data.len() as u64,
                        uploaded_at: Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
                    });
                }
                Err(StorageError::AlreadyExists) => {
                    warn!(path = storage_path, "upload name taken, drawing new suffix");
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(UploadError::NameExhausted)
    }
}

/// 仅接受单个普通路径段作为实体类别。
pub fn validate_entity(entity: &str) -> Result<&str, UploadError> {
    let valid = !entity.is_empty()
        && !entity.starts_with('.')
        && entity
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '.');
    if valid {
        Ok(entity)
    } else {
        Err(UploadError::InvalidEntity(entity.to_string()))
    }
}
