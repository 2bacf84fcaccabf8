//! 上传中间件：解析 multipart 表单，调用上传处理器，再交给后续处理器。

use axum::body::Body as AxumBody;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Request, header};
use axum::middleware::Next;
use axum::response::Response;
use http_body_util::BodyExt;
use multer::{Constraints, Multipart, SizeLimit};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{ApiError, UploadError};
use crate::upload::{AttachedFile, UploadContext, UploadHandler, UploadOptions, UploadResult};

/// 拒绝响应中报告的组件名。
pub const UPLOAD_CONTROLLER: &str = "single_file_upload";

#[derive(Clone)]
pub struct UploadState {
    pub handler: Arc<UploadHandler>,
    pub entities: Arc<HashMap<String, UploadOptions>>,
    /// 整个表单的字节上限，0 表示不限制。
    pub max_upload_size: u64,
    /// 后续处理器失败时保留已保存的文件。
    pub keep_orphans: bool,
}

/// 以请求扩展形式交给后续处理器的表单数据。
#[derive(Clone, Debug, Serialize)]
pub struct UploadedForm {
    pub fields: Map<String, Value>,
    pub upload: Option<UploadResult>,
}

/// 挂在 `/{entity}` 路由上的上传阶段。
pub async fn single_file_upload(
    State(state): State<UploadState>,
    Path(entity): Path<String>,
    req: Request<AxumBody>,
    next: Next,
) -> Result<Response, ApiError> {
    let reject = |err: UploadError| {
        warn!(entity, error = %err, "upload rejected");
        ApiError::upload_failed(UPLOAD_CONTROLLER, &err)
    };

    let options = state
        .entities
        .get(&entity)
        .ok_or_else(|| reject(UploadError::UnknownEntity(entity.clone())))?;
    debug!(entity, file_type = options.file_type, "upload stage start");

    let (parts, body) = req.into_parts();
    let mut ctx = read_upload_form(&parts.headers, body, options, state.max_upload_size)
        .await
        .map_err(reject)?;
    state
        .handler
        .handle(options, &mut ctx)
        .await
        .map_err(reject)?;

    let stored = ctx.upload.as_ref().map(|upload| upload.storage_path.clone());
    let mut req = Request::from_parts(parts, AxumBody::empty());
    req.extensions_mut().insert(UploadedForm {
        fields: ctx.fields,
        upload: ctx.upload,
    });

    let response = next.run(req).await;

    if let Some(path) = stored
        && (response.status().is_client_error() || response.status().is_server_error())
        && !state.keep_orphans
    {
        match state.handler.store().remove(&path).await {
            Ok(()) => info!(
                path,
                status = response.status().as_u16(),
                "removed upload after downstream failure"
            ),
            Err(err) => warn!(path, error = %err, "failed to remove orphaned upload"),
        }
    }

    Ok(response)
}

/// 将请求体读入 [`UploadContext`]。
///
/// 非 `multipart/form-data` 请求得到空上下文。
pub async fn read_upload_form(
    headers: &HeaderMap,
    body: AxumBody,
    options: &UploadOptions,
    max_upload_size: u64,
) -> Result<UploadContext, UploadError> {
    let mut ctx = UploadContext::default();
    let Some(boundary) = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| multer::parse_boundary(value).ok())
    else {
        return Ok(ctx);
    };

    let mut constraints = Constraints::new();
    if max_upload_size > 0 {
        constraints = constraints.size_limit(SizeLimit::new().whole_stream(max_upload_size));
    }
    let stream = BodyExt::into_data_stream(body);
    let mut multipart = Multipart::with_constraints(stream, boundary, constraints);

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| UploadError::MalformedForm(err.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let Some(file_name) = field.file_name().map(str::to_string) else {
            let text = field
                .text()
                .await
                .map_err(|err| UploadError::MalformedForm(err.to_string()))?;
            ctx.fields.insert(name, Value::String(text));
            continue;
        };

        let declared = field.content_type().map(|mime| mime.to_string());
        let data = field
            .bytes()
            .await
            .map_err(|err| UploadError::MalformedForm(err.to_string()))?;
        if name != options.upload_field_name || ctx.file.is_some() {
            debug!(field = name, file_name, "ignoring extra file part");
            continue;
        }
        if file_name.is_empty() && data.is_empty() {
            continue;
        }

        let mime_type = declared.unwrap_or_else(|| {
            mime_guess::from_path(&file_name)
                .first_or_octet_stream()
                .to_string()
        });
        ctx.file = Some(AttachedFile {
            name: file_name,
            mime_type,
            data,
        });
    }

    Ok(ctx)
}
