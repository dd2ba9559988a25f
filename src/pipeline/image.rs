//! 图片引用编码：读取文件 → 识别 MIME → base64 data URI
//!
//! 多模态模型只认带协议前缀的 `data:<mime>;base64,<payload>`。

use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::core::PipelineError;

/// 可直接放进 image_url 的自描述图片
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub mime: String,
    pub data_url: String,
}

impl EncodedImage {
    pub fn from_bytes(bytes: &[u8], path_hint: Option<&Path>) -> Self {
        let mime = detect_mime(bytes, path_hint);
        let data_url = format!("data:{};base64,{}", mime, STANDARD.encode(bytes));
        Self { mime, data_url }
    }
}

/// 优先按内容嗅探，其次按扩展名，默认 image/jpeg
fn detect_mime(bytes: &[u8], path_hint: Option<&Path>) -> String {
    if let Some(kind) = infer::get(bytes) {
        if kind.mime_type().starts_with("image/") {
            return kind.mime_type().to_string();
        }
    }
    let ext = path_hint
        .and_then(|p| p.extension())
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        _ => "image/jpeg",
    }
    .to_string()
}

/// 读取并编码图片文件；文件缺失或为空时报 PipelineError::Image
pub async fn encode_image(path: impl AsRef<Path>) -> Result<EncodedImage, PipelineError> {
    let path = path.as_ref();
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| PipelineError::Image(format!("{}: {}", path.display(), e)))?;
    if bytes.is_empty() {
        return Err(PipelineError::Image(format!("{}: empty file", path.display())));
    }
    Ok(EncodedImage::from_bytes(&bytes, Some(path)))
}
