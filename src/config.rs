//! CLI arguments and server configuration defaults.

use clap::Parser;
use std::collections::HashMap;
use std::str::FromStr;

use crate::upload::{DEFAULT_FIELD_NAME, DEFAULT_FILE_TYPE, UploadOptions, validate_entity};

pub const DEFAULT_STORAGE_DIR: &str = "src";
pub const DEFAULT_UPLOADS_ROOT: &str = "public/uploads";
pub const DEFAULT_ENTITIES: [&str; 3] = ["documents=document", "images=image", "media=default"];
pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 50 * 1024 * 1024;
pub const SHUTDOWN_GRACE_SECS: u64 = 10;

/// 服务器的命令行参数与环境变量配置。
#[derive(Parser, Debug)]
#[command(name = "entity-uploads", version, about = "Single-file upload service")]
pub struct Args {
    #[arg(
        short = 's',
        long,
        env = "UPLOADS_STORAGE_DIR",
        default_value = DEFAULT_STORAGE_DIR,
        help = "Filesystem directory the stored paths are relative to"
    )]
    pub storage_dir: String,
    #[arg(
        long,
        env = "UPLOADS_ROOT",
        default_value = DEFAULT_UPLOADS_ROOT,
        help = "Uploads directory inside the storage dir"
    )]
    pub uploads_root: String,
    #[arg(
        short = 'b',
        long,
        env = "UPLOADS_BIND",
        default_value = "0.0.0.0",
        help = "Bind address"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "UPLOADS_PORT",
        default_value_t = 8888,
        help = "HTTP port"
    )]
    pub port: u16,
    #[arg(long, env = "UPLOADS_CORS_ORIGINS", help = "Comma separated CORS origins")]
    pub cors_origins: Option<String>,
    #[arg(
        long,
        env = "UPLOADS_MAX_SIZE",
        default_value_t = DEFAULT_MAX_UPLOAD_SIZE,
        help = "Max upload form size in bytes (0 to disable)"
    )]
    pub max_upload_size: u64,
    #[arg(
        short = 'e',
        long = "entity",
        env = "UPLOADS_ENTITIES",
        value_delimiter = ',',
        default_values = DEFAULT_ENTITIES,
        help = "Upload entities as NAME=FILETYPE (file type defaults to `default`)"
    )]
    pub entities: Vec<EntityRoute>,
    #[arg(
        long,
        env = "UPLOADS_FILE_FIELD",
        default_value = DEFAULT_FIELD_NAME,
        help = "Multipart field carrying the file"
    )]
    pub upload_field: String,
    #[arg(
        long,
        env = "UPLOADS_TARGET_FIELD",
        default_value = DEFAULT_FIELD_NAME,
        help = "Output field receiving the stored path"
    )]
    pub target_field: String,
    #[arg(
        long,
        env = "UPLOADS_KEEP_ORPHANS",
        help = "Keep stored files when the downstream handler fails"
    )]
    pub keep_orphans: bool,
}

/// 允许的实体类别及其使用的文件类型策略。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRoute {
    pub name: String,
    pub file_type: String,
}

impl FromStr for EntityRoute {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (name, file_type) = match value.split_once('=') {
            Some((name, file_type)) => (name.trim(), file_type.trim()),
            None => (value.trim(), DEFAULT_FILE_TYPE),
        };
        validate_entity(name).map_err(|err| err.to_string())?;
        if file_type.is_empty() {
            return Err(format!("missing file type for entity `{name}`"));
        }
        Ok(Self {
            name: name.to_string(),
            file_type: file_type.to_string(),
        })
    }
}

impl Args {
    /// 按实体名索引的上传选项。
    pub fn upload_options(&self) -> HashMap<String, UploadOptions> {
        self.entities
            .iter()
            .map(|route| {
                let options = UploadOptions::new(&route.name)
                    .with_file_type(&route.file_type)
                    .with_fields(&self.upload_field, &self.target_field);
                (route.name.clone(), options)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_route_parses_name_and_type() {
        let route: EntityRoute = "documents=document".parse().expect("parse");
        assert_eq!(route.name, "documents");
        assert_eq!(route.file_type, "document");

        let route: EntityRoute = " media ".parse().expect("parse");
        assert_eq!(route.file_type, DEFAULT_FILE_TYPE);
    }

    #[test]
    fn entity_route_rejects_path_segments() {
        assert!("../etc=image".parse::<EntityRoute>().is_err());
        assert!("a/b=image".parse::<EntityRoute>().is_err());
        assert!("images=".parse::<EntityRoute>().is_err());
    }

    #[test]
    fn defaults_build_upload_options() {
        let args = Args::parse_from(["entity-uploads", "--target-field", "photo"]);
        assert_eq!(args.storage_dir, DEFAULT_STORAGE_DIR);
        assert_eq!(args.uploads_root, DEFAULT_UPLOADS_ROOT);

        let options = args.upload_options();
        assert_eq!(options.len(), 3);
        let images = options.get("images").expect("images entity");
        assert_eq!(images.file_type, "image");
        assert_eq!(images.upload_field_name, "file");
        assert_eq!(images.field_name, "photo");
    }

    #[test]
    fn entities_accept_comma_list() {
        let args = Args::parse_from(["entity-uploads", "-e", "avatars=image,reports=document"]);
        let names: Vec<_> = args.entities.iter().map(|route| route.name.as_str()).collect();
        assert_eq!(names, ["avatars", "reports"]);
    }
}
