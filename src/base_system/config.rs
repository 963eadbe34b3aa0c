//! 配置文件读写与带注释生成。
//!
//! 用户文件与默认值做深度合并；缺字段时按 `FieldMeta` 的顺序与说明重新写回，
//! 这样新版本增加的配置项会自动出现在用户的 `config.yml` 里。

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_yaml::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("invalid yaml at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("validation error:\n{0}")]
    Validation(String),
}

#[derive(Debug, Clone, Copy)]
pub struct FieldMeta {
    pub name: &'static str,
    pub description: &'static str,
}

pub trait ConfigSpec: Serialize + DeserializeOwned + Default {
    const FILE_NAME: &'static str;
    fn fields() -> &'static [FieldMeta];
}

/// 配置文件位置：`base_dir/FILE_NAME`，未指定目录时使用当前目录。
pub fn config_path<T: ConfigSpec>(base_dir: Option<&Path>) -> PathBuf {
    match base_dir {
        Some(base) => base.join(T::FILE_NAME),
        None => PathBuf::from(T::FILE_NAME),
    }
}

/// 读取配置；文件不存在时写出带注释的默认配置。
pub fn load_or_create<T: ConfigSpec>(path: &Path) -> Result<T, ConfigError> {
    ensure_parent(path)?;

    if !path.exists() {
        let default_config = T::default();
        write_with_comments(&default_config, path)?;
        return Ok(default_config);
    }

    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let user_yaml: Value = serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    let missing = has_missing_fields::<T>(&user_yaml);

    let mut merged = serde_yaml::to_value(T::default())
        .map_err(|err| ConfigError::Validation(err.to_string()))?;
    merge_values(&mut merged, user_yaml);

    let config: T =
        serde_yaml::from_value(merged).map_err(|err| ConfigError::Validation(err.to_string()))?;

    if missing {
        write_with_comments(&config, path)?;
    }

    Ok(config)
}

pub fn write_with_comments<T: ConfigSpec>(config: &T, path: &Path) -> Result<(), ConfigError> {
    ensure_parent(path)?;
    let yaml = generate_yaml_with_comments(config)?;
    fs::write(path, yaml).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub fn generate_yaml_with_comments<T: ConfigSpec>(config: &T) -> Result<String, ConfigError> {
    let value =
        serde_yaml::to_value(config).map_err(|err| ConfigError::Validation(err.to_string()))?;
    let Value::Mapping(mapping) = value else {
        return Err(ConfigError::Validation(
            "config must serialize to a mapping".to_string(),
        ));
    };

    let mut lines = Vec::new();
    for field in T::fields() {
        if !field.description.is_empty() {
            lines.push(format!("# {}", field.description.replace('\n', "\n# ")));
        }
        let key = Value::String(field.name.to_string());
        let val = mapping.get(&key).cloned().unwrap_or(Value::Null);
        let yaml_line = serde_yaml::to_string(&serde_yaml::Mapping::from_iter([(key, val)]))
            .map_err(|err| ConfigError::Validation(err.to_string()))?;
        lines.push(yaml_line.trim().to_string());
    }

    Ok(lines.join("\n") + "\n")
}

fn has_missing_fields<T: ConfigSpec>(user_yaml: &Value) -> bool {
    let Value::Mapping(map) = user_yaml else {
        return true;
    };
    T::fields()
        .iter()
        .any(|field| !map.contains_key(Value::String(field.name.to_string())))
}

fn merge_values(default: &mut Value, user: Value) {
    match (default, user) {
        (Value::Mapping(dest), Value::Mapping(src)) => {
            for (key, user_val) in src {
                if let Some(dest_val) = dest.get_mut(&key) {
                    merge_values(dest_val, user_val);
                } else {
                    dest.insert(key, user_val);
                }
            }
        }
        // 空文件解析为 Null，保留默认值
        (_, Value::Null) => {}
        (dest, other) => {
            *dest = other;
        }
    }
}

fn ensure_parent(path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}
