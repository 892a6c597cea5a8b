//! ドット区切りパスで参照する階層設定ノード

use crate::error::{ConfigError, Result};
use serde_yaml::Value;
use std::path::Path;

/// 設定ツリーの一部分
///
/// 存在しないパスは空のセクション（`Value::Null`）として扱い、
/// エラーにはならない。必須キーだけ [`Section::require_string`] で検証する。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Section {
    value: Value,
}

impl Section {
    pub fn new(value: Value) -> Self {
        Self { value }
    }

    /// YAML文字列からセクションを作成
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        parse(content, Path::new("<inline>"))
    }

    /// YAMLファイルを読み込む
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        parse(&content, path)
    }

    fn resolve(&self, path: &str) -> Option<&Value> {
        if path.is_empty() {
            return Some(&self.value);
        }
        path.split('.')
            .try_fold(&self.value, |current, part| current.get(part))
    }

    /// サブセクションを取得（存在しない場合は空）
    pub fn section(&self, path: &str) -> Section {
        Section::new(self.resolve(path).cloned().unwrap_or(Value::Null))
    }

    /// 直下のキー一覧（定義順）
    pub fn keys(&self) -> Vec<String> {
        match &self.value {
            Value::Mapping(mapping) => mapping.keys().filter_map(scalar_to_string).collect(),
            _ => Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match &self.value {
            Value::Null => true,
            Value::Mapping(mapping) => mapping.is_empty(),
            _ => false,
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        matches!(self.resolve(path), Some(v) if !v.is_null())
    }

    /// 文字列値を取得。数値・真偽値は文字列化する
    pub fn get_string(&self, path: &str) -> Option<String> {
        self.resolve(path).and_then(scalar_to_string)
    }

    pub fn get_int(&self, path: &str) -> Option<i64> {
        match self.resolve(path)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn get_bool(&self, path: &str, default: bool) -> bool {
        match self.resolve(path) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    /// リスト値を取得。リストでない場合は空
    pub fn get_string_list(&self, path: &str) -> Vec<String> {
        match self.resolve(path) {
            Some(Value::Sequence(items)) => items.iter().filter_map(scalar_to_string).collect(),
            _ => Vec::new(),
        }
    }

    /// 必須の文字列値。空文字も未設定とみなす
    pub fn require_string(&self, path: &str, owner: &str) -> Result<String> {
        self.get_string(path)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ConfigError::MissingKey {
                owner: owner.to_string(),
                key: path.to_string(),
            })
    }
}

fn parse(content: &str, path: &Path) -> Result<Section> {
    // コメントだけのファイルは空セクション
    let has_document = content
        .lines()
        .any(|line| !line.trim().is_empty() && !line.trim_start().starts_with('#'));
    if !has_document {
        return Ok(Section::default());
    }

    let value = serde_yaml::from_str(content).map_err(|source| ConfigError::Yaml {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Section::new(value))
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
