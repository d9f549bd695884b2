//! Ambient credential access / 凭证来源
//!
//! Provider factories read environment variables and credential files only
//! through [`CredentialSource`], so tests can hand in fixed values without
//! touching the real process environment.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub trait CredentialSource: Send + Sync {
    /// Environment variable lookup; empty values count as unset / 读取环境变量
    fn var(&self, name: &str) -> Option<String>;

    /// Read a credential file / 读取凭证文件
    fn read_file(&self, path: &Path) -> std::io::Result<String>;

    /// Home directory used to locate default credential files / 用户主目录
    fn home_dir(&self) -> Option<PathBuf> {
        self.var("HOME")
            .or_else(|| self.var("USERPROFILE"))
            .map(PathBuf::from)
    }

    /// True when the variable is set to a truthy value / 布尔环境变量
    fn flag(&self, name: &str) -> bool {
        self.var(name)
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false)
    }
}

/// Process environment and real filesystem / 进程环境
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvCredentials;

impl CredentialSource for EnvCredentials {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|v| !v.is_empty())
    }

    fn read_file(&self, path: &Path) -> std::io::Result<String> {
        std::fs::read_to_string(path)
    }
}

/// Fixed variables and in-memory files / 固定凭证（测试用）
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    vars: HashMap<String, String>,
    files: HashMap<PathBuf, String>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_var(mut self, name: &str, value: &str) -> Self {
        self.vars.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>, content: &str) -> Self {
        self.files.insert(path.into(), content.to_string());
        self
    }
}

impl CredentialSource for StaticCredentials {
    fn var(&self, name: &str) -> Option<String> {
        self.vars.get(name).filter(|v| !v.is_empty()).cloned()
    }

    fn read_file(&self, path: &Path) -> std::io::Result<String> {
        self.files.get(path).cloned().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, format!("{} not found", path.display()))
        })
    }
}

/// Parse an INI-style credentials file into `section -> key -> value`
/// 解析INI格式凭证文件
pub fn parse_ini(content: &str) -> HashMap<String, HashMap<String, String>> {
    let mut sections: HashMap<String, HashMap<String, String>> = HashMap::new();
    let mut current = String::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            current = name.trim().trim_start_matches("profile ").trim().to_string();
            sections.entry(current.clone()).or_default();
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            sections
                .entry(current.clone())
                .or_default()
                .insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    sections
}
