// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::domain::models::descriptor::ServiceDescriptor;
use crate::utils::errors::DescriptorError;

static COUNTRY_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([a-z]+)[a-z]{2}$").expect("valid country suffix regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum DescriptorFormat {
    Json,
    Yaml,
}

impl DescriptorFormat {
    fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "json" => Some(Self::Json),
            "yaml" | "yml" => Some(Self::Yaml),
            _ => None,
        }
    }
}

/// 已加载的描述符目录
#[derive(Debug, Default)]
pub struct DescriptorCatalog {
    descriptors: BTreeMap<String, Arc<ServiceDescriptor>>,
    sources: HashMap<String, PathBuf>,
    names: HashMap<String, String>,
    /// 加载过程中产生的警告
    pub warnings: Vec<String>,
}

impl DescriptorCatalog {
    /// 按服务标识排序的全部描述符
    pub fn all(&self) -> Vec<Arc<ServiceDescriptor>> {
        self.descriptors.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn get(&self, service_key: &str) -> Option<&Arc<ServiceDescriptor>> {
        self.descriptors.get(service_key)
    }

    /// 服务描述符的来源文件
    pub fn source(&self, service_key: &str) -> Option<&Path> {
        self.sources.get(service_key).map(PathBuf::as_path)
    }

    /// 将用户输入的服务名解析为服务标识
    ///
    /// 依次尝试精确匹配、规范化后的标识或显示名、去掉国家后缀的标识。
    pub fn resolve(&self, name: &str) -> Option<&str> {
        if name.is_empty() {
            return None;
        }
        if let Some((key, _)) = self.descriptors.get_key_value(name) {
            return Some(key.as_str());
        }
        self.names.get(&normalize_name(name)).map(String::as_str)
    }

    /// 按名称选择描述符，名称为空时返回全部
    ///
    /// 无法解析的名称会记录警告并跳过
    pub fn select(&self, names: &[String]) -> Vec<Arc<ServiceDescriptor>> {
        if names.is_empty() {
            return self.all();
        }

        let mut selected: Vec<Arc<ServiceDescriptor>> = Vec::new();
        for name in names {
            match self.resolve(name).and_then(|key| self.descriptors.get(key)) {
                Some(descriptor) => {
                    if !selected
                        .iter()
                        .any(|d| d.service_key == descriptor.service_key)
                    {
                        selected.push(descriptor.clone());
                    }
                }
                None => warn!(
                    "Unknown service '{}'. Available services: {}",
                    name,
                    self.descriptors.keys().cloned().collect::<Vec<_>>().join(", ")
                ),
            }
        }
        selected
    }

    fn insert(&mut self, descriptor: ServiceDescriptor, source: PathBuf) -> Result<(), DescriptorError> {
        let key = descriptor.service_key.clone();
        if self.descriptors.contains_key(&key) {
            return Err(DescriptorError::DuplicateServiceKey(key));
        }

        for alias in aliases(&descriptor) {
            self.names.entry(alias).or_insert_with(|| key.clone());
        }
        self.sources.insert(key.clone(), source);
        self.descriptors.insert(key, Arc::new(descriptor));
        Ok(())
    }
}

/// 描述符加载器
///
/// 扫描配置的目录，同名文件优先选择 JSON，其次 YAML。
pub struct DescriptorLoader {
    dirs: Vec<PathBuf>,
}

impl DescriptorLoader {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }

    /// 加载并校验所有描述符
    ///
    /// 无效的描述符会被跳过并记录错误；目录不可读时返回错误
    pub fn load(&self) -> Result<DescriptorCatalog, DescriptorError> {
        let mut groups: BTreeMap<String, Vec<(PathBuf, DescriptorFormat)>> = BTreeMap::new();

        for dir in &self.dirs {
            if !dir.is_dir() {
                warn!("Descriptor directory not found: {}", dir.display());
                continue;
            }
            let entries = fs::read_dir(dir).map_err(|source| DescriptorError::Io {
                path: dir.clone(),
                source,
            })?;
            for entry in entries {
                let path = entry
                    .map_err(|source| DescriptorError::Io {
                        path: dir.clone(),
                        source,
                    })?
                    .path();
                let Some(format) = DescriptorFormat::from_path(&path) else {
                    continue;
                };
                let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                groups
                    .entry(stem.to_string())
                    .or_default()
                    .push((path.clone(), format));
            }
        }

        let mut catalog = DescriptorCatalog::default();
        for (stem, mut candidates) in groups {
            candidates.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
            let (selected, _) = &candidates[0];

            if candidates.len() > 1 {
                let files: Vec<String> = candidates
                    .iter()
                    .map(|(path, _)| file_name(path))
                    .collect();
                let warning = format!(
                    "Multiple descriptor files for service '{}': {}. Selected '{}' (JSON preferred).",
                    stem,
                    files.join(", "),
                    file_name(selected)
                );
                warn!("{}", warning);
                catalog.warnings.push(warning);
            }

            let descriptor = match parse_descriptor_file(selected)
                .and_then(|descriptor| descriptor.validate_descriptor().map(|_| descriptor))
            {
                Ok(descriptor) => descriptor,
                Err(e) => {
                    error!("Skipping descriptor {}: {}", selected.display(), e);
                    catalog.warnings.push(e.to_string());
                    continue;
                }
            };

            debug!(
                service = %descriptor.service_key,
                source = %selected.display(),
                "Loaded descriptor"
            );
            if let Err(e) = catalog.insert(descriptor, selected.clone()) {
                error!("Skipping descriptor {}: {}", selected.display(), e);
                catalog.warnings.push(e.to_string());
            }
        }

        info!("Loaded {} service descriptor(s)", catalog.len());
        Ok(catalog)
    }
}

/// 解析单个描述符文件（不做校验）
pub fn parse_descriptor_file(path: &Path) -> Result<ServiceDescriptor, DescriptorError> {
    let format = DescriptorFormat::from_path(path).ok_or_else(|| DescriptorError::Parse {
        path: path.to_path_buf(),
        reason: "unsupported file extension".to_string(),
    })?;
    let content = fs::read_to_string(path).map_err(|source| DescriptorError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let parsed = match format {
        DescriptorFormat::Json => serde_json::from_str(&content).map_err(|e| e.to_string()),
        DescriptorFormat::Yaml => serde_yaml::from_str(&content).map_err(|e| e.to_string()),
    };
    parsed.map_err(|reason| DescriptorError::Parse {
        path: path.to_path_buf(),
        reason,
    })
}

/// 规范化服务名：只保留小写字母和数字
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn aliases(descriptor: &ServiceDescriptor) -> Vec<String> {
    let key = normalize_name(&descriptor.service_key);
    let mut names = vec![key.clone()];
    if let Some(display_name) = &descriptor.display_name {
        names.push(normalize_name(display_name));
    }
    if let Some(caps) = COUNTRY_SUFFIX.captures(&key) {
        names.push(caps[1].to_string());
    }
    names.retain(|name| !name.is_empty());
    names
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
