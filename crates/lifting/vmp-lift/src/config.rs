//! 提升配置
//!
//! 从 TOML 加载，缺省字段取默认值：
//!
//! ```toml
//! function_name = "vm_lifted"
//! context_slots = 24
//!
//! [symbolic]
//! optimize = true
//!
//! [object]
//! target = "x86_64-unknown-linux-gnu"
//! opt_level = "speed"
//! is_pic = true
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;
use vmp_core::{DEFAULT_CONTEXT_SLOTS, LiftError, MAX_CONTEXT_SLOTS};

/// 配置错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Serialization error: {0}")]
    Serialize(String),

    #[error("Validation failed: {0}")]
    Validation(String),
}

/// Cranelift 优化级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptLevel {
    None,
    #[default]
    Speed,
    SpeedAndSize,
}

impl OptLevel {
    /// Cranelift `opt_level` 设置值
    pub const fn as_str(self) -> &'static str {
        match self {
            OptLevel::None => "none",
            OptLevel::Speed => "speed",
            OptLevel::SpeedAndSize => "speed_and_size",
        }
    }
}

/// 符号后端配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SymbolicConfig {
    /// 定案时运行块内优化
    pub optimize: bool,
}

impl Default for SymbolicConfig {
    fn default() -> Self {
        Self { optimize: true }
    }
}

/// 目标文件后端配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectConfig {
    /// 目标三元组，`None` 使用宿主 ISA
    pub target: Option<String>,
    pub opt_level: OptLevel,
    pub is_pic: bool,
}

impl Default for ObjectConfig {
    fn default() -> Self {
        Self {
            target: None,
            opt_level: OptLevel::Speed,
            is_pic: true,
        }
    }
}

/// 提升会话配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiftConfig {
    /// 导出符号 / 例程名
    pub function_name: String,
    /// 寄存器文件的 8 字节槽数
    pub context_slots: usize,
    pub symbolic: SymbolicConfig,
    pub object: ObjectConfig,
}

impl Default for LiftConfig {
    fn default() -> Self {
        Self {
            function_name: "vm_lifted".to_string(),
            context_slots: DEFAULT_CONTEXT_SLOTS,
            symbolic: SymbolicConfig::default(),
            object: ObjectConfig::default(),
        }
    }
}

impl LiftConfig {
    /// 从 TOML 字符串加载并校验
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(toml).map_err(|e| ConfigError::Parse(format!("TOML parse error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// 从文件加载
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Parse(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&text)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialize(format!("TOML serialize error: {}", e)))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_symbol(&self.function_name)?;
        validate_context_slots(self.context_slots)?;
        if let Some(target) = &self.object.target
            && target.trim().is_empty()
        {
            return Err(ConfigError::Invalid("object.target must not be empty".to_string()));
        }
        Ok(())
    }
}

/// 函数名必须能作为导出符号
pub fn validate_symbol(name: &str) -> Result<(), ConfigError> {
    if name.is_empty() {
        return Err(ConfigError::Validation(
            "function_name must not be empty".to_string(),
        ));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ConfigError::Validation(format!(
            "function_name `{}` is not a valid symbol",
            name
        )));
    }
    Ok(())
}

/// 寄存器文件槽数必须落在字节立即数可寻址的范围内
pub fn validate_context_slots(slots: usize) -> Result<(), ConfigError> {
    if slots == 0 || slots > MAX_CONTEXT_SLOTS {
        return Err(ConfigError::Invalid(format!(
            "context_slots must be in 1..={}, got {}",
            MAX_CONTEXT_SLOTS, slots
        )));
    }
    Ok(())
}

impl From<ConfigError> for LiftError {
    fn from(err: ConfigError) -> Self {
        LiftError::Config(err.to_string())
    }
}
