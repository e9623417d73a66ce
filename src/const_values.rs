use anyhow::{self, Context};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// 模拟内存配置
#[derive(Deserialize, Debug, Clone)]
pub struct MemoryConfig {
    pub memory_base: u32,
    /// 单位: MB
    pub memory_size: usize,
}

#[derive(Deserialize, Debug, Clone)]
pub struct DebugConfig {
    pub event_list_size: usize,
    /// 命中日志环形缓冲区容量
    #[serde(default = "default_hit_log_size")]
    pub hit_log_size: usize,
}

#[derive(Deserialize, Debug, Clone)]
pub struct SettingsConfig {
    /// 每个游戏的断点文件 (<game_id>.ini) 所在目录
    pub game_settings_dir: PathBuf,
    #[serde(default)]
    pub default_game_id: Option<String>,
}

fn default_hit_log_size() -> usize {
    256
}

/// 调试器配置（来自 profile/config.toml）
#[derive(Deserialize, Debug, Clone)]
pub struct EmuConfig {
    pub memory: MemoryConfig,
    pub debug: DebugConfig,
    pub settings: SettingsConfig,
}

impl EmuConfig {
    pub fn new(path: impl AsRef<Path>) -> anyhow::Result<EmuConfig> {
        let toml_str = std::fs::read_to_string(&path)
            .with_context(|| format!("无法读取配置文件: {:?}", &path.as_ref().as_os_str()))?;
        let config: EmuConfig = toml::from_str(&toml_str)
            .with_context(|| format!("无法解析配置文件: {:?}", &path.as_ref().as_os_str()))?;
        anyhow::Ok(config)
    }

    /// 游戏断点文件路径，相对路径以 `base` 为根
    pub fn game_settings_path(&self, base: &Path, game_id: &str) -> PathBuf {
        let dir = if self.settings.game_settings_dir.is_absolute() {
            self.settings.game_settings_dir.clone()
        } else {
            base.join(&self.settings.game_settings_dir)
        };
        dir.join(format!("{game_id}.ini"))
    }
}
