//! 日志初始化：基于 tracing-subscriber，支持 `RUST_LOG` 覆盖与 JSON 输出。
//!
//! 库本身只通过 `tracing` 宏打点，是否安装订阅者由宿主程序决定。

use serde::{Deserialize, Serialize};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// 默认过滤指令
pub const DEFAULT_LOG_DIRECTIVE: &str = "playlist_sync=info";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` 指令；设置了 `RUST_LOG` 时以环境变量为准
    pub directive: String,
    /// 以 JSON 行输出，便于设备端采集
    pub json: bool,
    pub ansi: bool,
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directive: DEFAULT_LOG_DIRECTIVE.to_string(),
            json: false,
            ansi: true,
            include_target: true,
        }
    }
}

impl LoggingConfig {
    /// 设备端常用配置：JSON、无颜色。
    pub fn device() -> Self {
        Self {
            json: true,
            ansi: false,
            ..Self::default()
        }
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.directive))
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_DIRECTIVE))
    }
}

/// 安装全局订阅者。
///
/// 重复调用不会报错：已有订阅者时返回 `false`。
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let filter = config.env_filter();
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if config.json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(config.include_target)
                    .with_current_span(false),
            )
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_ansi(config.ansi)
                    .with_target(config.include_target),
            )
            .try_init()
    };

    installed.is_ok()
}
