use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub fast_store: FastStoreConfig,
    #[serde(default)]
    pub seckill: SeckillConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub reaper: ReaperConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub bloom: BloomConfig,
    #[serde(default)]
    pub admin: AdminConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// 雪花订单号的机器 ID（0-1023）
    #[serde(default)]
    pub node_id: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FastStoreBackend {
    Redis,
    /// 进程内存实现，仅用于本地单机调试
    Memory,
}

impl std::str::FromStr for FastStoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "redis" => Ok(FastStoreBackend::Redis),
            "memory" => Ok(FastStoreBackend::Memory),
            other => Err(format!("unknown fast store backend: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FastStoreConfig {
    pub backend: FastStoreBackend,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SeckillConfig {
    /// 下单后支付截止时长（分钟）
    pub order_expire_minutes: i64,
    /// 用户购买标记的有效期（小时）
    pub purchase_marker_ttl_hours: i64,
    /// 预热数据在活动结束后的额外保留时长（小时）
    pub preheat_grace_hours: i64,
    /// 活动状态同步间隔（秒）
    pub status_sweep_interval_secs: u64,
}

impl Default for SeckillConfig {
    fn default() -> Self {
        Self {
            order_expire_minutes: 30,
            purchase_marker_ttl_hours: 24 * 7,
            preheat_grace_hours: 24,
            status_sweep_interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub max_retries: u32,
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
    /// 阻塞出队的最长等待（秒）
    pub pop_timeout_secs: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_secs: 2,
            max_delay_secs: 32,
            pop_timeout_secs: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaperConfig {
    pub tick_millis: u64,
    pub batch_size: usize,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            tick_millis: 1000,
            batch_size: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub window_millis: u64,
    pub global_limit: u64,
    pub ip_limit: u64,
    pub user_limit: u64,
    /// 秒杀下单接口：单用户窗口内的最大请求数
    pub seckill_user_limit: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_millis: 1000,
            global_limit: 10_000,
            ip_limit: 100,
            user_limit: 10,
            seckill_user_limit: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BloomConfig {
    pub expected_items: u64,
    pub false_positive_rate: f64,
}

impl Default for BloomConfig {
    fn default() -> Self {
        Self {
            expected_items: 10_000,
            false_positive_rate: 0.01,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AdminConfig {
    pub user_ids: Vec<i64>,
}

impl Config {
    pub fn from_toml() -> Result<Self, Box<dyn std::error::Error>> {
        let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
        use std::io::ErrorKind;

        // 尝试读取配置文件，如果不存在则完全依赖环境变量
        let config_result = std::fs::read_to_string(&config_path);

        let mut config: Config = match config_result {
            Ok(config_str) => {
                toml::from_str(&config_str).map_err(|e| format!("解析配置文件失败: {e}"))?
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                fn get_env(name: &str) -> Option<String> {
                    env::var(name).ok()
                }
                fn get_env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
                    env::var(name)
                        .ok()
                        .and_then(|v| v.parse::<T>().ok())
                        .unwrap_or(default)
                }

                // 数据库 URL 在无配置文件时必须提供
                let database_url = get_env("DATABASE_URL")
                    .ok_or("缺少 DATABASE_URL 环境变量，且未找到配置文件 config.toml")?;

                Config {
                    server: ServerConfig {
                        host: get_env("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                        port: get_env_parse("SERVER_PORT", 8080u16),
                        node_id: get_env_parse("NODE_ID", 1u16),
                    },
                    database: DatabaseConfig {
                        url: database_url,
                        max_connections: get_env_parse("DB_MAX_CONNECTIONS", 10u32),
                    },
                    fast_store: FastStoreConfig {
                        backend: get_env_parse("FAST_STORE_BACKEND", FastStoreBackend::Redis),
                        url: get_env("REDIS_URL")
                            .unwrap_or_else(|| "redis://127.0.0.1:6379".to_string()),
                    },
                    seckill: SeckillConfig::default(),
                    ledger: LedgerConfig::default(),
                    reaper: ReaperConfig::default(),
                    rate_limit: RateLimitConfig::default(),
                    bloom: BloomConfig::default(),
                    admin: AdminConfig::default(),
                }
            }
            Err(e) => {
                return Err(format!("无法读取配置文件 {config_path}: {e}").into());
            }
        };

        // 环境变量覆盖（即便文件存在时也覆盖）
        if let Ok(v) = env::var("SERVER_HOST") {
            config.server.host = v;
        }
        if let Ok(v) = env::var("SERVER_PORT")
            && let Ok(p) = v.parse()
        {
            config.server.port = p;
        }
        if let Ok(v) = env::var("NODE_ID")
            && let Ok(n) = v.parse()
        {
            config.server.node_id = n;
        }
        if let Ok(v) = env::var("DATABASE_URL") {
            config.database.url = v;
        }
        if let Ok(v) = env::var("DB_MAX_CONNECTIONS")
            && let Ok(mc) = v.parse()
        {
            config.database.max_connections = mc;
        }
        if let Ok(v) = env::var("FAST_STORE_BACKEND")
            && let Ok(b) = v.parse()
        {
            config.fast_store.backend = b;
        }
        if let Ok(v) = env::var("REDIS_URL") {
            config.fast_store.url = v;
        }
        if let Ok(v) = env::var("ADMIN_USER_IDS") {
            config.admin.user_ids = v
                .split(',')
                .filter_map(|s| s.trim().parse::<i64>().ok())
                .collect();
        }
        if let Ok(v) = env::var("SECKILL_ORDER_EXPIRE_MINUTES")
            && let Ok(n) = v.parse()
        {
            config.seckill.order_expire_minutes = n;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_toml_uses_defaults() {
        let raw = r#"
            [server]
            host = "127.0.0.1"
            port = 9000

            [database]
            url = "postgres://localhost/seckill"
            max_connections = 5

            [fast_store]
            backend = "memory"
            url = ""
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.fast_store.backend, FastStoreBackend::Memory);
        assert_eq!(config.ledger.max_retries, 5);
        assert_eq!(config.seckill.order_expire_minutes, 30);
        assert_eq!(config.rate_limit.seckill_user_limit, 1);
        assert!(config.admin.user_ids.is_empty());
    }

    #[test]
    fn test_partial_section_fills_missing_fields() {
        let raw = r#"
            [server]
            host = "127.0.0.1"
            port = 9000

            [database]
            url = "postgres://localhost/seckill"
            max_connections = 5

            [fast_store]
            backend = "redis"
            url = "redis://127.0.0.1:6379"

            [ledger]
            max_retries = 3

            [rate_limit]
            ip_limit = 20
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.ledger.max_retries, 3);
        assert_eq!(config.ledger.base_delay_secs, 2);
        assert_eq!(config.ledger.max_delay_secs, 32);
        assert_eq!(config.rate_limit.ip_limit, 20);
        assert_eq!(config.rate_limit.window_millis, 1000);
    }

    #[test]
    fn test_backend_from_str() {
        assert_eq!("Redis".parse::<FastStoreBackend>(), Ok(FastStoreBackend::Redis));
        assert!("etcd".parse::<FastStoreBackend>().is_err());
    }
}
