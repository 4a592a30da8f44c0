use sea_orm::{Database, DatabaseConnection};

use crate::common::model::config::{DatabaseConfig, RedisConfig};

pub fn create_redis_pool(config: &RedisConfig) -> Option<deadpool_redis::Pool> {
    let pool_config = deadpool_redis::PoolConfig {
        max_size: config.pool_size.unwrap_or(100),
        ..Default::default()
    };

    let cfg = if let Some(url) = &config.url {
        let mut cfg = deadpool_redis::Config::from_url(url.clone());
        cfg.pool = Some(pool_config);
        cfg
    } else {
        let addr = if config.tls.unwrap_or(false) {
            deadpool_redis::ConnectionAddr::TcpTls {
                host: config.redis_host.clone(),
                port: config.redis_port,
                insecure: false,
            }
        } else {
            deadpool_redis::ConnectionAddr::Tcp(config.redis_host.clone(), config.redis_port)
        };
        deadpool_redis::Config {
            connection: Some(deadpool_redis::ConnectionInfo {
                addr,
                redis: deadpool_redis::RedisConnectionInfo {
                    db: config.redis_db as i64,
                    username: config.redis_username.clone(),
                    password: config.redis_password.clone(),
                    protocol: deadpool_redis::ProtocolVersion::RESP3,
                },
            }),
            pool: Some(pool_config),
            ..Default::default()
        }
    };

    match cfg.create_pool(Some(deadpool_redis::Runtime::Tokio1)) {
        Ok(pool) => Some(pool),
        Err(e) => {
            log::error!("Failed to create redis pool: {}", e);
            None
        }
    }
}

/// Opens a new connection pool. The caller owns it and closes it on shutdown.
pub async fn db_connection(config: &DatabaseConfig) -> Option<DatabaseConnection> {
    let mut final_url = config.url.clone()?;
    if config.tls.unwrap_or(false) && !final_url.contains("sslmode=") {
        let joiner = if final_url.contains('?') { "&" } else { "?" };
        final_url = format!("{}{}sslmode=require", final_url, joiner);
    }

    let mut db_options = sea_orm::ConnectOptions::new(final_url);
    if let Some(s) = &config.database_schema {
        db_options.set_schema_search_path(s.clone());
    }
    db_options
        .max_connections(config.pool_size.unwrap_or(10))
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Trace);

    match Database::connect(db_options).await {
        Ok(db) => Some(db),
        Err(e) => {
            log::error!("Failed to connect to database: {}", e);
            None
        }
    }
}
