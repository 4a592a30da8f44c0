mod backend;
mod cache_able;
mod local_backend;
mod redis_backend;
mod service;

pub use backend::CacheBackend;
pub use cache_able::CacheAble;
pub use service::CacheService;

#[cfg(test)]
mod tests;
