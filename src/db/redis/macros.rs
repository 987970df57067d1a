/// Read-through caching around an async computation.
///
/// Returns the cached value for `$key` when present. Otherwise awaits `$block`,
/// queues the result for a background write with `$ttl` seconds and returns it.
/// A failed cache read is logged and treated as a miss.
///
/// Must be used inside a function returning `AppResult<_>`.
///
/// ```rust,ignore
/// let titles = cached!(self.cache, CacheKey::TitleSearch(q.to_string()), 3600, async move {
///     self.query_titles(q).await
/// });
/// ```
#[macro_export]
macro_rules! cached {
    ($cache:expr, $key:expr, $ttl:expr, $block:expr) => {{
        let key = $key;
        let hit = match $cache.get_from_cache(&key).await {
            Ok(hit) => hit,
            Err(e) => {
                tracing::warn!(error = %e, key = %key, "Cache read failed, computing value");
                None
            }
        };
        match hit {
            Some(cached) => {
                tracing::debug!(key = %key, "Cache hit");
                Ok(cached)
            }
            None => {
                let value = $block.await?;
                $cache.set_in_background(&key, &value, $ttl);
                Ok(value)
            }
        }
    }};
}
