use std::env;
use std::sync::OnceLock;

static GRAPHRT_PERF_DATA: OnceLock<bool> = OnceLock::new();
static GRAPHRT_PLAN_CACHE: OnceLock<usize> = OnceLock::new();

const DEFAULT_PLAN_CACHE_CAPACITY: usize = 64;

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

/// `GRAPHRT_PERF_DATA`: start new backends with performance collection enabled.
pub(crate) fn perf_data_enabled() -> bool {
    *GRAPHRT_PERF_DATA.get_or_init(|| match env::var("GRAPHRT_PERF_DATA") {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value),
        _ => false,
    })
}

/// `GRAPHRT_PLAN_CACHE`: compiled-plan cache capacity; 0 disables memoization.
pub(crate) fn plan_cache_capacity() -> usize {
    *GRAPHRT_PLAN_CACHE.get_or_init(|| match env::var("GRAPHRT_PLAN_CACHE") {
        Ok(value) => value.trim().parse().unwrap_or(DEFAULT_PLAN_CACHE_CAPACITY),
        Err(_) => DEFAULT_PLAN_CACHE_CAPACITY,
    })
}

#[cfg(test)]
mod tests {
    use super::parse_bool;

    #[test]
    fn parse_bool_accepts_common_spellings() {
        for value in ["1", "true", "YES", " on "] {
            assert!(parse_bool(value), "{value}");
        }
        for value in ["0", "false", "off", "maybe"] {
            assert!(!parse_bool(value), "{value}");
        }
    }
}
