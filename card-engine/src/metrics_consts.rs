pub const DERIVE_RUNS: &str = "card_engine_unit_derivations";
pub const DERIVE_FAILURES: &str = "card_engine_unit_derivation_failures";
pub const DERIVE_TIME: &str = "card_engine_unit_derivation_ms";
pub const CARDS_WRITTEN: &str = "card_engine_cards_written";

pub const FUSION_RUNS: &str = "card_engine_fusions";
pub const FUSION_FAILURES: &str = "card_engine_fusion_failures";
pub const FUSION_TIME: &str = "card_engine_fusion_ms";
pub const FUSION_STALE: &str = "card_engine_fusion_stale_results";

pub const VIEWS_ASSEMBLED: &str = "card_engine_views_assembled";
pub const VIEW_FAILURES: &str = "card_engine_view_failures";
pub const VIEW_CACHE_DEGRADED: &str = "card_engine_view_cache_degraded";
